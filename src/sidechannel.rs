//! Best-effort side channels invoked after a successful seal.
//!
//! Neither operation affects sealing correctness: failures surface as
//! warnings and a completed seal is never rescinded. Filesystem snapshots,
//! backups, SSD wear leveling, and clipboard managers are all outside what
//! these can reach.

use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Overwrite the origin file with zeros, flush, then unlink it.
///
/// Single pass; copy-on-write and journaling filesystems may retain the old
/// blocks.
pub fn shred_file(path: &Path) -> Result<()> {
    let len = fs::metadata(path)?.len();
    {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let zeros = vec![0u8; 64 * 1024];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(zeros.len() as u64) as usize;
            file.write_all(&zeros[..chunk])?;
            remaining -= chunk as u64;
        }
        file.sync_all()?;
    }
    fs::remove_file(path)?;
    tracing::debug!(path = %path.display(), bytes = len, "shredded origin file");
    Ok(())
}

/// Replace the system clipboard contents with nothing.
///
/// Tries the conventional clipboard tool for the platform and feeds it empty
/// input. Missing tools or non-zero exits are errors for the caller to warn
/// about.
pub fn clear_clipboard() -> Result<()> {
    for candidate in clipboard_commands() {
        let (program, args) = candidate;
        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match spawned {
            Ok(status) if status.success() => {
                tracing::debug!(tool = program, "cleared clipboard");
                return Ok(());
            }
            _ => continue,
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no usable clipboard tool",
    )
    .into())
}

#[cfg(target_os = "macos")]
fn clipboard_commands() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![("pbcopy", vec![])]
}

#[cfg(target_os = "windows")]
fn clipboard_commands() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![("clip", vec![])]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn clipboard_commands() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("wl-copy", vec!["--clear"]),
        ("xclip", vec!["-selection", "clipboard"]),
        ("xsel", vec!["--clipboard", "--clear"]),
    ]
}
