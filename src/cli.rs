// cli.rs - Command line surface for seal

use crate::drand::{DrandAuthority, DrandConfig};
use crate::error::Result;
use crate::materialize;
use crate::seal::{self, SealRequest, MAX_PAYLOAD_SIZE};
use crate::store::{resolve_base_dir, ItemStore};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

/// Fixed warning texts, emitted once per invocation whenever the
/// corresponding flag is in effect. Part of the contract, not suppressible.
const SHRED_WARNING: &str = "warning: file shredding on modern filesystems is best-effort only. backups, snapshots, wear leveling, and caches may retain data.";
const CLIPBOARD_WARNING: &str =
    "warning: clipboard clearing is best-effort; the OS or other apps may retain copies";

/// Seal - encrypt data until a future instant verified by drand
#[derive(Parser, Debug)]
#[command(name = "seal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seal a file or stdin until a future instant; prints the item id
    Lock {
        /// File to seal; omit to read stdin
        path: Option<PathBuf>,

        /// Unlock instant, RFC3339 (e.g. 2027-01-01T00:00:00Z)
        #[arg(long)]
        until: String,

        /// Best-effort overwrite-and-delete of the origin file (file input only)
        #[arg(long)]
        shred: bool,

        /// Best-effort wipe of the system clipboard (stdin input only)
        #[arg(long = "clear-clipboard")]
        clear_clipboard: bool,
    },

    /// List items, materializing any whose unlock round has been published
    Status,
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Lock {
            path,
            until,
            shred,
            clear_clipboard,
        } => cmd_lock(path, until, shred, clear_clipboard),
        Commands::Status => cmd_status(),
    }
}

/// Lock command implementation
fn cmd_lock(path: Option<PathBuf>, until: String, shred: bool, clear_clipboard: bool) -> ExitCode {
    match lock_inner(path, until, shred, clear_clipboard) {
        Ok(id) => {
            println!("{}", id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn lock_inner(
    path: Option<PathBuf>,
    until: String,
    shred: bool,
    clear_clipboard: bool,
) -> Result<String> {
    let request = SealRequest {
        path,
        stdin: read_piped_stdin()?,
        unlock_time_text: until,
        shred,
        clear_clipboard,
    };

    let store = ItemStore::open(resolve_base_dir()?)?;
    let authority = DrandAuthority::new(DrandConfig::default());
    let outcome = seal::seal(&store, &authority, request)?;

    if shred {
        eprintln!("{}", SHRED_WARNING);
    }
    if clear_clipboard {
        eprintln!("{}", CLIPBOARD_WARNING);
    }
    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning);
    }

    Ok(outcome.id)
}

/// Bytes piped on stdin, bounded; `None` when stdin is a terminal or empty.
fn read_piped_stdin() -> Result<Option<Vec<u8>>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut data = Vec::new();
    io::stdin()
        .lock()
        .take(MAX_PAYLOAD_SIZE + 1)
        .read_to_end(&mut data)?;
    Ok(if data.is_empty() { None } else { Some(data) })
}

/// Status command implementation
fn cmd_status() -> ExitCode {
    match status_inner() {
        Ok(clean) => {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn status_inner() -> Result<bool> {
    let store = ItemStore::open(resolve_base_dir()?)?;
    let authority = DrandAuthority::new(DrandConfig::default());
    let outcomes = materialize::process_store(&store, &authority)?;

    if outcomes.is_empty() {
        println!("no sealed items");
        return Ok(true);
    }

    let mut clean = true;
    for (i, outcome) in outcomes.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("id: {}", outcome.meta.id);
        println!("state: {}", outcome.meta.state);
        println!(
            "unlock_time: {}",
            outcome
                .meta
                .unlock_time
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        println!("input_type: {}", outcome.meta.input_type);

        if let Some(e) = &outcome.error {
            eprintln!("error: {}: {}", outcome.meta.id, e);
            clean = false;
        }
    }

    Ok(clean)
}
