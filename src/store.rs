use crate::error::{Result, SealError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// On-disk layout, per item directory <store>/<id>/
// ============================================================================

/// Item metadata, canonical pretty-printed JSON.
pub const META_FILE: &str = "meta.json";

/// AEAD output only: `ciphertext || tag`.
pub const PAYLOAD_FILE: &str = "payload.bin";

/// Plaintext, present iff the item is unlocked.
pub const UNSEALED_FILE: &str = "unsealed";

/// Transient plaintext staging file during the materialization commit.
pub const PENDING_FILE: &str = "unsealed.pending";

// ============================================================================
// Metadata model
// ============================================================================

/// Lifecycle state of an item. The only legal transition is
/// `Sealed -> Unlocked`, performed by the materialization engine.
///
/// Unrecognized on-disk values deserialize into `Unknown` so the validator
/// can report them instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Sealed,
    Unlocked,
    Unknown(String),
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Sealed => f.write_str("sealed"),
            ItemState::Unlocked => f.write_str("unlocked"),
            ItemState::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for ItemState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "sealed" => ItemState::Sealed,
            "unlocked" => ItemState::Unlocked,
            _ => ItemState::Unknown(raw),
        })
    }
}

/// Where the sealed payload came from. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    File,
    Stdin,
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputType::File => f.write_str("file"),
            InputType::Stdin => f.write_str("stdin"),
        }
    }
}

/// One sealed commitment. Everything but `state` is immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedItem {
    pub id: String,
    pub state: ItemState,
    pub unlock_time: DateTime<Utc>,
    pub input_type: InputType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    pub time_authority: String,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
    /// Base64 of the payload nonce (12 bytes raw for GCM).
    pub nonce: String,
    /// Authority-specific opaque reference, e.g. `{network, target_round}`.
    pub key_ref: serde_json::Value,
    /// Base64 of the time-lock-encrypted DEK. Absent when the sealing
    /// authority has no time-lock support; such items never materialize.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dek_tlock: Option<String>,
    /// Fields written by newer versions survive a rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Store
// ============================================================================

/// Per-platform base directory for the item store.
///
/// Owner-private subdirectory of the platform data directory; tests redirect
/// it through the usual home/XDG overrides.
pub fn resolve_base_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no platform data directory available",
        )
    })?;
    Ok(data_dir.join("seal"))
}

/// The on-disk item store: one subdirectory per item.
///
/// All metadata writes go through write-temp-then-rename; the rename is the
/// commit point. Nothing here writes `meta.json` in place.
pub struct ItemStore {
    base: PathBuf,
}

impl ItemStore {
    /// Open the store, creating the base directory (owner-only) if missing.
    pub fn open(base: PathBuf) -> Result<Self> {
        create_private_dir_all(&base)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn item_dir(&self, id: &str) -> PathBuf {
        self.base.join(id)
    }

    /// Persist a new item: directory, metadata, payload. The metadata rename
    /// is the sealing commit point. A partial failure leaves a directory that
    /// fails validation on the next load; it is surfaced, never auto-deleted.
    pub fn create_item(&self, meta: &SealedItem, payload_ciphertext: &[u8]) -> Result<String> {
        let dir = self.item_dir(&meta.id);
        create_private_dir_all(&dir)?;
        atomic_write(&dir.join(PAYLOAD_FILE), payload_ciphertext)?;
        atomic_write(&dir.join(META_FILE), &to_pretty_json(meta)?)?;
        tracing::debug!(id = %meta.id, "item persisted");
        Ok(meta.id.clone())
    }

    /// Read and parse an item's metadata. Schema mismatch or missing
    /// required fields surface as `Corrupted`.
    pub fn load_item(&self, id: &str) -> Result<SealedItem> {
        let path = self.item_dir(id).join(META_FILE);
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SealError::Corrupted(format!("{}: {}", path.display(), e)))
    }

    /// Atomically rewrite an item's metadata.
    pub fn save_meta(&self, meta: &SealedItem) -> Result<()> {
        let path = self.item_dir(&meta.id).join(META_FILE);
        atomic_write(&path, &to_pretty_json(meta)?)?;
        Ok(())
    }

    /// Enumerate items, `created_at` ascending.
    ///
    /// A missing store directory is an empty store. Non-directories are
    /// skipped; directories whose metadata does not parse are skipped with an
    /// audit record and surfaced when referenced by id.
    pub fn list(&self) -> Result<Vec<SealedItem>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match self.load_item(&id) {
                Ok(meta) => items.push(meta),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping unreadable item");
                }
            }
        }
        items.sort_by_key(|meta| meta.created_at);
        Ok(items)
    }

    /// Ciphertext blob for an item.
    pub fn read_payload(&self, id: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.item_dir(id).join(PAYLOAD_FILE))?)
    }

    /// Materialization phase 1: stage plaintext in `unsealed.pending`,
    /// durably (contents and directory both fsynced).
    pub fn write_pending(&self, id: &str, plaintext: &[u8]) -> Result<()> {
        let dir = self.item_dir(id);
        let path = dir.join(PENDING_FILE);
        {
            let mut file = create_private_file(&path)?;
            file.write_all(plaintext)?;
            file.sync_all()?;
        }
        sync_dir(&dir)?;
        Ok(())
    }

    /// Reveal staged plaintext: rename `unsealed.pending` to `unsealed`.
    pub fn commit_pending(&self, id: &str) -> Result<()> {
        let dir = self.item_dir(id);
        fs::rename(dir.join(PENDING_FILE), dir.join(UNSEALED_FILE))?;
        sync_dir(&dir)?;
        Ok(())
    }

    /// Discard staged plaintext from an interrupted or abandoned commit.
    pub fn abort_pending(&self, id: &str) -> Result<()> {
        fs::remove_file(self.item_dir(id).join(PENDING_FILE))?;
        Ok(())
    }
}

// ============================================================================
// Filesystem discipline
// ============================================================================

fn to_pretty_json(meta: &SealedItem) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(meta)
        .map_err(|e| SealError::InternalFault(format!("metadata serialization: {}", e)))
}

/// Write-to-tempfile, fsync, rename over the target, fsync the directory.
/// The rename is the commit point; a crash leaves either the previous file
/// or the next one, plus at worst an inert `.tmp`.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = create_private_file(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Open for writing with owner-only permissions from the first byte.
#[cfg(unix)]
fn create_private_file(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(unix)]
fn create_private_dir_all(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir_all(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
