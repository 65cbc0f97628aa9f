use crate::error::{Result, SealError};
use crate::store::{ItemState, SealedItem, PENDING_FILE, UNSEALED_FILE};
use std::path::Path;

/// Check that an item's on-disk artifacts match its declared state.
///
/// Stateless and side-effect-free; never repairs. Repair belongs exclusively
/// to the materialization engine's recovery pass. Callers run this after
/// every load and after every state transition.
///
/// A `sealed` item must have no `unsealed` file. An `unlocked` item must have
/// `unsealed`, or transiently `unsealed.pending` left by a crash between the
/// metadata commit and the final rename, which recovery will finish.
pub fn validate(meta: &SealedItem, dir: &Path) -> Result<()> {
    let unsealed = dir.join(UNSEALED_FILE).exists();
    let pending = dir.join(PENDING_FILE).exists();

    match &meta.state {
        ItemState::Sealed => {
            if unsealed {
                return Err(SealError::InvariantViolated(
                    "sealed but unsealed file exists".to_string(),
                ));
            }
        }
        ItemState::Unlocked => {
            if !unsealed && !pending {
                return Err(SealError::InvariantViolated(
                    "unlocked but unsealed file missing".to_string(),
                ));
            }
        }
        ItemState::Unknown(raw) => {
            return Err(SealError::UnknownState(raw.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InputType, ItemStore};
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn item(state: ItemState) -> SealedItem {
        SealedItem {
            id: "item".to_string(),
            state,
            unlock_time: Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap(),
            input_type: InputType::Stdin,
            original_path: None,
            time_authority: "drand".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            algorithm: "aes-256-gcm".to_string(),
            nonce: String::new(),
            key_ref: serde_json::Value::Null,
            dek_tlock: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_sealed_clean_directory_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ItemStore::open(tmp.path().to_path_buf()).unwrap();
        let meta = item(ItemState::Sealed);
        store.create_item(&meta, b"ct").unwrap();
        assert!(validate(&meta, &store.item_dir("item")).is_ok());
    }

    #[test]
    fn test_sealed_with_plaintext_is_violation() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(UNSEALED_FILE), b"leak").unwrap();
        let err = validate(&item(ItemState::Sealed), tmp.path()).unwrap_err();
        assert!(matches!(err, SealError::InvariantViolated(_)));
        assert!(err.to_string().contains("sealed but unsealed file exists"));
    }

    #[test]
    fn test_unlocked_without_plaintext_is_violation() {
        let tmp = tempfile::tempdir().unwrap();
        let err = validate(&item(ItemState::Unlocked), tmp.path()).unwrap_err();
        assert!(err.to_string().contains("unlocked but unsealed file missing"));
    }

    #[test]
    fn test_unlocked_accepts_unsealed_or_pending() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(UNSEALED_FILE), b"pt").unwrap();
        assert!(validate(&item(ItemState::Unlocked), tmp.path()).is_ok());

        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PENDING_FILE), b"pt").unwrap();
        assert!(validate(&item(ItemState::Unlocked), tmp.path()).is_ok());
    }

    #[test]
    fn test_unknown_state_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = validate(&item(ItemState::Unknown("melted".to_string())), tmp.path()).unwrap_err();
        assert!(matches!(err, SealError::UnknownState(_)));
    }

    #[test]
    fn test_sealed_ignores_pending() {
        // A pending file next to a sealed item is recovery's business, not a
        // validator violation.
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PENDING_FILE), b"pt").unwrap();
        assert!(validate(&item(ItemState::Sealed), tmp.path()).is_ok());
    }
}
