use crate::authority::TimeAuthority;
use crate::crypto;
use crate::error::{Result, SealError};
use crate::sidechannel;
use crate::store::{InputType, ItemState, ItemStore, SealedItem};
use crate::validate;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use uuid::Uuid;

/// Payload size ceiling.
pub const MAX_PAYLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// One sealing invocation.
///
/// `stdin` carries the bytes piped on standard input, if any; the CLI reads
/// them up front (bounded) since terminal detection is its concern.
pub struct SealRequest {
    pub path: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub unlock_time_text: String,
    pub shred: bool,
    pub clear_clipboard: bool,
}

#[derive(Debug)]
pub struct SealOutcome {
    pub id: String,
    /// Operational warnings from the best-effort side channels. Sealing
    /// success is never rescinded by these.
    pub warnings: Vec<String>,
}

/// Validate, encrypt, time-lock, persist. The metadata rename inside
/// `create_item` is the commit point; any failure before it leaves no
/// persistent effect.
pub fn seal(
    store: &ItemStore,
    authority: &dyn TimeAuthority,
    request: SealRequest,
) -> Result<SealOutcome> {
    let unlock_time = parse_unlock_time(&request.unlock_time_text)?;
    let now = Utc::now();
    if unlock_time <= now {
        return Err(SealError::TimeNotFuture);
    }

    let (payload, input_type, original_path) = read_payload(&request)?;
    if payload.is_empty() {
        return Err(SealError::EmptyInput);
    }
    if payload.len() as u64 > MAX_PAYLOAD_SIZE {
        return Err(SealError::InputTooLarge(MAX_PAYLOAD_SIZE));
    }
    if request.shred && input_type != InputType::File {
        return Err(SealError::ShredRequiresFile);
    }
    if request.clear_clipboard && input_type != InputType::Stdin {
        return Err(SealError::ClearClipboardRequiresStdin);
    }

    let round = authority.round_at(unlock_time)?;
    let key_ref = authority.lock(unlock_time)?;

    let dek = crypto::generate_dek();
    let nonce = crypto::generate_nonce();
    let ciphertext = crypto::encrypt_payload(&dek, &nonce, &payload)?;
    let dek_tlock = if authority.supports_timelock() {
        Some(BASE64.encode(authority.tl_encrypt(&dek, round)?))
    } else {
        None
    };
    drop(dek); // zeroed on drop

    let meta = SealedItem {
        id: Uuid::new_v4().to_string(),
        state: ItemState::Sealed,
        unlock_time,
        input_type,
        original_path,
        time_authority: authority.name().to_string(),
        created_at: now,
        algorithm: crypto::ALGORITHM.to_string(),
        nonce: BASE64.encode(nonce),
        key_ref,
        dek_tlock,
        extra: serde_json::Map::new(),
    };

    let id = store.create_item(&meta, &ciphertext)?;
    validate::validate(&meta, &store.item_dir(&id))
        .map_err(|e| SealError::InternalFault(format!("freshly sealed item: {}", e)))?;
    tracing::info!(id = %id, unlock_time = %unlock_time, "sealed");

    // Side channels after the commit point: they can warn, never unseal.
    let mut warnings = Vec::new();
    if request.shred {
        if let Some(path) = &request.path {
            if let Err(e) = sidechannel::shred_file(path) {
                warnings.push(format!("could not shred {}: {}", path.display(), e));
            }
        }
    }
    if request.clear_clipboard {
        if let Err(e) = sidechannel::clear_clipboard() {
            warnings.push(format!("could not clear clipboard: {}", e));
        }
    }

    Ok(SealOutcome { id, warnings })
}

fn parse_unlock_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SealError::BadTimeFormat(text.to_string()))
}

fn read_payload(request: &SealRequest) -> Result<(Vec<u8>, InputType, Option<String>)> {
    match (&request.path, &request.stdin) {
        (Some(_), Some(_)) => Err(SealError::InputAmbiguous),
        (None, None) => Err(SealError::InputMissing),
        (Some(path), None) => {
            let mut payload = Vec::new();
            File::open(path)?
                .take(MAX_PAYLOAD_SIZE + 1)
                .read_to_end(&mut payload)?;
            Ok((
                payload,
                InputType::File,
                Some(path.display().to_string()),
            ))
        }
        (None, Some(data)) => Ok((data.clone(), InputType::Stdin, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::testing::ManualAuthority;
    use crate::authority::PlaceholderAuthority;
    use crate::store::{PAYLOAD_FILE, UNSEALED_FILE};
    use std::fs;

    fn open_store() -> (tempfile::TempDir, ItemStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::open(dir.path().join("store")).unwrap();
        (dir, store)
    }

    fn stdin_request(payload: &[u8]) -> SealRequest {
        SealRequest {
            path: None,
            stdin: Some(payload.to_vec()),
            unlock_time_text: "2099-01-01T00:00:00Z".to_string(),
            shred: false,
            clear_clipboard: false,
        }
    }

    #[test]
    fn test_rejects_bad_time_format() {
        let (_tmp, store) = open_store();
        let mut request = stdin_request(b"hello");
        request.unlock_time_text = "tomorrow-ish".to_string();
        let err = seal(&store, &ManualAuthority::new(0), request).unwrap_err();
        assert!(matches!(err, SealError::BadTimeFormat(_)));
    }

    #[test]
    fn test_rejects_past_unlock_time() {
        let (_tmp, store) = open_store();
        let mut request = stdin_request(b"hello");
        request.unlock_time_text = "2020-01-01T00:00:00Z".to_string();
        let err = seal(&store, &ManualAuthority::new(0), request).unwrap_err();
        assert!(matches!(err, SealError::TimeNotFuture));
        // Nothing persisted.
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (_tmp, store) = open_store();
        let authority = ManualAuthority::new(0);

        let mut both = stdin_request(b"hello");
        both.path = Some(PathBuf::from("/nonexistent"));
        assert!(matches!(
            seal(&store, &authority, both),
            Err(SealError::InputAmbiguous)
        ));

        let mut neither = stdin_request(b"");
        neither.stdin = None;
        assert!(matches!(
            seal(&store, &authority, neither),
            Err(SealError::InputMissing)
        ));

        assert!(matches!(
            seal(&store, &authority, stdin_request(b"")),
            Err(SealError::EmptyInput)
        ));

        let huge = vec![0u8; (MAX_PAYLOAD_SIZE + 1) as usize];
        assert!(matches!(
            seal(&store, &authority, stdin_request(&huge)),
            Err(SealError::InputTooLarge(_))
        ));
    }

    #[test]
    fn test_rejects_flag_misuse() {
        let (_tmp, store) = open_store();
        let authority = ManualAuthority::new(0);

        let mut shred_stdin = stdin_request(b"hello");
        shred_stdin.shred = true;
        assert!(matches!(
            seal(&store, &authority, shred_stdin),
            Err(SealError::ShredRequiresFile)
        ));

        let (_src_tmp, src) = {
            let tmp = tempfile::tempdir().unwrap();
            let path = tmp.path().join("secret.txt");
            fs::write(&path, b"hello").unwrap();
            (tmp, path)
        };
        let clip_file = SealRequest {
            path: Some(src),
            stdin: None,
            unlock_time_text: "2099-01-01T00:00:00Z".to_string(),
            shred: false,
            clear_clipboard: true,
        };
        assert!(matches!(
            seal(&store, &authority, clip_file),
            Err(SealError::ClearClipboardRequiresStdin)
        ));
    }

    #[test]
    fn test_seal_persists_sealed_item() {
        let (_tmp, store) = open_store();
        let outcome = seal(&store, &ManualAuthority::new(0), stdin_request(b"hello\n")).unwrap();
        assert!(Uuid::parse_str(&outcome.id).is_ok());
        assert!(outcome.warnings.is_empty());

        let meta = store.load_item(&outcome.id).unwrap();
        assert_eq!(meta.state, ItemState::Sealed);
        assert_eq!(meta.input_type, InputType::Stdin);
        assert_eq!(meta.algorithm, "aes-256-gcm");
        assert_eq!(meta.time_authority, "manual");
        assert_eq!(BASE64.decode(&meta.nonce).unwrap().len(), crypto::NONCE_SIZE);
        assert!(!BASE64.decode(meta.dek_tlock.as_ref().unwrap()).unwrap().is_empty());
        assert!(meta.created_at < meta.unlock_time);

        let dir = store.item_dir(&outcome.id);
        assert_ne!(fs::read(dir.join(PAYLOAD_FILE)).unwrap(), b"hello\n");
        assert!(!dir.join(UNSEALED_FILE).exists());
    }

    #[test]
    fn test_seal_from_file_records_path() {
        let (_tmp, store) = open_store();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("note.txt");
        fs::write(&src, b"file contents").unwrap();

        let request = SealRequest {
            path: Some(src.clone()),
            stdin: None,
            unlock_time_text: "2099-01-01T00:00:00Z".to_string(),
            shred: false,
            clear_clipboard: false,
        };
        let outcome = seal(&store, &ManualAuthority::new(0), request).unwrap();
        let meta = store.load_item(&outcome.id).unwrap();
        assert_eq!(meta.input_type, InputType::File);
        assert_eq!(meta.original_path.as_deref(), Some(src.to_str().unwrap()));
        // Sealing alone does not touch the origin file.
        assert_eq!(fs::read(&src).unwrap(), b"file contents");
    }

    #[test]
    fn test_two_seals_differ() {
        let (_tmp, store) = open_store();
        let authority = ManualAuthority::new(0);
        let a = seal(&store, &authority, stdin_request(b"same payload")).unwrap();
        let b = seal(&store, &authority, stdin_request(b"same payload")).unwrap();
        assert_ne!(a.id, b.id);

        let meta_a = store.load_item(&a.id).unwrap();
        let meta_b = store.load_item(&b.id).unwrap();
        assert_ne!(meta_a.nonce, meta_b.nonce);
        assert_ne!(
            store.read_payload(&a.id).unwrap(),
            store.read_payload(&b.id).unwrap()
        );
    }

    #[test]
    fn test_placeholder_items_have_no_dek_tlock() {
        let (_tmp, store) = open_store();
        let outcome = seal(&store, &PlaceholderAuthority, stdin_request(b"inert")).unwrap();
        let meta = store.load_item(&outcome.id).unwrap();
        assert_eq!(meta.time_authority, "placeholder");
        assert!(meta.dek_tlock.is_none());
    }
}
