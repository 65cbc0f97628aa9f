use crate::error::{Result, SealError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use zeroize::Zeroizing;

/// Capability set a time authority exposes to the sealing and
/// materialization paths.
///
/// The core depends on these operations only; the drand binding in
/// [`crate::drand`] is one implementation. Round identifiers are opaque to
/// callers: they are obtained from `round_at`/`target_round` and handed back
/// unchanged.
pub trait TimeAuthority {
    /// Stable identifier recorded in item metadata.
    fn name(&self) -> &str;

    /// Map an instant to the round that will have been published once the
    /// instant has passed. Monotonic in the instant.
    ///
    /// Fails with `TimeBeforeGenesis` when the instant precedes the
    /// authority's inception.
    fn round_at(&self, unlock_time: DateTime<Utc>) -> Result<u64>;

    /// Authority-specific opaque reference embedded in metadata at sealing
    /// time. The drand binding emits `{"network": .., "target_round": ..}`.
    fn lock(&self, unlock_time: DateTime<Utc>) -> Result<Value>;

    /// Recover the round identifier from a persisted `key_ref`.
    fn target_round(&self, key_ref: &Value) -> Result<u64>;

    /// Whether this authority can time-lock-encrypt at all. Items sealed
    /// under an authority without time-lock support never materialize.
    fn supports_timelock(&self) -> bool;

    /// Time-lock-encrypt a data encryption key to `round`.
    fn tl_encrypt(&self, dek: &[u8], round: u64) -> Result<Vec<u8>>;

    /// Network-checked: true iff the authority has published a round
    /// >= `round`. Never returns true speculatively; transport failures are
    /// `AuthorityUnavailable`.
    fn can_unlock(&self, round: u64) -> Result<bool>;

    /// Recover a data encryption key from its time-locked wrapping.
    fn tl_decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Authority without time-lock support.
///
/// Items sealed under it persist with `dek_tlock` absent and stay sealed
/// forever, which keeps tests deterministic and offline.
pub struct PlaceholderAuthority;

pub const PLACEHOLDER_AUTHORITY: &str = "placeholder";

impl TimeAuthority for PlaceholderAuthority {
    fn name(&self) -> &str {
        PLACEHOLDER_AUTHORITY
    }

    fn round_at(&self, unlock_time: DateTime<Utc>) -> Result<u64> {
        // Seconds since epoch stand in for rounds; monotonic, offline.
        let ts = unlock_time.timestamp();
        if ts < 0 {
            return Err(SealError::TimeBeforeGenesis(self.name().to_string()));
        }
        Ok(ts as u64)
    }

    fn lock(&self, unlock_time: DateTime<Utc>) -> Result<Value> {
        let round = self.round_at(unlock_time)?;
        Ok(serde_json::json!({
            "network": PLACEHOLDER_AUTHORITY,
            "target_round": round,
        }))
    }

    fn target_round(&self, key_ref: &Value) -> Result<u64> {
        round_from_key_ref(key_ref)
    }

    fn supports_timelock(&self) -> bool {
        false
    }

    fn tl_encrypt(&self, _dek: &[u8], _round: u64) -> Result<Vec<u8>> {
        Err(SealError::Encryption(
            "placeholder authority cannot time-lock-encrypt".to_string(),
        ))
    }

    fn can_unlock(&self, _round: u64) -> Result<bool> {
        Ok(false)
    }

    fn tl_decrypt(&self, _ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Err(SealError::Decryption(
            "placeholder authority cannot time-lock-decrypt".to_string(),
        ))
    }
}

/// Parse the `target_round` field out of a `{network, target_round}` key_ref.
pub(crate) fn round_from_key_ref(key_ref: &Value) -> Result<u64> {
    key_ref
        .get("target_round")
        .and_then(Value::as_u64)
        .ok_or_else(|| SealError::Corrupted("key_ref has no target_round".to_string()))
}
