use crate::authority::{round_from_key_ref, TimeAuthority};
use crate::error::{Result, SealError};
use chrono::{DateTime, Utc};
use drand_core::HttpClient;
use once_cell::sync::OnceCell;
use serde_json::Value;
use zeroize::Zeroizing;

// ============================================================================
// DRAND QUICKNET BEACON CONFIGURATION
// ============================================================================
// Quicknet is the recommended unchained beacon for tlock encryption.
// It produces randomness every 3 seconds with BLS signatures on G1.
// See: https://drand.love/developer/http-api/

/// Drand Quicknet chain hash (hex encoded)
pub const QUICKNET_CHAIN_HASH: &str =
    "52db9ba70e0cc0f6eaf7803dd07447a1f5477735fd3f661792ba94600c84e971";

/// Drand HTTP endpoint
pub const DRAND_BASE_URL: &str = "https://api.drand.sh";

/// Authority identifier recorded in item metadata
pub const DRAND_AUTHORITY: &str = "drand";

/// Network configuration for a drand beacon chain.
///
/// Genesis time, period, and the chain public key are not part of the
/// configuration: they are fetched from `/info` once per process and cached.
#[derive(Debug, Clone)]
pub struct DrandConfig {
    pub base_url: String,
    pub chain_hash: String,
    pub network_name: String,
}

impl Default for DrandConfig {
    fn default() -> Self {
        Self {
            base_url: DRAND_BASE_URL.to_string(),
            chain_hash: QUICKNET_CHAIN_HASH.to_string(),
            network_name: "quicknet".to_string(),
        }
    }
}

/// Time authority backed by a drand beacon chain.
///
/// The beacon is the only source of time truth at unlock time: `can_unlock`
/// and `tl_decrypt` consult the network, never the local clock.
pub struct DrandAuthority {
    config: DrandConfig,
    client: OnceCell<HttpClient>,
    info: OnceCell<ChainParams>,
}

/// The `/info` fields the authority needs, cached for the process lifetime.
struct ChainParams {
    genesis_time: u64,
    period: u64,
    public_key: Vec<u8>,
    hash: Vec<u8>,
}

impl DrandAuthority {
    pub fn new(config: DrandConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
            info: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&HttpClient> {
        self.client.get_or_try_init(|| {
            let url = format!("{}/{}", self.config.base_url, self.config.chain_hash);
            HttpClient::new(&url, None)
                .map_err(|e| SealError::AuthorityUnavailable(format!("client for {}: {}", url, e)))
        })
    }

    fn params(&self) -> Result<&ChainParams> {
        self.info.get_or_try_init(|| {
            let info = self
                .client()?
                .chain_info()
                .map_err(|e| SealError::AuthorityUnavailable(format!("chain info: {}", e)))?;
            tracing::debug!(
                network = %self.config.network_name,
                genesis = info.genesis_time(),
                period = info.period(),
                "fetched chain info"
            );
            Ok(ChainParams {
                genesis_time: info.genesis_time(),
                period: info.period(),
                public_key: info.public_key(),
                hash: info.hash(),
            })
        })
    }
}

/// First round published at or after `timestamp`.
///
/// Round `r` is published at `genesis + (r - 1) * period`, so the first round
/// at or after an instant is `ceil((timestamp - genesis) / period)`, with the
/// genesis instant itself mapping to round 1.
fn round_after(genesis_time: u64, period: u64, timestamp: u64) -> u64 {
    let elapsed = timestamp.saturating_sub(genesis_time);
    if elapsed == 0 {
        return 1;
    }
    elapsed.div_ceil(period).max(1)
}

impl TimeAuthority for DrandAuthority {
    fn name(&self) -> &str {
        DRAND_AUTHORITY
    }

    fn round_at(&self, unlock_time: DateTime<Utc>) -> Result<u64> {
        let params = self.params()?;
        let ts = unlock_time.timestamp();
        if ts < 0 || (ts as u64) < params.genesis_time {
            return Err(SealError::TimeBeforeGenesis(
                self.config.network_name.clone(),
            ));
        }
        Ok(round_after(params.genesis_time, params.period, ts as u64))
    }

    fn lock(&self, unlock_time: DateTime<Utc>) -> Result<Value> {
        let round = self.round_at(unlock_time)?;
        Ok(serde_json::json!({
            "network": self.config.network_name,
            "target_round": round,
        }))
    }

    fn target_round(&self, key_ref: &Value) -> Result<u64> {
        round_from_key_ref(key_ref)
    }

    fn supports_timelock(&self) -> bool {
        true
    }

    fn tl_encrypt(&self, dek: &[u8], round: u64) -> Result<Vec<u8>> {
        let params = self.params()?;
        let mut out = Vec::new();
        tlock_age::encrypt(&mut out, dek, &params.hash, &params.public_key, round)
            .map_err(|e| SealError::Encryption(format!("tlock encryption failed: {}", e)))?;
        Ok(out)
    }

    fn can_unlock(&self, round: u64) -> Result<bool> {
        let latest = self
            .client()?
            .latest()
            .map_err(|e| SealError::AuthorityUnavailable(format!("latest beacon: {}", e)))?;
        Ok(latest.round() >= round)
    }

    fn tl_decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        // The target round and chain hash travel in the tlock age header.
        let header = tlock_age::decrypt_header(ciphertext)
            .map_err(|e| SealError::Decryption(format!("unreadable tlock header: {}", e)))?;

        // can_unlock has already vouched for the round, so a fetch failure
        // here is transport, not an unreached round.
        let beacon = self.client()?.get(header.round()).map_err(|e| {
            SealError::AuthorityUnavailable(format!(
                "signature for round {}: {}",
                header.round(),
                e
            ))
        })?;

        let mut dek = Vec::new();
        tlock_age::decrypt(&mut dek, ciphertext, &header.hash(), &beacon.signature())
            .map_err(|e| SealError::Decryption(format!("tlock decryption failed: {}", e)))?;
        Ok(Zeroizing::new(dek))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Quicknet parameters, fixed since chain genesis.
    const GENESIS: u64 = 1692803367;
    const PERIOD: u64 = 3;

    #[test]
    fn test_round_after_genesis_edge() {
        // The genesis instant maps to the first round ever published.
        assert_eq!(round_after(GENESIS, PERIOD, GENESIS), 1);
    }

    #[test]
    fn test_round_after_rounds_up() {
        // 1s and 3s past genesis both need round 1's successor at most.
        assert_eq!(round_after(GENESIS, PERIOD, GENESIS + 1), 1);
        assert_eq!(round_after(GENESIS, PERIOD, GENESIS + 3), 1);
        assert_eq!(round_after(GENESIS, PERIOD, GENESIS + 4), 2);
        assert_eq!(round_after(GENESIS, PERIOD, GENESIS + 6), 2);
        assert_eq!(round_after(GENESIS, PERIOD, GENESIS + 7), 3);
    }

    #[test]
    fn test_round_after_is_monotonic() {
        let mut last = 0;
        for offset in 0..100 {
            let round = round_after(GENESIS, PERIOD, GENESIS + offset);
            assert!(round >= last);
            last = round;
        }
    }

    #[test]
    fn test_key_ref_round_trip() {
        let key_ref = serde_json::json!({
            "network": "quicknet",
            "target_round": 123456u64,
        });
        assert_eq!(round_from_key_ref(&key_ref).unwrap(), 123456);
    }

    #[test]
    fn test_key_ref_missing_round_is_corrupted() {
        let key_ref = serde_json::json!({ "network": "quicknet" });
        assert!(matches!(
            round_from_key_ref(&key_ref),
            Err(SealError::Corrupted(_))
        ));
    }

    #[test]
    fn test_default_config_targets_quicknet() {
        let config = DrandConfig::default();
        assert_eq!(config.chain_hash, QUICKNET_CHAIN_HASH);
        assert_eq!(config.network_name, "quicknet");
    }
}
