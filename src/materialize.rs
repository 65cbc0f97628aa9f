use crate::authority::TimeAuthority;
use crate::crypto;
use crate::error::{Result, SealError};
use crate::store::{ItemState, ItemStore, SealedItem, PENDING_FILE};
use crate::validate;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// One item's view after a status pass: its (possibly transitioned)
/// metadata, plus the hard error recorded against it, if any.
pub struct ItemOutcome {
    pub meta: SealedItem,
    pub error: Option<SealError>,
}

/// Drive recovery and materialization across the whole store.
///
/// Items are processed in `created_at` order; a failure on one item never
/// aborts the others. Benign conditions (authority unreachable, round not
/// yet published, foreign authority, absent `dek_tlock`) leave items sealed
/// and record nothing.
pub fn process_store(
    store: &ItemStore,
    authority: &dyn TimeAuthority,
) -> Result<Vec<ItemOutcome>> {
    let items = store.list()?;

    // Recovery first, for every item, before any unlock attempt.
    let mut outcomes = Vec::with_capacity(items.len());
    for meta in items {
        let error = recover_item(store, &meta).err();
        outcomes.push(ItemOutcome { meta, error });
    }

    for outcome in &mut outcomes {
        if outcome.error.is_some() {
            continue;
        }
        let dir = store.item_dir(&outcome.meta.id);
        if let Err(e) = validate::validate(&outcome.meta, &dir) {
            outcome.error = Some(e);
            continue;
        }
        match try_materialize(store, authority, &mut outcome.meta) {
            Ok(true) => tracing::info!(id = %outcome.meta.id, "materialized"),
            Ok(false) => {}
            Err(e) => outcome.error = Some(e),
        }
    }

    Ok(outcomes)
}

/// Finish or abort an interrupted two-phase commit.
///
/// The metadata is the decider: a pending file next to `unlocked` metadata
/// crashed after the commit point and is renamed into place; next to
/// `sealed` metadata it crashed before the commit point and is deleted.
pub fn recover_item(store: &ItemStore, meta: &SealedItem) -> Result<()> {
    let dir = store.item_dir(&meta.id);
    if !dir.join(PENDING_FILE).exists() {
        return Ok(());
    }
    match meta.state {
        ItemState::Unlocked => {
            tracing::warn!(id = %meta.id, "finishing interrupted materialization");
            store.commit_pending(&meta.id)
        }
        ItemState::Sealed => {
            tracing::warn!(id = %meta.id, "discarding interrupted materialization");
            store.abort_pending(&meta.id)
        }
        // Leave the directory untouched; the validator reports the state.
        ItemState::Unknown(_) => Ok(()),
    }
}

/// Attempt to unlock one sealed item. Returns whether it materialized.
///
/// Never fails open: every authority or transport failure leaves the item
/// in its current state, and no plaintext touches the disk until the
/// payload has authenticated.
pub fn try_materialize(
    store: &ItemStore,
    authority: &dyn TimeAuthority,
    meta: &mut SealedItem,
) -> Result<bool> {
    if meta.state != ItemState::Sealed {
        return Ok(false);
    }
    // Items from other authorities, and items sealed without time-lock
    // support, are inert.
    if meta.time_authority != authority.name() || !authority.supports_timelock() {
        tracing::debug!(id = %meta.id, authority = %meta.time_authority, "inert item");
        return Ok(false);
    }
    let Some(dek_tlock) = meta.dek_tlock.clone() else {
        tracing::debug!(id = %meta.id, "no time-locked key, item stays sealed");
        return Ok(false);
    };

    let round = authority.target_round(&meta.key_ref)?;
    match authority.can_unlock(round) {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(e) if e.is_benign() => {
            tracing::debug!(id = %meta.id, error = %e, "authority unreachable, retrying later");
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    let wrapped = BASE64
        .decode(&dek_tlock)
        .map_err(|e| SealError::Corrupted(format!("dek_tlock is not base64: {}", e)))?;
    let dek = match authority.tl_decrypt(&wrapped) {
        Ok(dek) => dek,
        Err(e) if e.is_benign() => return Ok(false),
        Err(e) => return Err(e),
    };

    if meta.algorithm != crypto::ALGORITHM {
        return Err(SealError::Corrupted(format!(
            "unsupported algorithm {:?}",
            meta.algorithm
        )));
    }
    let nonce_bytes = BASE64
        .decode(&meta.nonce)
        .map_err(|e| SealError::Corrupted(format!("nonce is not base64: {}", e)))?;
    let nonce: [u8; crypto::NONCE_SIZE] = nonce_bytes
        .as_slice()
        .try_into()
        .map_err(|_| SealError::Corrupted("nonce is not 12 bytes".to_string()))?;

    let ciphertext = store.read_payload(&meta.id)?;
    // An authentication failure aborts here: the item stays sealed and no
    // pending file is ever written.
    let plaintext = crypto::decrypt_payload(&dek, &nonce, &ciphertext)?;

    // Phase 1: stage the plaintext durably.
    store.write_pending(&meta.id, &plaintext)?;

    // Phase 2: the metadata rename is the linearization point, then the
    // staged plaintext is revealed.
    let mut unlocked = meta.clone();
    unlocked.state = ItemState::Unlocked;
    store.save_meta(&unlocked)?;
    *meta = unlocked;
    store.commit_pending(&meta.id)?;

    validate::validate(meta, &store.item_dir(&meta.id))
        .map_err(|e| SealError::InternalFault(format!("post-materialization: {}", e)))?;
    Ok(true)
}
