//! Sender-key group messaging.
//!
//! A sender announces a chain once, pairwise, with a
//! [`SenderKeyDistributionMessage`]. Each group message then costs one
//! symmetric chain step and one signature, independent of group size.

use palisade_crypto::{IdentityKeyPair, SenderChainKey, SenderMessageKey, aead};
use palisade_proto::{
    CiphertextMessageType, ProtocolAddress, SENDERKEY_MESSAGE_CURRENT_VERSION,
    SenderKeyDistributionMessage, SenderKeyMessage, Uuid,
};
use rand::{CryptoRng, Rng};
use tracing::{debug, info, warn};

use crate::{
    consts::MAX_FORWARD_JUMPS,
    error::{EngineError, Result},
    state::{SenderKeyRecord, SenderKeyState},
    storage::SenderKeyStore,
};

/// Distribution message for our own chain in `distribution_id`, creating
/// the chain on first use.
///
/// An existing chain is announced at its current iteration, so members who
/// join late cannot read earlier messages.
pub async fn create_sender_key_distribution_message<R: Rng + CryptoRng>(
    sender: &ProtocolAddress,
    distribution_id: Uuid,
    sender_key_store: &mut dyn SenderKeyStore,
    rng: &mut R,
) -> Result<SenderKeyDistributionMessage> {
    let mut record = sender_key_store
        .load_sender_key(sender, distribution_id)
        .await?
        .unwrap_or_else(SenderKeyRecord::new_empty);

    if record.sender_key_state().is_none() {
        let chain_id = rng.r#gen::<u32>() >> 1;
        let signing_key = IdentityKeyPair::generate(rng);
        let chain_key = SenderChainKey::new(0, rng.r#gen::<[u8; 32]>());
        record.set_sender_key_state(SenderKeyState::new(
            SENDERKEY_MESSAGE_CURRENT_VERSION,
            chain_id,
            chain_key,
            signing_key.identity_key(),
            Some(signing_key),
        ));
        sender_key_store.store_sender_key(sender, distribution_id, &record).await?;
        info!(%sender, %distribution_id, chain_id, "created sender key chain");
    }

    let state = record
        .sender_key_state()
        .ok_or_else(|| EngineError::invalid_state("create_sender_key_distribution_message", "no chain"))?;
    Ok(SenderKeyDistributionMessage::new(
        state.message_version(),
        distribution_id,
        state.chain_id(),
        state.chain_key().iteration(),
        *state.chain_key().seed(),
        *state.signing_key_public(),
    )?)
}

/// Store the chain announced by `skdm` for `sender`.
pub async fn process_sender_key_distribution_message(
    sender: &ProtocolAddress,
    skdm: &SenderKeyDistributionMessage,
    sender_key_store: &mut dyn SenderKeyStore,
) -> Result<()> {
    let distribution_id = skdm.distribution_id();
    let mut record = sender_key_store
        .load_sender_key(sender, distribution_id)
        .await?
        .unwrap_or_else(SenderKeyRecord::new_empty);

    record.add_sender_key_state(SenderKeyState::new(
        skdm.message_version(),
        skdm.chain_id(),
        SenderChainKey::new(skdm.iteration(), *skdm.chain_key()),
        *skdm.signing_key(),
        None,
    ));
    sender_key_store.store_sender_key(sender, distribution_id, &record).await?;

    info!(%sender, %distribution_id, chain_id = skdm.chain_id(), iteration = skdm.iteration(), "processed sender key distribution");
    Ok(())
}

/// Encrypt `ptext` to the group on our chain for `distribution_id`.
pub async fn group_encrypt(
    sender_key_store: &mut dyn SenderKeyStore,
    sender: &ProtocolAddress,
    distribution_id: Uuid,
    ptext: &[u8],
) -> Result<SenderKeyMessage> {
    let mut record = sender_key_store
        .load_sender_key(sender, distribution_id)
        .await?
        .ok_or(EngineError::NoSenderKeyState { distribution_id })?;
    let state = record.sender_key_state_mut().ok_or(EngineError::NoSenderKeyState { distribution_id })?;

    let signing_key = state
        .signing_key_private()
        .ok_or_else(|| EngineError::invalid_state("group_encrypt", "chain has no signing key"))?
        .clone();
    let message_key = state.chain_key().sender_message_key()?;
    let ctext = aead::encrypt(message_key.cipher_key(), message_key.nonce(), &[], ptext)?;

    let message = SenderKeyMessage::new(
        state.message_version(),
        distribution_id,
        state.chain_id(),
        message_key.iteration(),
        &ctext,
        &signing_key,
    )?;
    let next = state.chain_key().next()?;
    state.set_chain_key(next);

    sender_key_store.store_sender_key(sender, distribution_id, &record).await?;
    debug!(%distribution_id, iteration = message.iteration(), "group encrypted");
    Ok(message)
}

/// Decrypt a serialized SenderKeyMessage from `sender`.
pub async fn group_decrypt(
    skm_bytes: &[u8],
    sender_key_store: &mut dyn SenderKeyStore,
    sender: &ProtocolAddress,
) -> Result<Vec<u8>> {
    let skm = SenderKeyMessage::try_from(skm_bytes)?;
    let distribution_id = skm.distribution_id();

    let mut record = sender_key_store
        .load_sender_key(sender, distribution_id)
        .await?
        .ok_or(EngineError::NoSenderKeyState { distribution_id })?;
    let state = record
        .sender_key_state_for_chain_id(skm.chain_id())
        .ok_or(EngineError::NoSenderKeyState { distribution_id })?;

    if skm.message_version() != state.message_version() {
        return Err(EngineError::invalid_message(
            CiphertextMessageType::SenderKey,
            format!(
                "message version {} does not match chain version {}",
                skm.message_version(),
                state.message_version()
            ),
        ));
    }
    if !skm.verify_signature(state.signing_key_public()) {
        warn!(%sender, %distribution_id, "sender key message signature invalid");
        return Err(EngineError::invalid_message(CiphertextMessageType::SenderKey, "signature verification failed"));
    }

    let message_key = get_sender_key(state, skm.iteration())?;
    let ptext = aead::decrypt(message_key.cipher_key(), message_key.nonce(), &[], skm.ciphertext())
        .map_err(|_| EngineError::invalid_message(CiphertextMessageType::SenderKey, "ciphertext failed to decrypt"))?;

    sender_key_store.store_sender_key(sender, distribution_id, &record).await?;
    Ok(ptext)
}

fn get_sender_key(state: &mut SenderKeyState, iteration: u32) -> Result<SenderMessageKey> {
    let chain_key = state.chain_key().clone();
    let current = chain_key.iteration();

    if current > iteration {
        return match state.take_message_key(iteration)? {
            Some(key) => Ok(key),
            None => Err(EngineError::DuplicatedMessage { chain_index: current, counter: iteration }),
        };
    }

    let jump = iteration - current;
    if jump > MAX_FORWARD_JUMPS {
        return Err(EngineError::invalid_message(
            CiphertextMessageType::SenderKey,
            format!("iteration {iteration} is {jump} ahead of the chain"),
        ));
    }

    let mut chain_key = chain_key;
    while chain_key.iteration() < iteration {
        state.add_message_key(&chain_key.sender_message_key()?);
        chain_key = chain_key.next()?;
    }
    state.set_chain_key(chain_key.next()?);
    Ok(chain_key.sender_message_key()?)
}
