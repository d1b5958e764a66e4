//! Double-ratchet encryption and decryption of pairwise messages.
//!
//! # Architecture
//!
//! ```text
//!   encrypt:  sender chain ──step──> message keys ──AEAD + MAC──> SignalMessage
//!                                                       └─(unacknowledged)─> PreKeySignalMessage
//!
//!   decrypt:  new ratchet key? ──yes──> DH step: new receiving chain,
//!                 │                     new sending chain, cache rest of old chain
//!                 ▼
//!             counter behind chain? ──yes──> take cached key or DuplicatedMessage
//!                 │
//!                 ▼
//!             step chain to counter, caching skipped keys
//! ```
//!
//! Every operation works on a cloned [`SessionRecord`] and writes it back
//! only after the message authenticated and decrypted, so a failed or
//! abandoned call leaves the stored session untouched.

use palisade_crypto::{ChainKey, IdentityKey, KeyPair, MessageKeys, PublicKey, aead};
use palisade_proto::{
    CiphertextMessage, CiphertextMessageType, PreKeySignalMessage, ProtocolAddress, SignalMessage,
    Timestamp,
};
use rand::{CryptoRng, RngCore};
use tracing::{debug, trace, warn};

use crate::{
    SessionConfig,
    error::{EngineError, Result},
    session,
    state::{SessionRecord, SessionState},
    storage::{
        Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore,
    },
};

fn associated_data(sender: &IdentityKey, receiver: &IdentityKey) -> Vec<u8> {
    let mut aad = sender.serialize();
    aad.extend_from_slice(&receiver.serialize());
    aad
}

/// Encrypt `ptext` for `remote_address`.
///
/// Produces a PreKeySignalMessage until the peer has replied, a
/// SignalMessage afterwards. An unacknowledged session older than
/// `config.max_unacknowledged_session_age` fails with `SessionExpired`.
pub async fn message_encrypt(
    ptext: &[u8],
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    now: Timestamp,
    config: &SessionConfig,
) -> Result<CiphertextMessage> {
    let mut record = session_store
        .load_session(remote_address)
        .await?
        .ok_or_else(|| EngineError::SessionNotFound { address: remote_address.clone() })?;
    let state = record
        .session_state_mut()
        .ok_or_else(|| EngineError::SessionNotFound { address: remote_address.clone() })?;

    if !state.has_usable_sender_chain(now, config) {
        return Err(match state.pending_pre_key() {
            Some(pending) if state.has_sender_chain() => {
                warn!(%remote_address, pending_since = ?pending.timestamp, "session expired before acknowledgement");
                EngineError::SessionExpired { address: remote_address.clone(), pending_since: pending.timestamp }
            },
            _ => EngineError::invalid_state("message_encrypt", "session has no sender chain"),
        });
    }

    let chain_key = state.sender_chain_key()?;
    let message_keys = chain_key.message_keys()?;
    let sender_ratchet_key = state.sender_ratchet_key()?;
    let session_version = state.session_version();
    let local_identity_key = *state.local_identity_key();
    let their_identity_key = *state.remote_identity_key();

    let ctext = aead::encrypt(
        message_keys.cipher_key(),
        message_keys.nonce(),
        &associated_data(&local_identity_key, &their_identity_key),
        ptext,
    )?;
    let message = SignalMessage::new(
        session_version,
        message_keys.mac_key(),
        sender_ratchet_key,
        chain_key.index(),
        state.previous_counter(),
        &ctext,
        &local_identity_key,
        &their_identity_key,
    )?;

    let message = match state.pending_pre_key() {
        Some(pending) => CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
            session_version,
            state.local_registration_id(),
            pending.pre_key_id,
            pending.signed_pre_key_id,
            pending.kyber_pre_key_id,
            &pending.kyber_ciphertext,
            pending.base_key,
            local_identity_key,
            message,
        )?),
        None => CiphertextMessage::SignalMessage(message),
    };

    state.set_sender_chain_key(chain_key.next_chain_key()?)?;

    if !identity_store.is_trusted_identity(remote_address, &their_identity_key, Direction::Sending).await? {
        warn!(%remote_address, "identity not trusted for sending");
        return Err(EngineError::UntrustedIdentity { address: remote_address.clone() });
    }
    identity_store.save_identity(remote_address, &their_identity_key).await?;
    session_store.store_session(remote_address, &record).await?;

    trace!(%remote_address, counter = chain_key.index(), message_type = %message.message_type(), "encrypted");
    Ok(message)
}

/// Decrypt a pairwise message of either kind.
///
/// Sender-key, distribution and plaintext messages are not pairwise and are
/// rejected with `InvalidArgument`.
pub async fn message_decrypt<R: RngCore + CryptoRng>(
    ciphertext: &CiphertextMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    match ciphertext {
        CiphertextMessage::SignalMessage(m) => {
            message_decrypt_signal(m, remote_address, session_store, identity_store, config, rng).await
        },
        CiphertextMessage::PreKeySignalMessage(m) => {
            message_decrypt_prekey(
                m,
                remote_address,
                session_store,
                identity_store,
                pre_key_store,
                signed_pre_key_store,
                kyber_pre_key_store,
                config,
                rng,
            )
            .await
        },
        other => Err(EngineError::InvalidArgument {
            reason: format!("message_decrypt cannot handle {}", other.message_type()),
        }),
    }
}

/// Decrypt a PreKeySignalMessage, establishing the session if needed.
///
/// The one-time prekey is removed and the Kyber prekey marked used only
/// after the embedded message decrypted.
pub async fn message_decrypt_prekey<R: RngCore + CryptoRng>(
    ciphertext: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut record =
        session_store.load_session(remote_address).await?.unwrap_or_else(SessionRecord::new_fresh);

    let pre_keys_used = session::process_prekey(
        ciphertext,
        remote_address,
        &mut record,
        &*identity_store,
        &*pre_key_store,
        signed_pre_key_store,
        &*kyber_pre_key_store,
    )
    .await?;

    let ptext = decrypt_message_with_record(
        remote_address,
        &mut record,
        ciphertext.message(),
        CiphertextMessageType::PreKey,
        config,
        rng,
    )?;

    identity_store.save_identity(remote_address, ciphertext.identity_key()).await?;
    session_store.store_session(remote_address, &record).await?;

    if let Some(used) = pre_keys_used {
        if let Some(id) = used.one_time_pre_key_id {
            pre_key_store.remove_pre_key(id).await?;
        }
        kyber_pre_key_store.mark_kyber_pre_key_used(used.kyber_pre_key_id).await?;
        debug!(%remote_address, one_time_pre_key = ?used.one_time_pre_key_id, kyber_pre_key = %used.kyber_pre_key_id, "consumed prekeys");
    }

    Ok(ptext)
}

/// Decrypt a SignalMessage on an existing session.
pub async fn message_decrypt_signal<R: RngCore + CryptoRng>(
    ciphertext: &SignalMessage,
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut record = session_store
        .load_session(remote_address)
        .await?
        .ok_or_else(|| EngineError::SessionNotFound { address: remote_address.clone() })?;

    let ptext = decrypt_message_with_record(
        remote_address,
        &mut record,
        ciphertext,
        CiphertextMessageType::Whisper,
        config,
        rng,
    )?;

    let their_identity_key = record.remote_identity_key().ok_or_else(|| {
        EngineError::invalid_state("message_decrypt_signal", "decrypted without a current session")
    })?;
    if !identity_store.is_trusted_identity(remote_address, &their_identity_key, Direction::Receiving).await? {
        warn!(%remote_address, "identity not trusted for receiving");
        return Err(EngineError::UntrustedIdentity { address: remote_address.clone() });
    }
    identity_store.save_identity(remote_address, &their_identity_key).await?;
    session_store.store_session(remote_address, &record).await?;

    Ok(ptext)
}

/// Try the current state, then every archived state. The state that
/// decrypts becomes current.
fn decrypt_message_with_record<R: RngCore + CryptoRng>(
    remote_address: &ProtocolAddress,
    record: &mut SessionRecord,
    ciphertext: &SignalMessage,
    original_message_type: CiphertextMessageType,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if !record.has_current_state() && record.previous_session_count() == 0 {
        return Err(EngineError::SessionNotFound { address: remote_address.clone() });
    }

    if let Some(current) = record.session_state() {
        let mut state = current.clone();
        match decrypt_message_with_state(&mut state, ciphertext, original_message_type, config, rng) {
            Ok(ptext) => {
                record.set_session_state(state);
                return Ok(ptext);
            },
            Err(e @ EngineError::DuplicatedMessage { .. }) => return Err(e),
            Err(e) => debug!(%remote_address, error = %e, "current session failed to decrypt"),
        }
    }

    let mut promoted = None;
    for (index, previous) in record.previous_session_states().enumerate() {
        let mut state = previous.clone();
        match decrypt_message_with_state(&mut state, ciphertext, original_message_type, config, rng) {
            Ok(ptext) => {
                promoted = Some((index, state, ptext));
                break;
            },
            Err(e @ EngineError::DuplicatedMessage { .. }) => return Err(e),
            Err(e) => trace!(%remote_address, index, error = %e, "archived session failed to decrypt"),
        }
    }

    if let Some((index, state, ptext)) = promoted {
        warn!(%remote_address, index, "decrypted with archived session; promoting it");
        record.promote_old_session(index, state);
        return Ok(ptext);
    }

    warn!(
        %remote_address,
        counter = ciphertext.counter(),
        archived = record.previous_session_count(),
        "message failed to decrypt on every session state"
    );
    Err(EngineError::invalid_message(original_message_type, "decryption failed"))
}

fn decrypt_message_with_state<R: RngCore + CryptoRng>(
    state: &mut SessionState,
    ciphertext: &SignalMessage,
    original_message_type: CiphertextMessageType,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if !state.has_sender_chain() {
        return Err(EngineError::invalid_message(original_message_type, "session has no sender chain"));
    }
    if ciphertext.message_version() != state.session_version() {
        return Err(EngineError::invalid_message(
            original_message_type,
            format!(
                "message version {} does not match session version {}",
                ciphertext.message_version(),
                state.session_version()
            ),
        ));
    }

    let their_ratchet_key = ciphertext.sender_ratchet_key();
    let chain_key = get_or_create_chain_key(
        state,
        their_ratchet_key,
        ciphertext.previous_counter(),
        original_message_type,
        config,
        rng,
    )?;
    let message_keys = get_or_create_message_key(
        state,
        their_ratchet_key,
        &chain_key,
        ciphertext.counter(),
        original_message_type,
        config,
    )?;

    let their_identity_key = *state.remote_identity_key();
    let our_identity_key = *state.local_identity_key();
    if !ciphertext.verify_mac(&their_identity_key, &our_identity_key, message_keys.mac_key())? {
        return Err(EngineError::invalid_message(original_message_type, "MAC verification failed"));
    }

    let ptext = aead::decrypt(
        message_keys.cipher_key(),
        message_keys.nonce(),
        &associated_data(&their_identity_key, &our_identity_key),
        ciphertext.body(),
    )
    .map_err(|_| EngineError::invalid_message(original_message_type, "ciphertext failed to decrypt"))?;

    state.clear_pending_pre_key();
    Ok(ptext)
}

/// Receiving chain for `their_ratchet_key`, taking a DH ratchet step if the
/// key is new.
fn get_or_create_chain_key<R: RngCore + CryptoRng>(
    state: &mut SessionState,
    their_ratchet_key: &PublicKey,
    previous_counter: u32,
    original_message_type: CiphertextMessageType,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<ChainKey> {
    if let Some(chain_key) = state.receiver_chain_key(their_ratchet_key) {
        return Ok(chain_key);
    }

    // Keys the peer sent on its previous chain stay readable after the step.
    if let Some((old_ratchet_key, old_chain_key)) = state.latest_receiver_chain() {
        cache_remaining_keys(
            state,
            &old_ratchet_key,
            old_chain_key,
            previous_counter,
            original_message_type,
            config,
        )?;
    }

    let our_ratchet_key = state.sender_ratchet_private_key()?;
    let (receiving_root, receiving_chain) =
        state.root_key().create_chain(their_ratchet_key, &our_ratchet_key)?;
    let our_new_ratchet_key = KeyPair::generate(rng);
    let (sending_root, sending_chain) =
        receiving_root.create_chain(their_ratchet_key, &our_new_ratchet_key.private_key)?;

    let sent_on_previous_chain = state.sender_chain_key()?.index();
    state.set_root_key(sending_root);
    state.add_receiver_chain(*their_ratchet_key, receiving_chain.clone());
    state.set_previous_counter(sent_on_previous_chain);
    state.set_sender_chain(our_new_ratchet_key, sending_chain);

    debug!(previous_counter = sent_on_previous_chain, "DH ratchet step");
    Ok(receiving_chain)
}

fn cache_remaining_keys(
    state: &mut SessionState,
    ratchet_key: &PublicKey,
    mut chain_key: ChainKey,
    until: u32,
    original_message_type: CiphertextMessageType,
    config: &SessionConfig,
) -> Result<()> {
    if until <= chain_key.index() {
        return Ok(());
    }
    if until - chain_key.index() > config.forward_jump_limit() {
        return Err(EngineError::invalid_message(
            original_message_type,
            format!("previous chain skipped {} messages", until - chain_key.index()),
        ));
    }
    while chain_key.index() < until {
        state.cache_message_key(ratchet_key, chain_key.index(), chain_key.message_key_seed()?)?;
        chain_key = chain_key.next_chain_key()?;
    }
    state.set_receiver_chain_key(ratchet_key, chain_key)
}

/// Message keys for `counter`, from the skipped-key cache when the chain is
/// already past it.
fn get_or_create_message_key(
    state: &mut SessionState,
    their_ratchet_key: &PublicKey,
    chain_key: &ChainKey,
    counter: u32,
    original_message_type: CiphertextMessageType,
    config: &SessionConfig,
) -> Result<MessageKeys> {
    let chain_index = chain_key.index();

    if chain_index > counter {
        return match state.take_message_key(their_ratchet_key, counter) {
            Some(seed) => Ok(MessageKeys::derive_keys(&seed, counter)?),
            None => Err(EngineError::DuplicatedMessage { chain_index, counter }),
        };
    }

    let jump = counter - chain_index;
    if jump > config.forward_jump_limit() {
        return Err(EngineError::invalid_message(
            original_message_type,
            format!("message counter {counter} is {jump} ahead of the chain"),
        ));
    }

    let mut chain_key = chain_key.clone();
    while chain_key.index() < counter {
        state.cache_message_key(their_ratchet_key, chain_key.index(), chain_key.message_key_seed()?)?;
        chain_key = chain_key.next_chain_key()?;
    }
    state.set_receiver_chain_key(their_ratchet_key, chain_key.next_chain_key()?)?;
    Ok(chain_key.message_keys()?)
}
