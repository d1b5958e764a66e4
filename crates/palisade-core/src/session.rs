//! Session establishment from either side of PQXDH.

use palisade_crypto::{IdentityKeyPair, KeyPair};
use palisade_proto::{KyberPreKeyId, PreKeyId, PreKeySignalMessage, ProtocolAddress, Timestamp};
use rand::{CryptoRng, RngCore};
use tracing::{debug, info, warn};

use crate::{
    error::{EngineError, PreKeyKind, Result},
    ratchet::{self, AliceParameters, BobParameters},
    state::{PendingPreKey, PreKeyBundle, SessionRecord},
    storage::{
        Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SessionStore, SignedPreKeyStore,
    },
};

/// Prekeys an inbound PreKeySignalMessage consumed. Removal and the used
/// marker are applied only once the message has decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PreKeysUsed {
    pub(crate) one_time_pre_key_id: Option<PreKeyId>,
    pub(crate) kyber_pre_key_id: KyberPreKeyId,
}

/// Start a session from `bundle` inside `record`, without touching any
/// store.
///
/// Both bundle signatures are verified against the bundle's identity key.
/// The new state becomes current and any previous state is archived. The
/// caller persists `record`.
pub fn initialize_session_from_bundle<R: RngCore + CryptoRng>(
    record: &mut SessionRecord,
    bundle: &PreKeyBundle,
    our_identity_key_pair: &IdentityKeyPair,
    our_registration_id: u32,
    now: Timestamp,
    rng: &mut R,
) -> Result<()> {
    let their_identity_key = bundle.identity_key();

    if !their_identity_key.verify_signature(
        &bundle.signed_pre_key_public().serialize(),
        bundle.signed_pre_key_signature(),
    ) {
        return Err(EngineError::InvalidSignature { what: "signed prekey" });
    }
    if !their_identity_key.verify_signature(
        &bundle.kyber_pre_key_public().serialize(),
        bundle.kyber_pre_key_signature(),
    ) {
        return Err(EngineError::InvalidSignature { what: "kyber prekey" });
    }

    let our_base_key_pair = KeyPair::generate(rng);
    let params = AliceParameters {
        our_identity_key_pair,
        our_base_key_pair: &our_base_key_pair,
        their_identity_key: *their_identity_key,
        their_signed_pre_key: *bundle.signed_pre_key_public(),
        their_one_time_pre_key: bundle.pre_key_public().copied(),
        their_kyber_pre_key: bundle.kyber_pre_key_public(),
    };
    let (mut state, kyber_ciphertext) = ratchet::initialize_alice_session(&params, rng)?;

    state.set_pending_pre_key(PendingPreKey {
        pre_key_id: bundle.pre_key_id(),
        signed_pre_key_id: bundle.signed_pre_key_id(),
        kyber_pre_key_id: bundle.kyber_pre_key_id(),
        kyber_ciphertext,
        base_key: our_base_key_pair.public_key,
        timestamp: now,
    });
    state.set_local_registration_id(our_registration_id);
    state.set_remote_registration_id(bundle.registration_id());

    record.promote_state(state);
    Ok(())
}

/// Establish an outgoing session with `remote_address` from its bundle.
///
/// Fails with `UntrustedIdentity` if the identity store rejects the bundle's
/// identity for sending. On success the identity is saved and the record
/// stored.
pub async fn process_prekey_bundle<R: RngCore + CryptoRng>(
    remote_address: &ProtocolAddress,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    bundle: &PreKeyBundle,
    now: Timestamp,
    rng: &mut R,
) -> Result<()> {
    let their_identity_key = bundle.identity_key();
    if !identity_store.is_trusted_identity(remote_address, their_identity_key, Direction::Sending).await? {
        warn!(%remote_address, "bundle identity not trusted");
        return Err(EngineError::UntrustedIdentity { address: remote_address.clone() });
    }

    let our_identity_key_pair = identity_store.get_identity_key_pair().await?;
    let our_registration_id = identity_store.get_local_registration_id().await?;
    let mut record =
        session_store.load_session(remote_address).await?.unwrap_or_else(SessionRecord::new_fresh);

    initialize_session_from_bundle(
        &mut record,
        bundle,
        &our_identity_key_pair,
        our_registration_id,
        now,
        rng,
    )?;

    identity_store.save_identity(remote_address, their_identity_key).await?;
    session_store.store_session(remote_address, &record).await?;
    info!(%remote_address, one_time_pre_key = bundle.pre_key_id().is_some(), "session established from bundle");
    Ok(())
}

/// Responder side: make sure `record` holds the state `message` belongs to.
///
/// A base key already seen selects the existing state and consumes nothing.
/// Otherwise the prekeys are looked up, the agreement is run and the new
/// state is promoted. Nothing is written to any store here.
pub(crate) async fn process_prekey(
    message: &PreKeySignalMessage,
    remote_address: &ProtocolAddress,
    record: &mut SessionRecord,
    identity_store: &dyn IdentityKeyStore,
    pre_key_store: &dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &dyn KyberPreKeyStore,
) -> Result<Option<PreKeysUsed>> {
    let their_identity_key = message.identity_key();
    if !identity_store.is_trusted_identity(remote_address, their_identity_key, Direction::Receiving).await? {
        warn!(%remote_address, "prekey message identity not trusted");
        return Err(EngineError::UntrustedIdentity { address: remote_address.clone() });
    }

    if record.promote_matching_session(message.message_version(), message.base_key()) {
        debug!(%remote_address, "prekey message matches an existing session");
        return Ok(None);
    }

    let signed_pre_key_id = message.signed_pre_key_id();
    let signed_pre_key = signed_pre_key_store
        .get_signed_pre_key(signed_pre_key_id)
        .await?
        .ok_or(EngineError::InvalidKeyId { kind: PreKeyKind::Signed, id: signed_pre_key_id.into() })?;

    let kyber_pre_key_id = message.kyber_pre_key_id();
    let unknown_kyber = || EngineError::InvalidKeyId { kind: PreKeyKind::Kyber, id: kyber_pre_key_id.into() };
    if kyber_pre_key_store.has_kyber_pre_key_been_used(kyber_pre_key_id).await? {
        warn!(%remote_address, %kyber_pre_key_id, "kyber prekey already used for an agreement");
        return Err(unknown_kyber());
    }
    let kyber_pre_key = kyber_pre_key_store.get_kyber_pre_key(kyber_pre_key_id).await?.ok_or_else(unknown_kyber)?;

    let one_time_pre_key = match message.pre_key_id() {
        Some(id) => Some(
            pre_key_store
                .get_pre_key(id)
                .await?
                .ok_or(EngineError::InvalidKeyId { kind: PreKeyKind::OneTime, id: id.into() })?,
        ),
        None => None,
    };

    let our_identity_key_pair = identity_store.get_identity_key_pair().await?;
    let params = BobParameters {
        our_identity_key_pair: &our_identity_key_pair,
        our_signed_pre_key_pair: signed_pre_key.key_pair(),
        our_one_time_pre_key_pair: one_time_pre_key.as_ref().map(|k| k.key_pair()),
        our_kyber_pre_key: &kyber_pre_key.key_pair().secret_key,
        their_identity_key: *their_identity_key,
        their_base_key: *message.base_key(),
        their_kyber_ciphertext: message.kyber_ciphertext(),
    };
    let mut state = ratchet::initialize_bob_session(&params)?;
    state.set_local_registration_id(identity_store.get_local_registration_id().await?);
    state.set_remote_registration_id(message.registration_id());
    record.promote_state(state);

    info!(%remote_address, one_time_pre_key = message.pre_key_id().is_some(), "session established from prekey message");
    Ok(Some(PreKeysUsed { one_time_pre_key_id: message.pre_key_id(), kyber_pre_key_id }))
}
