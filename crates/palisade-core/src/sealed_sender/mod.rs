//! Sealed sender: hide the sender's identity from the relay.
//!
//! A session ciphertext is wrapped in an [`UnidentifiedSenderMessageContent`]
//! carrying the sender's [`SenderCertificate`], then encrypted to the
//! recipient's identity key. The relay sees only the destination.
//!
//! ```text
//!   message_encrypt ──► USMC{type, cert, contents} ──► v1 envelope  0x11 ...
//!                                                  └─► v2 fan-out   0x23 ...
//!                                                        │ server splits
//!                                                        ▼
//!                                                      v2 received  0x22 ...
//! ```
//!
//! The first byte of every envelope is `(version << 4) | version`, except
//! the v2 sent form, whose low nibble records that it still carries a header
//! per recipient.

mod certificate;
mod content;
mod multi;
mod single;

pub use certificate::{SenderCertificate, ServerCertificate};
pub use content::{ContentHint, UnidentifiedSenderMessageContent};
pub use multi::{SealedSenderV2SentMessage, SealedSenderV2SentRecipient};
use palisade_crypto::IdentityKey;
use palisade_proto::{
    CiphertextMessage, CiphertextMessageType, DeviceId, ProtocolAddress, ServiceId, Timestamp,
};
use rand::{CryptoRng, Rng};
use tracing::{debug, instrument, warn};

use crate::{
    config::SessionConfig,
    error::{EngineError, Result},
    group_cipher, session_cipher,
    state::SessionRecord,
    storage::{
        IdentityKeyStore, KyberPreKeyStore, PreKeyStore, SenderKeyStore, SessionStore,
        SignedPreKeyStore,
    },
};

pub(crate) const SEALED_SENDER_V1_VERSION_BYTE: u8 = 0x11;
pub(crate) const SEALED_SENDER_V2_RECEIVED_VERSION_BYTE: u8 = 0x22;
pub(crate) const SEALED_SENDER_V2_SENT_VERSION_BYTE: u8 = 0x23;

/// What [`sealed_sender_decrypt`] learned about a message.
#[derive(Debug, Clone)]
pub struct SealedSenderDecryptionResult {
    /// Sender's account id, as certified.
    pub sender_uuid: String,
    /// Sender's phone number, if the certificate carries one.
    pub sender_e164: Option<String>,
    /// Sending device.
    pub device_id: DeviceId,
    /// Decrypted plaintext.
    pub message: Vec<u8>,
    /// How the sender wants decryption failures handled.
    pub content_hint: ContentHint,
    /// Group the message belongs to, if any.
    pub group_id: Option<Vec<u8>>,
}

/// Wrap already-built content in a v1 envelope for `destination`.
///
/// The destination's identity must already be known to `identity_store`.
pub async fn sealed_sender_encrypt_from_usmc<R: Rng + CryptoRng>(
    destination: &ProtocolAddress,
    usmc: &UnidentifiedSenderMessageContent,
    identity_store: &dyn IdentityKeyStore,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let their_identity = identity_store
        .get_identity(destination)
        .await?
        .ok_or_else(|| EngineError::SessionNotFound { address: destination.clone() })?;
    let our_identity = identity_store.get_identity_key_pair().await?;
    single::encrypt(usmc, &our_identity, &their_identity, rng)
}

/// Encrypt `ptext` on the session with `destination` and seal it.
pub async fn sealed_sender_encrypt<R: Rng + CryptoRng>(
    destination: &ProtocolAddress,
    sender_cert: &SenderCertificate,
    ptext: &[u8],
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    now: Timestamp,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let message =
        session_cipher::message_encrypt(ptext, destination, session_store, identity_store, now, config)
            .await?;
    let usmc = UnidentifiedSenderMessageContent::from_message(
        &message,
        sender_cert.clone(),
        ContentHint::Default,
        None,
    )?;
    sealed_sender_encrypt_from_usmc(destination, &usmc, identity_store, rng).await
}

/// Seal one content for many recipient devices at once.
///
/// `destinations` and `destination_sessions` are parallel. Registration ids
/// and identity keys come from the sessions. Every address name must be a
/// service id string. `excluded_recipients` are listed without a payload so
/// the server can account for them.
pub async fn sealed_sender_multi_recipient_encrypt<R: Rng + CryptoRng, X>(
    destinations: &[&ProtocolAddress],
    destination_sessions: &[&SessionRecord],
    excluded_recipients: X,
    usmc: &UnidentifiedSenderMessageContent,
    identity_store: &dyn IdentityKeyStore,
    rng: &mut R,
) -> Result<Vec<u8>>
where
    X: IntoIterator<Item = ServiceId>,
{
    let our_identity = identity_store.get_identity_key_pair().await?;
    multi::encrypt(
        destinations,
        destination_sessions,
        excluded_recipients.into_iter().collect(),
        usmc,
        &our_identity,
        rng,
    )
}

/// Turn a fan-out message with a single recipient into the received form.
///
/// Excluded recipients are ignored.
pub fn sealed_sender_multi_recipient_message_for_single_recipient(data: &[u8]) -> Result<Vec<u8>> {
    let parsed = SealedSenderV2SentMessage::parse(data)?;
    let mut included = parsed.recipients.iter().filter(|(_, r)| !r.is_excluded());
    let recipient = match (included.next(), included.next()) {
        (Some((_, recipient)), None) => recipient,
        _ => {
            return Err(EngineError::InvalidArgument {
                reason: "message must have exactly one recipient".into(),
            });
        },
    };
    Ok(parsed.received_message_parts_for_recipient(recipient).concat())
}

/// Open the envelope layer only.
///
/// The sender certificate inside is not validated.
pub async fn sealed_sender_decrypt_to_usmc(
    ciphertext: &[u8],
    identity_store: &dyn IdentityKeyStore,
) -> Result<UnidentifiedSenderMessageContent> {
    let (&version, body) = ciphertext
        .split_first()
        .ok_or_else(|| EngineError::invalid_sealed_sender("empty sealed sender message"))?;
    let our_identity = identity_store.get_identity_key_pair().await?;
    match version {
        SEALED_SENDER_V1_VERSION_BYTE => single::decrypt(body, &our_identity),
        SEALED_SENDER_V2_RECEIVED_VERSION_BYTE => multi::decrypt(body, &our_identity),
        other => Err(EngineError::UnknownSealedSenderVersion(other >> 4)),
    }
}

/// Open a sealed message, validate its sender and decrypt the inner message.
///
/// Messages from this very device are rejected with
/// [`EngineError::SealedSenderSelfSend`].
#[instrument(skip_all, fields(local_device = %local_device_id))]
pub async fn sealed_sender_decrypt<R: Rng + CryptoRng>(
    ciphertext: &[u8],
    trust_root: &IdentityKey,
    timestamp: Timestamp,
    local_e164: Option<String>,
    local_uuid: String,
    local_device_id: DeviceId,
    session_store: &mut dyn SessionStore,
    identity_store: &mut dyn IdentityKeyStore,
    pre_key_store: &mut dyn PreKeyStore,
    signed_pre_key_store: &dyn SignedPreKeyStore,
    kyber_pre_key_store: &mut dyn KyberPreKeyStore,
    sender_key_store: &mut dyn SenderKeyStore,
    config: &SessionConfig,
    rng: &mut R,
) -> Result<SealedSenderDecryptionResult> {
    let usmc = sealed_sender_decrypt_to_usmc(ciphertext, identity_store).await?;
    let sender = usmc.sender();

    if !sender.validate(trust_root, timestamp) {
        warn!(sender = sender.sender_uuid(), "rejecting sender certificate");
        return Err(EngineError::InvalidSenderCertificate { reason: "validation failed" });
    }

    let same_account = sender.sender_uuid().eq_ignore_ascii_case(&local_uuid)
        || (local_e164.is_some() && sender.sender_e164() == local_e164.as_deref());
    if same_account && sender.sender_device_id() == local_device_id {
        return Err(EngineError::SealedSenderSelfSend);
    }

    let remote_address =
        ProtocolAddress::new(sender.sender_uuid().to_owned(), sender.sender_device_id());
    debug!(sender = %remote_address, msg_type = %usmc.msg_type(), "opened sealed sender envelope");

    let message = match CiphertextMessage::deserialize(usmc.msg_type(), usmc.contents())? {
        CiphertextMessage::SignalMessage(m) => {
            session_cipher::message_decrypt_signal(
                &m,
                &remote_address,
                session_store,
                identity_store,
                config,
                rng,
            )
            .await?
        },
        CiphertextMessage::PreKeySignalMessage(m) => {
            session_cipher::message_decrypt_prekey(
                &m,
                &remote_address,
                session_store,
                identity_store,
                pre_key_store,
                signed_pre_key_store,
                kyber_pre_key_store,
                config,
                rng,
            )
            .await?
        },
        CiphertextMessage::SenderKeyMessage(m) => {
            group_cipher::group_decrypt(m.serialized(), sender_key_store, &remote_address).await?
        },
        CiphertextMessage::PlaintextContent(m) => m.body().to_vec(),
        CiphertextMessage::SenderKeyDistributionMessage(_) => {
            return Err(EngineError::invalid_message(
                CiphertextMessageType::SenderKeyDistribution,
                "cannot be sent as sealed sender content",
            ));
        },
    };

    Ok(SealedSenderDecryptionResult {
        sender_uuid: sender.sender_uuid().to_owned(),
        sender_e164: sender.sender_e164().map(str::to_owned),
        device_id: sender.sender_device_id(),
        message,
        content_hint: usmc.content_hint(),
        group_id: usmc.group_id().map(<[u8]>::to_vec),
    })
}
