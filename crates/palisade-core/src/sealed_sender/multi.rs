//! Version 2 envelopes: one shared ciphertext, a small header per recipient.
//!
//! # Architecture
//!
//! ```text
//!   M random;  r = HKDF(M, "r");  K = HKDF(M, "K");  E = keypair(r)
//!   ciphertext = AEAD(K, zero nonce, content)
//!
//!   per recipient identity R:
//!     C  = M xor HKDF(DH(E, R) || E || R)
//!     AT = HKDF(DH(S, R) || E || C || S || R)[..16]
//! ```
//!
//! Sent (to the server):
//!
//! ```text
//!   0x23 | varint n
//!   n × ( ServiceId(17) | (varint device | u16 reg_id [0x8000 = more])+ | C(32) | AT(16) )
//!     or ( ServiceId(17) | 0x00 )                       excluded recipient
//!   E(32) | ciphertext
//! ```
//!
//! Received (by one recipient): `0x22 | C | AT | E | ciphertext`.
//!
//! # Security
//!
//! The recipient re-derives E from M and compares it with the transmitted E
//! in constant time, so a C not produced from the real M is rejected before
//! the content is trusted. AT binds the sender identity to this recipient's
//! header.

use bytes::{Buf, BufMut};
use palisade_crypto::{
    IdentityKey, IdentityKeyPair, KeyPair, PrivateKey, PublicKey, aead, curve::KEY_LENGTH, kdf, mac,
};
use palisade_proto::{DeviceId, ProtocolAddress, ServiceId, address::SERVICE_ID_FIXED_WIDTH_LEN};
use rand::{CryptoRng, Rng};
use tracing::debug;
use zeroize::Zeroizing;

use super::{
    SEALED_SENDER_V2_RECEIVED_VERSION_BYTE, SEALED_SENDER_V2_SENT_VERSION_BYTE,
    content::UnidentifiedSenderMessageContent,
};
use crate::{
    consts::VALID_REGISTRATION_ID_MASK,
    error::{EngineError, Result},
    state::SessionRecord,
};

const LABEL_R: &[u8] = b"Palisade_SealedSender_v2_r";
const LABEL_K: &[u8] = b"Palisade_SealedSender_v2_K";
const LABEL_DH: &[u8] = b"Palisade_SealedSender_v2_DH";
const LABEL_DH_S: &[u8] = b"Palisade_SealedSender_v2_DH-sender";

const MESSAGE_KEY_LEN: usize = 32;
const AUTH_TAG_LEN: usize = 16;
const RECIPIENT_HEADER_LEN: usize = MESSAGE_KEY_LEN + AUTH_TAG_LEN;
const MORE_DEVICES_FLAG: u16 = 0x8000;
const ZERO_NONCE: [u8; aead::NONCE_SIZE] = [0; aead::NONCE_SIZE];

fn derive_ephemeral(m: &[u8; MESSAGE_KEY_LEN]) -> Result<(KeyPair, Zeroizing<[u8; aead::KEY_SIZE]>)> {
    let r = Zeroizing::new(kdf::derive_array::<32>(m, None, LABEL_R)?);
    let k = Zeroizing::new(kdf::derive_array::<{ aead::KEY_SIZE }>(m, None, LABEL_K)?);
    Ok((KeyPair::from(PrivateKey::deserialize(r.as_slice())?), k))
}

/// `input xor HKDF(DH(E, R) || E || R)`: wraps M on send, unwraps C on
/// receive.
fn apply_agreement_xor(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &IdentityKey,
    input: &[u8; MESSAGE_KEY_LEN],
) -> Result<[u8; MESSAGE_KEY_LEN]> {
    let mut ikm = Zeroizing::new(shared.to_vec());
    ikm.extend_from_slice(&ephemeral.serialize());
    ikm.extend_from_slice(&recipient.serialize());
    let mask = Zeroizing::new(kdf::derive_array::<MESSAGE_KEY_LEN>(&ikm, None, LABEL_DH)?);

    let mut out = [0u8; MESSAGE_KEY_LEN];
    for (o, (a, b)) in out.iter_mut().zip(input.iter().zip(mask.iter())) {
        *o = a ^ b;
    }
    Ok(out)
}

fn authentication_tag(
    shared_static: &[u8; 32],
    ephemeral: &PublicKey,
    wrapped_key: &[u8],
    sender: &IdentityKey,
    recipient: &IdentityKey,
) -> Result<[u8; AUTH_TAG_LEN]> {
    let mut ikm = Zeroizing::new(shared_static.to_vec());
    ikm.extend_from_slice(&ephemeral.serialize());
    ikm.extend_from_slice(wrapped_key);
    ikm.extend_from_slice(&sender.serialize());
    ikm.extend_from_slice(&recipient.serialize());
    Ok(kdf::derive_array::<AUTH_TAG_LEN>(&ikm, None, LABEL_DH_S)?)
}

pub(crate) fn put_varint(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

pub(crate) fn get_varint(buf: &mut &[u8]) -> Result<u32> {
    let mut value = 0u32;
    for shift in (0..35).step_by(7) {
        if !buf.has_remaining() {
            return Err(EngineError::invalid_sealed_sender("truncated varint"));
        }
        let byte = buf.get_u8();
        let bits = u32::from(byte & 0x7F);
        if shift == 28 && bits > 0x0F {
            return Err(EngineError::invalid_sealed_sender("varint overflows u32"));
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(EngineError::invalid_sealed_sender("varint too long"))
}

struct RecipientGroup {
    service_id: ServiceId,
    identity: IdentityKey,
    devices: Vec<(DeviceId, u16)>,
}

pub(super) fn encrypt<R: Rng + CryptoRng>(
    destinations: &[&ProtocolAddress],
    destination_sessions: &[&SessionRecord],
    excluded_recipients: Vec<ServiceId>,
    content: &UnidentifiedSenderMessageContent,
    sender: &IdentityKeyPair,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if destinations.len() != destination_sessions.len() {
        return Err(EngineError::InvalidArgument {
            reason: format!(
                "{} recipients but {} sessions",
                destinations.len(),
                destination_sessions.len()
            ),
        });
    }

    let mut groups: Vec<RecipientGroup> = Vec::new();
    for (&address, &session) in destinations.iter().zip(destination_sessions) {
        let service_id = ServiceId::parse_from_service_id_string(address.name()).map_err(|_| {
            EngineError::InvalidArgument { reason: format!("{address} does not name a service id") }
        })?;
        let device_id = address.device_id();
        if device_id.value() == 0 {
            return Err(EngineError::InvalidArgument { reason: format!("{address} has device id 0") });
        }

        let registration_id = session
            .remote_registration_id()
            .ok_or_else(|| EngineError::SessionNotFound { address: address.clone() })?;
        if registration_id & VALID_REGISTRATION_ID_MASK != registration_id {
            return Err(EngineError::InvalidRegistrationId { address: address.clone(), registration_id });
        }
        let identity = session
            .remote_identity_key()
            .ok_or_else(|| EngineError::SessionNotFound { address: address.clone() })?;

        match groups.iter_mut().find(|g| g.service_id == service_id) {
            Some(group) => {
                if group.identity != identity {
                    return Err(EngineError::invalid_state(
                        "sealed_sender_multi_recipient_encrypt",
                        format!("devices of {service_id} have different identity keys"),
                    ));
                }
                if group.devices.iter().any(|(d, _)| *d == device_id) {
                    return Err(EngineError::InvalidArgument { reason: format!("duplicate recipient {address}") });
                }
                group.devices.push((device_id, registration_id as u16));
            },
            None => groups.push(RecipientGroup {
                service_id,
                identity,
                devices: vec![(device_id, registration_id as u16)],
            }),
        }
    }

    // Every service id appears once on the wire, included or not.
    for (i, excluded) in excluded_recipients.iter().enumerate() {
        if groups.iter().any(|g| g.service_id == *excluded) {
            return Err(EngineError::InvalidArgument {
                reason: format!("{excluded} is both a recipient and excluded"),
            });
        }
        if excluded_recipients[..i].contains(excluded) {
            return Err(EngineError::InvalidArgument { reason: format!("{excluded} excluded twice") });
        }
    }

    let m = Zeroizing::new(rng.r#gen::<[u8; MESSAGE_KEY_LEN]>());
    let (ephemeral, k) = derive_ephemeral(&m)?;
    let ciphertext = aead::encrypt(&k, &ZERO_NONCE, &[], content.serialized())?;
    let sender_identity = sender.identity_key();

    let mut out = Vec::with_capacity(
        1 + 5
            + groups.len() * (SERVICE_ID_FIXED_WIDTH_LEN + 8 + RECIPIENT_HEADER_LEN)
            + excluded_recipients.len() * (SERVICE_ID_FIXED_WIDTH_LEN + 1)
            + KEY_LENGTH
            + ciphertext.len(),
    );
    out.put_u8(SEALED_SENDER_V2_SENT_VERSION_BYTE);
    put_varint(&mut out, (groups.len() + excluded_recipients.len()) as u32);

    for group in &groups {
        out.put_slice(&group.service_id.service_id_fixed_width_binary());
        for (i, (device_id, registration_id)) in group.devices.iter().enumerate() {
            put_varint(&mut out, device_id.value());
            let more = if i + 1 < group.devices.len() { MORE_DEVICES_FLAG } else { 0 };
            out.put_u16(registration_id | more);
        }

        let recipient_agreement = group.identity.agreement_key();
        let shared = Zeroizing::new(ephemeral.calculate_agreement(&recipient_agreement));
        let wrapped = apply_agreement_xor(&shared, &ephemeral.public_key, &group.identity, &m)?;
        let shared_static = Zeroizing::new(sender.calculate_agreement(&recipient_agreement));
        let tag = authentication_tag(
            &shared_static,
            &ephemeral.public_key,
            &wrapped,
            &sender_identity,
            &group.identity,
        )?;
        out.put_slice(&wrapped);
        out.put_slice(&tag);
    }

    for service_id in &excluded_recipients {
        out.put_slice(&service_id.service_id_fixed_width_binary());
        put_varint(&mut out, 0);
    }

    out.put_slice(ephemeral.public_key.public_key_bytes());
    out.put_slice(&ciphertext);

    debug!(
        recipients = groups.len(),
        devices = groups.iter().map(|g| g.devices.len()).sum::<usize>(),
        excluded = excluded_recipients.len(),
        "sealed sender v2 fan-out"
    );
    Ok(out)
}

/// One service id's entry in a parsed fan-out message.
#[derive(Debug, Clone)]
pub struct SealedSenderV2SentRecipient<'a> {
    /// Devices and their registration ids. Empty for excluded recipients.
    pub devices: Vec<(DeviceId, u16)>,
    wrapped_key_and_tag: &'a [u8],
}

impl SealedSenderV2SentRecipient<'_> {
    /// Whether the sender listed this service id without a payload.
    pub fn is_excluded(&self) -> bool {
        self.devices.is_empty()
    }
}

/// A fan-out message as sent to the server, parsed without copying.
#[derive(Debug, Clone)]
pub struct SealedSenderV2SentMessage<'a> {
    /// Recipients in wire order, excluded ones included.
    pub recipients: Vec<(ServiceId, SealedSenderV2SentRecipient<'a>)>,
    shared_bytes: &'a [u8],
}

impl<'a> SealedSenderV2SentMessage<'a> {
    /// Parse the sent form.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let truncated = || EngineError::invalid_sealed_sender("truncated multi-recipient message");
        let mut buf = data;

        if !buf.has_remaining() {
            return Err(truncated());
        }
        let version = buf.get_u8();
        if version != SEALED_SENDER_V2_SENT_VERSION_BYTE {
            return Err(EngineError::UnknownSealedSenderVersion(version >> 4));
        }

        let count = get_varint(&mut buf)? as usize;
        let mut recipients: Vec<(ServiceId, SealedSenderV2SentRecipient<'a>)> =
            Vec::with_capacity(count.min(buf.remaining() / (SERVICE_ID_FIXED_WIDTH_LEN + 1)));

        for _ in 0..count {
            if buf.remaining() < SERVICE_ID_FIXED_WIDTH_LEN {
                return Err(truncated());
            }
            let service_id =
                ServiceId::parse_from_service_id_fixed_width_binary(&buf[..SERVICE_ID_FIXED_WIDTH_LEN])
                    .map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))?;
            buf.advance(SERVICE_ID_FIXED_WIDTH_LEN);
            if recipients.iter().any(|(s, _)| *s == service_id) {
                return Err(EngineError::invalid_sealed_sender(format!("duplicate recipient {service_id}")));
            }

            let mut devices = Vec::new();
            loop {
                let device_id = get_varint(&mut buf)?;
                if device_id == 0 {
                    if devices.is_empty() {
                        break;
                    }
                    return Err(EngineError::invalid_sealed_sender("device id 0 in device list"));
                }
                if buf.remaining() < 2 {
                    return Err(truncated());
                }
                let tagged = buf.get_u16();
                devices.push((DeviceId::from(device_id), tagged & !MORE_DEVICES_FLAG));
                if tagged & MORE_DEVICES_FLAG == 0 {
                    break;
                }
            }

            let wrapped_key_and_tag = if devices.is_empty() {
                &buf[..0]
            } else {
                if buf.remaining() < RECIPIENT_HEADER_LEN {
                    return Err(truncated());
                }
                let header = &buf[..RECIPIENT_HEADER_LEN];
                buf.advance(RECIPIENT_HEADER_LEN);
                header
            };
            recipients.push((service_id, SealedSenderV2SentRecipient { devices, wrapped_key_and_tag }));
        }

        if buf.remaining() < KEY_LENGTH + aead::TAG_SIZE {
            return Err(truncated());
        }
        Ok(Self { recipients, shared_bytes: buf })
    }

    /// Pieces of the received form for `recipient`, in order. Concatenated
    /// they make the message that recipient decrypts.
    pub fn received_message_parts_for_recipient(
        &self,
        recipient: &SealedSenderV2SentRecipient<'a>,
    ) -> [&'a [u8]; 3] {
        [&[SEALED_SENDER_V2_RECEIVED_VERSION_BYTE], recipient.wrapped_key_and_tag, self.shared_bytes]
    }
}

/// Decrypt a received v2 body (everything after the version byte).
pub(super) fn decrypt(body: &[u8], recipient: &IdentityKeyPair) -> Result<UnidentifiedSenderMessageContent> {
    if body.len() < RECIPIENT_HEADER_LEN + KEY_LENGTH + aead::TAG_SIZE {
        return Err(EngineError::invalid_sealed_sender("truncated sealed sender v2 message"));
    }
    let (wrapped, rest) = body.split_at(MESSAGE_KEY_LEN);
    let (tag, rest) = rest.split_at(AUTH_TAG_LEN);
    let (ephemeral_bytes, ciphertext) = rest.split_at(KEY_LENGTH);

    let ephemeral = PublicKey::from_djb_public_key_bytes(ephemeral_bytes)?;
    let recipient_identity = recipient.identity_key();
    let mut wrapped_key = [0u8; MESSAGE_KEY_LEN];
    wrapped_key.copy_from_slice(wrapped);

    let shared = Zeroizing::new(recipient.calculate_agreement(&ephemeral));
    let m = Zeroizing::new(apply_agreement_xor(&shared, &ephemeral, &recipient_identity, &wrapped_key)?);
    let (derived, k) = derive_ephemeral(&m)?;
    if !mac::constant_time_eq(derived.public_key.public_key_bytes(), ephemeral.public_key_bytes()) {
        return Err(EngineError::invalid_sealed_sender("derived ephemeral key did not match"));
    }

    let content_bytes = aead::decrypt(&k, &ZERO_NONCE, &[], ciphertext)
        .map_err(|_| EngineError::invalid_sealed_sender("failed to decrypt message"))?;
    let content = UnidentifiedSenderMessageContent::deserialize(&content_bytes)?;

    let sender_identity = content.sender().key();
    let shared_static = Zeroizing::new(recipient.calculate_agreement(&sender_identity.agreement_key()));
    let expected = authentication_tag(&shared_static, &ephemeral, wrapped, sender_identity, &recipient_identity)?;
    if !mac::constant_time_eq(&expected, tag) {
        return Err(EngineError::invalid_sealed_sender("sender authentication tag mismatch"));
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn varints_decode_what_they_encode(value in any::<u32>()) {
            let mut out = Vec::new();
            put_varint(&mut out, value);
            let mut buf = out.as_slice();
            prop_assert_eq!(get_varint(&mut buf).unwrap(), value);
            prop_assert!(buf.is_empty());
        }
    }

    #[test]
    fn overlong_varint_rejected() {
        let mut buf: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        assert!(get_varint(&mut buf).is_err());
        let mut buf: &[u8] = &[0x80, 0x80];
        assert!(get_varint(&mut buf).is_err());
    }

    #[test]
    fn wrong_sent_version_rejected() {
        assert!(matches!(
            SealedSenderV2SentMessage::parse(&[0x22, 0x00]),
            Err(EngineError::UnknownSealedSenderVersion(2))
        ));
        assert!(SealedSenderV2SentMessage::parse(&[]).is_err());
    }
}
