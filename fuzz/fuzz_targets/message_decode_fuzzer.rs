//! Fuzz target for every wire and storage decoder
//!
//! # Strategy
//!
//! - Raw bytes handed to each decoder, selected by the first input byte
//! - Message type bytes that are not valid ciphertext types
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded ciphertext message re-serializes to the bytes it came from
//! - A parsed multi-recipient message has no duplicate recipients

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use palisade_core::{
    KyberPreKeyRecord, PreKeyBundle, PreKeyRecord, ScannableFingerprint, SealedSenderV2SentMessage,
    SenderCertificate, SenderKeyRecord, ServerCertificate, SessionRecord, SignedPreKeyRecord,
    UnidentifiedSenderMessageContent,
};
use palisade_proto::{
    CiphertextMessage, CiphertextMessageType, ServiceId,
    extract_decryption_error_message_from_serialized_content,
};

#[derive(Debug, Arbitrary)]
enum Target {
    Ciphertext { message_type: u8 },
    DecryptionError,
    SentMultiRecipient,
    ServerCertificate,
    SenderCertificate,
    SealedContent,
    Session,
    SenderKey,
    PreKey,
    SignedPreKey,
    KyberPreKey,
    Bundle,
    Fingerprint,
    ServiceId,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    target: Target,
    bytes: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let bytes = input.bytes.as_slice();
    match input.target {
        Target::Ciphertext { message_type } => {
            if let Ok(message_type) = CiphertextMessageType::try_from(message_type) {
                if let Ok(message) = CiphertextMessage::deserialize(message_type, bytes) {
                    assert_eq!(message.message_type(), message_type);
                    assert_eq!(message.serialize(), bytes);
                }
            }
        },
        Target::DecryptionError => {
            let _ = extract_decryption_error_message_from_serialized_content(bytes);
        },
        Target::SentMultiRecipient => {
            if let Ok(sent) = SealedSenderV2SentMessage::parse(bytes) {
                for (i, (service_id, recipient)) in sent.recipients.iter().enumerate() {
                    assert!(sent.recipients[..i].iter().all(|(other, _)| other != service_id));
                    let parts = sent.received_message_parts_for_recipient(recipient);
                    assert!(parts.iter().map(|p| p.len()).sum::<usize>() <= bytes.len());
                }
            }
        },
        Target::ServerCertificate => {
            let _ = ServerCertificate::deserialize(bytes);
        },
        Target::SenderCertificate => {
            let _ = SenderCertificate::deserialize(bytes);
        },
        Target::SealedContent => {
            let _ = UnidentifiedSenderMessageContent::deserialize(bytes);
        },
        Target::Session => {
            if let Ok(record) = SessionRecord::deserialize(bytes) {
                let _ = record.serialize();
            }
        },
        Target::SenderKey => {
            let _ = SenderKeyRecord::deserialize(bytes);
        },
        Target::PreKey => {
            let _ = PreKeyRecord::deserialize(bytes);
        },
        Target::SignedPreKey => {
            let _ = SignedPreKeyRecord::deserialize(bytes);
        },
        Target::KyberPreKey => {
            let _ = KyberPreKeyRecord::deserialize(bytes);
        },
        Target::Bundle => {
            let _ = PreKeyBundle::deserialize(bytes);
        },
        Target::Fingerprint => {
            if let Ok(fingerprint) = ScannableFingerprint::deserialize(bytes) {
                let _ = fingerprint.compare(bytes);
            }
        },
        Target::ServiceId => {
            let _ = ServiceId::parse_from_service_id_binary(bytes);
            let _ = ServiceId::parse_from_service_id_fixed_width_binary(bytes);
            if let Ok(text) = std::str::from_utf8(bytes) {
                let _ = ServiceId::parse_from_service_id_string(text);
            }
        },
    }
});
