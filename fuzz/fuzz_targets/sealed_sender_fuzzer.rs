//! Fuzz target for sealed sender decryption of damaged envelopes
//!
//! # Strategy
//!
//! - Real v1 and v2 envelopes between harness parties
//! - Byte flips at arbitrary offsets, truncation, and appended junk
//!
//! # Invariants
//!
//! - NEVER panic on a damaged envelope
//! - A damaged envelope never yields a different plaintext
//! - Failures to open are fatal errors, never "try again" ones

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use palisade_core::{
    ContentHint, SessionStore, UnidentifiedSenderMessageContent, sealed_sender_decrypt,
    sealed_sender_encrypt, sealed_sender_multi_recipient_encrypt,
    sealed_sender_multi_recipient_message_for_single_recipient,
};
use palisade_harness::{TestCertificates, TestParty, establish_session};
use palisade_proto::{
    CiphertextMessage, CiphertextMessageType, DecryptionErrorMessage, PlaintextContent, Timestamp,
};

const NOW: Timestamp = Timestamp::from_epoch_millis(1_700_000_000_000);
const PLAINTEXT: &[u8] = b"fuzzed sealed sender payload";

#[derive(Debug, Arbitrary)]
enum Damage {
    Flip { offset: u16, mask: u8 },
    Truncate { len: u16 },
    Append(Vec<u8>),
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    multi_recipient: bool,
    damage: Vec<Damage>,
}

fn apply(envelope: &mut Vec<u8>, damage: &[Damage]) {
    for d in damage {
        match d {
            Damage::Flip { offset, mask } if !envelope.is_empty() => {
                let i = usize::from(*offset) % envelope.len();
                envelope[i] ^= mask;
            },
            Damage::Flip { .. } => {},
            Damage::Truncate { len } => envelope.truncate(usize::from(*len)),
            Damage::Append(junk) => envelope.extend_from_slice(junk),
        }
    }
}

async fn run(input: FuzzInput) {
    let certs = TestCertificates::new(1).expect("certificates");
    let mut alice = TestParty::new(2, 1);
    let mut bob = TestParty::new(3, 1);
    establish_session(&mut alice, &mut bob, NOW).await.expect("session");
    let cert = certs
        .sender_certificate(&alice, NOW.add_duration(Duration::from_secs(3600)))
        .expect("sender certificate");
    let bob_addr = bob.address.clone();

    let (mut envelope, expected) = if input.multi_recipient {
        let report = DecryptionErrorMessage::for_original(&[], CiphertextMessageType::SenderKey, NOW, 1)
            .expect("report");
        let plaintext = PlaintextContent::try_from(report).expect("content");
        let body = plaintext.body().to_vec();
        let content = CiphertextMessage::PlaintextContent(plaintext);
        let usmc = UnidentifiedSenderMessageContent::from_message(&content, cert, ContentHint::Default, None)
            .expect("usmc");
        let record = alice.store.session_store.load_session(&bob_addr).await.expect("load").expect("record");
        let sent = sealed_sender_multi_recipient_encrypt(
            &[&bob_addr],
            &[&record],
            [],
            &usmc,
            &alice.store.identity_store,
            &mut alice.rng,
        )
        .await
        .expect("multi-recipient encrypt");
        let received = sealed_sender_multi_recipient_message_for_single_recipient(&sent).expect("extract");
        (received, body)
    } else {
        let sealed = sealed_sender_encrypt(
            &bob_addr,
            &cert,
            PLAINTEXT,
            &mut alice.store.session_store,
            &mut alice.store.identity_store,
            NOW,
            &alice.config,
            &mut alice.rng,
        )
        .await
        .expect("encrypt");
        (sealed, PLAINTEXT.to_vec())
    };
    let original = envelope.clone();
    apply(&mut envelope, &input.damage);

    let result = sealed_sender_decrypt(
        &envelope,
        &certs.trust_root(),
        NOW,
        None,
        bob.uuid.to_string(),
        bob.device_id(),
        &mut bob.store.session_store,
        &mut bob.store.identity_store,
        &mut bob.store.pre_key_store,
        &bob.store.signed_pre_key_store,
        &mut bob.store.kyber_pre_key_store,
        &mut bob.store.sender_key_store,
        &bob.config,
        &mut bob.rng,
    )
    .await;

    match result {
        Ok(opened) => assert_eq!(opened.message, expected),
        Err(err) => {
            assert_ne!(envelope, original, "undamaged envelope failed: {err}");
            assert!(err.is_fatal(), "damaged envelope gave a retryable error: {err}");
        },
    }
}

fuzz_target!(|input: FuzzInput| {
    let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    runtime.block_on(run(input));
});
