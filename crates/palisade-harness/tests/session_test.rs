//! Pairwise session tests: establishment, ratcheting, prekey consumption
//! and the failure modes callers must handle.

use std::time::Duration;

use palisade_core::{
    EngineError, IdentityKeyStore, KyberPreKeyStore, PreKeyBundle, PreKeyKind, SessionRecord,
    SessionStore,
};
use palisade_crypto::IdentityKeyPair;
use palisade_harness::{TestParty, establish_session, init_test_logging};
use palisade_proto::{
    CiphertextMessage, CiphertextMessageType, DecryptionErrorMessage, PlaintextContent, ProtocolAddress,
    Timestamp,
    extract_decryption_error_message_from_serialized_content,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

const NOW: Timestamp = Timestamp::from_epoch_millis(1_700_000_000_000);

async fn pair(seed: u64) -> (TestParty, TestParty) {
    init_test_logging();
    let mut alice = TestParty::new(seed, 1);
    let mut bob = TestParty::new(seed + 1000, 1);
    establish_session(&mut alice, &mut bob, NOW).await.unwrap();
    (alice, bob)
}

#[tokio::test]
async fn test_round_trip_and_message_types() {
    let (mut alice, mut bob) = pair(1).await;
    let (alice_addr, bob_addr) = (alice.address.clone(), bob.address.clone());

    let first = alice.encrypt(&bob_addr, b"hello bob", NOW).await.unwrap();
    assert_eq!(first.message_type(), CiphertextMessageType::PreKey);
    let second = alice.encrypt(&bob_addr, b"still waiting", NOW).await.unwrap();
    assert_eq!(second.message_type(), CiphertextMessageType::PreKey);

    assert_eq!(bob.decrypt(&alice_addr, &first).await.unwrap(), b"hello bob");
    assert_eq!(bob.decrypt(&alice_addr, &second).await.unwrap(), b"still waiting");

    let reply = bob.encrypt(&alice_addr, b"hi alice", NOW).await.unwrap();
    assert_eq!(reply.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(alice.decrypt(&bob_addr, &reply).await.unwrap(), b"hi alice");

    // Acknowledged: Alice stops sending prekey messages.
    let third = alice.encrypt(&bob_addr, b"got it", NOW).await.unwrap();
    assert_eq!(third.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(bob.decrypt(&alice_addr, &third).await.unwrap(), b"got it");
}

#[tokio::test]
async fn test_bundle_without_one_time_pre_key() {
    let mut alice = TestParty::new(2, 1);
    let mut bob = TestParty::new(3, 1);
    let bundle = bob.pre_key_bundle(NOW, false).await.unwrap();
    alice.process_bundle(&bob.address, &bundle, NOW).await.unwrap();

    let message = alice.encrypt(&bob.address, b"no opk", NOW).await.unwrap();
    let CiphertextMessage::PreKeySignalMessage(prekey) = &message else { panic!("expected prekey message") };
    assert_eq!(prekey.pre_key_id(), None);
    assert_eq!(bob.decrypt(&alice.address, &message).await.unwrap(), b"no opk");
}

#[tokio::test]
async fn test_prekeys_consumed_after_decrypt() {
    let mut alice = TestParty::new(4, 1);
    let mut carol = TestParty::new(5, 1);
    let mut bob = TestParty::new(6, 1);
    let bundle = bob.pre_key_bundle(NOW, true).await.unwrap();
    alice.process_bundle(&bob.address, &bundle, NOW).await.unwrap();
    carol.process_bundle(&bob.address, &bundle, NOW).await.unwrap();

    let from_alice = alice.encrypt(&bob.address, b"first", NOW).await.unwrap();
    let from_carol = carol.encrypt(&bob.address, b"second", NOW).await.unwrap();

    assert_eq!(bob.store.pre_key_store.len(), 1);
    bob.decrypt(&alice.address, &from_alice).await.unwrap();
    assert!(bob.store.pre_key_store.is_empty());
    assert!(bob.store.has_kyber_pre_key_been_used(bundle.kyber_pre_key_id()).await.unwrap());

    // A second agreement on the same Kyber prekey is refused.
    let err = bob.decrypt(&carol.address, &from_carol).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidKeyId { kind: PreKeyKind::Kyber, .. }), "{err}");
    assert!(!err.is_fatal());
    assert!(bob.store.load_session(&carol.address).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_decrypt_leaves_prekeys_in_place() {
    let (mut alice, mut bob) = pair(7).await;
    let message = alice.encrypt(&bob.address, b"payload", NOW).await.unwrap();
    let CiphertextMessage::PreKeySignalMessage(prekey) = &message else { panic!("expected prekey message") };

    let mut tampered = prekey.serialized().to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let tampered = CiphertextMessage::deserialize(CiphertextMessageType::PreKey, &tampered).unwrap();

    let err = bob.decrypt(&alice.address, &tampered).await.unwrap_err();
    assert!(err.is_fatal(), "{err}");
    assert_eq!(bob.store.pre_key_store.len(), 1);
    assert!(bob.store.load_session(&alice.address).await.unwrap().is_none());

    assert_eq!(bob.decrypt(&alice.address, &message).await.unwrap(), b"payload");
}

#[tokio::test]
async fn test_bad_bundle_signature_rejected() {
    let mut alice = TestParty::new(8, 1);
    let mut bob = TestParty::new(9, 1);
    let good = bob.pre_key_bundle(NOW, true).await.unwrap();

    let mut signature = good.signed_pre_key_signature().to_vec();
    signature[0] ^= 0xFF;
    let forged = PreKeyBundle::new(
        good.registration_id(),
        good.device_id(),
        good.pre_key_id().zip(good.pre_key_public().copied()),
        good.signed_pre_key_id(),
        *good.signed_pre_key_public(),
        signature,
        *good.identity_key(),
        good.kyber_pre_key_id(),
        good.kyber_pre_key_public().clone(),
        good.kyber_pre_key_signature().to_vec(),
    );

    let err = alice.process_bundle(&bob.address, &forged, NOW).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignature { .. }), "{err}");
    assert!(alice.store.load_session(&bob.address).await.unwrap().is_none());
}

#[tokio::test]
async fn test_untrusted_identity() {
    let mut alice = TestParty::new(10, 1);
    let mut bob = TestParty::new(11, 1);
    let impostor = IdentityKeyPair::generate(&mut ChaCha20Rng::seed_from_u64(12)).identity_key();
    alice.store.save_identity(&bob.address, &impostor).await.unwrap();

    let bundle = bob.pre_key_bundle(NOW, true).await.unwrap();
    let err = alice.process_bundle(&bob.address, &bundle, NOW).await.unwrap_err();
    assert!(matches!(&err, EngineError::UntrustedIdentity { address } if *address == bob.address));
}

#[tokio::test]
async fn test_unacknowledged_session_expires() {
    let (mut alice, bob) = pair(13).await;
    let month = Duration::from_secs(31 * 24 * 60 * 60);

    alice.encrypt(&bob.address, b"day one", NOW).await.unwrap();
    let err = alice.encrypt(&bob.address, b"a month later", NOW.add_duration(month)).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionExpired { pending_since, .. } if pending_since == NOW));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_out_of_order_across_ratchet_steps() {
    let (mut alice, mut bob) = pair(14).await;
    let (alice_addr, bob_addr) = (alice.address.clone(), bob.address.clone());

    let opener = alice.encrypt(&bob_addr, b"opener", NOW).await.unwrap();
    bob.decrypt(&alice_addr, &opener).await.unwrap();
    let reply = bob.encrypt(&alice_addr, b"reply", NOW).await.unwrap();
    alice.decrypt(&bob_addr, &reply).await.unwrap();

    // Three messages on Alice's second chain, then a DH step.
    let late: Vec<_> = encrypt_all(&mut alice, &bob_addr, &["a", "b", "c"]).await;
    bob.decrypt(&alice_addr, &late[1]).await.unwrap();
    let reply = bob.encrypt(&alice_addr, b"reply 2", NOW).await.unwrap();
    alice.decrypt(&bob_addr, &reply).await.unwrap();
    let next = alice.encrypt(&bob_addr, b"next chain", NOW).await.unwrap();
    assert_eq!(bob.decrypt(&alice_addr, &next).await.unwrap(), b"next chain");

    // Keys from the previous chain were kept.
    assert_eq!(bob.decrypt(&alice_addr, &late[2]).await.unwrap(), b"c");
    assert_eq!(bob.decrypt(&alice_addr, &late[0]).await.unwrap(), b"a");

    let err = bob.decrypt(&alice_addr, &late[0]).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicatedMessage { counter: 0, .. }), "{err}");
}

async fn encrypt_all(sender: &mut TestParty, to: &ProtocolAddress, texts: &[&str]) -> Vec<CiphertextMessage> {
    let mut out = Vec::new();
    for text in texts {
        out.push(sender.encrypt(to, text.as_bytes(), NOW).await.unwrap());
    }
    out
}

#[tokio::test]
async fn test_forward_jump_limit_from_config() {
    let (mut alice, mut bob) = pair(15).await;
    bob.config.max_forward_jumps = 5;

    let bob_addr = bob.address.clone();
    let messages = encrypt_all(&mut alice, &bob_addr, &["0"; 10]).await;
    let err = bob.decrypt(&alice.address, &messages[9]).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidMessage { .. }), "{err}");

    bob.decrypt(&alice.address, &messages[0]).await.unwrap();
    bob.decrypt(&alice.address, &messages[5]).await.unwrap();
}

#[tokio::test]
async fn test_archived_session_still_decrypts() {
    let (mut alice, mut bob) = pair(16).await;
    let (alice_addr, bob_addr) = (alice.address.clone(), bob.address.clone());

    let opener = alice.encrypt(&bob_addr, b"on the first session", NOW).await.unwrap();
    bob.decrypt(&alice_addr, &opener).await.unwrap();

    // Alice starts over while Bob keeps using the first session.
    let fresh = bob.pre_key_bundle(NOW, true).await.unwrap();
    alice.process_bundle(&bob_addr, &fresh, NOW).await.unwrap();
    let record = alice.store.load_session(&bob_addr).await.unwrap().unwrap();
    assert_eq!(record.previous_session_count(), 1);

    let reply = bob.encrypt(&alice_addr, b"from the old session", NOW).await.unwrap();
    assert_eq!(alice.decrypt(&bob_addr, &reply).await.unwrap(), b"from the old session");

    let record = alice.store.load_session(&bob_addr).await.unwrap().unwrap();
    assert_eq!(record.previous_session_count(), 1);
    let follow_up = alice.encrypt(&bob_addr, b"back on the old one", NOW).await.unwrap();
    assert_eq!(follow_up.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(bob.decrypt(&alice_addr, &follow_up).await.unwrap(), b"back on the old one");
}

#[tokio::test]
async fn test_record_survives_serialization() {
    let (mut alice, mut bob) = pair(17).await;
    let (alice_addr, bob_addr) = (alice.address.clone(), bob.address.clone());
    let opener = alice.encrypt(&bob_addr, b"one", NOW).await.unwrap();
    bob.decrypt(&alice_addr, &opener).await.unwrap();

    let record = bob.store.load_session(&alice_addr).await.unwrap().unwrap();
    let bytes = record.serialize().unwrap();
    let restored = SessionRecord::deserialize(&bytes).unwrap();
    assert_eq!(restored.serialize().unwrap(), bytes);
    assert_eq!(restored.remote_registration_id(), Some(alice.registration_id()));
    assert_eq!(restored.local_registration_id(), Some(bob.registration_id()));
    assert_eq!(restored.remote_identity_key(), Some(alice.identity_key()));
    bob.store.store_session(&alice_addr, &restored).await.unwrap();

    let reply = bob.encrypt(&alice_addr, b"two", NOW).await.unwrap();
    assert_eq!(alice.decrypt(&bob_addr, &reply).await.unwrap(), b"two");
}

#[tokio::test]
async fn test_decryption_error_names_ratchet_key() {
    let (mut alice, mut bob) = pair(18).await;
    let (alice_addr, bob_addr) = (alice.address.clone(), bob.address.clone());
    let opener = alice.encrypt(&bob_addr, b"one", NOW).await.unwrap();
    bob.decrypt(&alice_addr, &opener).await.unwrap();

    let lost = bob.encrypt(&alice_addr, b"never arrives intact", NOW).await.unwrap();
    let report = DecryptionErrorMessage::for_original(
        lost.serialize(),
        lost.message_type(),
        NOW,
        bob.device_id().value(),
    )
    .unwrap();
    let content = PlaintextContent::try_from(report).unwrap();

    let received = extract_decryption_error_message_from_serialized_content(content.body()).unwrap();
    assert_eq!(received.timestamp(), NOW);
    assert_eq!(received.device_id(), bob.device_id().value());
    let record = bob.store.load_session(&alice_addr).await.unwrap().unwrap();
    assert!(record.current_ratchet_key_matches(received.ratchet_key().unwrap()));
}

#[tokio::test]
async fn test_identity_saved_on_first_message() {
    let (mut alice, mut bob) = pair(19).await;
    let message = alice.encrypt(&bob.address, b"remember me", NOW).await.unwrap();
    assert_eq!(bob.store.get_identity(&alice.address).await.unwrap(), None);
    bob.decrypt(&alice.address, &message).await.unwrap();
    assert_eq!(bob.store.get_identity(&alice.address).await.unwrap(), Some(alice.identity_key()));
}
