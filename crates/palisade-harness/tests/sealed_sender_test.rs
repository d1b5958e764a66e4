//! Sealed sender: certificates, single-recipient envelopes and multi-recipient
//! fan-out.

use std::time::Duration;

use palisade_core::{
    ContentHint, EngineError, Result, SealedSenderDecryptionResult, SealedSenderV2SentMessage,
    SessionRecord, SessionStore, UnidentifiedSenderMessageContent,
    create_sender_key_distribution_message, group_encrypt, process_sender_key_distribution_message,
    sealed_sender_decrypt, sealed_sender_decrypt_to_usmc, sealed_sender_encrypt,
    sealed_sender_encrypt_from_usmc, sealed_sender_multi_recipient_encrypt,
    sealed_sender_multi_recipient_message_for_single_recipient,
};
use palisade_crypto::IdentityKey;
use palisade_harness::{TestCertificates, TestParty, establish_session, init_test_logging};
use palisade_proto::{
    CiphertextMessage, CiphertextMessageType, DecryptionErrorMessage, DeviceId, PlaintextContent,
    ProtocolAddress, ServiceId, Timestamp, Uuid,
    extract_decryption_error_message_from_serialized_content,
};

const NOW: Timestamp = Timestamp::from_epoch_millis(1_700_000_000_000);
const GROUP: Uuid = Uuid::from_u128(0x0f0e_0d0c_0b0a_0908_0706_0504_0302_0100);

fn expiry() -> Timestamp {
    NOW.add_duration(Duration::from_secs(24 * 60 * 60))
}

async fn open_as(
    party: &mut TestParty,
    ciphertext: &[u8],
    trust_root: &IdentityKey,
    timestamp: Timestamp,
    local_e164: Option<&str>,
    local_uuid: String,
    local_device_id: DeviceId,
) -> Result<SealedSenderDecryptionResult> {
    sealed_sender_decrypt(
        ciphertext,
        trust_root,
        timestamp,
        local_e164.map(str::to_owned),
        local_uuid,
        local_device_id,
        &mut party.store.session_store,
        &mut party.store.identity_store,
        &mut party.store.pre_key_store,
        &party.store.signed_pre_key_store,
        &mut party.store.kyber_pre_key_store,
        &mut party.store.sender_key_store,
        &party.config,
        &mut party.rng,
    )
    .await
}

async fn open(party: &mut TestParty, ciphertext: &[u8], trust_root: &IdentityKey) -> Result<SealedSenderDecryptionResult> {
    let (uuid, device) = (party.uuid.to_string(), party.device_id());
    open_as(party, ciphertext, trust_root, NOW, None, uuid, device).await
}

async fn seal(sender: &mut TestParty, to: &ProtocolAddress, certs: &TestCertificates, ptext: &[u8]) -> Vec<u8> {
    let cert = certs.sender_certificate(sender, expiry()).unwrap();
    sealed_sender_encrypt(
        to,
        &cert,
        ptext,
        &mut sender.store.session_store,
        &mut sender.store.identity_store,
        NOW,
        &sender.config,
        &mut sender.rng,
    )
    .await
    .unwrap()
}

/// A sealed PlaintextContent needs no session, only the recipient's identity.
async fn seal_plaintext(sender: &mut TestParty, to: &ProtocolAddress, certs: &TestCertificates, e164: Option<&str>) -> Vec<u8> {
    let cert = certs.sender_certificate_with_e164(sender, e164, expiry()).unwrap();
    let report = DecryptionErrorMessage::for_original(&[], CiphertextMessageType::SenderKey, NOW, 1).unwrap();
    let content = CiphertextMessage::PlaintextContent(PlaintextContent::try_from(report).unwrap());
    let usmc = UnidentifiedSenderMessageContent::from_message(&content, cert, ContentHint::Implicit, None).unwrap();
    sealed_sender_encrypt_from_usmc(to, &usmc, &sender.store.identity_store, &mut sender.rng).await.unwrap()
}

#[tokio::test]
async fn test_single_recipient_round_trip() {
    init_test_logging();
    let certs = TestCertificates::new(1).unwrap();
    let mut alice = TestParty::new(200, 1);
    let mut bob = TestParty::new(201, 3);
    establish_session(&mut alice, &mut bob, NOW).await.unwrap();
    let bob_addr = bob.address.clone();

    let sealed = seal(&mut alice, &bob_addr, &certs, b"who sent this?").await;
    assert_eq!(sealed[0], 0x11);

    let result = open(&mut bob, &sealed, &certs.trust_root()).await.unwrap();
    assert_eq!(result.message, b"who sent this?");
    assert_eq!(result.sender_uuid, alice.uuid.to_string());
    assert_eq!(result.sender_e164, None);
    assert_eq!(result.device_id, alice.device_id());
    assert_eq!(result.content_hint, ContentHint::Default);
    assert_eq!(result.group_id, None);

    // Bob now has a session keyed by the certified sender and can reply.
    let alice_addr = alice.address.clone();
    let reply = seal(&mut bob, &alice_addr, &certs, b"you did").await;
    assert_eq!(open(&mut alice, &reply, &certs.trust_root()).await.unwrap().message, b"you did");
}

#[tokio::test]
async fn test_envelope_contents_without_validation() {
    let certs = TestCertificates::new(2).unwrap();
    let mut alice = TestParty::new(202, 1);
    let mut bob = TestParty::new(203, 1);
    establish_session(&mut alice, &mut bob, NOW).await.unwrap();
    let bob_addr = bob.address.clone();

    let sealed = seal(&mut alice, &bob_addr, &certs, b"inner").await;
    let usmc = sealed_sender_decrypt_to_usmc(&sealed, &bob.store.identity_store).await.unwrap();
    assert_eq!(usmc.msg_type(), CiphertextMessageType::PreKey);
    assert_eq!(usmc.sender().sender_uuid(), alice.uuid.to_string());
    assert_eq!(usmc.sender().key(), &alice.identity_key());

    // Only the recipient can open it.
    let carol = TestParty::new(204, 1);
    let err = sealed_sender_decrypt_to_usmc(&sealed, &carol.store.identity_store).await.unwrap_err();
    assert!(err.is_fatal(), "{err}");
}

#[tokio::test]
async fn test_certificate_checks() {
    let certs = TestCertificates::new(3).unwrap();
    let other_root = TestCertificates::new(4).unwrap();
    let mut alice = TestParty::new(205, 1);
    let mut bob = TestParty::new(206, 1);
    establish_session(&mut alice, &mut bob, NOW).await.unwrap();
    let bob_addr = bob.address.clone();
    let sealed = seal(&mut alice, &bob_addr, &certs, b"hello").await;
    let (uuid, device) = (bob.uuid.to_string(), bob.device_id());

    let err = open(&mut bob, &sealed, &other_root.trust_root()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSenderCertificate { .. }), "{err}");

    let too_late = expiry();
    let err = open_as(&mut bob, &sealed, &certs.trust_root(), too_late, None, uuid.clone(), device).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSenderCertificate { .. }), "{err}");

    // Nothing was consumed by the failed attempts.
    let just_in_time = Timestamp::from_epoch_millis(too_late.epoch_millis() - 1);
    let result = open_as(&mut bob, &sealed, &certs.trust_root(), just_in_time, None, uuid, device).await.unwrap();
    assert_eq!(result.message, b"hello");
}

#[tokio::test]
async fn test_self_send_detection() {
    let certs = TestCertificates::new(5).unwrap();
    let mut alice = TestParty::new(207, 1);
    let mut bob = TestParty::new(208, 1);
    establish_session(&mut alice, &mut bob, NOW).await.unwrap();
    let bob_addr = bob.address.clone();
    let root = certs.trust_root();

    let sealed = seal_plaintext(&mut alice, &bob_addr, &certs, Some("+14155550100")).await;

    // Same uuid (any case) and device.
    let upper = alice.uuid.to_string().to_uppercase();
    let err = open_as(&mut bob, &sealed, &root, NOW, None, upper.clone(), alice.device_id()).await.unwrap_err();
    assert!(matches!(err, EngineError::SealedSenderSelfSend));

    // Same phone number and device.
    let err = open_as(&mut bob, &sealed, &root, NOW, Some("+14155550100"), "someone-else".into(), alice.device_id())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SealedSenderSelfSend));

    // Another device of the same account is fine.
    let result = open_as(&mut bob, &sealed, &root, NOW, None, upper, DeviceId::from(2)).await.unwrap();
    assert_eq!(result.content_hint, ContentHint::Implicit);
    assert_eq!(result.sender_e164.as_deref(), Some("+14155550100"));
}

#[tokio::test]
async fn test_decryption_error_travels_sealed() {
    let certs = TestCertificates::new(6).unwrap();
    let mut alice = TestParty::new(209, 1);
    let mut bob = TestParty::new(210, 1);
    establish_session(&mut alice, &mut bob, NOW).await.unwrap();
    let bob_addr = bob.address.clone();

    let sealed = seal_plaintext(&mut alice, &bob_addr, &certs, None).await;
    let result = open(&mut bob, &sealed, &certs.trust_root()).await.unwrap();
    let report = extract_decryption_error_message_from_serialized_content(&result.message).unwrap();
    assert_eq!(report.timestamp(), NOW);
    assert!(report.ratchet_key().is_none());
}

#[tokio::test]
async fn test_unknown_envelope_version() {
    let bob = TestParty::new(211, 1);
    for first in [0x00, 0x21, 0x23, 0x33] {
        let err = sealed_sender_decrypt_to_usmc(&[first, 1, 2, 3], &bob.store.identity_store).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownSealedSenderVersion(_)), "{first:#x}: {err}");
    }
    assert!(sealed_sender_decrypt_to_usmc(&[], &bob.store.identity_store).await.is_err());
}

struct FanOut {
    certs: TestCertificates,
    alice: TestParty,
    bob: TestParty,
    bob2: TestParty,
    carol: TestParty,
}

impl FanOut {
    async fn new(seed: u64) -> Self {
        init_test_logging();
        let certs = TestCertificates::new(seed).unwrap();
        let mut alice = TestParty::new(seed + 1, 1);
        let mut bob = TestParty::new(seed + 2, 1);
        let mut bob2 = bob.new_device(seed + 3, 2);
        let mut carol = TestParty::new(seed + 4, 1);
        for member in [&mut bob, &mut bob2, &mut carol] {
            establish_session(&mut alice, member, NOW).await.unwrap();
        }

        let skdm = create_sender_key_distribution_message(&alice.address, GROUP, &mut alice.store, &mut alice.rng)
            .await
            .unwrap();
        for member in [&mut bob, &mut bob2, &mut carol] {
            process_sender_key_distribution_message(&alice.address, &skdm, &mut member.store).await.unwrap();
        }
        Self { certs, alice, bob, bob2, carol }
    }

    async fn usmc(&mut self, text: &str) -> UnidentifiedSenderMessageContent {
        let message = group_encrypt(&mut self.alice.store, &self.alice.address, GROUP, text.as_bytes()).await.unwrap();
        let cert = self.certs.sender_certificate(&self.alice, expiry()).unwrap();
        UnidentifiedSenderMessageContent::from_message(
            &CiphertextMessage::SenderKeyMessage(message),
            cert,
            ContentHint::Resendable,
            Some(b"group-7".to_vec()),
        )
        .unwrap()
    }

    async fn sessions(&self, addresses: &[&ProtocolAddress]) -> Vec<SessionRecord> {
        self.alice.store.session_store.load_existing_sessions(addresses).await.unwrap()
    }
}

fn service_id(party: &TestParty) -> ServiceId {
    ServiceId::parse_from_service_id_string(&party.uuid.to_string()).unwrap()
}

#[tokio::test]
async fn test_multi_recipient_fan_out() {
    let mut world = FanOut::new(300).await;
    let dave = ServiceId::parse_from_service_id_string("PNI:9d0652a3-dcc3-4d11-975f-74d61598733f").unwrap();
    let usmc = world.usmc("to the whole group").await;

    let addresses = [&world.bob.address, &world.bob2.address, &world.carol.address];
    let records = world.sessions(&addresses).await;
    let record_refs: Vec<&SessionRecord> = records.iter().collect();
    let sent = sealed_sender_multi_recipient_encrypt(
        &addresses,
        &record_refs,
        [dave],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap();
    assert_eq!(sent[0], 0x23);

    let parsed = SealedSenderV2SentMessage::parse(&sent).unwrap();
    assert_eq!(parsed.recipients.len(), 3);
    let (bob_id, bob_entry) = &parsed.recipients[0];
    assert_eq!(*bob_id, service_id(&world.bob));
    assert_eq!(
        bob_entry.devices,
        vec![
            (DeviceId::from(1), world.bob.registration_id() as u16),
            (DeviceId::from(2), world.bob2.registration_id() as u16),
        ]
    );
    assert_eq!(parsed.recipients[1].0, service_id(&world.carol));
    assert_eq!(parsed.recipients[2].0, dave);
    assert!(parsed.recipients[2].1.is_excluded());

    // Excluded recipients are their fixed-width service id followed by a zero device byte.
    let dave_bytes = dave.service_id_fixed_width_binary();
    let at = sent.windows(dave_bytes.len()).position(|w| w == dave_bytes).unwrap();
    assert_eq!(sent[at + dave_bytes.len()], 0x00);

    let for_bob = parsed.received_message_parts_for_recipient(bob_entry).concat();
    let for_carol = parsed.received_message_parts_for_recipient(&parsed.recipients[1].1).concat();
    assert_eq!(for_bob[0], 0x22);

    let trust_root = world.certs.trust_root();
    for (party, received) in [(&mut world.bob, &for_bob), (&mut world.bob2, &for_bob), (&mut world.carol, &for_carol)] {
        let result = open(party, received, &trust_root).await.unwrap();
        assert_eq!(result.message, b"to the whole group");
        assert_eq!(result.content_hint, ContentHint::Resendable);
        assert_eq!(result.group_id.as_deref(), Some(b"group-7".as_slice()));
        assert_eq!(result.sender_uuid, world.alice.uuid.to_string());
    }

    // Carol's header does not open Bob's copy.
    let mut crossed = for_carol.clone();
    crossed[1..49].copy_from_slice(&for_bob[1..49]);
    assert!(open(&mut world.carol, &crossed, &trust_root).await.is_err());
}

#[tokio::test]
async fn test_single_recipient_extraction() {
    let mut world = FanOut::new(400).await;
    let usmc = world.usmc("just carol").await;
    let excluded = service_id(&world.bob);

    let carol_records = world.sessions(&[&world.carol.address]).await;
    let sent = sealed_sender_multi_recipient_encrypt(
        &[&world.carol.address],
        &[&carol_records[0]],
        [excluded],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap();

    let received = sealed_sender_multi_recipient_message_for_single_recipient(&sent).unwrap();
    let result = open(&mut world.carol, &received, &world.certs.trust_root()).await.unwrap();
    assert_eq!(result.message, b"just carol");

    let both = world.sessions(&[&world.bob.address, &world.carol.address]).await;
    let sent = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address, &world.carol.address],
        &[&both[0], &both[1]],
        [],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap();
    let err = sealed_sender_multi_recipient_message_for_single_recipient(&sent).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }), "{err}");
}

#[tokio::test]
async fn test_fan_out_rejections() {
    let mut world = FanOut::new(500).await;
    let usmc = world.usmc("rejected").await;
    let bob_record = world.sessions(&[&world.bob.address]).await.remove(0);

    // Missing session.
    let fresh = SessionRecord::new_fresh();
    let err = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address],
        &[&fresh],
        [],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap_err();
    assert!(matches!(&err, EngineError::SessionNotFound { address } if *address == world.bob.address));

    // Same device twice.
    let err = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address, &world.bob.address],
        &[&bob_record, &bob_record],
        [],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }), "{err}");

    // Address names must be service ids.
    let named = ProtocolAddress::new("bob", DeviceId::from(1));
    let err = sealed_sender_multi_recipient_encrypt(
        &[&named],
        &[&bob_record],
        [],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }), "{err}");

    // Two devices of one account with different identities.
    let carol_record = world.sessions(&[&world.carol.address]).await.remove(0);
    let err = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address, &world.bob2.address],
        &[&bob_record, &carol_record],
        [],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }), "{err}");
}

#[tokio::test]
async fn test_excluded_recipient_must_not_be_a_destination() {
    let mut world = FanOut::new(550).await;
    let usmc = world.usmc("overlap").await;
    let records = world.sessions(&[&world.bob.address, &world.carol.address]).await;

    let err = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address, &world.carol.address],
        &[&records[0], &records[1]],
        [service_id(&world.carol)],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }), "{err}");

    let dave = ServiceId::parse_from_service_id_string("PNI:9d0652a3-dcc3-4d11-975f-74d61598733f").unwrap();
    let err = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address],
        &[&records[0]],
        [dave, dave],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument { .. }), "{err}");

    // Without the overlap the same call yields an envelope that parses.
    let sent = sealed_sender_multi_recipient_encrypt(
        &[&world.bob.address],
        &[&records[0]],
        [service_id(&world.carol)],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap();
    let parsed = SealedSenderV2SentMessage::parse(&sent).unwrap();
    assert_eq!(parsed.recipients.len(), 2);
    assert!(parsed.recipients[1].1.is_excluded());
}

#[tokio::test]
async fn test_reserved_registration_id_rejected() {
    let certs = TestCertificates::new(600).unwrap();
    let mut alice = TestParty::new(601, 1);
    let mut erin = TestParty::new(602, 1);
    let published = erin.pre_key_bundle(NOW, true).await.unwrap();
    let reserved = palisade_core::PreKeyBundle::new(
        0x4000,
        published.device_id(),
        published.pre_key_id().zip(published.pre_key_public().copied()),
        published.signed_pre_key_id(),
        *published.signed_pre_key_public(),
        published.signed_pre_key_signature().to_vec(),
        *published.identity_key(),
        published.kyber_pre_key_id(),
        published.kyber_pre_key_public().clone(),
        published.kyber_pre_key_signature().to_vec(),
    );
    alice.process_bundle(&erin.address, &reserved, NOW).await.unwrap();

    let record = alice.store.session_store.load_session(&erin.address).await.unwrap().unwrap();
    let cert = certs.sender_certificate(&alice, expiry()).unwrap();
    let content = CiphertextMessage::PlaintextContent(
        PlaintextContent::try_from(
            DecryptionErrorMessage::for_original(&[], CiphertextMessageType::SenderKey, NOW, 1).unwrap(),
        )
        .unwrap(),
    );
    let usmc = UnidentifiedSenderMessageContent::from_message(&content, cert, ContentHint::Default, None).unwrap();

    let err = sealed_sender_multi_recipient_encrypt(
        &[&erin.address],
        &[&record],
        [],
        &usmc,
        &alice.store.identity_store,
        &mut alice.rng,
    )
    .await
    .unwrap_err();
    assert!(
        matches!(&err, EngineError::InvalidRegistrationId { address, registration_id: 0x4000 } if *address == erin.address),
        "{err}"
    );
}

#[tokio::test]
async fn test_tampered_fan_out_rejected() {
    let mut world = FanOut::new(700).await;
    let usmc = world.usmc("integrity").await;
    let carol_records = world.sessions(&[&world.carol.address]).await;
    let sent = sealed_sender_multi_recipient_encrypt(
        &[&world.carol.address],
        &[&carol_records[0]],
        [],
        &usmc,
        &world.alice.store.identity_store,
        &mut world.alice.rng,
    )
    .await
    .unwrap();
    let received = sealed_sender_multi_recipient_message_for_single_recipient(&sent).unwrap();
    let root = world.certs.trust_root();

    // Wrapped key, tag, ephemeral key and body.
    for index in [1, 40, 60, received.len() - 1] {
        let mut tampered = received.clone();
        tampered[index] ^= 0x01;
        let err = open(&mut world.carol, &tampered, &root).await.unwrap_err();
        assert!(err.is_fatal(), "byte {index}: {err}");
    }
    assert!(SealedSenderV2SentMessage::parse(&sent[..20]).is_err());

    assert_eq!(open(&mut world.carol, &received, &root).await.unwrap().message, b"integrity");
}
