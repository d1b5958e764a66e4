//! Seeded protocol participants.

use palisade_core::{
    KyberPreKeyRecord, KyberPreKeyStore, MemoryProtocolStore, PreKeyBundle, PreKeyRecord,
    PreKeyStore, Result, SessionConfig, SignedPreKeyRecord, SignedPreKeyStore,
    consts::VALID_REGISTRATION_ID_MASK, message_decrypt, message_encrypt, process_prekey_bundle,
};
use palisade_crypto::{IdentityKey, IdentityKeyPair};
use palisade_proto::{
    CiphertextMessage, DeviceId, KyberPreKeyId, PreKeyId, ProtocolAddress, SignedPreKeyId,
    Timestamp, Uuid,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// One device of one account, with its own stores and RNG.
///
/// The address name is the account's ACI string, so the party can take part
/// in sealed sender exchanges without any mapping.
pub struct TestParty {
    /// Account id.
    pub uuid: Uuid,
    /// `uuid.device`.
    pub address: ProtocolAddress,
    /// Every store the engine needs.
    pub store: MemoryProtocolStore,
    /// Source of all randomness for this party.
    pub rng: ChaCha20Rng,
    /// Session policy used for encrypt and decrypt.
    pub config: SessionConfig,
    identity: IdentityKeyPair,
    registration_id: u32,
    next_key_id: u32,
}

impl TestParty {
    /// Party with fresh identity, derived entirely from `seed`.
    pub fn new(seed: u64, device_id: u32) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let identity = IdentityKeyPair::generate(&mut rng);
        let registration_id = rng.gen_range(1..=VALID_REGISTRATION_ID_MASK);
        Self::with_identity(identity, registration_id, device_id, rng)
    }

    /// Another device of the same account as `self`.
    pub fn new_device(&self, seed: u64, device_id: u32) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let registration_id = rng.gen_range(1..=VALID_REGISTRATION_ID_MASK);
        let mut party = Self::with_identity(self.identity.clone(), registration_id, device_id, rng);
        party.uuid = self.uuid;
        party.address = ProtocolAddress::new(self.uuid.to_string(), DeviceId::from(device_id));
        party
    }

    fn with_identity(identity: IdentityKeyPair, registration_id: u32, device_id: u32, mut rng: ChaCha20Rng) -> Self {
        let uuid = Uuid::from_bytes(rng.r#gen::<[u8; 16]>());
        Self {
            uuid,
            address: ProtocolAddress::new(uuid.to_string(), DeviceId::from(device_id)),
            store: MemoryProtocolStore::new(identity.clone(), registration_id),
            rng,
            config: SessionConfig::default(),
            identity,
            registration_id,
            next_key_id: 1,
        }
    }

    /// Long-term identity key.
    pub fn identity_key(&self) -> IdentityKey {
        self.identity.identity_key()
    }

    /// Long-term identity key pair.
    pub fn identity_key_pair(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Registration id advertised in bundles.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Device id of [`Self::address`].
    pub fn device_id(&self) -> DeviceId {
        self.address.device_id()
    }

    /// Generate and store a fresh signed, Kyber and (optionally) one-time
    /// prekey, and publish them as a bundle.
    pub async fn pre_key_bundle(&mut self, now: Timestamp, with_one_time_pre_key: bool) -> Result<PreKeyBundle> {
        let id = self.next_key_id;
        self.next_key_id += 1;

        let signed = SignedPreKeyRecord::generate(SignedPreKeyId::from(id), now, &self.identity, &mut self.rng);
        self.store.save_signed_pre_key(signed.id(), &signed).await?;

        let kyber = KyberPreKeyRecord::generate(KyberPreKeyId::from(id), now, &self.identity, &mut self.rng)?;
        self.store.save_kyber_pre_key(kyber.id(), &kyber).await?;

        let one_time = if with_one_time_pre_key {
            let record = PreKeyRecord::generate(PreKeyId::from(id), &mut self.rng);
            self.store.save_pre_key(record.id(), &record).await?;
            Some((record.id(), record.public_key()))
        } else {
            None
        };

        Ok(PreKeyBundle::new(
            self.registration_id,
            self.device_id(),
            one_time,
            signed.id(),
            signed.public_key(),
            signed.signature().to_vec(),
            self.identity_key(),
            kyber.id(),
            kyber.key_pair().public_key.clone(),
            kyber.signature().to_vec(),
        ))
    }

    /// Start a session with the owner of `bundle`.
    pub async fn process_bundle(&mut self, remote: &ProtocolAddress, bundle: &PreKeyBundle, now: Timestamp) -> Result<()> {
        process_prekey_bundle(
            remote,
            &mut self.store.session_store,
            &mut self.store.identity_store,
            bundle,
            now,
            &mut self.rng,
        )
        .await
    }

    /// Encrypt on the session with `remote`.
    pub async fn encrypt(&mut self, remote: &ProtocolAddress, ptext: &[u8], now: Timestamp) -> Result<CiphertextMessage> {
        message_encrypt(
            ptext,
            remote,
            &mut self.store.session_store,
            &mut self.store.identity_store,
            now,
            &self.config,
        )
        .await
    }

    /// Decrypt a message from `remote`, whichever kind it is.
    pub async fn decrypt(&mut self, remote: &ProtocolAddress, message: &CiphertextMessage) -> Result<Vec<u8>> {
        message_decrypt(
            message,
            remote,
            &mut self.store.session_store,
            &mut self.store.identity_store,
            &mut self.store.pre_key_store,
            &self.store.signed_pre_key_store,
            &mut self.store.kyber_pre_key_store,
            &self.config,
            &mut self.rng,
        )
        .await
    }
}

/// Give `initiator` a session with `responder` from a fresh bundle that
/// includes a one-time prekey.
pub async fn establish_session(initiator: &mut TestParty, responder: &mut TestParty, now: Timestamp) -> Result<()> {
    let bundle = responder.pre_key_bundle(now, true).await?;
    let address = responder.address.clone();
    initiator.process_bundle(&address, &bundle, now).await
}
