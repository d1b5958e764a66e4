//! Sender certificate issuance for sealed sender tests.

use palisade_core::{Result, SenderCertificate, ServerCertificate};
use palisade_crypto::{IdentityKey, IdentityKeyPair};
use palisade_proto::Timestamp;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::TestParty;

/// A trust root and one server key it vouches for.
pub struct TestCertificates {
    trust_root: IdentityKeyPair,
    server_key: IdentityKeyPair,
    server_certificate: ServerCertificate,
}

impl TestCertificates {
    /// Trust root and server key derived from `seed`.
    pub fn new(seed: u64) -> Result<Self> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let trust_root = IdentityKeyPair::generate(&mut rng);
        let server_key = IdentityKeyPair::generate(&mut rng);
        let server_certificate = ServerCertificate::new(1, server_key.identity_key(), &trust_root)?;
        Ok(Self { trust_root, server_key, server_certificate })
    }

    /// Key that recipients validate against.
    pub fn trust_root(&self) -> IdentityKey {
        self.trust_root.identity_key()
    }

    /// Certificate for `party`, valid until `expiration`.
    pub fn sender_certificate(&self, party: &TestParty, expiration: Timestamp) -> Result<SenderCertificate> {
        self.sender_certificate_with_e164(party, None, expiration)
    }

    /// Certificate for `party` that also names a phone number.
    pub fn sender_certificate_with_e164(
        &self,
        party: &TestParty,
        e164: Option<&str>,
        expiration: Timestamp,
    ) -> Result<SenderCertificate> {
        SenderCertificate::new(
            party.uuid.to_string(),
            e164.map(str::to_owned),
            party.identity_key(),
            party.device_id(),
            expiration,
            self.server_certificate.clone(),
            &self.server_key,
        )
    }
}
