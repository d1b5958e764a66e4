//! Server and sender certificates.
//!
//! ```text
//!   trust root ──signs──> ServerCertificate { key_id, key }
//!                              │
//!                              └──signs──> SenderCertificate { uuid, e164?, device,
//!                                                              expiration, identity key }
//! ```
//!
//! Both certificates keep the exact signed bytes, so validation never
//! re-encodes anything.

use palisade_crypto::{IdentityKey, IdentityKeyPair, serde_bytes};
use palisade_proto::{DeviceId, Timestamp, codec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

#[derive(Serialize, Deserialize)]
struct SignedData {
    #[serde(with = "serde_bytes")]
    certificate: Vec<u8>,
    #[serde(with = "serde_bytes")]
    signature: Vec<u8>,
}

impl SignedData {
    fn decode(bytes: &[u8], what: &'static str) -> Result<Self> {
        codec::from_cbor(bytes, what).map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct ServerCertificateBody {
    key_id: u32,
    key: IdentityKey,
}

/// Server signing key, vouched for by the trust root.
#[derive(Debug, Clone)]
pub struct ServerCertificate {
    key_id: u32,
    key: IdentityKey,
    certificate: Vec<u8>,
    signature: Vec<u8>,
    serialized: Vec<u8>,
}

impl ServerCertificate {
    /// Certify `key` under `key_id` with the trust root.
    pub fn new(key_id: u32, key: IdentityKey, trust_root: &IdentityKeyPair) -> Result<Self> {
        let certificate = codec::to_cbor(&ServerCertificateBody { key_id, key }, "server certificate")?;
        let signature = trust_root.sign(&certificate);
        let serialized = codec::to_cbor(
            &SignedData { certificate: certificate.clone(), signature: signature.clone() },
            "server certificate",
        )?;
        Ok(Self { key_id, key, certificate, signature, serialized })
    }

    /// Decode a serialized certificate. The signature is not checked here.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let signed = SignedData::decode(bytes, "server certificate")?;
        let body: ServerCertificateBody = codec::from_cbor(&signed.certificate, "server certificate")
            .map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))?;
        Ok(Self {
            key_id: body.key_id,
            key: body.key,
            certificate: signed.certificate,
            signature: signed.signature,
            serialized: bytes.to_vec(),
        })
    }

    /// Whether the trust root signed this certificate.
    pub fn validate(&self, trust_root: &IdentityKey) -> bool {
        trust_root.verify_signature(&self.certificate, &self.signature)
    }

    /// Server key id.
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Server signing key.
    pub fn public_key(&self) -> &IdentityKey {
        &self.key
    }

    /// Signed bytes.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Trust root signature over [`Self::certificate`].
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

#[derive(Serialize, Deserialize)]
struct SenderCertificateBody {
    sender_uuid: String,
    sender_e164: Option<String>,
    sender_device: DeviceId,
    expires: Timestamp,
    identity_key: IdentityKey,
    #[serde(with = "serde_bytes")]
    signer: Vec<u8>,
}

/// Binds a sender's account, device and identity key, signed by the server.
#[derive(Debug, Clone)]
pub struct SenderCertificate {
    sender_uuid: String,
    sender_e164: Option<String>,
    sender_device_id: DeviceId,
    expiration: Timestamp,
    key: IdentityKey,
    signer: ServerCertificate,
    certificate: Vec<u8>,
    signature: Vec<u8>,
    serialized: Vec<u8>,
}

impl SenderCertificate {
    /// Issue a certificate signed with the server key behind `signer`.
    pub fn new(
        sender_uuid: String,
        sender_e164: Option<String>,
        key: IdentityKey,
        sender_device_id: DeviceId,
        expiration: Timestamp,
        signer: ServerCertificate,
        signer_key: &IdentityKeyPair,
    ) -> Result<Self> {
        let certificate = codec::to_cbor(
            &SenderCertificateBody {
                sender_uuid: sender_uuid.clone(),
                sender_e164: sender_e164.clone(),
                sender_device: sender_device_id,
                expires: expiration,
                identity_key: key,
                signer: signer.serialized().to_vec(),
            },
            "sender certificate",
        )?;
        let signature = signer_key.sign(&certificate);
        let serialized = codec::to_cbor(
            &SignedData { certificate: certificate.clone(), signature: signature.clone() },
            "sender certificate",
        )?;
        Ok(Self {
            sender_uuid,
            sender_e164,
            sender_device_id,
            expiration,
            key,
            signer,
            certificate,
            signature,
            serialized,
        })
    }

    /// Decode a serialized certificate. Signatures are not checked here.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let signed = SignedData::decode(bytes, "sender certificate")?;
        let body: SenderCertificateBody = codec::from_cbor(&signed.certificate, "sender certificate")
            .map_err(|e| EngineError::invalid_sealed_sender(e.to_string()))?;
        Ok(Self {
            sender_uuid: body.sender_uuid,
            sender_e164: body.sender_e164,
            sender_device_id: body.sender_device,
            expiration: body.expires,
            key: body.identity_key,
            signer: ServerCertificate::deserialize(&body.signer)?,
            certificate: signed.certificate,
            signature: signed.signature,
            serialized: bytes.to_vec(),
        })
    }

    /// Whether the chain verifies up to `trust_root` and the certificate has
    /// not expired at `validation_time`.
    pub fn validate(&self, trust_root: &IdentityKey, validation_time: Timestamp) -> bool {
        if !self.signer.validate(trust_root) {
            debug!(key_id = self.signer.key_id(), "server certificate not signed by trust root");
            return false;
        }
        if !self.signer.public_key().verify_signature(&self.certificate, &self.signature) {
            debug!(key_id = self.signer.key_id(), "sender certificate not signed by server key");
            return false;
        }
        if validation_time >= self.expiration {
            debug!(expiration = ?self.expiration, now = ?validation_time, "sender certificate expired");
            return false;
        }
        true
    }

    /// Sender account uuid.
    pub fn sender_uuid(&self) -> &str {
        &self.sender_uuid
    }

    /// Sender phone number, if the server disclosed it.
    pub fn sender_e164(&self) -> Option<&str> {
        self.sender_e164.as_deref()
    }

    /// Sending device.
    pub fn sender_device_id(&self) -> DeviceId {
        self.sender_device_id
    }

    /// End of validity.
    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    /// Sender identity key.
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Issuing server certificate.
    pub fn signer(&self) -> &ServerCertificate {
        &self.signer
    }

    /// Signed bytes.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Server signature over [`Self::certificate`].
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Wire bytes.
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    struct Chain {
        trust_root: IdentityKeyPair,
        sender: SenderCertificate,
    }

    fn issue(seed: u64) -> Chain {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let trust_root = IdentityKeyPair::generate(&mut rng);
        let server_key = IdentityKeyPair::generate(&mut rng);
        let sender_key = IdentityKeyPair::generate(&mut rng);
        let server = ServerCertificate::new(1, server_key.identity_key(), &trust_root).unwrap();
        let sender = SenderCertificate::new(
            "9d0652a3-dcc3-4d11-975f-74d61598733f".into(),
            Some("+14151111111".into()),
            sender_key.identity_key(),
            DeviceId::from(1),
            Timestamp::from_epoch_millis(31337),
            server,
            &server_key,
        )
        .unwrap();
        Chain { trust_root, sender }
    }

    #[test]
    fn valid_until_expiration() {
        let chain = issue(100);
        let root = chain.trust_root.identity_key();
        assert!(chain.sender.validate(&root, Timestamp::from_epoch_millis(31336)));
        assert!(!chain.sender.validate(&root, Timestamp::from_epoch_millis(31337)));
    }

    #[test]
    fn wrong_trust_root_rejected() {
        let chain = issue(101);
        let other = issue(102).trust_root.identity_key();
        assert!(!chain.sender.validate(&other, Timestamp::from_epoch_millis(0)));
    }

    #[test]
    fn survives_serialization() {
        let chain = issue(103);
        let decoded = SenderCertificate::deserialize(chain.sender.serialized()).unwrap();
        assert_eq!(decoded.sender_uuid(), chain.sender.sender_uuid());
        assert_eq!(decoded.sender_e164(), Some("+14151111111"));
        assert_eq!(decoded.sender_device_id(), DeviceId::from(1));
        assert_eq!(decoded.key(), chain.sender.key());
        assert_eq!(decoded.signer().key_id(), 1);
        assert!(decoded.validate(&chain.trust_root.identity_key(), Timestamp::from_epoch_millis(5)));
    }

    #[test]
    fn tampered_certificate_rejected() {
        let chain = issue(104);
        let mut signed: SignedData = codec::from_cbor(chain.sender.serialized(), "test").unwrap();
        let last = signed.signature.len() - 1;
        signed.signature[last] ^= 0x01;
        let bytes = codec::to_cbor(&signed, "test").unwrap();

        let decoded = SenderCertificate::deserialize(&bytes).unwrap();
        assert!(!decoded.validate(&chain.trust_root.identity_key(), Timestamp::from_epoch_millis(5)));
    }
}
