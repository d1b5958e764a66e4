//! Safety numbers.
//!
//! Each side hashes its identity key with its stable identifier many times.
//! The two digests give a 60-digit string to read aloud and a compact
//! structure to scan. Both come out the same no matter which party computes
//! them.
//!
//! ```text
//!   h0 = SHA-512(version:u16 || key || identifier || key)
//!   hi = SHA-512(h(i-1) || key)              i in 1..iterations
//!
//!   display  = sort(digits(local[..30]), digits(remote[..30])).concat()
//!   scannable = CBOR{version, local[..32], remote[..32]}
//! ```

use palisade_crypto::IdentityKey;
use palisade_proto::codec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::trace;

use crate::error::{EngineError, Result};

const DISPLAY_BYTES: usize = 30;
const SCANNABLE_BYTES: usize = 32;
const DIGITS_PER_CHUNK: usize = 5;

/// Version-2 scannable fingerprints, the current format.
pub const FINGERPRINT_VERSION: u32 = 2;

fn iterate_hash(version: u16, iterations: u32, identifier: &[u8], key: &IdentityKey) -> Result<Vec<u8>> {
    if iterations == 0 {
        return Err(EngineError::InvalidArgument { reason: "fingerprint needs at least one iteration".into() });
    }
    let key_bytes = key.serialize();

    let mut hash = Sha512::new()
        .chain_update(version.to_be_bytes())
        .chain_update(&key_bytes)
        .chain_update(identifier)
        .chain_update(&key_bytes)
        .finalize();
    for _ in 1..iterations {
        hash = Sha512::new().chain_update(hash).chain_update(&key_bytes).finalize();
    }
    Ok(hash.to_vec())
}

/// Readable half of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayableFingerprint {
    local: String,
    remote: String,
}

impl DisplayableFingerprint {
    fn new(local: &[u8], remote: &[u8]) -> Self {
        Self { local: Self::encode(local), remote: Self::encode(remote) }
    }

    fn encode(digest: &[u8]) -> String {
        digest[..DISPLAY_BYTES]
            .chunks_exact(5)
            .map(|chunk| {
                let value = chunk.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)) % 100_000;
                format!("{value:0width$}", width = DIGITS_PER_CHUNK)
            })
            .collect()
    }
}

impl std::fmt::Display for DisplayableFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.local <= self.remote {
            write!(f, "{}{}", self.local, self.remote)
        } else {
            write!(f, "{}{}", self.remote, self.local)
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ScannableBody {
    version: u32,
    #[serde(with = "palisade_crypto::serde_bytes")]
    local_fingerprint: Vec<u8>,
    #[serde(with = "palisade_crypto::serde_bytes")]
    remote_fingerprint: Vec<u8>,
}

/// Scannable half of a fingerprint.
#[derive(Debug, Clone)]
pub struct ScannableFingerprint {
    version: u32,
    local: [u8; SCANNABLE_BYTES],
    remote: [u8; SCANNABLE_BYTES],
}

impl ScannableFingerprint {
    fn new(version: u32, local: &[u8], remote: &[u8]) -> Self {
        let mut out = Self { version, local: [0; SCANNABLE_BYTES], remote: [0; SCANNABLE_BYTES] };
        out.local.copy_from_slice(&local[..SCANNABLE_BYTES]);
        out.remote.copy_from_slice(&remote[..SCANNABLE_BYTES]);
        out
    }

    /// Decode the bytes shown in a QR code.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let body: ScannableBody = codec::from_cbor(bytes, "scannable fingerprint")?;
        let field = |v: &[u8]| -> Result<[u8; SCANNABLE_BYTES]> {
            v.try_into().map_err(|_| EngineError::InvalidArgument {
                reason: format!("scannable fingerprint half has {} bytes", v.len()),
            })
        };
        Ok(Self {
            version: body.version,
            local: field(&body.local_fingerprint)?,
            remote: field(&body.remote_fingerprint)?,
        })
    }

    /// Encode for a QR code.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(codec::to_cbor(
            &ScannableBody {
                version: self.version,
                local_fingerprint: self.local.to_vec(),
                remote_fingerprint: self.remote.to_vec(),
            },
            "scannable fingerprint",
        )?)
    }

    /// Format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Check a fingerprint scanned from the other party's screen.
    ///
    /// Their local half must be our remote half and the other way round.
    pub fn compare(&self, combined: &[u8]) -> Result<bool> {
        let theirs = Self::deserialize(combined)?;
        if theirs.version != self.version {
            return Err(EngineError::FingerprintVersionMismatch { theirs: theirs.version, ours: self.version });
        }
        let matches = theirs.local[..].ct_eq(&self.remote[..]) & theirs.remote[..].ct_eq(&self.local[..]);
        Ok(bool::from(matches))
    }
}

/// A safety number between two identities.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// Digits to compare by reading.
    pub display: DisplayableFingerprint,
    /// Structure to compare by scanning.
    pub scannable: ScannableFingerprint,
}

impl Fingerprint {
    /// Compute the fingerprint between our identity and theirs.
    ///
    /// `iterations` trades computation for resistance to targeted
    /// collisions; both parties must use the same count.
    pub fn new(
        version: u32,
        iterations: u32,
        local_id: &[u8],
        local_key: &IdentityKey,
        remote_id: &[u8],
        remote_key: &IdentityKey,
    ) -> Result<Self> {
        let hash_version = u16::try_from(version).map_err(|_| EngineError::InvalidArgument {
            reason: format!("fingerprint version {version} out of range"),
        })?;
        let local = iterate_hash(hash_version, iterations, local_id, local_key)?;
        let remote = iterate_hash(hash_version, iterations, remote_id, remote_key)?;
        trace!(version, iterations, "computed fingerprint");

        Ok(Self {
            display: DisplayableFingerprint::new(&local, &remote),
            scannable: ScannableFingerprint::new(version, &local, &remote),
        })
    }

    /// The 60 digits.
    pub fn display_string(&self) -> String {
        self.display.to_string()
    }
}
