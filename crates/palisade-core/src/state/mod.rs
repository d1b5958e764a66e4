//! Persistent records.
//!
//! Every record serializes as `[RECORD_VERSION][CBOR]`. Records are plain
//! values: the engine loads one from a store, works on an owned copy and
//! writes it back only after the whole operation succeeded.

mod bundle;
mod prekey;
mod record;
mod sender_key;
mod session;

pub use bundle::PreKeyBundle;
use palisade_proto::{ProtocolError, codec};
pub use prekey::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
pub use record::SessionRecord;
pub use sender_key::SenderKeyRecord;
pub(crate) use sender_key::SenderKeyState;
use serde::{Serialize, de::DeserializeOwned};
pub(crate) use session::{PendingPreKey, SessionState};

use crate::{consts::RECORD_VERSION, error::Result};

pub(crate) fn encode_record<T: Serialize>(value: &T, what: &'static str) -> Result<Vec<u8>> {
    let mut out = vec![RECORD_VERSION];
    codec::append_cbor(value, &mut out, what)?;
    Ok(out)
}

pub(crate) fn decode_record<T: DeserializeOwned>(bytes: &[u8], what: &'static str) -> Result<T> {
    match bytes.split_first() {
        Some((&RECORD_VERSION, body)) => Ok(codec::from_cbor(body, what)?),
        Some((&other, _)) => Err(ProtocolError::InvalidEncoding {
            what,
            reason: format!("unsupported record version {other}"),
        }
        .into()),
        None => Err(ProtocolError::InvalidEncoding { what, reason: "empty record".into() }.into()),
    }
}
