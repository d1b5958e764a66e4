//! CBOR helpers and version-byte handling shared by every wire structure.
//!
//! Messages are laid out as
//!
//! ```text
//! [version: u8][CBOR body][raw trailer (MAC or signature), optional]
//! ```
//!
//! The version byte packs the message version in the high nibble and the
//! newest version the sender understands in the low nibble.

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{ProtocolError, Result},
    messages::CiphertextMessageType,
};

/// Encode `value` as CBOR.
pub fn to_cbor<T: Serialize>(value: &T, what: &'static str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    append_cbor(value, &mut out, what)?;
    Ok(out)
}

/// Append the CBOR encoding of `value` to `out`.
pub fn append_cbor<T: Serialize>(value: &T, out: &mut Vec<u8>, what: &'static str) -> Result<()> {
    ciborium::ser::into_writer(value, out)
        .map_err(|e| ProtocolError::InvalidEncoding { what, reason: e.to_string() })
}

/// Decode CBOR that must span all of `bytes`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8], what: &'static str) -> Result<T> {
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| ProtocolError::InvalidEncoding { what, reason: e.to_string() })?;
    if !reader.is_empty() {
        return Err(ProtocolError::InvalidEncoding {
            what,
            reason: format!("{} trailing bytes", reader.len()),
        });
    }
    Ok(value)
}

pub(crate) fn encode_body<T: Serialize>(
    value: &T,
    out: &mut Vec<u8>,
    message_type: CiphertextMessageType,
) -> Result<()> {
    append_cbor(value, out, "message body").map_err(|e| as_message_error(e, message_type))
}

pub(crate) fn decode_body<T: DeserializeOwned>(
    bytes: &[u8],
    message_type: CiphertextMessageType,
) -> Result<T> {
    from_cbor(bytes, "message body").map_err(|e| as_message_error(e, message_type))
}

fn as_message_error(err: ProtocolError, message_type: CiphertextMessageType) -> ProtocolError {
    match err {
        ProtocolError::InvalidEncoding { reason, .. } => {
            ProtocolError::InvalidMessage { message_type, reason }
        },
        other => other,
    }
}

/// Pack a version byte.
pub fn version_byte(message_version: u8, current_version: u8) -> u8 {
    (message_version << 4) | (current_version & 0x0f)
}

/// Check the high nibble of a version byte against the single supported
/// version and return it.
pub(crate) fn check_version(
    byte: u8,
    supported: u8,
    message_type: CiphertextMessageType,
) -> Result<u8> {
    let version = byte >> 4;
    if version < supported {
        return Err(ProtocolError::LegacyVersion { message_type, version });
    }
    if version > supported {
        return Err(ProtocolError::UnrecognizedVersion { message_type, version });
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: u32,
        name: String,
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = to_cbor(&Probe { id: 1, name: "a".into() }, "probe").unwrap();
        assert_eq!(from_cbor::<Probe>(&bytes, "probe").unwrap(), Probe { id: 1, name: "a".into() });

        bytes.push(0);
        assert!(matches!(from_cbor::<Probe>(&bytes, "probe"), Err(ProtocolError::InvalidEncoding { .. })));
    }

    #[test]
    fn body_errors_carry_message_type() {
        let err = decode_body::<Probe>(&[0xff, 0x00], CiphertextMessageType::Whisper).unwrap_err();
        assert_eq!(err.message_type(), Some(CiphertextMessageType::Whisper));
    }

    #[test]
    fn version_nibbles() {
        assert_eq!(version_byte(4, 4), 0x44);
        assert_eq!(check_version(0x44, 4, CiphertextMessageType::Whisper).unwrap(), 4);
        assert!(matches!(
            check_version(0x33, 4, CiphertextMessageType::Whisper),
            Err(ProtocolError::LegacyVersion { version: 3, .. })
        ));
        assert!(matches!(
            check_version(0x54, 4, CiphertextMessageType::PreKey),
            Err(ProtocolError::UnrecognizedVersion { version: 5, .. })
        ));
    }
}
