//! Addressing: devices, protocol addresses and service ids.
//!
//! # Service id encodings
//!
//! ```text
//! string       "<uuid>"            Aci
//!              "PNI:<uuid>"        Pni
//!
//! fixed-width  [kind: u8][uuid: 16 bytes]     kind 0x00 = Aci, 0x01 = Pni
//! binary       [uuid: 16 bytes]               Aci only
//!              [0x01][uuid: 16 bytes]         Pni
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{ProtocolError, Result};

/// Device number within an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Numeric value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<DeviceId> for u32 {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One recipient device: an opaque account name plus a device id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolAddress {
    name: String,
    device_id: DeviceId,
}

impl ProtocolAddress {
    /// Address of `device_id` under `name`.
    pub fn new(name: impl Into<String>, device_id: DeviceId) -> Self {
        Self { name: name.into(), device_id }
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device id.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Discriminant of a [`ServiceId`] in its fixed-width binary form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServiceIdKind {
    /// Account identity
    Aci = 0,
    /// Phone-number identity
    Pni = 1,
}

/// Length of the fixed-width binary encoding.
pub const SERVICE_ID_FIXED_WIDTH_LEN: usize = 17;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct FixedWidthServiceId {
    kind: u8,
    uuid: [u8; 16],
}

/// Account-level identifier: a UUID tagged with the identity it names.
///
/// Ordering compares the kind first, then the UUID bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceId {
    /// Account identity
    Aci(Uuid),
    /// Phone-number identity
    Pni(Uuid),
}

impl ServiceId {
    /// Kind discriminant.
    pub fn kind(&self) -> ServiceIdKind {
        match self {
            Self::Aci(_) => ServiceIdKind::Aci,
            Self::Pni(_) => ServiceIdKind::Pni,
        }
    }

    /// Underlying UUID.
    pub fn raw_uuid(&self) -> Uuid {
        match self {
            Self::Aci(uuid) | Self::Pni(uuid) => *uuid,
        }
    }

    /// 17-byte encoding: kind byte then UUID bytes.
    pub fn service_id_fixed_width_binary(&self) -> [u8; SERVICE_ID_FIXED_WIDTH_LEN] {
        let fixed = FixedWidthServiceId { kind: self.kind() as u8, uuid: self.raw_uuid().into_bytes() };
        let mut out = [0u8; SERVICE_ID_FIXED_WIDTH_LEN];
        out.copy_from_slice(fixed.as_bytes());
        out
    }

    /// Compact encoding: bare UUID for an Aci, fixed-width for a Pni.
    pub fn service_id_binary(&self) -> Vec<u8> {
        match self {
            Self::Aci(uuid) => uuid.as_bytes().to_vec(),
            Self::Pni(_) => self.service_id_fixed_width_binary().to_vec(),
        }
    }

    /// Decode the 17-byte form.
    pub fn parse_from_service_id_fixed_width_binary(bytes: &[u8]) -> Result<Self> {
        let fixed = FixedWidthServiceId::read_from_bytes(bytes).map_err(|_| {
            ProtocolError::InvalidServiceId(format!("expected 17 bytes, got {}", bytes.len()))
        })?;
        let uuid = Uuid::from_bytes(fixed.uuid);
        match fixed.kind {
            0 => Ok(Self::Aci(uuid)),
            1 => Ok(Self::Pni(uuid)),
            other => Err(ProtocolError::InvalidServiceId(format!("unknown kind {other:#04x}"))),
        }
    }

    /// Decode either the compact or the fixed-width form.
    pub fn parse_from_service_id_binary(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Ok(Self::Aci(Uuid::from_bytes(uuid)))
            },
            SERVICE_ID_FIXED_WIDTH_LEN => {
                let id = Self::parse_from_service_id_fixed_width_binary(bytes)?;
                // An Aci has exactly one binary encoding: the bare UUID.
                if id.kind() == ServiceIdKind::Aci {
                    return Err(ProtocolError::InvalidServiceId("tagged ACI in compact form".into()));
                }
                Ok(id)
            },
            n => Err(ProtocolError::InvalidServiceId(format!("unexpected binary length {n}"))),
        }
    }

    /// String form: `<uuid>` for an Aci, `PNI:<uuid>` for a Pni.
    pub fn service_id_string(&self) -> String {
        match self {
            Self::Aci(uuid) => uuid.hyphenated().to_string(),
            Self::Pni(uuid) => format!("PNI:{}", uuid.hyphenated()),
        }
    }

    /// Parse the string form.
    pub fn parse_from_service_id_string(input: &str) -> Result<Self> {
        let (ctor, rest): (fn(Uuid) -> Self, &str) = match input.strip_prefix("PNI:") {
            Some(rest) => (Self::Pni, rest),
            None => (Self::Aci, input),
        };
        // Only the canonical hyphenated form is accepted.
        if rest.len() != 36 {
            return Err(ProtocolError::InvalidServiceId(format!("malformed uuid in {input:?}")));
        }
        Uuid::try_parse(rest)
            .map(ctor)
            .map_err(|e| ProtocolError::InvalidServiceId(format!("{input:?}: {e}")))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service_id_string())
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aci(uuid) => write!(f, "<ACI:{uuid}>"),
            Self::Pni(uuid) => write!(f, "<PNI:{uuid}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const UUID_BYTES: [u8; 16] = hex!("d1d1d1d1700011ebb32a33b8a8a487a6");

    #[test]
    fn fixed_width_layout() {
        let pni = ServiceId::Pni(Uuid::from_bytes(UUID_BYTES));
        let bytes = pni.service_id_fixed_width_binary();

        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..], &UUID_BYTES);
        assert_eq!(ServiceId::parse_from_service_id_fixed_width_binary(&bytes).unwrap(), pni);
    }

    #[test]
    fn string_forms() {
        let aci = ServiceId::parse_from_service_id_string("d1d1d1d1-7000-11eb-b32a-33b8a8a487a6").unwrap();
        assert_eq!(aci, ServiceId::Aci(Uuid::from_bytes(UUID_BYTES)));
        assert_eq!(aci.service_id_string(), "d1d1d1d1-7000-11eb-b32a-33b8a8a487a6");

        let pni = ServiceId::parse_from_service_id_string("PNI:d1d1d1d1-7000-11eb-b32a-33b8a8a487a6").unwrap();
        assert_eq!(pni.kind(), ServiceIdKind::Pni);
        assert_eq!(format!("{pni:?}"), "<PNI:d1d1d1d1-7000-11eb-b32a-33b8a8a487a6>");

        assert!(ServiceId::parse_from_service_id_string("+14151111111").is_err());
        assert!(ServiceId::parse_from_service_id_string("ACI:d1d1d1d1-7000-11eb-b32a-33b8a8a487a6").is_err());
    }

    #[test]
    fn compact_binary_forms() {
        let aci = ServiceId::Aci(Uuid::from_bytes(UUID_BYTES));
        assert_eq!(aci.service_id_binary().len(), 16);
        assert_eq!(ServiceId::parse_from_service_id_binary(&aci.service_id_binary()).unwrap(), aci);

        let tagged_aci = aci.service_id_fixed_width_binary();
        assert!(ServiceId::parse_from_service_id_binary(&tagged_aci).is_err());
        assert!(ServiceId::parse_from_service_id_binary(&UUID_BYTES[..15]).is_err());
    }

    #[test]
    fn ordering_compares_kind_first() {
        let aci = ServiceId::Aci(Uuid::from_bytes([0xff; 16]));
        let pni = ServiceId::Pni(Uuid::from_bytes([0x00; 16]));
        assert!(aci < pni);
    }

    #[test]
    fn address_display() {
        let address = ProtocolAddress::new("+14151111111", DeviceId::from(1));
        assert_eq!(address.to_string(), "+14151111111.1");
    }
}
