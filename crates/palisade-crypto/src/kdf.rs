//! HKDF-SHA256.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

/// Fill `out` with HKDF-SHA256 output for the given inputs.
pub fn derive_secrets(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(salt, input_key_material)
        .expand(info, out)
        .map_err(|_| CryptoError::KdfOutputTooLong(out.len()))
}

/// HKDF-SHA256 into a fixed-size array.
pub fn derive_array<const N: usize>(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    derive_secrets(input_key_material, salt, info, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn rfc5869_case_1() {
        let ikm = [0x0b; 22];
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");

        let okm: [u8; 42] = derive_array(&ikm, Some(&salt), &info).unwrap();
        assert_eq!(
            okm,
            hex!(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
            )
        );
    }

    #[test]
    fn rejects_oversized_output() {
        let mut out = vec![0u8; 255 * 32 + 1];
        assert_eq!(derive_secrets(b"ikm", None, b"info", &mut out), Err(CryptoError::KdfOutputTooLong(8161)));
    }
}
