//! Initial key agreement: PQXDH.
//!
//! # Architecture
//!
//! ```text
//!   Alice (has Bob's bundle)                    Bob (has his prekeys)
//!
//!   DH(IK_A,  SPK_B)  ─┐                    ┌─ DH(SPK_B, IK_A)
//!   DH(EK_A,  IK_B)   ─┤                    ├─ DH(IK_B,  EK_A)
//!   DH(EK_A,  SPK_B)  ─┤  identical inputs  ├─ DH(SPK_B, EK_A)
//!   DH(EK_A,  OPK_B)? ─┤                    ├─ DH(OPK_B, EK_A)?
//!   Encaps(KYBER_B)   ─┘                    └─ Decaps(KYBER_B, ct)
//!          │                                         │
//!          └──── HKDF(0xFF*32 || ...) ───> (root key, chain key)
//! ```
//!
//! Bob's first chain is a sending chain under his signed prekey. Alice
//! installs it as a receiving chain and immediately takes one DH ratchet
//! step with a fresh key, so her first message already carries a new
//! ratchet key.
//!
//! # Security
//!
//! The 32 `0xFF` bytes prefix the input so that it never collides with an
//! X25519 output. All shared secrets are wiped once the root key exists.

use palisade_crypto::{
    ChainKey, IdentityKey, IdentityKeyPair, KeyPair, KyberPublicKey, KyberSecretKey, PublicKey,
    RootKey, kdf,
};
use palisade_proto::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use rand::{CryptoRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{error::Result, state::SessionState};

const AGREEMENT_INFO: &[u8] = b"Palisade_PQXDH_X25519_SHA-256_CRYSTALS-KYBER-1024";
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

/// Inputs of the initiating side.
pub(crate) struct AliceParameters<'a> {
    pub(crate) our_identity_key_pair: &'a IdentityKeyPair,
    pub(crate) our_base_key_pair: &'a KeyPair,
    pub(crate) their_identity_key: IdentityKey,
    pub(crate) their_signed_pre_key: PublicKey,
    pub(crate) their_one_time_pre_key: Option<PublicKey>,
    pub(crate) their_kyber_pre_key: &'a KyberPublicKey,
}

/// Inputs of the responding side.
pub(crate) struct BobParameters<'a> {
    pub(crate) our_identity_key_pair: &'a IdentityKeyPair,
    pub(crate) our_signed_pre_key_pair: &'a KeyPair,
    pub(crate) our_one_time_pre_key_pair: Option<&'a KeyPair>,
    pub(crate) our_kyber_pre_key: &'a KyberSecretKey,
    pub(crate) their_identity_key: IdentityKey,
    pub(crate) their_base_key: PublicKey,
    pub(crate) their_kyber_ciphertext: &'a [u8],
}

fn derive_keys(secrets: &[u8]) -> Result<(RootKey, ChainKey)> {
    let derived = Zeroizing::new(kdf::derive_array::<64>(secrets, None, AGREEMENT_INFO)?);
    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&derived[..32]);
    chain.copy_from_slice(&derived[32..]);
    Ok((RootKey::new(root), ChainKey::new(chain, 0)))
}

/// Run the initiator's half. Returns the new state and the KEM ciphertext
/// that must travel in every PreKeySignalMessage until Bob replies.
pub(crate) fn initialize_alice_session<R: RngCore + CryptoRng>(
    params: &AliceParameters<'_>,
    rng: &mut R,
) -> Result<(SessionState, Vec<u8>)> {
    let base = params.our_base_key_pair;
    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 6));
    secrets.extend_from_slice(&DISCONTINUITY);
    secrets.extend_from_slice(
        &params.our_identity_key_pair.calculate_agreement(&params.their_signed_pre_key),
    );
    secrets.extend_from_slice(&base.calculate_agreement(&params.their_identity_key.agreement_key()));
    secrets.extend_from_slice(&base.calculate_agreement(&params.their_signed_pre_key));
    if let Some(one_time) = &params.their_one_time_pre_key {
        secrets.extend_from_slice(&base.calculate_agreement(one_time));
    }
    let (kyber_secret, kyber_ciphertext) = params.their_kyber_pre_key.encapsulate(rng)?;
    let kyber_secret = Zeroizing::new(kyber_secret);
    secrets.extend_from_slice(kyber_secret.as_slice());

    let (root_key, chain_key) = derive_keys(&secrets)?;

    let mut state = SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        params.our_identity_key_pair.identity_key(),
        params.their_identity_key,
        root_key.clone(),
        base.public_key,
    );
    // Bob's first sending chain hangs off his signed prekey.
    state.add_receiver_chain(params.their_signed_pre_key, chain_key);

    let sending_ratchet_key = KeyPair::generate(rng);
    let (sending_root, sending_chain) =
        root_key.create_chain(&params.their_signed_pre_key, &sending_ratchet_key.private_key)?;
    state.set_sender_chain(sending_ratchet_key, sending_chain);
    state.set_root_key(sending_root);

    debug!(one_time_pre_key = params.their_one_time_pre_key.is_some(), "initialized initiator session");
    Ok((state, kyber_ciphertext))
}

/// Run the responder's half.
pub(crate) fn initialize_bob_session(params: &BobParameters<'_>) -> Result<SessionState> {
    let signed = params.our_signed_pre_key_pair;
    let mut secrets = Zeroizing::new(Vec::with_capacity(32 * 6));
    secrets.extend_from_slice(&DISCONTINUITY);
    secrets.extend_from_slice(&signed.calculate_agreement(&params.their_identity_key.agreement_key()));
    secrets.extend_from_slice(&params.our_identity_key_pair.calculate_agreement(&params.their_base_key));
    secrets.extend_from_slice(&signed.calculate_agreement(&params.their_base_key));
    if let Some(one_time) = params.our_one_time_pre_key_pair {
        secrets.extend_from_slice(&one_time.calculate_agreement(&params.their_base_key));
    }
    let kyber_secret = Zeroizing::new(params.our_kyber_pre_key.decapsulate(params.their_kyber_ciphertext)?);
    secrets.extend_from_slice(kyber_secret.as_slice());

    let (root_key, chain_key) = derive_keys(&secrets)?;

    let mut state = SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        params.our_identity_key_pair.identity_key(),
        params.their_identity_key,
        root_key,
        params.their_base_key,
    );
    state.set_sender_chain(signed.clone(), chain_key);

    debug!(one_time_pre_key = params.our_one_time_pre_key_pair.is_some(), "initialized responder session");
    Ok(state)
}
