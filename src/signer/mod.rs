use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::Sha256;

use crate::codec::canonical_bytes;
use crate::error::{LedgerError, Result};
use crate::message::{Introduction, SignedEnvelope};

/// Modulus size of node keys.
pub const KEY_BITS: usize = 2048;

/// SHA-256 output length, the PSS hash length.
const DIGEST_LEN: usize = 32;

/// The node's signing identity: an RSA keypair generated at startup. Peers
/// learn the public half as PEM (SubjectPublicKeyInfo).
pub struct Signer {
    signing_key: BlindedSigningKey<Sha256>,
    public: RsaPublicKey,
    public_pem: String,
}

impl Signer {
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(|e| LedgerError::Key(e.to_string()))?;
        let public = private.to_public_key();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| LedgerError::Key(e.to_string()))?;
        let salt_len = max_salt_len(&public);
        Ok(Self {
            signing_key: BlindedSigningKey::new_with_salt_len(private, salt_len),
            public,
            public_pem,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// PEM of the public key, the form peers store and exchange.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// RSA-PSS (MGF1-SHA256, maximum salt) over the payload's canonical
    /// encoding, base64 encoded. The salt is random, so signing the same
    /// payload twice yields different, equally valid signatures.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String> {
        let bytes = canonical_bytes(payload)?;
        let signature = self
            .signing_key
            .sign_with_rng(&mut rand::thread_rng(), &bytes);
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    pub fn create_message<T: Serialize>(&self, payload: T) -> Result<SignedEnvelope<T>> {
        let signature = self.sign(&payload)?;
        Ok(SignedEnvelope {
            msg: payload,
            signature,
        })
    }
}

/// Largest PSS salt the key's encoded message leaves room for.
fn max_salt_len(key: &RsaPublicKey) -> usize {
    let em_len = (key.n().bits() - 1).div_ceil(8);
    em_len.saturating_sub(DIGEST_LEN + 2)
}

/// Parse a PEM SubjectPublicKeyInfo RSA public key.
pub fn decode_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| LedgerError::Structural(format!("invalid public key: {e}")))
}

/// Verify a base64 PSS signature over the canonical encoding of `payload`.
/// Malformed signatures and unserializable payloads simply fail.
pub fn verify<T: Serialize>(payload: &T, signature_b64: &str, key: &RsaPublicKey) -> bool {
    let Ok(bytes) = canonical_bytes(payload) else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(raw.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new_with_salt_len(key.clone(), max_salt_len(key))
        .verify(&bytes, &signature)
        .is_ok()
}

/// Check that an introduction was signed by the key it carries.
pub fn verify_self_signed(envelope: &Introduction) -> Result<()> {
    let key = decode_public_key(&envelope.msg.public_key)?;
    if verify(&envelope.msg, &envelope.signature, &key) {
        Ok(())
    } else {
        Err(LedgerError::Auth(format!(
            "introduction from {} not signed by its key",
            envelope.msg.node_address
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{KeepAlive, PeerEntry};

    fn keep_alive() -> KeepAlive {
        KeepAlive {
            node_address: "http://127.0.0.1:5001".into(),
            time: 1_700_000_000.5,
        }
    }

    #[test]
    fn sign_then_verify() {
        let signer = Signer::generate().unwrap();
        let sig = signer.sign(&keep_alive()).unwrap();
        assert!(verify(&keep_alive(), &sig, signer.public_key()));
    }

    #[test]
    fn signatures_are_randomized() {
        let signer = Signer::generate().unwrap();
        let a = signer.sign(&keep_alive()).unwrap();
        let b = signer.sign(&keep_alive()).unwrap();
        assert_ne!(a, b);
        assert!(verify(&keep_alive(), &a, signer.public_key()));
        assert!(verify(&keep_alive(), &b, signer.public_key()));
    }

    #[test]
    fn max_salt_for_2048_bit_keys() {
        let signer = Signer::generate().unwrap();
        assert_eq!(max_salt_len(signer.public_key()), 222);
        let raw = STANDARD.decode(signer.sign(&keep_alive()).unwrap()).unwrap();
        assert_eq!(raw.len(), KEY_BITS / 8);
    }

    #[test]
    fn other_key_rejected() {
        let signer = Signer::generate().unwrap();
        let other = Signer::generate().unwrap();
        let sig = signer.sign(&keep_alive()).unwrap();
        assert!(!verify(&keep_alive(), &sig, other.public_key()));
    }

    #[test]
    fn altered_payload_rejected() {
        let signer = Signer::generate().unwrap();
        let sig = signer.sign(&keep_alive()).unwrap();
        let mut changed = keep_alive();
        changed.time += 1.0;
        assert!(!verify(&changed, &sig, signer.public_key()));
    }

    #[test]
    fn garbage_signature_is_false_not_panic() {
        let signer = Signer::generate().unwrap();
        assert!(!verify(&keep_alive(), "%%not-base64%%", signer.public_key()));
        assert!(!verify(&keep_alive(), "3q2+7w==", signer.public_key()));
        assert!(!verify(&keep_alive(), "", signer.public_key()));
    }

    #[test]
    fn public_key_pem_round_trips() {
        let signer = Signer::generate().unwrap();
        let pem = signer.public_key_pem();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        let decoded = decode_public_key(pem).unwrap();
        assert_eq!(&decoded, signer.public_key());
        assert!(decode_public_key("nope").is_err());
        assert!(decode_public_key("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----").is_err());
    }

    #[test]
    fn introduction_must_match_carried_key() {
        let signer = Signer::generate().unwrap();
        let entry = PeerEntry {
            node_address: "http://a".into(),
            public_key: signer.public_key_pem().to_string(),
        };
        let intro = signer.create_message(entry.clone()).unwrap();
        assert!(verify_self_signed(&intro).is_ok());

        let impostor = Signer::generate().unwrap();
        let forged = SignedEnvelope {
            msg: PeerEntry {
                public_key: impostor.public_key_pem().to_string(),
                ..entry
            },
            signature: intro.signature,
        };
        assert!(matches!(
            verify_self_signed(&forged),
            Err(LedgerError::Auth(_))
        ));
    }
}
