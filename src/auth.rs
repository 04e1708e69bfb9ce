//! Caller identity.
//!
//! An address is `0x` followed by the hex of the last 20 bytes of
//! `SHA-256(verifying_key)`. Remote callers prove they own an address by
//! signing each call with the matching Ed25519 key.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::Address;

const CALL_DOMAIN: &[u8] = b"dbank-call-v1";
const CONTRACT_DOMAIN: &[u8] = b"dbank-contract-v1";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed secret key: {0}")]
    MalformedSecretKey(String),
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("invalid signature for {0}")]
    InvalidSignature(Address),
    #[error("call was already executed")]
    Replay,
    #[error("nonce {got} is ahead of the expected {expected}")]
    NonceGap { expected: u64, got: u64 },
    #[error("cannot encode call: {0}")]
    Encoding(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Replay => "replay",
            AuthError::NonceGap { .. } => "bad_nonce",
            AuthError::Encoding(_) => "encoding",
            _ => "unauthenticated",
        }
    }
}

fn tail_address(digest: [u8; 32]) -> Address {
    format!("0x{}", hex::encode(&digest[12..]))
}

pub fn address_of(key: &VerifyingKey) -> Address {
    tail_address(Sha256::digest(key.as_bytes()).into())
}

/// Deterministic pool address for a bank deployed by `owner`.
pub fn contract_address(owner: &str, name: &str) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(CONTRACT_DOMAIN);
    hasher.update(owner.as_bytes());
    hasher.update(name.as_bytes());
    tail_address(hasher.finalize().into())
}

pub fn signing_key_from_hex(sk_hex: &str) -> Result<SigningKey, AuthError> {
    let bytes = hex::decode(sk_hex.trim())
        .map_err(|err| AuthError::MalformedSecretKey(err.to_string()))?;
    let secret: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::MalformedSecretKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    Ok(SigningKey::from_bytes(&secret))
}

/// A payload signed by the key that owns the calling address.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedCall<T> {
    pub call: T,
    /// Count of calls the signer already executed; see
    /// [`DecentralBank::next_nonce`](crate::bank::DecentralBank::next_nonce).
    pub nonce: u64,
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub signature: Vec<u8>,
}

impl<T: Serialize> SignedCall<T> {
    pub fn sign(key: &SigningKey, call: T, nonce: u64) -> Result<Self, AuthError> {
        let digest = call_digest(&call, nonce)?;
        let signature = key.sign(&digest);
        Ok(Self {
            call,
            nonce,
            public_key: key.verifying_key().as_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        })
    }

    pub fn digest(&self) -> Result<[u8; 32], AuthError> {
        call_digest(&self.call, self.nonce)
    }

    /// Checks the signature and returns the authenticated caller address.
    pub fn verify(&self) -> Result<Address, AuthError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::MalformedPublicKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| AuthError::MalformedPublicKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| AuthError::MalformedSignature)?;
        let address = address_of(&key);
        key.verify_strict(&self.digest()?, &signature)
            .map_err(|_| AuthError::InvalidSignature(address.clone()))?;
        Ok(address)
    }
}

fn call_digest<T: Serialize>(call: &T, nonce: u64) -> Result<[u8; 32], AuthError> {
    let encoded = serde_json::to_vec(call).map_err(|err| AuthError::Encoding(err.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(CALL_DOMAIN);
    hasher.update(nonce.to_le_bytes());
    hasher.update(&encoded);
    Ok(hasher.finalize().into())
}

pub(crate) mod serde_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Ping {
        amount: u64,
    }

    #[test]
    fn address_is_derived_from_public_key() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let address = address_of(&key.verifying_key());
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        let again = signing_key_from_hex(&hex::encode([7u8; 32])).unwrap();
        assert_eq!(address_of(&again.verifying_key()), address);
    }

    #[test]
    fn rejects_bad_secret_keys() {
        assert!(matches!(
            signing_key_from_hex("zz"),
            Err(AuthError::MalformedSecretKey(_))
        ));
        assert!(matches!(
            signing_key_from_hex("abcd"),
            Err(AuthError::MalformedSecretKey(_))
        ));
    }

    #[test]
    fn signed_call_verifies_to_signer_address() {
        let key = SigningKey::generate(&mut OsRng);
        let signed = SignedCall::sign(&key, Ping { amount: 5 }, 1).unwrap();
        assert_eq!(signed.verify().unwrap(), address_of(&key.verifying_key()));

        let json = serde_json::to_string(&signed).unwrap();
        let back: SignedCall<Ping> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.verify().unwrap(), address_of(&key.verifying_key()));
    }

    #[test]
    fn tampered_call_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let mut signed = SignedCall::sign(&key, Ping { amount: 5 }, 1).unwrap();
        signed.call.amount = 500;
        assert!(matches!(signed.verify(), Err(AuthError::InvalidSignature(_))));

        let mut signed = SignedCall::sign(&key, Ping { amount: 5 }, 1).unwrap();
        signed.nonce = 2;
        assert!(matches!(signed.verify(), Err(AuthError::InvalidSignature(_))));

        let mut signed = SignedCall::sign(&key, Ping { amount: 5 }, 1).unwrap();
        signed.signature.truncate(10);
        assert_eq!(signed.verify(), Err(AuthError::MalformedSignature));
    }

    #[test]
    fn contract_address_depends_on_owner() {
        assert_ne!(
            contract_address("0xaa", "Decentral Bank"),
            contract_address("0xbb", "Decentral Bank")
        );
        assert_eq!(contract_address("0xaa", "x"), contract_address("0xaa", "x"));
    }
}
