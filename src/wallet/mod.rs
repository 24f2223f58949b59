pub mod address;

use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};

use crate::crypto::digest;
use crate::error::SignatureError;

pub use address::{address_from_pubkey_hex, is_valid};

/// A secp256k1 key pair. The private half is optional so that a pair
/// reconstructed from a public key alone can verify but not sign.
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    secret: Option<SecretKey>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .field("has_secret", &self.secret.is_some())
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (sk, pk) = secp.generate_keypair(&mut OsRng);
        Self {
            public: pk,
            secret: Some(sk),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(secret_hex)
            .map_err(|_| SignatureError::Verification("invalid secret key hex".into()))?;
        let sk = SecretKey::from_slice(&bytes)
            .map_err(|_| SignatureError::Verification("invalid secret key bytes".into()))?;
        let secp = Secp256k1::signing_only();
        Ok(Self {
            public: PublicKey::from_secret_key(&secp, &sk),
            secret: Some(sk),
        })
    }

    /// A verification-only pair built from a compressed hex public key.
    pub fn public_only(pubkey_hex: &str) -> Result<Self, SignatureError> {
        Ok(Self {
            public: parse_pubkey(pubkey_hex)?,
            secret: None,
        })
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Compressed public key (33 bytes) as lowercase hex.
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    pub fn secret_hex(&self) -> Option<String> {
        self.secret.map(|sk| hex::encode(sk.secret_bytes()))
    }

    /// Address owned by this key pair.
    pub fn address(&self) -> String {
        self.public_hex()
    }

    /// Sign `data` and return the DER signature as hex. The message signed
    /// is the chain digest of `data`.
    pub fn sign(&self, data: &[u8]) -> Result<String, SignatureError> {
        let sk = self.secret.ok_or(SignatureError::MissingPrivateKey)?;
        if data.is_empty() {
            return Err(SignatureError::EmptyPayload);
        }
        let secp = Secp256k1::signing_only();
        let msg = message_for(data)?;
        let sig = secp.sign_ecdsa(&msg, &sk);
        Ok(hex::encode(sig.serialize_der()))
    }
}

/// Verify a hex DER signature over `data` with a compressed hex public key.
pub fn verify(data: &[u8], sig_hex: &str, pubkey_hex: &str) -> Result<bool, SignatureError> {
    let secp = Secp256k1::verification_only();

    let sig_bytes = hex::decode(sig_hex)
        .map_err(|_| SignatureError::Verification("invalid signature hex".into()))?;
    let sig = Signature::from_der(&sig_bytes)
        .map_err(|_| SignatureError::Verification("invalid DER signature".into()))?;
    let pk = parse_pubkey(pubkey_hex)?;
    let msg = message_for(data)?;

    Ok(secp.verify_ecdsa(&msg, &sig, &pk).is_ok())
}

fn parse_pubkey(pubkey_hex: &str) -> Result<PublicKey, SignatureError> {
    let bytes = hex::decode(pubkey_hex)
        .map_err(|_| SignatureError::Verification("invalid pubkey hex".into()))?;
    PublicKey::from_slice(&bytes)
        .map_err(|_| SignatureError::Verification("invalid pubkey bytes".into()))
}

fn message_for(data: &[u8]) -> Result<Message, SignatureError> {
    Message::from_digest_slice(digest(data).as_bytes())
        .map_err(|_| SignatureError::Verification("invalid message length".into()))
}
