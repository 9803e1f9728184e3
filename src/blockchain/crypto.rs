use ed25519_dalek::{Signature, SigningKey, Signer, Verifier, VerifyingKey};
use log::debug;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::canonical::{canonical_bytes, sha256_hex};

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Sender of every mining reward
pub const SYSTEM_ADDRESS: &str = "0";

/// Represents a ledger address: hex SHA-256 of the raw public key bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address owned by a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(sha256_hex(public_key.as_bytes()))
    }

    /// Derives the address from a hex-encoded public key
    pub fn from_public_key_hex(public_key: &str) -> Result<Self, CryptoError> {
        let key = parse_public_key(public_key)?;
        Ok(Self::from_public_key(&key))
    }

    /// The sentinel sender used for mining rewards
    pub fn system() -> Self {
        Address(SYSTEM_ADDRESS.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_ADDRESS
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

/// Represents a digital signature (base58 encoded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        let bytes = signature.to_bytes();
        let encoded = bs58::encode(bytes).into_string();
        DigitalSignature(encoded)
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Parses a hex-encoded Ed25519 public key
pub fn parse_public_key(public_key: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(public_key.trim())
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidPublicKey("Invalid public key length".to_string())
    })?;

    VerifyingKey::from_bytes(&key_bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the wallet's public key as lowercase hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Signs the canonical serialization of `data`
    pub fn sign<T: Serialize + ?Sized>(&self, data: &T) -> Result<DigitalSignature, CryptoError> {
        let message =
            canonical_bytes(data).map_err(|e| CryptoError::EncodingError(e.to_string()))?;
        let signature = self.signing_key.sign(&message);
        Ok(DigitalSignature::from_signature(&signature))
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature over the canonical serialization of `data`
///
/// Undecodable keys or signatures count as a failed verification.
pub fn verify_signature<T: Serialize + ?Sized>(
    public_key: &str,
    signature: &DigitalSignature,
    data: &T,
) -> bool {
    let checked = parse_public_key(public_key).and_then(|key| {
        let signature = signature.to_signature()?;
        let message =
            canonical_bytes(data).map_err(|e| CryptoError::EncodingError(e.to_string()))?;
        Ok(key.verify(&message, &signature).is_ok())
    });

    match checked {
        Ok(valid) => valid,
        Err(err) => {
            debug!("Signature verification failed: {}", err);
            false
        }
    }
}
