use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{Address, CryptoError, DigitalSignature, Wallet};

/// Reasons a submitted transaction is turned away
///
/// Every variant is recoverable: the caller corrects the payload and resubmits.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Unsupported transaction type: {0}")]
    UnsupportedType(String),

    #[error("Reward transactions are created by mining only")]
    RewardNotAccepted,

    #[error("Transaction has no origin address")]
    MissingOrigin,

    #[error("Origin address {declared} does not match public key address {derived}")]
    OriginMismatch { declared: String, derived: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("DID already registered: {0}")]
    DuplicateDid(String),

    #[error("Missing credential field: {0}")]
    MissingCredentialField(&'static str),

    #[error("Invalid credential signature")]
    InvalidCredentialSignature,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A ledger transaction, discriminated by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    /// Mining reward, sender is always the system address
    Reward {
        sender: Address,
        recipient: Address,
        amount: u64,
    },

    /// Value transfer between two addresses
    Transfer {
        sender: Address,
        recipient: Address,
        amount: u64,
    },

    /// Binds a DID string to its owning address
    RegisterDid {
        owner_address: Address,
        did_string: String,
    },

    /// Records a credential issued to a subject DID
    IssueVc {
        issuer_address: Address,
        issuer_public_key: String,
        subject_did: String,
        #[schema(value_type = Object)]
        credential_data: Value,
        issuer_signature: DigitalSignature,
    },
}

const KNOWN_TYPES: [&str; 4] = ["reward", "transfer", "register_did", "issue_vc"];

impl Transaction {
    /// Parses an untrusted JSON payload into a transaction
    pub fn from_value(value: Value) -> Result<Self, TransactionError> {
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => return Err(TransactionError::UnsupportedType(other.to_string())),
            None => return Err(TransactionError::Malformed("missing field `type`".to_string())),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(TransactionError::UnsupportedType(kind));
        }

        serde_json::from_value(value).map_err(|e| TransactionError::Malformed(e.to_string()))
    }

    /// Creates a mining reward transaction
    pub fn new_reward(recipient: Address, amount: u64) -> Self {
        Transaction::Reward {
            sender: Address::system(),
            recipient,
            amount,
        }
    }

    pub fn new_transfer(sender: Address, recipient: Address, amount: u64) -> Self {
        Transaction::Transfer {
            sender,
            recipient,
            amount,
        }
    }

    pub fn new_register_did(owner_address: Address, did_string: impl Into<String>) -> Self {
        Transaction::RegisterDid {
            owner_address,
            did_string: did_string.into(),
        }
    }

    /// Creates a credential issuance signed by `issuer` over `credential_data`
    pub fn new_issue_vc(
        issuer: &Wallet,
        subject_did: impl Into<String>,
        credential_data: Value,
    ) -> Result<Self, CryptoError> {
        let issuer_signature = issuer.sign(&credential_data)?;

        Ok(Transaction::IssueVc {
            issuer_address: issuer.address().clone(),
            issuer_public_key: issuer.public_key_hex(),
            subject_did: subject_did.into(),
            credential_data,
            issuer_signature,
        })
    }

    /// The `type` discriminant as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Reward { .. } => "reward",
            Transaction::Transfer { .. } => "transfer",
            Transaction::RegisterDid { .. } => "register_did",
            Transaction::IssueVc { .. } => "issue_vc",
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, Transaction::Reward { .. })
    }

    /// The address that must have signed this transaction
    pub fn origin(&self) -> Option<&Address> {
        let origin = match self {
            Transaction::Reward { .. } => return None,
            Transaction::Transfer { sender, .. } => sender,
            Transaction::RegisterDid { owner_address, .. } => owner_address,
            Transaction::IssueVc { issuer_address, .. } => issuer_address,
        };

        if origin.is_empty() {
            None
        } else {
            Some(origin)
        }
    }

    /// Debited address, for value-moving transactions
    pub fn sender(&self) -> Option<&Address> {
        match self {
            Transaction::Reward { sender, .. } | Transaction::Transfer { sender, .. } => {
                Some(sender)
            }
            _ => None,
        }
    }

    /// Credited address, for value-moving transactions
    pub fn recipient(&self) -> Option<&Address> {
        match self {
            Transaction::Reward { recipient, .. } | Transaction::Transfer { recipient, .. } => {
                Some(recipient)
            }
            _ => None,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            Transaction::Reward { amount, .. } | Transaction::Transfer { amount, .. } => *amount,
            _ => 0,
        }
    }
}
