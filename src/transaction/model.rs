use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::amount::Amount;
use crate::crypto::digest_hex;
use crate::error::{Result, SignatureError};
use crate::wallet::{self, KeyPair};

/// Current transaction format version.
pub const TX_VERSION: u32 = 1;

/// References an output of a previous transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub tx_hash: String,
    pub output_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Opaque recipient address, see [`crate::wallet::is_valid`].
    pub recipient: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub index: u64,
    pub version: u32,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: Amount,
    /// Hex digest over the hashed subset; set by [`Transaction::hash`].
    pub proof: Option<String>,
    /// Hex DER signature; set by [`Transaction::sign`].
    pub signature: Option<String>,
    /// Compressed hex public key of the signer.
    pub public_key: Option<String>,
}

/// The fields covered by the proof, in canonical order.
#[derive(Serialize)]
struct HashedFields<'a> {
    index: u64,
    version: u32,
    timestamp: i64,
    inputs: &'a [TxInput],
    outputs: &'a [TxOutput],
    fee: Amount,
}

/// The signed message: hashed fields plus the proof.
#[derive(Serialize)]
struct SignedFields<'a> {
    #[serde(flatten)]
    fields: HashedFields<'a>,
    proof: &'a str,
}

impl Transaction {
    /// Build an unsigned transaction stamped with the current time.
    pub fn new(index: u64, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, fee: Amount) -> Self {
        Self::with_timestamp(index, inputs, outputs, fee, Utc::now().timestamp_millis())
    }

    pub fn with_timestamp(
        index: u64,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        fee: Amount,
        timestamp: i64,
    ) -> Self {
        Self {
            index,
            version: TX_VERSION,
            timestamp,
            inputs,
            outputs,
            fee,
            proof: None,
            signature: None,
            public_key: None,
        }
    }

    fn hashed_fields(&self) -> HashedFields<'_> {
        HashedFields {
            index: self.index,
            version: self.version,
            timestamp: self.timestamp,
            inputs: &self.inputs,
            outputs: &self.outputs,
            fee: self.fee,
        }
    }

    /// Canonical bytes covered by the proof. Excludes proof, signature and
    /// public key.
    pub fn hashing_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.hashed_fields())?)
    }

    /// Digest of the hashing payload without touching `self`.
    pub fn compute_proof(&self) -> Result<String> {
        Ok(digest_hex(&self.hashing_payload()?))
    }

    /// Compute, store and return the proof.
    pub fn hash(&mut self) -> Result<String> {
        let proof = self.compute_proof()?;
        self.proof = Some(proof.clone());
        Ok(proof)
    }

    /// Canonical message the signer commits to. Empty when the proof is unset.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let Some(proof) = self.proof.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(serde_json::to_vec(&SignedFields {
            fields: self.hashed_fields(),
            proof,
        })?)
    }

    /// Sign with `key`, hashing first if needed. Stores the signature and
    /// the signer's public key.
    pub fn sign(&mut self, key: &KeyPair) -> Result<String> {
        if !key.has_secret() {
            return Err(SignatureError::MissingPrivateKey.into());
        }
        if self.proof.is_none() {
            self.hash()?;
        }
        let signature = key.sign(&self.signing_payload()?)?;
        self.signature = Some(signature.clone());
        self.public_key = Some(key.public_hex());
        Ok(signature)
    }

    /// Check the stored signature against `expected_pubkey`.
    pub fn verify_signature(&self, expected_pubkey: &str) -> Result<bool> {
        let Some(signature) = self.signature.as_deref() else {
            return Ok(false);
        };
        let payload = self.signing_payload()?;
        if payload.is_empty() {
            return Err(SignatureError::EmptyPayload.into());
        }
        Ok(wallet::verify(&payload, signature, expected_pubkey)?)
    }

    pub fn total_output_amount(&self) -> Option<Amount> {
        Amount::checked_sum(self.outputs.iter().map(|o| o.amount))
    }

    /// Stored proof, or a freshly computed one for unhashed transactions.
    pub fn id(&self) -> Result<String> {
        match &self.proof {
            Some(proof) => Ok(proof.clone()),
            None => self.compute_proof(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
