use log::debug;
use std::collections::HashSet;

use super::amount::Amount;
use super::model::{Transaction, TxOutput};
use crate::error::{ChainError, Result, TransactionError};
use crate::wallet;

/// Read access to confirmed outputs, as needed by the validator.
pub trait OutputSource {
    /// Output `output_index` of confirmed transaction `tx_hash`.
    fn fetch_output(&self, tx_hash: &str, output_index: u32) -> Result<TxOutput>;

    fn fetch_output_amount(&self, tx_hash: &str, output_index: u32) -> Result<Amount> {
        Ok(self.fetch_output(tx_hash, output_index)?.amount)
    }

    /// Whether some confirmed transaction already spends this output.
    fn is_output_spent(&self, tx_hash: &str, output_index: u32) -> bool;
}

pub struct TransactionValidator;

impl TransactionValidator {
    /// Full validation: structure, funding, balance, signature and
    /// ownership of the spent outputs.
    pub fn validate<S: OutputSource + ?Sized>(tx: &Transaction, chain: &S) -> Result<()> {
        Self::validate_inputs_outputs(tx, chain)?;
        Self::check_signature(tx)?;
        Self::check_ownership(tx, chain)?;
        debug!("tx {} passed validation", tx.proof.as_deref().unwrap_or("<unhashed>"));
        Ok(())
    }

    /// Structure and balance law: `sum(inputs) == sum(outputs) + fee`.
    pub fn validate_inputs_outputs<S: OutputSource + ?Sized>(
        tx: &Transaction,
        chain: &S,
    ) -> Result<()> {
        if tx.inputs.is_empty() {
            return Err(TransactionError::NoInputs.into());
        }
        if tx.outputs.is_empty() {
            return Err(TransactionError::NoOutputs.into());
        }
        if let Some(bad) = tx.outputs.iter().find(|o| !wallet::is_valid(&o.recipient)) {
            return Err(TransactionError::InvalidRecipient(bad.recipient.clone()).into());
        }

        let mut seen = HashSet::<(&str, u32)>::new();
        let mut input_total = Amount::ZERO;
        for input in &tx.inputs {
            let key = (input.tx_hash.as_str(), input.output_index);
            if !seen.insert(key) {
                return Err(TransactionError::DuplicateInput {
                    tx_hash: input.tx_hash.clone(),
                    output_index: input.output_index,
                }
                .into());
            }
            if chain.is_output_spent(&input.tx_hash, input.output_index) {
                return Err(TransactionError::AlreadySpent {
                    tx_hash: input.tx_hash.clone(),
                    output_index: input.output_index,
                }
                .into());
            }

            let amount = fetch_referenced(chain, &input.tx_hash, input.output_index)?.amount;
            input_total = input_total
                .checked_add(amount)
                .ok_or(TransactionError::AmountOverflow)?;
        }

        let output_total = tx
            .total_output_amount()
            .ok_or(TransactionError::AmountOverflow)?;
        let required = output_total
            .checked_add(tx.fee)
            .ok_or(TransactionError::AmountOverflow)?;

        if input_total != required {
            return Err(TransactionError::Unbalanced {
                inputs: input_total.to_string(),
                outputs: output_total.to_string(),
                fee: tx.fee.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The proof must match the content and the signature must verify
    /// against the stored public key.
    pub fn check_signature(tx: &Transaction) -> Result<()> {
        let (Some(proof), Some(_), Some(pubkey)) = (
            tx.proof.as_deref(),
            tx.signature.as_deref(),
            tx.public_key.as_deref(),
        ) else {
            return Err(TransactionError::Unsigned.into());
        };

        if proof != tx.compute_proof()? {
            return Err(TransactionError::ProofMismatch.into());
        }
        if !tx.verify_signature(pubkey)? {
            return Err(TransactionError::BadSignature.into());
        }
        Ok(())
    }

    /// Every referenced output must pay the address of the signing key.
    pub fn check_ownership<S: OutputSource + ?Sized>(tx: &Transaction, chain: &S) -> Result<()> {
        let pubkey = tx.public_key.as_deref().ok_or(TransactionError::Unsigned)?;
        let signer = wallet::address_from_pubkey_hex(pubkey)
            .map_err(|_| TransactionError::BadSignature)?;

        for input in &tx.inputs {
            let output = fetch_referenced(chain, &input.tx_hash, input.output_index)?;
            if output.recipient != signer {
                return Err(TransactionError::NotOwner {
                    tx_hash: input.tx_hash.clone(),
                    output_index: input.output_index,
                }
                .into());
            }
        }
        Ok(())
    }
}

fn fetch_referenced<S: OutputSource + ?Sized>(
    chain: &S,
    tx_hash: &str,
    output_index: u32,
) -> Result<TxOutput> {
    chain
        .fetch_output(tx_hash, output_index)
        .map_err(|e| match e {
            ChainError::OutputNotFound {
                tx_hash,
                output_index,
            } => TransactionError::MissingOutput {
                tx_hash,
                output_index,
            }
            .into(),
            other => other,
        })
}
