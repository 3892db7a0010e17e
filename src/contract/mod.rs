//! Gateway to the insurance contract.

#[cfg(feature = "cli")]
pub mod evm;

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use serde_json::{json, Value};

use crate::attestation::{AttestationResult, IdentityAttestation, PackedProof};
use crate::policy::{PolicyRecord, PolicyTerms};

/// Address the insurance contract is deployed at.
pub const INSURANCE_CONTRACT_ADDRESS: &str = "0x81193f978ecd647b6e923bcfa5429728cc49baf8";

/// Result type for contract calls.
pub type ContractResult<T> = Result<T, ContractError>;

/// Errors surfaced by the contract gateway.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Transaction {0:?} dropped before confirmation")]
    Dropped(H256),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid wallet key: {0}")]
    InvalidWalletKey(String),
}

/// Arguments to `issuePolicy`, in ABI order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePolicyCall {
    pub nullifier_seed: U256,
    pub nullifier: U256,
    pub timestamp: U256,
    pub recipient: Address,
    /// `[ageAbove18, gender, pincode, state]`
    pub reveal_array: [U256; 4],
    pub packed_proof: PackedProof,
    pub coverage_amount: U256,
    pub valid_till: U256,
    pub services_covered: Vec<String>,
}

impl IssuePolicyCall {
    /// Build the call for `attestation`, paying out to `recipient`.
    pub fn new(
        attestation: &IdentityAttestation,
        recipient: Address,
        terms: &PolicyTerms,
        now: u64,
    ) -> AttestationResult<Self> {
        Ok(Self {
            nullifier_seed: attestation.nullifier_seed,
            nullifier: attestation.nullifier,
            timestamp: attestation.timestamp,
            recipient,
            reveal_array: attestation.attributes.reveal_array(),
            packed_proof: attestation.packed_proof()?,
            coverage_amount: terms.coverage_amount,
            valid_till: terms.valid_till(now),
            services_covered: terms.services_covered.clone(),
        })
    }

    /// Arguments as a JSON array, integers as decimal strings.
    pub fn to_json_args(&self) -> Value {
        let uints = |values: &[U256]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        json!([
            self.nullifier_seed.to_string(),
            self.nullifier.to_string(),
            self.timestamp.to_string(),
            format!("{:?}", self.recipient),
            uints(&self.reveal_array),
            uints(&self.packed_proof),
            self.coverage_amount.to_string(),
            self.valid_till.to_string(),
            self.services_covered,
        ])
    }
}

/// A mined `issuePolicy` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

/// The three entry points of the insurance contract.
#[async_trait]
pub trait PolicyContract: Send + Sync {
    /// Submit `issuePolicy` and wait for it to be mined.
    async fn issue_policy(&self, call: &IssuePolicyCall) -> ContractResult<IssueReceipt>;

    /// `getPolicy(nullifier)`.
    async fn get_policy(&self, nullifier: U256) -> ContractResult<PolicyRecord>;

    /// `getServicesCovered(nullifier, policyId)`.
    async fn get_services_covered(&self, nullifier: U256, policy_id: U256) -> ContractResult<Vec<String>>;
}
