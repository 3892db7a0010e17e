//! Policy workflow: from a stored attestation to an issued policy.
//!
//! ```text
//! NoProof -> ProofLoaded -> PolicyChecked(Absent | Exists)
//!                               |            \
//!                            Issuing        Querying
//!                               |
//!                            Issued -> PolicyChecked(Exists)
//! ```
//!
//! Every operation takes `&mut self`, so at most one policy check, issuance
//! or query is outstanding per workflow. State only changes once a contract
//! call has resolved; a call whose future is dropped leaves no result
//! behind. An `Issuing` state orphaned that way is reconciled by the next
//! [`PolicyWorkflow::check_policy`].

use ethers_core::types::U256;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::attestation::{AttestationError, IdentityAttestation};
use crate::contract::{ContractError, IssuePolicyCall, IssueReceipt, PolicyContract};
use crate::policy::{Clock, PolicyLookup, PolicyTerms, SystemClock};
use crate::session::WalletSession;
use crate::store::{self, ProofStore, StoreError};

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors returned by workflow operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("No attestation loaded")]
    NoAttestation,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Policy {0} already issued for this identity")]
    PolicyExists(U256),

    #[error("Wallet not connected")]
    WalletDisconnected,

    #[error("Invalid policy id {0:?}")]
    InvalidPolicyId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Where the workflow stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    /// No attestation in the store.
    NoProof,
    /// Attestation loaded, policy not yet checked.
    ProofLoaded,
    PolicyChecked(PolicyLookup),
    /// `getPolicy` failed; unknown whether a policy exists.
    CheckFailed(String),
    Issuing,
    Issued(IssueReceipt),
    Querying { previous: Box<WorkflowState> },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::NoProof => "no proof is loaded",
            WorkflowState::ProofLoaded => "the policy is unchecked",
            WorkflowState::PolicyChecked(PolicyLookup::Absent) => "no policy exists",
            WorkflowState::PolicyChecked(PolicyLookup::Exists(_)) => "a policy exists",
            WorkflowState::CheckFailed(_) => "the policy check has failed",
            WorkflowState::Issuing => "an issuance is in flight",
            WorkflowState::Issued(_) => "an issuance has completed",
            WorkflowState::Querying { .. } => "a query is in flight",
        }
    }
}

/// Result of a successful issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOutcome {
    pub receipt: IssueReceipt,
    /// Policy state read back after the transaction was mined. `None` when
    /// the follow-up read failed.
    pub lookup: Option<PolicyLookup>,
}

/// Orchestrates attestation loading, policy checks, issuance and queries.
pub struct PolicyWorkflow {
    contract: Arc<dyn PolicyContract>,
    clock: Arc<dyn Clock>,
    terms: PolicyTerms,
    wallet: WalletSession,
    attestation: Option<IdentityAttestation>,
    state: WorkflowState,
    last_receipt: Option<IssueReceipt>,
}

impl PolicyWorkflow {
    pub fn new(contract: Arc<dyn PolicyContract>, wallet: WalletSession) -> Self {
        Self {
            contract,
            clock: Arc::new(SystemClock),
            terms: PolicyTerms::default(),
            wallet,
            attestation: None,
            state: WorkflowState::NoProof,
            last_receipt: None,
        }
    }

    pub fn with_terms(mut self, terms: PolicyTerms) -> Self {
        self.terms = terms;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn attestation(&self) -> Option<&IdentityAttestation> {
        self.attestation.as_ref()
    }

    pub fn wallet(&self) -> &WalletSession {
        &self.wallet
    }

    pub fn terms(&self) -> &PolicyTerms {
        &self.terms
    }

    /// Receipt of the last issuance made through this workflow.
    pub fn last_receipt(&self) -> Option<&IssueReceipt> {
        self.last_receipt.as_ref()
    }

    /// Whether issuance is currently on offer.
    pub fn can_issue(&self) -> bool {
        self.attestation.is_some()
            && self.wallet.is_connected()
            && self.state == WorkflowState::PolicyChecked(PolicyLookup::Absent)
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!(from = self.state.name(), to = next.name(), "workflow transition");
        self.state = next;
    }

    /// Restore the state a dropped query interrupted.
    fn settle(&mut self) {
        if let WorkflowState::Querying { previous } = &self.state {
            let previous = (**previous).clone();
            self.transition(previous);
        }
    }

    /// Take a newly acquired attestation. This is the only way an
    /// attestation enters the workflow.
    pub fn acquire(&mut self, attestation: IdentityAttestation) {
        info!(
            nullifier = %attestation.nullifier_short(),
            id = %attestation.id,
            "attestation acquired"
        );
        self.attestation = Some(attestation);
        self.last_receipt = None;
        self.transition(WorkflowState::ProofLoaded);
    }

    /// Drop the loaded attestation.
    pub fn clear(&mut self) {
        self.attestation = None;
        self.last_receipt = None;
        self.transition(WorkflowState::NoProof);
    }

    /// Load the most recent attestation from `store`.
    ///
    /// Returns `false` and stays in `NoProof` when the store holds no proof.
    /// A malformed latest proof clears the workflow and returns the error.
    pub fn load_latest(&mut self, store: &dyn ProofStore, key: &str) -> WorkflowResult<bool> {
        let pcd = match store::latest_pcd(store, key) {
            Ok(Some(pcd)) => pcd,
            Ok(None) => {
                debug!(key, "proof store is empty");
                self.clear();
                return Ok(false);
            }
            Err(e) => {
                self.clear();
                return Err(e.into());
            }
        };

        match IdentityAttestation::deserialize(&pcd) {
            Ok(attestation) => {
                self.acquire(attestation);
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "stored proof could not be deserialized");
                self.clear();
                Err(e.into())
            }
        }
    }

    /// Read the policy held by the loaded attestation's nullifier.
    pub async fn check_policy(&mut self) -> WorkflowResult<PolicyLookup> {
        self.settle();
        let attestation = self.attestation.as_ref().ok_or(WorkflowError::NoAttestation)?;
        let nullifier = attestation.nullifier;
        let short = attestation.nullifier_short();

        match self.contract.get_policy(nullifier).await {
            Ok(record) => {
                let lookup = PolicyLookup::from(record);
                match &lookup {
                    PolicyLookup::Exists(policy) => {
                        info!(nullifier = %short, policy_id = %policy.policy_id, "policy found")
                    }
                    PolicyLookup::Absent => info!(nullifier = %short, "no policy issued yet"),
                }
                self.transition(WorkflowState::PolicyChecked(lookup));
                Ok(lookup)
            }
            Err(e) => {
                warn!(nullifier = %short, error = %e, "policy check failed");
                self.transition(WorkflowState::CheckFailed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Load the latest attestation and, if there is one, check its policy.
    ///
    /// An empty store makes no contract calls.
    pub async fn refresh(&mut self, store: &dyn ProofStore, key: &str) -> WorkflowResult<&WorkflowState> {
        if self.load_latest(store, key)? {
            self.check_policy().await?;
        }
        Ok(&self.state)
    }

    /// Issue a policy for the loaded attestation.
    ///
    /// Only permitted once a check has found no policy. On success the
    /// policy is read back with the same nullifier. On failure the workflow
    /// returns to `PolicyChecked(Absent)` so the user can retry.
    pub async fn issue_policy(&mut self) -> WorkflowResult<IssueOutcome> {
        self.settle();
        match &self.state {
            WorkflowState::PolicyChecked(PolicyLookup::Absent) => {}
            WorkflowState::PolicyChecked(PolicyLookup::Exists(policy)) => {
                return Err(WorkflowError::PolicyExists(policy.policy_id));
            }
            other => {
                return Err(WorkflowError::InvalidState {
                    operation: "issue a policy",
                    state: other.name(),
                });
            }
        }

        let recipient = self.wallet.address().ok_or(WorkflowError::WalletDisconnected)?;
        let attestation = self.attestation.as_ref().ok_or(WorkflowError::NoAttestation)?;
        let call = IssuePolicyCall::new(attestation, recipient, &self.terms, self.clock.now_unix())?;
        let short = attestation.nullifier_short();

        info!(
            nullifier = %short,
            coverage = %call.coverage_amount,
            valid_till = %call.valid_till,
            "issuing policy"
        );
        self.transition(WorkflowState::Issuing);

        let receipt = match self.contract.issue_policy(&call).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(nullifier = %short, error = %e, "policy issuance failed");
                self.transition(WorkflowState::PolicyChecked(PolicyLookup::Absent));
                return Err(e.into());
            }
        };

        info!(tx_hash = ?receipt.tx_hash, block = ?receipt.block_number, "policy issued");
        self.last_receipt = Some(receipt.clone());
        self.transition(WorkflowState::Issued(receipt.clone()));

        let lookup = match self.check_policy().await {
            Ok(lookup) => Some(lookup),
            Err(e) => {
                warn!(error = %e, "could not read back issued policy");
                None
            }
        };
        Ok(IssueOutcome { receipt, lookup })
    }

    /// Services covered by `policy_id` for the loaded attestation.
    ///
    /// `policy_id` is user input and must be a decimal integer.
    pub async fn services_covered(&mut self, policy_id: &str) -> WorkflowResult<Vec<String>> {
        self.settle();
        let policy_id = parse_policy_id(policy_id)?;
        let nullifier = self
            .attestation
            .as_ref()
            .ok_or(WorkflowError::NoAttestation)?
            .nullifier;

        let previous = Box::new(self.state.clone());
        self.transition(WorkflowState::Querying { previous });

        let result = self.contract.get_services_covered(nullifier, policy_id).await;
        self.settle();

        let services = result?;
        debug!(%policy_id, count = services.len(), "services covered");
        Ok(services)
    }
}

/// Parse a user-supplied policy id.
pub fn parse_policy_id(input: &str) -> WorkflowResult<U256> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WorkflowError::InvalidPolicyId(input.to_string()));
    }
    U256::from_dec_str(trimmed).map_err(|_| WorkflowError::InvalidPolicyId(input.to_string()))
}
