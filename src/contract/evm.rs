//! ethers-rs implementation of the insurance contract gateway.

use async_trait::async_trait;
use ethers::middleware::signer::SignerMiddlewareError;
use ethers::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ContractError, ContractResult, IssuePolicyCall, IssueReceipt, PolicyContract};
use crate::policy::PolicyRecord;
use crate::session::WalletSession;

abigen!(
    InsuranceContract,
    r#"[
        function issuePolicy(uint256 nullifierSeed, uint256 nullifier, uint256 timestamp, address recipient, uint256[4] revealArray, uint256[8] groth16Proof, uint256 coverageAmount, uint256 validTill, string[] servicesCovered) external
        function getPolicy(uint256 nullifier) external view returns (uint256 policyId, uint256 coverageAmount, uint256 validTill, bool active)
        function getServicesCovered(uint256 nullifier, uint256 policyId) external view returns (string[])
    ]"#
);

/// Contract gateway over any ethers middleware.
pub struct EvmPolicyContract<M> {
    contract: InsuranceContract<M>,
    confirmations: usize,
}

impl<M: Middleware + 'static> EvmPolicyContract<M> {
    pub fn new(address: Address, client: Arc<M>, confirmations: usize) -> Self {
        Self {
            contract: InsuranceContract::new(address, client),
            confirmations,
        }
    }
}

/// Splits middleware failures into requests the node or signer refused and
/// failures to reach the node at all.
pub trait RequestFailure {
    fn is_rejection(&self) -> bool;
}

impl RequestFailure for ProviderError {
    fn is_rejection(&self) -> bool {
        MiddlewareError::is_error_response(self)
    }
}

impl<M, S> RequestFailure for SignerMiddlewareError<M, S>
where
    M: Middleware,
    M::Error: RequestFailure,
    S: Signer,
{
    fn is_rejection(&self) -> bool {
        match self {
            SignerMiddlewareError::MiddlewareError(e) => e.is_rejection(),
            // Signing failed locally.
            _ => true,
        }
    }
}

fn classify<M>(err: ethers::contract::ContractError<M>) -> ContractError
where
    M: Middleware,
    M::Error: RequestFailure,
{
    if err.is_revert() {
        return ContractError::Reverted(err.to_string());
    }
    match err {
        ethers::contract::ContractError::MiddlewareError { e } if e.is_rejection() => {
            ContractError::Rejected(e.to_string())
        }
        other => ContractError::Transport(other.to_string()),
    }
}

#[async_trait]
impl<M> PolicyContract for EvmPolicyContract<M>
where
    M: Middleware + 'static,
    M::Error: RequestFailure,
{
    async fn issue_policy(&self, call: &IssuePolicyCall) -> ContractResult<IssueReceipt> {
        let tx = self.contract.issue_policy(
            call.nullifier_seed,
            call.nullifier,
            call.timestamp,
            call.recipient,
            call.reveal_array,
            call.packed_proof,
            call.coverage_amount,
            call.valid_till,
            call.services_covered.clone(),
        );

        let pending = tx.send().await.map_err(classify)?;
        let tx_hash = pending.tx_hash();
        info!(?tx_hash, "issuePolicy submitted");

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?
            .ok_or(ContractError::Dropped(tx_hash))?;

        if receipt.status == Some(U64::zero()) {
            return Err(ContractError::Reverted(format!("{tx_hash:?}")));
        }

        Ok(IssueReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn get_policy(&self, nullifier: U256) -> ContractResult<PolicyRecord> {
        let (policy_id, coverage_amount, valid_till, active) =
            self.contract.get_policy(nullifier).call().await.map_err(classify)?;
        debug!(%policy_id, "getPolicy returned");

        Ok(PolicyRecord {
            policy_id,
            coverage_amount,
            valid_till,
            active,
        })
    }

    async fn get_services_covered(&self, nullifier: U256, policy_id: U256) -> ContractResult<Vec<String>> {
        self.contract
            .get_services_covered(nullifier, policy_id)
            .call()
            .await
            .map_err(classify)
    }
}

/// Connect to the contract over HTTP.
///
/// With a private key the gateway signs transactions and the wallet session
/// is connected; without one it is read-only.
pub async fn connect(
    rpc_url: &str,
    address: Address,
    private_key: Option<&str>,
    chain_id: Option<u64>,
    confirmations: usize,
) -> ContractResult<(Arc<dyn PolicyContract>, WalletSession)> {
    let provider =
        Provider::<Http>::try_from(rpc_url).map_err(|e| ContractError::Transport(e.to_string()))?;

    let Some(wallet) = private_key.map(parse_wallet).transpose()? else {
        info!(%rpc_url, "no wallet key configured, connecting read-only");
        let gateway: Arc<dyn PolicyContract> =
            Arc::new(EvmPolicyContract::new(address, Arc::new(provider), confirmations));
        return Ok((gateway, WalletSession::disconnected()));
    };

    let chain_id = match chain_id {
        Some(id) => id,
        None => provider
            .get_chainid()
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?
            .as_u64(),
    };

    let wallet = wallet.with_chain_id(chain_id);
    let session = WalletSession::connected(wallet.address());
    info!(address = ?wallet.address(), chain_id, "wallet connected");

    let client = SignerMiddleware::new(provider, wallet);
    let gateway: Arc<dyn PolicyContract> =
        Arc::new(EvmPolicyContract::new(address, Arc::new(client), confirmations));
    Ok((gateway, session))
}

fn parse_wallet(key: &str) -> ContractResult<LocalWallet> {
    key.trim()
        .parse::<LocalWallet>()
        .map_err(|e| ContractError::InvalidWalletKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    type Signed = SignerMiddleware<Provider<Http>, LocalWallet>;

    fn via_signer(e: SignerMiddlewareError<Provider<Http>, LocalWallet>) -> ContractError {
        classify::<Signed>(ethers::contract::ContractError::MiddlewareError { e })
    }

    fn node_response(message: &str) -> ProviderError {
        let response = JsonRpcError {
            code: -32000,
            message: message.to_string(),
            data: None,
        };
        ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(response)))
    }

    #[test]
    fn test_signed_transport_failure_is_transport() {
        let err = via_signer(SignerMiddlewareError::MiddlewareError(ProviderError::CustomError(
            "connection refused".into(),
        )));
        assert!(matches!(err, ContractError::Transport(_)));
    }

    #[test]
    fn test_node_error_response_is_rejection() {
        let err = via_signer(SignerMiddlewareError::MiddlewareError(node_response(
            "insufficient funds for gas * price + value",
        )));
        assert!(matches!(err, ContractError::Rejected(m) if m.contains("insufficient funds")));
    }

    #[test]
    fn test_local_signing_failure_is_rejection() {
        assert!(matches!(
            via_signer(SignerMiddlewareError::WrongSigner),
            ContractError::Rejected(_)
        ));
    }

    #[test]
    fn test_read_only_transport_failure_is_transport() {
        let err = classify::<Provider<Http>>(ethers::contract::ContractError::MiddlewareError {
            e: ProviderError::UnsupportedRPC,
        });
        assert!(matches!(err, ContractError::Transport(_)));
    }

    #[tokio::test]
    async fn test_bad_wallet_key_is_not_a_rejection() {
        let address = Address::repeat_byte(0x11);
        let result = connect("http://127.0.0.1:8545", address, Some("not-a-key"), Some(1), 1).await;

        assert!(matches!(result, Err(ContractError::InvalidWalletKey(_))));
    }
}
