//! Wallet and proof-session state seen by the entry surface.

use ethers_core::types::{Address, U256};
use ethers_core::utils::to_checksum;
use serde::{Deserialize, Serialize};

/// Nullifier seed this application registers its proofs under.
pub const APP_NULLIFIER_SEED: u64 = 12_345_678_983_762_535;

/// Prover session status as written to the proof store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProofStatus {
    #[default]
    LoggedOut,
    LoggingIn,
    LoggedIn,
}

/// The connected account, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalletSession {
    address: Option<Address>,
}

impl WalletSession {
    pub fn connected(address: Address) -> Self {
        Self {
            address: Some(address),
        }
    }

    pub fn disconnected() -> Self {
        Self { address: None }
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }
}

/// Parameters handed to the external prover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveRequest {
    #[serde(with = "crate::attestation::uint")]
    pub nullifier_seed: U256,
    /// Checksummed wallet address bound into the proof.
    pub signal: String,
    pub use_test_aadhaar: bool,
}

impl ProveRequest {
    pub fn new(nullifier_seed: U256, signer: Address, use_test_aadhaar: bool) -> Self {
        Self {
            nullifier_seed,
            signal: to_checksum(&signer, None),
            use_test_aadhaar,
        }
    }
}

/// What the entry surface offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryAction {
    ConnectWallet,
    Prove(ProveRequest),
}

/// Proof generation is only offered once a wallet is connected.
pub fn entry_action(wallet: &WalletSession, nullifier_seed: U256, use_test_aadhaar: bool) -> EntryAction {
    match wallet.address() {
        Some(address) => EntryAction::Prove(ProveRequest::new(nullifier_seed, address, use_test_aadhaar)),
        None => EntryAction::ConnectWallet,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Entry,
    Policy,
}

/// Routes from the entry page to the policy page when the proof status
/// enters `logged-in`.
///
/// The redirect fires once per transition: observing `logged-in` again
/// without an intervening status change does nothing.
#[derive(Debug, Clone)]
pub struct Navigator {
    page: Page,
    last_status: Option<ProofStatus>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            page: Page::Entry,
            last_status: None,
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    /// Navigate explicitly.
    pub fn show(&mut self, page: Page) {
        self.page = page;
    }

    /// Feed the latest proof status; returns the page navigated to, if any.
    pub fn observe(&mut self, status: ProofStatus) -> Option<Page> {
        let entered = status == ProofStatus::LoggedIn && self.last_status != Some(ProofStatus::LoggedIn);
        self.last_status = Some(status);

        if entered && self.page == Page::Entry {
            self.page = Page::Policy;
            tracing::info!("proof session logged in, routing to policy page");
            return Some(Page::Policy);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&ProofStatus::LoggedIn).unwrap(), "\"logged-in\"");
        let status: ProofStatus = serde_json::from_str("\"logged-out\"").unwrap();
        assert_eq!(status, ProofStatus::LoggedOut);
        let status: ProofStatus = serde_json::from_str("\"logging-in\"").unwrap();
        assert_eq!(status, ProofStatus::LoggingIn);
    }

    #[test]
    fn test_entry_requires_wallet() {
        let seed = U256::from(APP_NULLIFIER_SEED);
        assert_eq!(
            entry_action(&WalletSession::disconnected(), seed, false),
            EntryAction::ConnectWallet
        );

        let address: Address = "0x81193f978ecd647b6e923bcfa5429728cc49baf8".parse().unwrap();
        match entry_action(&WalletSession::connected(address), seed, true) {
            EntryAction::Prove(request) => {
                assert_eq!(request.nullifier_seed, seed);
                assert!(request.use_test_aadhaar);
                assert_eq!(request.signal.to_lowercase(), "0x81193f978ecd647b6e923bcfa5429728cc49baf8");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_redirect_fires_once_per_transition() {
        let mut nav = Navigator::new();

        assert_eq!(nav.observe(ProofStatus::LoggedOut), None);
        assert_eq!(nav.observe(ProofStatus::LoggingIn), None);
        assert_eq!(nav.observe(ProofStatus::LoggedIn), Some(Page::Policy));
        assert_eq!(nav.page(), Page::Policy);

        // Back on the entry page while still logged in: no redirect.
        nav.show(Page::Entry);
        assert_eq!(nav.observe(ProofStatus::LoggedIn), None);
        assert_eq!(nav.page(), Page::Entry);

        // A fresh login transition redirects again.
        assert_eq!(nav.observe(ProofStatus::LoggedOut), None);
        assert_eq!(nav.observe(ProofStatus::LoggedIn), Some(Page::Policy));
    }

    #[test]
    fn test_initial_logged_in_redirects() {
        let mut nav = Navigator::new();
        assert_eq!(nav.observe(ProofStatus::LoggedIn), Some(Page::Policy));
    }
}
