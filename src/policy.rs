//! Insurance policies as recorded by the contract, and the terms this
//! client offers when issuing one.

use ethers_core::types::U256;
use ethers_core::utils::WEI_IN_ETHER;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Services every issued policy covers.
pub const SERVICES_COVERED: [&str; 4] = ["Health", "Accident", "Fire", "Flood"];

/// Policies stay valid for 30 days from issuance.
pub const POLICY_VALIDITY_SECS: u64 = 30 * 24 * 60 * 60;

/// Raw `getPolicy` return tuple. A zero `policy_id` means no policy exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyRecord {
    pub policy_id: U256,
    pub coverage_amount: U256,
    pub valid_till: U256,
    pub active: bool,
}

/// An issued policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: U256,
    /// Coverage in wei.
    pub coverage_amount: U256,
    /// Expiry, unix seconds.
    pub valid_till: U256,
    pub active: bool,
}

impl Policy {
    pub fn is_expired(&self, now: u64) -> bool {
        self.valid_till <= U256::from(now)
    }
}

/// Outcome of looking up the policy held by a nullifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "policy", rename_all = "lowercase")]
pub enum PolicyLookup {
    Absent,
    Exists(Policy),
}

impl From<PolicyRecord> for PolicyLookup {
    fn from(record: PolicyRecord) -> Self {
        if record.policy_id.is_zero() {
            return PolicyLookup::Absent;
        }
        PolicyLookup::Exists(Policy {
            policy_id: record.policy_id,
            coverage_amount: record.coverage_amount,
            valid_till: record.valid_till,
            active: record.active,
        })
    }
}

impl PolicyLookup {
    pub fn policy(&self) -> Option<&Policy> {
        match self {
            PolicyLookup::Exists(policy) => Some(policy),
            PolicyLookup::Absent => None,
        }
    }
}

/// Terms attached to every issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTerms {
    pub coverage_amount: U256,
    pub validity_secs: u64,
    pub services_covered: Vec<String>,
}

impl Default for PolicyTerms {
    /// 1 ETH of coverage for 30 days across [`SERVICES_COVERED`].
    fn default() -> Self {
        Self {
            coverage_amount: WEI_IN_ETHER,
            validity_secs: POLICY_VALIDITY_SECS,
            services_covered: SERVICES_COVERED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PolicyTerms {
    /// Expiry for a policy issued at `now`.
    pub fn valid_till(&self, now: u64) -> U256 {
        U256::from(now) + U256::from(self.validity_secs)
    }
}

/// Source of the current unix time.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.0
    }
}
