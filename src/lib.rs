//! Anon Insurance - privacy-preserving insurance gated by Anon Aadhaar
//!
//! A holder proves they own a valid Aadhaar identity with a zero-knowledge
//! proof and receives an insurance policy bound to the proof's nullifier.
//! The identity itself never leaves the holder's device.
//!
//! # Flow
//!
//! 1. The external prover writes a serialized proof to the proof store
//! 2. [`PolicyWorkflow`] loads the latest attestation from the store
//! 3. The insurance contract is asked whether the nullifier holds a policy
//! 4. If not, the packed proof is submitted with the policy terms
//! 5. The contract verifies the proof and records the policy

pub mod attestation;
pub mod config;
pub mod contract;
pub mod policy;
pub mod session;
pub mod store;
pub mod verifier;
pub mod workflow;

// WASM bindings (only compiled when wasm feature is enabled)
#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export main types
pub use attestation::IdentityAttestation;
pub use contract::PolicyContract;
pub use policy::{Policy, PolicyLookup, PolicyTerms};
pub use verifier::Verifier;
pub use workflow::{PolicyWorkflow, WorkflowState};
