//! WASM bindings for Anon Insurance
//!
//! Lets a browser front-end reuse attestation parsing, proof packing and
//! local verification. Contract calls stay with the page's wallet library;
//! [`issue_policy_args`] produces the argument list it should submit.

use wasm_bindgen::prelude::*;

use crate::attestation::IdentityAttestation;
use crate::contract::IssuePolicyCall;
use crate::policy::PolicyTerms;
use crate::store::StoredSession;
use crate::verifier::Verifier;

// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

// ============== RESULT TYPES ==============

/// Parsed attestation for JavaScript
#[wasm_bindgen]
pub struct ParsedAttestation {
    success: bool,
    nullifier: String,
    nullifier_seed: String,
    timestamp: String,
    age_above_18: bool,
    gender: Option<String>,
    pincode: Option<String>,
    state: Option<String>,
    packed_proof: Vec<String>,
    error: Option<String>,
}

impl ParsedAttestation {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            nullifier: String::new(),
            nullifier_seed: String::new(),
            timestamp: String::new(),
            age_above_18: false,
            gender: None,
            pincode: None,
            state: None,
            packed_proof: Vec::new(),
            error: Some(error),
        }
    }

    fn from_pcd(pcd: &str) -> Self {
        let attestation = match IdentityAttestation::deserialize(pcd) {
            Ok(a) => a,
            Err(e) => return Self::failed(e.to_string()),
        };
        let packed = match attestation.packed_proof() {
            Ok(p) => p,
            Err(e) => return Self::failed(e.to_string()),
        };

        let attrs = &attestation.attributes;
        Self {
            success: true,
            nullifier: attestation.nullifier.to_string(),
            nullifier_seed: attestation.nullifier_seed.to_string(),
            timestamp: attestation.timestamp.to_string(),
            age_above_18: attrs.is_age_above_18(),
            gender: attrs.gender_text(),
            pincode: attrs.pincode().map(|p| p.to_string()),
            state: attrs.state_text(),
            packed_proof: packed.iter().map(|v| v.to_string()).collect(),
            error: None,
        }
    }
}

#[wasm_bindgen]
impl ParsedAttestation {
    #[wasm_bindgen(getter)]
    pub fn success(&self) -> bool {
        self.success
    }

    #[wasm_bindgen(getter)]
    pub fn nullifier(&self) -> String {
        self.nullifier.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn nullifier_seed(&self) -> String {
        self.nullifier_seed.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn timestamp(&self) -> String {
        self.timestamp.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn age_above_18(&self) -> bool {
        self.age_above_18
    }

    #[wasm_bindgen(getter)]
    pub fn gender(&self) -> Option<String> {
        self.gender.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn pincode(&self) -> Option<String> {
        self.pincode.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn state(&self) -> Option<String> {
        self.state.clone()
    }

    /// Packed proof as a JSON array of decimal strings.
    #[wasm_bindgen(getter)]
    pub fn packed_proof(&self) -> String {
        serde_json::to_string(&self.packed_proof).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen(getter)]
    pub fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

// ============== ATTESTATIONS ==============

/// Parse a serialized PCD.
#[wasm_bindgen]
pub fn parse_attestation(serialized_pcd: &str) -> ParsedAttestation {
    ParsedAttestation::from_pcd(serialized_pcd)
}

/// Parse the most recent proof from the SDK's session storage value.
#[wasm_bindgen]
pub fn parse_latest_attestation(session_json: &str) -> ParsedAttestation {
    let session = match StoredSession::parse(session_json) {
        Ok(s) => s,
        Err(e) => return ParsedAttestation::failed(e.to_string()),
    };

    match session.latest_pcd() {
        Ok(Some((index, pcd))) => {
            web_sys::console::log_1(&format!("Using stored proof #{index}").into());
            ParsedAttestation::from_pcd(&pcd)
        }
        Ok(None) => ParsedAttestation::failed("No proof stored".to_string()),
        Err(e) => ParsedAttestation::failed(e.to_string()),
    }
}

/// `issuePolicy` arguments as a JSON array, or an `{"error": ...}` object.
///
/// The policy is valid for 30 days from the browser's current time.
#[wasm_bindgen]
pub fn issue_policy_args(serialized_pcd: &str, recipient: &str) -> String {
    let error = |msg: String| serde_json::json!({ "error": msg }).to_string();

    let attestation = match IdentityAttestation::deserialize(serialized_pcd) {
        Ok(a) => a,
        Err(e) => return error(e.to_string()),
    };
    let recipient = match recipient.parse() {
        Ok(r) => r,
        Err(_) => return error(format!("Invalid recipient address: {recipient}")),
    };
    let now_secs = (js_sys::Date::now() / 1000.0) as u64;

    match IssuePolicyCall::new(&attestation, recipient, &PolicyTerms::default(), now_secs) {
        Ok(call) => call.to_json_args().to_string(),
        Err(e) => error(e.to_string()),
    }
}

// ============== VERIFICATION ==============

/// Verify a serialized PCD against a snarkjs verification key.
#[wasm_bindgen]
pub fn verify_attestation(serialized_pcd: &str, verification_key_json: &str) -> bool {
    let attestation = match IdentityAttestation::deserialize(serialized_pcd) {
        Ok(a) => a,
        Err(_) => return false,
    };

    let verifier = match Verifier::from_json(verification_key_json) {
        Ok(v) => v,
        Err(e) => {
            web_sys::console::error_1(&format!("Failed to load verification key: {e}").into());
            return false;
        }
    };

    verifier.verify(&attestation).unwrap_or(false)
}

// ============== UTILITIES ==============

/// Get version info
#[wasm_bindgen]
pub fn get_version() -> String {
    format!("Anon Insurance WASM v{} (Groth16/BN254)", env!("CARGO_PKG_VERSION"))
}
