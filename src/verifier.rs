//! Local Groth16 verification of identity attestations.
//!
//! The insurance contract verifies every proof on-chain; this is an opt-in
//! check for inspecting a stored attestation before spending gas on it.

use ark_bn254::{Bn254, Fr, G1Affine};
use ark_groth16::{Groth16, PreparedVerifyingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::attestation::groth16::{field_from_uint, g1_from_strings, g2_from_strings, g1_to_strings, g2_to_strings};
use crate::attestation::{AttestationError, IdentityAttestation};

/// Number of public signals exposed by the Anon Aadhaar circuit.
pub const PUBLIC_SIGNAL_COUNT: usize = 9;

/// Result type for verifier operations.
pub type VerifierResult<T> = Result<T, VerifierError>;

/// Errors that can occur during verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid proof: {0}")]
    InvalidProof(#[from] AttestationError),

    #[error("Invalid verifying key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Public signal {0} is not a field element")]
    SignalOutOfField(&'static str),
}

/// Verifying key in the snarkjs `verification_key.json` layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnarkjsVerifyingKey {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub curve: String,
    pub n_public: usize,
    #[serde(rename = "vk_alpha_1")]
    pub vk_alpha_1: [String; 3],
    #[serde(rename = "vk_beta_2")]
    pub vk_beta_2: [[String; 2]; 3],
    #[serde(rename = "vk_gamma_2")]
    pub vk_gamma_2: [[String; 2]; 3],
    #[serde(rename = "vk_delta_2")]
    pub vk_delta_2: [[String; 2]; 3],
    #[serde(rename = "IC")]
    pub ic: Vec<[String; 3]>,
}

impl SnarkjsVerifyingKey {
    /// Lift into an arkworks verifying key.
    pub fn to_ark(&self) -> VerifierResult<VerifyingKey<Bn254>> {
        if self.ic.len() != self.n_public + 1 {
            return Err(VerifierError::InvalidKey(format!(
                "IC has {} points for {} public inputs",
                self.ic.len(),
                self.n_public
            )));
        }

        let gamma_abc_g1 = self
            .ic
            .iter()
            .map(|point| g1_from_strings("IC", point))
            .collect::<Result<Vec<G1Affine>, _>>()?;

        Ok(VerifyingKey {
            alpha_g1: g1_from_strings("vk_alpha_1", &self.vk_alpha_1)?,
            beta_g2: g2_from_strings("vk_beta_2", &self.vk_beta_2)?,
            gamma_g2: g2_from_strings("vk_gamma_2", &self.vk_gamma_2)?,
            delta_g2: g2_from_strings("vk_delta_2", &self.vk_delta_2)?,
            gamma_abc_g1,
        })
    }

    /// Render an arkworks verifying key in the snarkjs layout.
    pub fn from_ark(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            protocol: "groth16".to_string(),
            curve: "bn128".to_string(),
            n_public: vk.gamma_abc_g1.len().saturating_sub(1),
            vk_alpha_1: g1_to_strings(&vk.alpha_g1),
            vk_beta_2: g2_to_strings(&vk.beta_g2),
            vk_gamma_2: g2_to_strings(&vk.gamma_g2),
            vk_delta_2: g2_to_strings(&vk.delta_g2),
            ic: vk.gamma_abc_g1.iter().map(g1_to_strings).collect(),
        }
    }
}

/// Public signals of an attestation in circuit order.
pub fn public_signals(attestation: &IdentityAttestation) -> [(&'static str, U256); PUBLIC_SIGNAL_COUNT] {
    let attrs = &attestation.attributes;
    [
        ("pubkeyHash", attestation.pubkey_hash),
        ("nullifier", attestation.nullifier),
        ("timestamp", attestation.timestamp),
        ("ageAbove18", attrs.age_above_18),
        ("gender", attrs.gender),
        ("pincode", attrs.pincode),
        ("state", attrs.state),
        ("nullifierSeed", attestation.nullifier_seed),
        ("signalHash", attestation.signal_hash),
    ]
}

/// Verifier for Anon Aadhaar attestations.
pub struct Verifier {
    /// Prepared verifying key for fast verification.
    prepared_vk: PreparedVerifyingKey<Bn254>,
    /// Original verifying key (for serialization).
    verifying_key: VerifyingKey<Bn254>,
}

impl Verifier {
    /// Create a new verifier from a verifying key.
    pub fn new(vk: VerifyingKey<Bn254>) -> VerifierResult<Self> {
        if vk.gamma_abc_g1.len() != PUBLIC_SIGNAL_COUNT + 1 {
            return Err(VerifierError::InvalidKey(format!(
                "key expects {} public inputs, attestations carry {}",
                vk.gamma_abc_g1.len().saturating_sub(1),
                PUBLIC_SIGNAL_COUNT
            )));
        }
        let prepared_vk = Groth16::<Bn254>::process_vk(&vk)
            .map_err(|e| VerifierError::InvalidKey(e.to_string()))?;
        Ok(Self {
            prepared_vk,
            verifying_key: vk,
        })
    }

    /// Parse a snarkjs verifying key.
    pub fn from_json(json: &str) -> VerifierResult<Self> {
        let key: SnarkjsVerifyingKey = serde_json::from_str(json)?;
        Self::new(key.to_ark()?)
    }

    /// Load verifier from file.
    ///
    /// Accepts a snarkjs `verification_key.json` or a key written by
    /// [`Verifier::save`].
    pub fn load(path: &Path) -> VerifierResult<Self> {
        let bytes = std::fs::read(path)?;
        let json_err = match serde_json::from_slice::<SnarkjsVerifyingKey>(&bytes) {
            Ok(key) => return Self::new(key.to_ark()?),
            Err(e) => e,
        };

        match VerifyingKey::deserialize_compressed(&bytes[..]) {
            Ok(vk) => Self::new(vk),
            // Report whichever format the file was evidently meant to be.
            Err(_) if std::str::from_utf8(&bytes).is_ok() => Err(json_err.into()),
            Err(e) => Err(VerifierError::KeyEncoding(e.to_string())),
        }
    }

    /// Save verifying key to file (compressed arkworks encoding).
    pub fn save(&self, path: &Path) -> VerifierResult<()> {
        let mut bytes = Vec::new();
        self.verifying_key
            .serialize_compressed(&mut bytes)
            .map_err(|e| VerifierError::KeyEncoding(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Get a reference to the verifying key.
    pub fn verifying_key(&self) -> &VerifyingKey<Bn254> {
        &self.verifying_key
    }

    /// Verify an attestation.
    ///
    /// Returns `true` if the proof is valid, `false` otherwise.
    pub fn verify(&self, attestation: &IdentityAttestation) -> VerifierResult<bool> {
        let proof = attestation.proof.to_ark()?;

        let public_inputs = public_signals(attestation)
            .into_iter()
            .map(|(name, value)| field_from_uint::<Fr>(value).ok_or(VerifierError::SignalOutOfField(name)))
            .collect::<VerifierResult<Vec<Fr>>>()?;

        Groth16::<Bn254>::verify_with_processed_vk(&self.prepared_vk, &public_inputs, &proof)
            .map_err(|e| VerifierError::VerificationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::groth16::uint_from_field;
    use crate::attestation::{Groth16Proof, RevealedAttributes};
    use ark_groth16::ProvingKey;
    use ark_relations::lc;
    use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
    use ark_std::rand::{rngs::StdRng, SeedableRng};

    /// Exposes nine public inputs, each bound to a matching witness.
    #[derive(Clone)]
    struct MirrorCircuit {
        inputs: Option<[Fr; PUBLIC_SIGNAL_COUNT]>,
    }

    impl ConstraintSynthesizer<Fr> for MirrorCircuit {
        fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
            for i in 0..PUBLIC_SIGNAL_COUNT {
                let value = || self.inputs.map(|v| v[i]).ok_or(SynthesisError::AssignmentMissing);
                let input = cs.new_input_variable(value)?;
                let witness = cs.new_witness_variable(value)?;
                cs.enforce_constraint(
                    lc!() + witness,
                    lc!() + ark_relations::r1cs::Variable::One,
                    lc!() + input,
                )?;
            }
            Ok(())
        }
    }

    fn setup() -> (ProvingKey<Bn254>, VerifyingKey<Bn254>) {
        setup_with_seed(0xA11CE)
    }

    fn setup_with_seed(seed: u64) -> (ProvingKey<Bn254>, VerifyingKey<Bn254>) {
        let mut rng = StdRng::seed_from_u64(seed);
        Groth16::<Bn254>::circuit_specific_setup(MirrorCircuit { inputs: None }, &mut rng).unwrap()
    }

    fn attestation_for(pk: &ProvingKey<Bn254>) -> IdentityAttestation {
        let values: [u64; PUBLIC_SIGNAL_COUNT] = [555, 42, 1712345678, 1, 77, 110051, 0, 12345678983762535, 99];
        let inputs = values.map(Fr::from);

        let mut rng = StdRng::seed_from_u64(0xB0B);
        let proof = Groth16::<Bn254>::prove(pk, MirrorCircuit { inputs: Some(inputs) }, &mut rng).unwrap();

        let u = |i: usize| uint_from_field(inputs[i]);
        IdentityAttestation {
            id: "test".to_string(),
            pubkey_hash: u(0),
            nullifier: u(1),
            timestamp: u(2),
            attributes: RevealedAttributes {
                age_above_18: u(3),
                gender: u(4),
                pincode: u(5),
                state: u(6),
            },
            nullifier_seed: u(7),
            signal_hash: u(8),
            proof: Groth16Proof::from_ark(&proof),
        }
    }

    #[test]
    fn test_verify_valid_attestation() {
        let (pk, vk) = setup();
        let verifier = Verifier::new(vk).unwrap();

        assert!(verifier.verify(&attestation_for(&pk)).unwrap());
    }

    #[test]
    fn test_tampered_nullifier_fails() {
        let (pk, vk) = setup();
        let verifier = Verifier::new(vk).unwrap();

        let mut attestation = attestation_for(&pk);
        attestation.nullifier = U256::from(43u64);

        assert!(!verifier.verify(&attestation).unwrap());
    }

    #[test]
    fn test_snarkjs_key_roundtrip_verifies() {
        let (pk, vk) = setup();
        let json = serde_json::to_string(&SnarkjsVerifyingKey::from_ark(&vk)).unwrap();

        let verifier = Verifier::from_json(&json).unwrap();
        assert!(verifier.verify(&attestation_for(&pk)).unwrap());
    }

    #[test]
    fn test_load_json_and_compressed_keys() {
        let (pk, vk) = setup();
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("verification_key.json");
        std::fs::write(&json_path, serde_json::to_vec_pretty(&SnarkjsVerifyingKey::from_ark(&vk)).unwrap()).unwrap();
        let from_json = Verifier::load(&json_path).unwrap();

        let bin_path = dir.path().join("vk.bin");
        from_json.save(&bin_path).unwrap();
        let from_bin = Verifier::load(&bin_path).unwrap();

        assert_eq!(from_bin.verifying_key(), &vk);
        assert!(from_bin.verify(&attestation_for(&pk)).unwrap());
    }

    #[test]
    fn test_compressed_key_starting_with_brace_loads() {
        // Roughly one key in 256 encodes to a leading `{`.
        let (pk, vk) = (0..4096u64)
            .map(setup_with_seed)
            .find(|(_, vk)| {
                let mut bytes = Vec::new();
                vk.serialize_compressed(&mut bytes).unwrap();
                bytes[0] == b'{'
            })
            .expect("no key with a leading brace in 4096 seeds");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vk.bin");
        Verifier::new(vk.clone()).unwrap().save(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap()[0], b'{');

        let loaded = Verifier::load(&path).unwrap();
        assert_eq!(loaded.verifying_key(), &vk);
        assert!(loaded.verify(&attestation_for(&pk)).unwrap());
    }

    #[test]
    fn test_malformed_json_key_reports_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verification_key.json");
        std::fs::write(&path, "{\"protocol\": \"groth16\"").unwrap();

        assert!(matches!(Verifier::load(&path), Err(VerifierError::SerializationError(_))));
    }

    #[test]
    fn test_key_with_wrong_arity_rejected() {
        let (_pk, mut vk) = setup();
        vk.gamma_abc_g1.pop();

        assert!(matches!(Verifier::new(vk), Err(VerifierError::InvalidKey(_))));
    }

    #[test]
    fn test_signal_outside_field_rejected() {
        let (pk, vk) = setup();
        let verifier = Verifier::new(vk).unwrap();

        let mut attestation = attestation_for(&pk);
        attestation.signal_hash = U256::MAX;

        assert!(matches!(
            verifier.verify(&attestation),
            Err(VerifierError::SignalOutOfField("signalHash"))
        ));
    }
}
