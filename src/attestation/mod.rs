//! Identity attestations produced by the Anon Aadhaar prover.
//!
//! The prover hands out a serialized PCD: a JSON document carrying the
//! Groth16 proof plus the attributes the holder chose to reveal. This module
//! turns that document into an [`IdentityAttestation`].

pub mod groth16;

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};

pub use groth16::{Groth16Proof, PackedProof};

/// PCD type tag written by the Anon Aadhaar SDK.
pub const PCD_TYPE: &str = "anon-aadhaar";

/// Result type for attestation parsing.
pub type AttestationResult<T> = Result<T, AttestationError>;

/// Errors raised while reading an attestation.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("Malformed attestation: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported PCD type: {0}")]
    UnsupportedType(String),

    #[error("Invalid integer in {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid curve point in {0}")]
    InvalidPoint(&'static str),

    #[error("Value in {0} is not a canonical field element")]
    NotInField(&'static str),
}

/// Attributes selectively disclosed by the holder.
///
/// Undisclosed attributes are zero. Gender and state are ASCII packed
/// little-endian into an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedAttributes {
    #[serde(with = "uint")]
    pub age_above_18: U256,
    #[serde(with = "uint")]
    pub gender: U256,
    #[serde(with = "uint")]
    pub pincode: U256,
    #[serde(with = "uint")]
    pub state: U256,
}

impl RevealedAttributes {
    /// Attributes in the order the insurance contract expects.
    pub fn reveal_array(&self) -> [U256; 4] {
        [self.age_above_18, self.gender, self.pincode, self.state]
    }

    pub fn is_age_above_18(&self) -> bool {
        self.age_above_18 == U256::one()
    }

    pub fn gender_text(&self) -> Option<String> {
        decode_revealed_text(self.gender)
    }

    pub fn state_text(&self) -> Option<String> {
        decode_revealed_text(self.state)
    }

    pub fn pincode(&self) -> Option<U256> {
        (!self.pincode.is_zero()).then_some(self.pincode)
    }
}

/// A deserialized Anon Aadhaar proof of identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttestation {
    /// PCD identifier assigned by the prover.
    pub id: String,
    /// Seed chosen by the application; not secret.
    #[serde(with = "uint")]
    pub nullifier_seed: U256,
    /// Pseudonymous identifier, stable for one identity and seed.
    #[serde(with = "uint")]
    pub nullifier: U256,
    /// Signature time of the underlying Aadhaar document (unix seconds).
    #[serde(with = "uint")]
    pub timestamp: U256,
    #[serde(with = "uint")]
    pub pubkey_hash: U256,
    #[serde(with = "uint")]
    pub signal_hash: U256,
    pub attributes: RevealedAttributes,
    pub proof: Groth16Proof,
}

impl IdentityAttestation {
    /// Parse a serialized PCD.
    ///
    /// Accepts either the bare `{ id, claim, proof }` document or the
    /// `{ type, pcd }` envelope wrapping it as a string.
    pub fn deserialize(serialized: &str) -> AttestationResult<Self> {
        let value: serde_json::Value = serde_json::from_str(serialized)?;

        if let (Some(kind), Some(inner)) = (
            value.get("type").and_then(|v| v.as_str()),
            value.get("pcd").and_then(|v| v.as_str()),
        ) {
            if kind != PCD_TYPE {
                return Err(AttestationError::UnsupportedType(kind.to_string()));
            }
            return Self::deserialize(inner);
        }

        let body: PcdBody = serde_json::from_value(value)?;
        Ok(body.into())
    }

    /// Proof packed for the contract call.
    pub fn packed_proof(&self) -> AttestationResult<PackedProof> {
        self.proof.pack()
    }

    /// Short hex form of the nullifier for log lines.
    pub fn nullifier_short(&self) -> String {
        short_hex(self.nullifier)
    }
}

/// First eight bytes of a 256-bit value, hex encoded.
pub fn short_hex(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    hex::encode(&bytes[..8])
}

/// Decode an attribute packed as little-endian ASCII bytes.
pub fn decode_revealed_text(value: U256) -> Option<String> {
    if value.is_zero() {
        return None;
    }
    let mut bytes = [0u8; 32];
    value.to_little_endian(&mut bytes);
    let len = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    Some(bytes[..len].iter().map(|b| *b as char).collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PcdBody {
    #[serde(default)]
    id: String,
    proof: PcdProof,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PcdProof {
    groth16_proof: Groth16Proof,
    #[serde(with = "uint")]
    pubkey_hash: U256,
    #[serde(with = "uint")]
    timestamp: U256,
    #[serde(with = "uint")]
    nullifier_seed: U256,
    #[serde(with = "uint")]
    nullifier: U256,
    #[serde(with = "uint")]
    signal_hash: U256,
    #[serde(with = "uint")]
    age_above18: U256,
    #[serde(with = "uint")]
    gender: U256,
    #[serde(with = "uint")]
    pincode: U256,
    #[serde(with = "uint")]
    state: U256,
}

impl From<PcdBody> for IdentityAttestation {
    fn from(body: PcdBody) -> Self {
        let p = body.proof;
        Self {
            id: body.id,
            nullifier_seed: p.nullifier_seed,
            nullifier: p.nullifier,
            timestamp: p.timestamp,
            pubkey_hash: p.pubkey_hash,
            signal_hash: p.signal_hash,
            attributes: RevealedAttributes {
                age_above_18: p.age_above18,
                gender: p.gender,
                pincode: p.pincode,
                state: p.state,
            },
            proof: p.groth16_proof,
        }
    }
}

/// Decimal-string serde for `U256`, accepting JSON integers on input.
pub(crate) mod uint {
    use ethers_core::types::U256;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        deserializer.deserialize_any(UintVisitor)
    }

    struct UintVisitor;

    impl<'de> Visitor<'de> for UintVisitor {
        type Value = U256;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a decimal integer or integer string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<U256, E> {
            U256::from_dec_str(v.trim()).map_err(|_| E::custom(format!("invalid integer {v:?}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<U256, E> {
            Ok(U256::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<U256, E> {
            u64::try_from(v)
                .map(U256::from)
                .map_err(|_| E::custom("negative integer"))
        }

        fn visit_f64<E: de::Error>(self, _v: f64) -> Result<U256, E> {
            Err(E::custom("integer exceeds JSON number precision; encode it as a string"))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_bare_document() {
        let attestation = IdentityAttestation::deserialize(&fixtures::pcd_json("42")).unwrap();

        assert_eq!(attestation.id, "8c1d2e4f");
        assert_eq!(attestation.nullifier, U256::from(42u64));
        assert_eq!(attestation.nullifier_seed, U256::from(12345678983762535u64));
        assert_eq!(attestation.timestamp, U256::from(1712345678u64));
        assert!(attestation.attributes.is_age_above_18());
        assert_eq!(attestation.attributes.pincode(), Some(U256::from(110051u64)));
    }

    #[test]
    fn test_deserialize_envelope() {
        let envelope = serde_json::json!({
            "type": PCD_TYPE,
            "pcd": fixtures::pcd_json("7"),
        })
        .to_string();

        let attestation = IdentityAttestation::deserialize(&envelope).unwrap();
        assert_eq!(attestation.nullifier, U256::from(7u64));
    }

    #[test]
    fn test_unknown_envelope_type() {
        let envelope = serde_json::json!({ "type": "semaphore", "pcd": "{}" }).to_string();

        assert!(matches!(
            IdentityAttestation::deserialize(&envelope),
            Err(AttestationError::UnsupportedType(t)) if t == "semaphore"
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            IdentityAttestation::deserialize("{\"proof\": {}}"),
            Err(AttestationError::Malformed(_))
        ));
        assert!(IdentityAttestation::deserialize("not json").is_err());
    }

    #[test]
    fn test_numeric_json_fields_accepted() {
        let mut doc: serde_json::Value = serde_json::from_str(&fixtures::pcd_json("1")).unwrap();
        doc["proof"]["nullifier"] = serde_json::json!(42);

        let attestation = IdentityAttestation::deserialize(&doc.to_string()).unwrap();
        assert_eq!(attestation.nullifier, U256::from(42u64));
    }

    #[test]
    fn test_reveal_array_order() {
        let attestation = IdentityAttestation::deserialize(&fixtures::pcd_json("42")).unwrap();

        assert_eq!(
            attestation.attributes.reveal_array(),
            [
                U256::from(1u64),
                U256::from(77u64),
                U256::from(110051u64),
                U256::from(1751607628u64)
            ]
        );
    }

    #[test]
    fn test_decode_revealed_text() {
        assert_eq!(decode_revealed_text(U256::from(77u64)), Some("M".to_string()));
        // "Loki" packed little-endian
        let packed = U256::from(u32::from_le_bytes(*b"Loki"));
        assert_eq!(decode_revealed_text(packed), Some("Loki".to_string()));
        assert_eq!(decode_revealed_text(U256::zero()), None);
    }

    #[test]
    fn test_nullifier_short() {
        let attestation = IdentityAttestation::deserialize(&fixtures::pcd_json("42")).unwrap();
        assert_eq!(attestation.nullifier_short(), "0000000000000000");
    }
}
