//! Groth16 proofs in the snarkjs JSON layout used by the Anon Aadhaar prover.
//!
//! Coordinates travel as decimal strings. A proof can be packed into the
//! `uint256[8]` layout expected by the on-chain verifier, or lifted into an
//! arkworks [`ark_groth16::Proof`] for local verification.

use ark_bn254::{Bn254, Fq, Fq2, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::{BigInt, One, PrimeField, Zero};
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};

use super::{AttestationError, AttestationResult};

/// Proof packed for the Solidity Groth16 verifier.
pub type PackedProof = [U256; 8];

/// Groth16 proof over BN254 as emitted by snarkjs.
///
/// `pi_a` and `pi_c` are projective G1 points `[x, y, z]`; `pi_b` is a
/// projective G2 point whose coordinates are `[c0, c1]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub pi_a: [String; 3],
    pub pi_b: [[String; 2]; 3],
    pub pi_c: [String; 3],
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_curve")]
    pub curve: String,
}

fn default_protocol() -> String {
    "groth16".to_string()
}

fn default_curve() -> String {
    "bn128".to_string()
}

impl Groth16Proof {
    /// Pack the proof for the on-chain verifier.
    ///
    /// The G2 coordinate pairs are swapped (`[c1, c0]`) because the EVM
    /// pairing precompile takes the imaginary component first.
    pub fn pack(&self) -> AttestationResult<PackedProof> {
        let coords = [
            &self.pi_a[0],
            &self.pi_a[1],
            &self.pi_b[0][1],
            &self.pi_b[0][0],
            &self.pi_b[1][1],
            &self.pi_b[1][0],
            &self.pi_c[0],
            &self.pi_c[1],
        ];

        let mut packed = [U256::zero(); 8];
        for (slot, coord) in packed.iter_mut().zip(coords) {
            *slot = parse_uint("groth16Proof", coord)?;
        }
        Ok(packed)
    }

    /// Convert to an arkworks proof, checking every point is on the curve
    /// and in the prime-order subgroup.
    pub fn to_ark(&self) -> AttestationResult<ark_groth16::Proof<Bn254>> {
        Ok(ark_groth16::Proof {
            a: g1_from_strings("pi_a", &self.pi_a)?,
            b: g2_from_strings("pi_b", &self.pi_b)?,
            c: g1_from_strings("pi_c", &self.pi_c)?,
        })
    }

    /// Render an arkworks proof in the snarkjs layout.
    pub fn from_ark(proof: &ark_groth16::Proof<Bn254>) -> Self {
        Self {
            pi_a: g1_to_strings(&proof.a),
            pi_b: g2_to_strings(&proof.b),
            pi_c: g1_to_strings(&proof.c),
            protocol: default_protocol(),
            curve: default_curve(),
        }
    }
}

/// Parse a decimal integer string into a `U256`.
pub fn parse_uint(field: &'static str, value: &str) -> AttestationResult<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AttestationError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    U256::from_dec_str(trimmed).map_err(|_| AttestationError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Interpret a `U256` as a canonical field element.
///
/// Returns `None` when the value is not below the field modulus.
pub fn field_from_uint<F>(value: U256) -> Option<F>
where
    F: PrimeField<BigInt = BigInt<4>>,
{
    // Both representations use little-endian u64 limbs.
    F::from_bigint(BigInt::new(value.0))
}

/// Canonical integer form of a field element.
pub fn uint_from_field<F>(value: F) -> U256
where
    F: PrimeField<BigInt = BigInt<4>>,
{
    U256(value.into_bigint().0)
}

fn parse_fq(field: &'static str, value: &str) -> AttestationResult<Fq> {
    let uint = parse_uint(field, value)?;
    field_from_uint(uint).ok_or(AttestationError::NotInField(field))
}

pub(crate) fn g1_from_strings(field: &'static str, coords: &[String; 3]) -> AttestationResult<G1Affine> {
    let z = parse_fq(field, &coords[2])?;
    if z.is_zero() {
        return Ok(G1Affine::identity());
    }
    if !z.is_one() {
        return Err(AttestationError::InvalidPoint(field));
    }

    let point = G1Affine::new_unchecked(parse_fq(field, &coords[0])?, parse_fq(field, &coords[1])?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(AttestationError::InvalidPoint(field));
    }
    Ok(point)
}

pub(crate) fn g2_from_strings(field: &'static str, coords: &[[String; 2]; 3]) -> AttestationResult<G2Affine> {
    let fq2 = |pair: &[String; 2]| -> AttestationResult<Fq2> {
        Ok(Fq2::new(parse_fq(field, &pair[0])?, parse_fq(field, &pair[1])?))
    };

    let z = fq2(&coords[2])?;
    if z.is_zero() {
        return Ok(G2Affine::identity());
    }
    if !z.is_one() {
        return Err(AttestationError::InvalidPoint(field));
    }

    let point = G2Affine::new_unchecked(fq2(&coords[0])?, fq2(&coords[1])?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(AttestationError::InvalidPoint(field));
    }
    Ok(point)
}

pub(crate) fn g1_to_strings(point: &G1Affine) -> [String; 3] {
    match point.xy() {
        Some((x, y)) => [
            uint_from_field(*x).to_string(),
            uint_from_field(*y).to_string(),
            "1".to_string(),
        ],
        None => ["0".to_string(), "1".to_string(), "0".to_string()],
    }
}

pub(crate) fn g2_to_strings(point: &G2Affine) -> [[String; 2]; 3] {
    let pair = |value: &Fq2| [uint_from_field(value.c0).to_string(), uint_from_field(value.c1).to_string()];
    match point.xy() {
        Some((x, y)) => [pair(x), pair(y), ["1".to_string(), "0".to_string()]],
        None => [
            ["0".to_string(), "0".to_string()],
            ["1".to_string(), "0".to_string()],
            ["0".to_string(), "0".to_string()],
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::{Fr, G1Projective, G2Projective};
    use ark_ec::{CurveGroup, Group};

    fn sample_proof() -> ark_groth16::Proof<Bn254> {
        let a = (G1Projective::generator() * Fr::from(7u64)).into_affine();
        let b = (G2Projective::generator() * Fr::from(11u64)).into_affine();
        let c = (G1Projective::generator() * Fr::from(13u64)).into_affine();
        ark_groth16::Proof { a, b, c }
    }

    #[test]
    fn test_pack_swaps_g2_components() {
        let proof = Groth16Proof {
            pi_a: ["1".into(), "2".into(), "1".into()],
            pi_b: [
                ["3".into(), "4".into()],
                ["5".into(), "6".into()],
                ["1".into(), "0".into()],
            ],
            pi_c: ["7".into(), "8".into(), "1".into()],
            protocol: default_protocol(),
            curve: default_curve(),
        };

        let packed = proof.pack().unwrap();
        let expected: Vec<U256> = [1u64, 2, 4, 3, 6, 5, 7, 8].iter().map(|v| U256::from(*v)).collect();
        assert_eq!(packed.to_vec(), expected);
    }

    #[test]
    fn test_pack_rejects_non_numeric_coordinate() {
        let mut proof = Groth16Proof::from_ark(&sample_proof());
        proof.pi_c[1] = "0xdeadbeef".into();

        assert!(matches!(
            proof.pack(),
            Err(AttestationError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_ark_conversion_preserves_points() {
        let original = sample_proof();
        let restored = Groth16Proof::from_ark(&original).to_ark().unwrap();

        assert_eq!(original.a, restored.a);
        assert_eq!(original.b, restored.b);
        assert_eq!(original.c, restored.c);
    }

    #[test]
    fn test_off_curve_point_rejected() {
        let mut proof = Groth16Proof::from_ark(&sample_proof());
        proof.pi_a[1] = "5".into();

        assert!(matches!(proof.to_ark(), Err(AttestationError::InvalidPoint("pi_a"))));
    }

    #[test]
    fn test_value_above_modulus_rejected() {
        let mut proof = Groth16Proof::from_ark(&sample_proof());
        proof.pi_a[0] = U256::MAX.to_string();

        assert!(matches!(proof.to_ark(), Err(AttestationError::NotInField("pi_a"))));
    }
}
