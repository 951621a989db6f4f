//! Fiat-Shamir transcript for the non-interactive proofs.
//!
//! Challenges are squeezed from a SHA3-512 state that ratchets after every
//! squeeze, so a transcript is a deterministic function of the domain tag and
//! the exact sequence of labeled absorbs.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::PrimeField;
use ark_serialize::CanonicalDeserialize;
use sha3::{Digest, Sha3_512};

use crate::crypto::elgamal::{point_byte_size, CipherVector};

/// Running Fiat-Shamir state.
#[derive(Clone)]
pub struct ProofTranscript {
    hasher: Sha3_512,
}

impl ProofTranscript {
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha3_512::new();
        hasher.update(domain);
        Self { hasher }
    }

    pub fn append_bytes(&mut self, label: &[u8], bytes: &[u8]) {
        self.hasher.update(label);
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn append_point<C: CurveGroup>(&mut self, label: &[u8], point: &C) {
        let mut bytes = Vec::with_capacity(point_byte_size::<C>());
        point
            .serialize_compressed(&mut bytes)
            .expect("point serialization into a Vec cannot fail");
        self.append_bytes(label, &bytes);
    }

    pub fn append_points<C: CurveGroup>(&mut self, label: &[u8], points: &[C]) {
        self.hasher.update(label);
        for point in points {
            self.append_point(b"pt", point);
        }
    }

    pub fn append_scalar<F: PrimeField>(&mut self, label: &[u8], scalar: &F) {
        let mut bytes = Vec::new();
        scalar
            .serialize_compressed(&mut bytes)
            .expect("scalar serialization into a Vec cannot fail");
        self.append_bytes(label, &bytes);
    }

    pub fn append_cipher_vectors<C: CurveGroup>(&mut self, label: &[u8], list: &[CipherVector<C>]) {
        self.hasher.update(label);
        for cv in list {
            for ct in cv.iter() {
                self.append_point(b"ct.k", &ct.k);
                self.append_point(b"ct.c", &ct.c);
            }
        }
    }

    /// Squeeze one challenge scalar and ratchet the state.
    pub fn challenge_scalar<F: PrimeField>(&mut self, label: &[u8]) -> F {
        self.hasher.update(label);
        let digest = self.hasher.clone().finalize();
        self.hasher.update(digest);
        F::from_le_bytes_mod_order(&digest)
    }

    pub fn challenge_scalars<F: PrimeField>(&mut self, label: &[u8], n: usize) -> Vec<F> {
        self.hasher.update(label);
        (0..n).map(|_| self.challenge_scalar(b"elem")).collect()
    }
}

/// Public per-column challenge vector derived from a seed point alone, so
/// prover and verifier recompute it independently.
pub fn challenge_vector_from_seed<C: CurveGroup>(seed: &C, len: usize) -> Vec<C::ScalarField> {
    let mut transcript = ProofTranscript::new(b"veilstats/compression-challenges-v1");
    transcript.append_point(b"seed", seed);
    transcript.challenge_scalars(b"column", len)
}

/// Derive a group element with unknown discrete log relative to any other
/// generator: rejection-sample compressed encodings from a hash stream.
pub fn hash_to_point<C: CurveGroup>(domain: &[u8]) -> C {
    let size = point_byte_size::<C>();
    let mut counter: u32 = 0;
    loop {
        let mut hasher = Sha3_512::new();
        hasher.update(b"veilstats/hash-to-point-v1");
        hasher.update(domain);
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        if let Ok(point) = C::Affine::deserialize_compressed(&digest[..size]) {
            if !point.is_zero() {
                return point.into_group();
            }
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::{Fr, G1Projective};
    use ark_ec::PrimeGroup;

    #[test]
    fn transcript_is_deterministic() {
        let mut t1 = ProofTranscript::new(b"test-domain");
        let mut t2 = ProofTranscript::new(b"test-domain");

        let point = G1Projective::generator();
        t1.append_point(b"p", &point);
        t2.append_point(b"p", &point);

        let c1: Fr = t1.challenge_scalar(b"challenge");
        let c2: Fr = t2.challenge_scalar(b"challenge");
        assert_eq!(c1, c2);
    }

    #[test]
    fn transcript_diverges_on_different_input() {
        let mut t1 = ProofTranscript::new(b"test-domain");
        let mut t2 = ProofTranscript::new(b"test-domain");

        t1.append_bytes(b"data", b"aaa");
        t2.append_bytes(b"data", b"bbb");

        let c1: Fr = t1.challenge_scalar(b"challenge");
        let c2: Fr = t2.challenge_scalar(b"challenge");
        assert_ne!(c1, c2);
    }

    #[test]
    fn successive_challenges_differ() {
        let mut t = ProofTranscript::new(b"test-domain");
        let c1: Fr = t.challenge_scalar(b"challenge");
        let c2: Fr = t.challenge_scalar(b"challenge");
        assert_ne!(c1, c2);
    }

    #[test]
    fn seed_challenges_depend_on_seed() {
        let g = G1Projective::generator();
        let e1 = challenge_vector_from_seed(&g, 4);
        let e2 = challenge_vector_from_seed(&(g + g), 4);
        assert_eq!(e1.len(), 4);
        assert_ne!(e1, e2);
    }

    #[test]
    fn hash_to_point_is_stable_and_domain_separated() {
        let u: G1Projective = hash_to_point(b"u");
        let u2: G1Projective = hash_to_point(b"u");
        let v: G1Projective = hash_to_point(b"v");
        assert_eq!(u, u2);
        assert_ne!(u, v);
    }
}
