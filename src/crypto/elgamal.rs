//! ElGamal-style homomorphic ciphertexts over a prime-order group.
//!
//! A [`CipherText`] is the pair (K, C): K carries the ephemeral component
//! `r*G`, C the masked message `M + r*PK`. Addition of two ciphertexts is
//! pointwise group addition, which adds the encoded plaintexts; scalar
//! multiplication scales both components. Integer plaintexts are encoded as
//! `v*G` and recovered by a bounded brute-force discrete-log search, since
//! aggregates are small counts.

use ark_ec::CurveGroup;
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Deref, DerefMut, Sub};

use crate::config::MAX_HOMOMORPHIC_INT;
use crate::crypto::parallel::{map_chunked, zip_map_chunked};
use crate::error::ProtocolError;

const LOG_TARGET: &str = "veilstats::crypto::elgamal";

/// Convert a signed integer into the group's exponent field.
pub fn int_to_scalar<F: PrimeField>(v: i64) -> F {
    if v >= 0 {
        F::from(v as u64)
    } else {
        -F::from(v.unsigned_abs())
    }
}

/// A long-term or ephemeral key pair.
#[derive(Clone, Debug)]
pub struct KeyPair<C: CurveGroup> {
    pub private: C::ScalarField,
    pub public: C,
}

impl<C: CurveGroup> KeyPair<C> {
    pub fn from_private(private: C::ScalarField) -> Self {
        let public = C::generator() * private;
        Self { private, public }
    }

    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        Self::from_private(C::ScalarField::rand(rng))
    }
}

/// Roster-wide collective public key: the sum of all node key shares.
pub fn aggregate_public_keys<C: CurveGroup>(publics: &[C]) -> C {
    publics.iter().fold(C::zero(), |acc, p| acc + p)
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, CanonicalSerialize, CanonicalDeserialize,
)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct CipherText<C: CurveGroup> {
    #[serde(with = "crate::crypto_serde::canonical")]
    pub k: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub c: C,
}

impl<C: CurveGroup> CipherText<C> {
    pub fn new(k: C, c: C) -> Self {
        Self { k, c }
    }

    /// The identity ciphertext: an encryption of zero with zero randomness.
    pub fn zero() -> Self {
        Self::new(C::zero(), C::zero())
    }

    /// Encrypt a message point under `public_key` with fresh randomness.
    pub fn encrypt_point<R: Rng>(public_key: C, message: C, rng: &mut R) -> Self {
        let r = C::ScalarField::rand(rng);
        Self::encrypt_point_with_randomness(public_key, message, r)
    }

    /// Encrypt a message point with caller-supplied randomness, for callers
    /// that draw blinding factors up front or need to retain them.
    pub fn encrypt_point_with_randomness(
        public_key: C,
        message: C,
        randomness: C::ScalarField,
    ) -> Self {
        Self {
            k: C::generator() * randomness,
            c: message + public_key * randomness,
        }
    }

    /// Encrypt a small integer, encoded as `v*G`.
    pub fn encrypt_int<R: Rng>(public_key: C, value: i64, rng: &mut R) -> Self {
        let message = C::generator() * int_to_scalar::<C::ScalarField>(value);
        Self::encrypt_point(public_key, message, rng)
    }

    /// Remove the mask with the private key and return the message point.
    pub fn decrypt_point(&self, private_key: C::ScalarField) -> C {
        self.c - self.k * private_key
    }

    /// Recover a small integer plaintext by brute-force discrete log over
    /// `[-MAX_HOMOMORPHIC_INT, MAX_HOMOMORPHIC_INT]`.
    pub fn decrypt_int(&self, private_key: C::ScalarField) -> Result<i64, ProtocolError> {
        let message = self.decrypt_point(private_key);
        let base = C::generator();
        let mut acc = C::zero();
        for v in 0..=MAX_HOMOMORPHIC_INT {
            if acc == message {
                return Ok(v as i64);
            }
            if v != 0 && -acc == message {
                return Ok(-(v as i64));
            }
            acc += base;
        }
        Err(ProtocolError::PlaintextOutOfRange)
    }

    pub fn scalar_mul(&self, s: C::ScalarField) -> Self {
        Self {
            k: self.k * s,
            c: self.c * s,
        }
    }

    /// Fixed-size compressed wire form: K then C.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::with_capacity(cipher_text_byte_size::<C>());
        self.k.serialize_compressed(&mut bytes)?;
        self.c.serialize_compressed(&mut bytes)?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let expected = cipher_text_byte_size::<C>();
        if bytes.len() != expected {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let half = expected / 2;
        let k = C::deserialize_compressed(&mut &bytes[..half])?;
        let c = C::deserialize_compressed(&mut &bytes[half..])?;
        Ok(Self { k, c })
    }
}

impl<C: CurveGroup> Add for CipherText<C> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            k: self.k + other.k,
            c: self.c + other.c,
        }
    }
}

impl<C: CurveGroup> Sub for CipherText<C> {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self {
            k: self.k - other.k,
            c: self.c - other.c,
        }
    }
}

impl<C: CurveGroup> AddAssign for CipherText<C> {
    fn add_assign(&mut self, other: Self) {
        self.k += other.k;
        self.c += other.c;
    }
}

/// Byte length of one compressed point, fixed per curve.
pub fn point_byte_size<C: CurveGroup>() -> usize {
    C::zero().compressed_size()
}

/// Byte length of one serialized ciphertext.
pub fn cipher_text_byte_size<C: CurveGroup>() -> usize {
    2 * point_byte_size::<C>()
}

/// An ordered, fixed-length sequence of ciphertexts, one slot per attribute
/// column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, CanonicalSerialize, CanonicalDeserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct CipherVector<C: CurveGroup>(pub Vec<CipherText<C>>);

impl<C: CurveGroup> Deref for CipherVector<C> {
    type Target = Vec<CipherText<C>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<C: CurveGroup> DerefMut for CipherVector<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<C: CurveGroup> CipherVector<C> {
    /// A vector of `len` identity ciphertexts.
    pub fn zero(len: usize) -> Self {
        Self(vec![CipherText::zero(); len])
    }

    /// Encrypt a slice of integers column-wise. Randomness is drawn up front
    /// so the point arithmetic can run on the worker pool.
    pub fn encrypt_ints<R: Rng>(public_key: C, values: &[i64], rng: &mut R) -> Self {
        let prepared: Vec<(C::ScalarField, C::ScalarField)> = values
            .iter()
            .map(|v| (int_to_scalar(*v), C::ScalarField::rand(rng)))
            .collect();
        Self(map_chunked(&prepared, |(m, r)| {
            CipherText::encrypt_point_with_randomness(public_key, C::generator() * *m, *r)
        }))
    }

    pub fn decrypt_ints(&self, private_key: C::ScalarField) -> Result<Vec<i64>, ProtocolError> {
        map_chunked(&self.0, |ct| ct.decrypt_int(private_key))
            .into_iter()
            .collect()
    }

    /// Pointwise homomorphic addition. Lengths must already agree; the only
    /// sanctioned padding happens during the aggregation merge.
    pub fn add(&self, other: &Self) -> Result<Self, ProtocolError> {
        Ok(Self(zip_map_chunked(&self.0, &other.0, |a, b| *a + *b)?))
    }

    pub fn scalar_mul(&self, s: C::ScalarField) -> Self {
        Self(map_chunked(&self.0, |ct| ct.scalar_mul(s)))
    }

    /// Append encryptions of zero under `public_key` until the vector has
    /// `target_len` columns. No-op when already long enough.
    pub fn pad_with_zeros<R: Rng>(&mut self, target_len: usize, public_key: C, rng: &mut R) {
        while self.0.len() < target_len {
            self.0.push(CipherText::encrypt_int(public_key, 0, rng));
        }
    }

    /// Row-major fixed-stride wire form; the element count is recoverable
    /// from the byte length alone.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = Vec::with_capacity(self.0.len() * cipher_text_byte_size::<C>());
        for ct in &self.0 {
            bytes.extend_from_slice(&ct.to_bytes()?);
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let stride = cipher_text_byte_size::<C>();
        if bytes.len() % stride != 0 {
            return Err(ProtocolError::MalformedData(format!(
                "cipher vector byte length {} is not a multiple of the {}-byte stride",
                bytes.len(),
                stride
            )));
        }
        let cts = bytes
            .chunks(stride)
            .map(CipherText::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(cts))
    }
}

/// Serialize a list of cipher vectors into one buffer plus the per-vector
/// element counts needed to cut it back apart.
pub fn cipher_vectors_to_bytes<C: CurveGroup>(
    vectors: &[CipherVector<C>],
) -> Result<(Vec<u8>, Vec<u32>), ProtocolError> {
    let chunks = map_chunked(vectors, |cv| cv.to_bytes());
    let mut bytes = Vec::new();
    let mut lengths = Vec::with_capacity(vectors.len());
    for (chunk, cv) in chunks.into_iter().zip(vectors.iter()) {
        bytes.extend_from_slice(&chunk?);
        lengths.push(cv.len() as u32);
    }
    Ok((bytes, lengths))
}

/// Rebuild a list of cipher vectors from a buffer and its element counts.
pub fn cipher_vectors_from_bytes<C: CurveGroup>(
    bytes: &[u8],
    lengths: &[u32],
) -> Result<Vec<CipherVector<C>>, ProtocolError> {
    let stride = cipher_text_byte_size::<C>();
    let expected: usize = lengths.iter().map(|l| *l as usize * stride).sum();
    if bytes.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    tracing::trace!(
        target: LOG_TARGET,
        vectors = lengths.len(),
        bytes = bytes.len(),
        "deserializing cipher vector list"
    );
    let mut out = Vec::with_capacity(lengths.len());
    let mut offset = 0;
    for len in lengths {
        let end = offset + *len as usize * stride;
        out.push(CipherVector::from_bytes(&bytes[offset..end])?);
        offset = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::G1Projective;
    use ark_std::test_rng;

    type Curve = G1Projective;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        for v in [0i64, 1, 42, 999, -17] {
            let ct = CipherText::encrypt_int(keys.public, v, &mut rng);
            assert_eq!(ct.decrypt_int(keys.private).unwrap(), v);
        }
    }

    #[test]
    fn addition_is_homomorphic() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        let a = CipherText::encrypt_int(keys.public, 37, &mut rng);
        let b = CipherText::encrypt_int(keys.public, 5, &mut rng);
        assert_eq!((a + b).decrypt_int(keys.private).unwrap(), 42);
    }

    #[test]
    fn scalar_multiplication_scales_plaintext() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        let ct = CipherText::encrypt_int(keys.public, 7, &mut rng);
        let scaled = ct.scalar_mul(scalar(3));
        assert_eq!(scaled.decrypt_int(keys.private).unwrap(), 21);
    }

    fn scalar(v: u64) -> <Curve as ark_ec::PrimeGroup>::ScalarField {
        <Curve as ark_ec::PrimeGroup>::ScalarField::from(v)
    }

    #[test]
    fn vector_add_rejects_length_mismatch() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        let a = CipherVector::encrypt_ints(keys.public, &[1, 2, 3], &mut rng);
        let b = CipherVector::encrypt_ints(keys.public, &[1, 2], &mut rng);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn vector_add_sums_columns() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        let a = CipherVector::encrypt_ints(keys.public, &[0, 1, 2, 3, 4], &mut rng);
        let b = CipherVector::encrypt_ints(keys.public, &[0, 1, 2, 3, 4], &mut rng);
        let sum = a.add(&b).unwrap();
        assert_eq!(
            sum.decrypt_ints(keys.private).unwrap(),
            vec![0, 2, 4, 6, 8]
        );
    }

    #[test]
    fn vector_bytes_round_trip() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        let cv = CipherVector::encrypt_ints(keys.public, &[5, 10, 15], &mut rng);
        let bytes = cv.to_bytes().unwrap();
        assert_eq!(bytes.len(), 3 * cipher_text_byte_size::<Curve>());
        let back = CipherVector::<Curve>::from_bytes(&bytes).unwrap();
        assert_eq!(back, cv);
    }

    #[test]
    fn vector_list_bytes_round_trip() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);

        let list = vec![
            CipherVector::encrypt_ints(keys.public, &[1, 2], &mut rng),
            CipherVector::encrypt_ints(keys.public, &[3, 4, 5], &mut rng),
        ];
        let (bytes, lengths) = cipher_vectors_to_bytes(&list).unwrap();
        let back = cipher_vectors_from_bytes::<Curve>(&bytes, &lengths).unwrap();
        assert_eq!(back, list);
    }

    #[test]
    fn collective_key_decrypts_nothing_alone() {
        let mut rng = test_rng();
        let k1 = KeyPair::<Curve>::generate(&mut rng);
        let k2 = KeyPair::<Curve>::generate(&mut rng);
        let collective = aggregate_public_keys(&[k1.public, k2.public]);

        let ct = CipherText::encrypt_int(collective, 9, &mut rng);
        // The sum of private shares decrypts; a single share does not.
        assert_eq!(ct.decrypt_int(k1.private + k2.private).unwrap(), 9);
        assert!(ct.decrypt_int(k1.private).is_err());
    }
}
