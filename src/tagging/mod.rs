//! Distributed deterministic tagging.
//!
//! Each server applies two keyed transformations to the grouping
//! ciphertexts: it first folds a fresh per-session secret into the C
//! component, then strips its own share of the collective key while scaling
//! both components by the secret. Once every server in the ring has taken
//! its turn, the C component depends only on the plaintext and the set of
//! session secrets, so equal plaintexts collapse onto equal tags without any
//! server learning the plaintext.

pub mod proofs;

pub use proofs::*;

use ark_ec::CurveGroup;

use crate::crypto::elgamal::{CipherText, CipherVector};
use crate::crypto::parallel::map_chunked;
use crate::crypto::records::{DeterministicCipherText, DeterministicCipherVector};

const LOG_TARGET: &str = "veilstats::tagging";

/// Fold a session secret into one ciphertext: `C' = C + s * base`.
pub fn add_session_secret<C: CurveGroup>(
    ct: &CipherText<C>,
    secret: C::ScalarField,
    base: C,
) -> CipherText<C> {
    CipherText::new(ct.k, ct.c + base * secret)
}

/// One server's tagging pass over a single ciphertext:
/// `K' = s * K`, `C' = s * (C - k * K)`.
pub fn tag_cipher_text<C: CurveGroup>(
    ct: &CipherText<C>,
    private_key: C::ScalarField,
    secret: C::ScalarField,
) -> CipherText<C> {
    let contribution = ct.k * private_key;
    CipherText::new(ct.k * secret, (ct.c - contribution) * secret)
}

/// Tagging pass over a full vector, chunked across the worker pool.
pub fn tag_cipher_vector<C: CurveGroup>(
    cv: &CipherVector<C>,
    private_key: C::ScalarField,
    secret: C::ScalarField,
) -> CipherVector<C> {
    tracing::trace!(target: LOG_TARGET, columns = cv.len(), "tagging cipher vector");
    CipherVector(map_chunked(cv, |ct| {
        tag_cipher_text(ct, private_key, secret)
    }))
}

/// Session-secret pass over a full vector.
pub fn add_session_secret_vector<C: CurveGroup>(
    cv: &CipherVector<C>,
    secret: C::ScalarField,
    base: C,
) -> CipherVector<C> {
    CipherVector(map_chunked(cv, |ct| add_session_secret(ct, secret, base)))
}

/// Project a fully tagged vector onto its deterministic tag points. Only
/// valid after every server in the ring has run its tagging pass.
pub fn into_deterministic<C: CurveGroup>(cv: &CipherVector<C>) -> DeterministicCipherVector<C> {
    DeterministicCipherVector(
        cv.iter()
            .map(|ct| DeterministicCipherText { point: ct.c })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::{aggregate_public_keys, KeyPair};
    use ark_bn254::{Fr, G1Projective};
    use ark_ec::PrimeGroup;
    use ark_ff::UniformRand;
    use ark_std::test_rng;

    type Curve = G1Projective;

    /// Run the full two-phase pipeline over a set of server keys, the way
    /// the ring protocol does: all session-secret additions first, then the
    /// tagging chain.
    fn full_tag(
        cv: &CipherVector<Curve>,
        servers: &[(KeyPair<Curve>, Fr)],
    ) -> DeterministicCipherVector<Curve> {
        let base = Curve::generator();
        let mut acc = cv.clone();
        for (_, secret) in servers {
            acc = add_session_secret_vector(&acc, *secret, base);
        }
        for (keys, secret) in servers {
            acc = tag_cipher_vector(&acc, keys.private, *secret);
        }
        into_deterministic(&acc)
    }

    fn servers(n: usize, rng: &mut impl ark_std::rand::Rng) -> Vec<(KeyPair<Curve>, Fr)> {
        (0..n)
            .map(|_| (KeyPair::generate(rng), Fr::rand(rng)))
            .collect()
    }

    #[test]
    fn equal_plaintexts_collapse_onto_equal_tags() {
        let mut rng = test_rng();
        let group = servers(3, &mut rng);
        let collective =
            aggregate_public_keys(&group.iter().map(|(k, _)| k.public).collect::<Vec<_>>());

        // Two independent encryptions of the same attributes, one different.
        let a = CipherVector::encrypt_ints(collective, &[1, 2], &mut rng);
        let b = CipherVector::encrypt_ints(collective, &[1, 2], &mut rng);
        let c = CipherVector::encrypt_ints(collective, &[1, 3], &mut rng);
        assert_ne!(a, b);

        let tag_a = full_tag(&a, &group).key().unwrap();
        let tag_b = full_tag(&b, &group).key().unwrap();
        let tag_c = full_tag(&c, &group).key().unwrap();
        assert_eq!(tag_a, tag_b);
        assert_ne!(tag_a, tag_c);
    }

    #[test]
    fn tags_change_with_session_secrets() {
        let mut rng = test_rng();
        let group = servers(2, &mut rng);
        let collective =
            aggregate_public_keys(&group.iter().map(|(k, _)| k.public).collect::<Vec<_>>());
        let cv = CipherVector::encrypt_ints(collective, &[5], &mut rng);

        let other_session: Vec<_> = group
            .iter()
            .map(|(k, _)| (k.clone(), Fr::rand(&mut rng)))
            .collect();
        assert_ne!(
            full_tag(&cv, &group).key().unwrap(),
            full_tag(&cv, &other_session).key().unwrap()
        );
    }

    #[test]
    fn single_server_tagging_matches_manual_algebra() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let secret = Fr::rand(&mut rng);
        let cv = CipherVector::encrypt_ints(keys.public, &[7], &mut rng);

        let tagged = tag_cipher_vector(&cv, keys.private, secret);
        let expected_c = (cv[0].c - cv[0].k * keys.private) * secret;
        assert_eq!(tagged[0].c, expected_c);
        assert_eq!(tagged[0].k, cv[0].k * secret);
    }
}
