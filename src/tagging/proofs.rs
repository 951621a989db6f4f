//! Sigma proofs for the two tagging phases.
//!
//! A [`TagCreationProof`] certifies one server's tagging pass: the output
//! pair really is `(s*K, s*(C - k*K))` for the session secret `s` behind the
//! published `s*B` and the private key `k` behind the server's public key.
//! The cross-term `m = s*k` is an explicit witness bound to `s` and `k`
//! through an extra relation. A [`TagAdditionProof`] certifies the
//! session-secret addition `C' = C + s*B`.

use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::elgamal::CipherText;
use crate::crypto::parallel::map_chunked;
use crate::crypto::transcript::ProofTranscript;
use crate::error::ProtocolError;

const LOG_TARGET: &str = "veilstats::tagging::proofs";

const CREATION_DOMAIN: &[u8] = b"veilstats/tag-creation-v1";
const ADDITION_DOMAIN: &[u8] = b"veilstats/tag-addition-v1";

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct TagCreationProof<C: CurveGroup> {
    /// `s * B`, the public image of the session secret.
    #[serde(with = "crate::crypto_serde::canonical")]
    pub secret_commitment: C,
    #[serde(with = "crate::crypto_serde::canonical_vec")]
    pub announcements: Vec<C>,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_secret: C::ScalarField,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_key: C::ScalarField,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_cross: C::ScalarField,
}

fn creation_transcript<C: CurveGroup>(
    base: C,
    public_key: C,
    secret_commitment: C,
    before: &CipherText<C>,
    after: &CipherText<C>,
) -> ProofTranscript {
    let mut tr = ProofTranscript::new(CREATION_DOMAIN);
    tr.append_point(b"base", &base);
    tr.append_point(b"public-key", &public_key);
    tr.append_point(b"secret-commitment", &secret_commitment);
    tr.append_point(b"before.k", &before.k);
    tr.append_point(b"before.c", &before.c);
    tr.append_point(b"after.k", &after.k);
    tr.append_point(b"after.c", &after.c);
    tr
}

/// Prove one tagging step `before -> after` under `(private_key, secret)`.
pub fn prove_tag_creation<C: CurveGroup, R: Rng>(
    before: &CipherText<C>,
    after: &CipherText<C>,
    base: C,
    private_key: C::ScalarField,
    secret: C::ScalarField,
    rng: &mut R,
) -> TagCreationProof<C> {
    let public_key = base * private_key;
    let secret_commitment = base * secret;
    let cross = secret * private_key;

    let u_s = C::ScalarField::rand(rng);
    let u_k = C::ScalarField::rand(rng);
    let u_m = C::ScalarField::rand(rng);

    let announcements = vec![
        before.k * u_s,
        base * u_s,
        base * u_k,
        before.c * u_s - before.k * u_m,
        base * u_m - public_key * u_s,
    ];

    let mut tr = creation_transcript(base, public_key, secret_commitment, before, after);
    tr.append_points(b"announcements", &announcements);
    let ch: C::ScalarField = tr.challenge_scalar(b"challenge");

    TagCreationProof {
        secret_commitment,
        announcements,
        resp_secret: u_s + ch * secret,
        resp_key: u_k + ch * private_key,
        resp_cross: u_m + ch * cross,
    }
}

/// Verify one tagging step against the server's public key.
pub fn verify_tag_creation<C: CurveGroup>(
    proof: &TagCreationProof<C>,
    before: &CipherText<C>,
    after: &CipherText<C>,
    base: C,
    public_key: C,
) -> bool {
    if proof.announcements.len() != 5 {
        return false;
    }
    let a = &proof.announcements;

    let mut tr = creation_transcript(base, public_key, proof.secret_commitment, before, after);
    tr.append_points(b"announcements", a);
    let ch: C::ScalarField = tr.challenge_scalar(b"challenge");

    let zs = proof.resp_secret;
    let zk = proof.resp_key;
    let zm = proof.resp_cross;

    // K' = s*K, s behind the commitment, k behind the public key,
    // C' = s*C - m*K, and m = s*k.
    let mut ok = before.k * zs == a[0] + after.k * ch;
    ok &= base * zs == a[1] + proof.secret_commitment * ch;
    ok &= base * zk == a[2] + public_key * ch;
    ok &= before.c * zs - before.k * zm == a[3] + after.c * ch;
    ok &= base * zm - public_key * zs == a[4];
    ok
}

/// Per-column tagging proofs for one vector.
pub fn prove_tag_creation_vector<C: CurveGroup, R: Rng>(
    before: &[CipherText<C>],
    after: &[CipherText<C>],
    base: C,
    private_key: C::ScalarField,
    secret: C::ScalarField,
    rng: &mut R,
) -> Result<Vec<TagCreationProof<C>>, ProtocolError> {
    if before.len() != after.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: before.len(),
            actual: after.len(),
        });
    }
    Ok(before
        .iter()
        .zip(after.iter())
        .map(|(b, a)| prove_tag_creation(b, a, base, private_key, secret, rng))
        .collect())
}

/// Verify a fraction of a tagging proof list in parallel. Pairs each proof
/// with its before/after ciphertexts positionally.
pub fn verify_tag_creation_list<C: CurveGroup>(
    proofs: &[TagCreationProof<C>],
    before: &[CipherText<C>],
    after: &[CipherText<C>],
    base: C,
    public_key: C,
    fraction: f64,
) -> Result<bool, ProtocolError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ProtocolError::InvalidConfiguration(
            "verification fraction must lie in [0, 1]",
        ));
    }
    if proofs.len() != before.len() || proofs.len() != after.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: proofs.len(),
            actual: before.len().min(after.len()),
        });
    }
    let n = ((fraction * proofs.len() as f64).ceil() as usize).min(proofs.len());
    tracing::debug!(target: LOG_TARGET, total = proofs.len(), checked = n, "verifying tag creation proofs");
    let indices: Vec<usize> = (0..n).collect();
    let checks = map_chunked(&indices, |&i| {
        verify_tag_creation(&proofs[i], &before[i], &after[i], base, public_key)
    });
    Ok(checks.into_iter().all(|ok| ok))
}

/// Schnorr proof for the session-secret addition `C' = C + s*B`.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct TagAdditionProof<C: CurveGroup> {
    #[serde(with = "crate::crypto_serde::canonical")]
    pub secret_commitment: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub announcement: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub response: C::ScalarField,
}

fn addition_transcript<C: CurveGroup>(
    base: C,
    secret_commitment: C,
    before_c: &C,
    after_c: &C,
    announcement: &C,
) -> ProofTranscript {
    let mut tr = ProofTranscript::new(ADDITION_DOMAIN);
    tr.append_point(b"base", &base);
    tr.append_point(b"secret-commitment", &secret_commitment);
    tr.append_point(b"before.c", before_c);
    tr.append_point(b"after.c", after_c);
    tr.append_point(b"announcement", announcement);
    tr
}

pub fn prove_tag_addition<C: CurveGroup, R: Rng>(
    before: &CipherText<C>,
    after: &CipherText<C>,
    base: C,
    secret: C::ScalarField,
    rng: &mut R,
) -> TagAdditionProof<C> {
    let secret_commitment = base * secret;
    let u = C::ScalarField::rand(rng);
    let announcement = base * u;
    let mut tr = addition_transcript(base, secret_commitment, &before.c, &after.c, &announcement);
    let ch: C::ScalarField = tr.challenge_scalar(b"challenge");
    TagAdditionProof {
        secret_commitment,
        announcement,
        response: u + ch * secret,
    }
}

pub fn verify_tag_addition<C: CurveGroup>(
    proof: &TagAdditionProof<C>,
    before: &CipherText<C>,
    after: &CipherText<C>,
    base: C,
) -> bool {
    if after.c - before.c != proof.secret_commitment || after.k != before.k {
        return false;
    }
    let mut tr = addition_transcript(
        base,
        proof.secret_commitment,
        &before.c,
        &after.c,
        &proof.announcement,
    );
    let ch: C::ScalarField = tr.challenge_scalar(b"challenge");
    base * proof.response == proof.announcement + proof.secret_commitment * ch
}

pub fn verify_tag_addition_list<C: CurveGroup>(
    proofs: &[TagAdditionProof<C>],
    before: &[CipherText<C>],
    after: &[CipherText<C>],
    base: C,
    fraction: f64,
) -> Result<bool, ProtocolError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ProtocolError::InvalidConfiguration(
            "verification fraction must lie in [0, 1]",
        ));
    }
    if proofs.len() != before.len() || proofs.len() != after.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: proofs.len(),
            actual: before.len().min(after.len()),
        });
    }
    let n = ((fraction * proofs.len() as f64).ceil() as usize).min(proofs.len());
    let indices: Vec<usize> = (0..n).collect();
    let checks = map_chunked(&indices, |&i| {
        verify_tag_addition(&proofs[i], &before[i], &after[i], base)
    });
    Ok(checks.into_iter().all(|ok| ok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::KeyPair;
    use crate::tagging::{add_session_secret, tag_cipher_text};
    use ark_bn254::{Fr, G1Projective};
    use ark_ec::PrimeGroup;
    use ark_std::test_rng;

    type Curve = G1Projective;

    #[test]
    fn tag_creation_proof_verifies() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let secret = Fr::rand(&mut rng);
        let base = Curve::generator();

        let before = CipherText::encrypt_int(keys.public, 3, &mut rng);
        let after = tag_cipher_text(&before, keys.private, secret);
        let proof = prove_tag_creation(&before, &after, base, keys.private, secret, &mut rng);
        assert!(verify_tag_creation(&proof, &before, &after, base, keys.public));
    }

    #[test]
    fn tag_creation_proof_rejects_wrong_output() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let secret = Fr::rand(&mut rng);
        let base = Curve::generator();

        let before = CipherText::encrypt_int(keys.public, 3, &mut rng);
        let after = tag_cipher_text(&before, keys.private, secret);
        let proof = prove_tag_creation(&before, &after, base, keys.private, secret, &mut rng);

        let forged = CipherText::new(after.k, after.c + base);
        assert!(!verify_tag_creation(
            &proof,
            &before,
            &forged,
            base,
            keys.public
        ));
    }

    #[test]
    fn tag_creation_proof_rejects_wrong_key() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let other = KeyPair::<Curve>::generate(&mut rng);
        let secret = Fr::rand(&mut rng);
        let base = Curve::generator();

        let before = CipherText::encrypt_int(keys.public, 3, &mut rng);
        // Tag with a key that is not the one published for this server.
        let after = tag_cipher_text(&before, other.private, secret);
        let proof = prove_tag_creation(&before, &after, base, other.private, secret, &mut rng);
        assert!(!verify_tag_creation(&proof, &before, &after, base, keys.public));
    }

    #[test]
    fn tag_creation_list_fraction() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let secret = Fr::rand(&mut rng);
        let base = Curve::generator();

        let before: Vec<_> = (0..4)
            .map(|i| CipherText::encrypt_int(keys.public, i, &mut rng))
            .collect();
        let after: Vec<_> = before
            .iter()
            .map(|ct| tag_cipher_text(ct, keys.private, secret))
            .collect();
        let proofs =
            prove_tag_creation_vector(&before, &after, base, keys.private, secret, &mut rng)
                .unwrap();

        assert!(
            verify_tag_creation_list(&proofs, &before, &after, base, keys.public, 1.0).unwrap()
        );
        assert!(
            verify_tag_creation_list(&proofs, &before, &after, base, keys.public, 0.25).unwrap()
        );

        let mut bad = after.clone();
        bad[3] = CipherText::new(bad[3].k, bad[3].c + base);
        assert!(verify_tag_creation_list(&proofs, &before, &bad, base, keys.public, 0.25).unwrap());
        assert!(!verify_tag_creation_list(&proofs, &before, &bad, base, keys.public, 1.0).unwrap());
    }

    #[test]
    fn tag_addition_proof_verifies_and_binds() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let secret = Fr::rand(&mut rng);
        let base = Curve::generator();

        let before = CipherText::encrypt_int(keys.public, 9, &mut rng);
        let after = add_session_secret(&before, secret, base);
        let proof = prove_tag_addition(&before, &after, base, secret, &mut rng);
        assert!(verify_tag_addition(&proof, &before, &after, base));

        let forged = CipherText::new(after.k, after.c + base);
        assert!(!verify_tag_addition(&proof, &before, &forged, base));
    }
}
