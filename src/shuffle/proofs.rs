//! Non-interactive argument that a shuffle preserved the ciphertext multiset.
//!
//! The lists are first compressed column-wise with a public challenge vector
//! derived from the shuffling key, reducing the statement to a shuffle of
//! single points. The argument then commits to the permuted row challenges,
//! proves their product matches the unpermuted product (so the committed
//! exponents are a permutation) and links the commitments to the compressed
//! output via a blinded multi-exponentiation.

use ark_ec::CurveGroup;
use ark_ff::{AdditiveGroup, Field, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::elgamal::{CipherText, CipherVector};
use crate::crypto::parallel::map_chunked;
use crate::crypto::transcript::{challenge_vector_from_seed, hash_to_point, ProofTranscript};
use crate::error::ProtocolError;

const LOG_TARGET: &str = "veilstats::shuffle::proofs";

const TRANSCRIPT_DOMAIN: &[u8] = b"veilstats/shuffle-argument-v1";

/// Pedersen generators with unknown relative discrete log, fixed per curve.
fn pedersen_generators<C: CurveGroup>() -> (C, C) {
    (
        hash_to_point::<C>(b"shuffle-pedersen-u"),
        hash_to_point::<C>(b"shuffle-pedersen-v"),
    )
}

/// Fold a cipher vector into one ciphertext: `sum_q e[q] * cv[q]`.
pub fn compress_cipher_vector<C: CurveGroup>(
    cv: &CipherVector<C>,
    e: &[C::ScalarField],
) -> Result<CipherText<C>, ProtocolError> {
    if cv.len() != e.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: e.len(),
            actual: cv.len(),
        });
    }
    Ok(cv
        .iter()
        .zip(e.iter())
        .fold(CipherText::zero(), |acc, (ct, w)| acc + ct.scalar_mul(*w)))
}

/// Compress every row of a list into paired K/C point lists.
pub fn compress_list<C: CurveGroup>(
    list: &[CipherVector<C>],
    e: &[C::ScalarField],
) -> Result<(Vec<C>, Vec<C>), ProtocolError> {
    let folded: Vec<Result<CipherText<C>, ProtocolError>> =
        map_chunked(list, |cv| compress_cipher_vector(cv, e));
    let mut ks = Vec::with_capacity(list.len());
    let mut cs = Vec::with_capacity(list.len());
    for r in folded {
        let ct = r?;
        ks.push(ct.k);
        cs.push(ct.c);
    }
    Ok((ks, cs))
}

/// Fold the per-column blinding factors of each output row the same way the
/// ciphertext columns are folded.
pub fn compress_beta<F: Field>(beta: &[Vec<F>], e: &[F]) -> Result<Vec<F>, ProtocolError> {
    beta.iter()
        .map(|row| {
            if row.len() != e.len() {
                return Err(ProtocolError::LengthMismatch {
                    expected: e.len(),
                    actual: row.len(),
                });
            }
            Ok(row
                .iter()
                .zip(e.iter())
                .fold(F::zero(), |acc, (b, w)| acc + *b * *w))
        })
        .collect()
}

/// One step of the chained product argument: a Chaum-Pedersen style proof
/// that committed values satisfy `value(C) = value(A) * value(B)`.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct MultiplicationProof<C: CurveGroup> {
    #[serde(with = "crate::crypto_serde::canonical")]
    pub ann_value: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub ann_product: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_value: C::ScalarField,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_value_rand: C::ScalarField,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_product_rand: C::ScalarField,
}

/// Blinded multi-exponentiation proof tying the exponent commitments to the
/// compressed shuffled lists.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct MultiExpProof<C: CurveGroup> {
    #[serde(with = "crate::crypto_serde::canonical_vec")]
    pub commitment_anns: Vec<C>,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub ann_x: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub ann_y: C,
    #[serde(with = "crate::crypto_serde::canonical_vec")]
    pub resp_exponents: Vec<C::ScalarField>,
    #[serde(with = "crate::crypto_serde::canonical_vec")]
    pub resp_commit_rands: Vec<C::ScalarField>,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub resp_blinding: C::ScalarField,
}

/// The argument over the compressed lists.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct ShuffleArgument<C: CurveGroup> {
    /// Pedersen commitments to the permuted row challenges.
    #[serde(with = "crate::crypto_serde::canonical_vec")]
    pub commitments: Vec<C>,
    /// Commitments to the running products `(s_1 - x)(s_2 - x)...(s_j - x)`
    /// for `j >= 2`; empty for single-row shuffles.
    #[serde(with = "crate::crypto_serde::canonical_vec")]
    pub partial_products: Vec<C>,
    pub product_steps: Vec<MultiplicationProof<C>>,
    /// Opening randomness of the final running-product commitment.
    #[serde(with = "crate::crypto_serde::canonical")]
    pub final_randomness: C::ScalarField,
    pub link: MultiExpProof<C>,
}

/// A complete shuffle proof: the statement (both lists plus the base point
/// and shuffling key) and the argument over their compressed form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct ShuffleProof<C: CurveGroup> {
    pub original: Vec<CipherVector<C>>,
    pub shuffled: Vec<CipherVector<C>>,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub g: C,
    #[serde(with = "crate::crypto_serde::canonical")]
    pub h: C,
    pub argument: ShuffleArgument<C>,
}

/// Prove that `shuffled` is a permutation-plus-rerandomization of `original`
/// with permutation `pi` and blinding factors `beta` (both as returned by
/// `shuffle_sequence`).
pub fn prove_shuffle<C: CurveGroup, R: Rng>(
    original: &[CipherVector<C>],
    shuffled: &[CipherVector<C>],
    g: C,
    h: C,
    beta: &[Vec<C::ScalarField>],
    pi: &[usize],
    rng: &mut R,
) -> Result<ShuffleProof<C>, ProtocolError> {
    let k = original.len();
    if k == 0 {
        return Err(ProtocolError::Proof(
            "cannot prove a shuffle of an empty list".into(),
        ));
    }
    if shuffled.len() != k || pi.len() != k || beta.len() != k {
        return Err(ProtocolError::LengthMismatch {
            expected: k,
            actual: shuffled.len().min(pi.len()).min(beta.len()),
        });
    }
    let cols = original[0].len();

    let e = challenge_vector_from_seed::<C>(&h, cols);
    let (x, y) = compress_list(original, &e)?;
    let (xbar, ybar) = compress_list(shuffled, &e)?;
    let b = compress_beta(beta, &e)?;

    let argument = prove_compressed(&x, &y, &xbar, &ybar, g, h, &b, pi, rng);

    tracing::debug!(target: LOG_TARGET, rows = k, cols, "shuffle proof generated");

    Ok(ShuffleProof {
        original: original.to_vec(),
        shuffled: shuffled.to_vec(),
        g,
        h,
        argument,
    })
}

#[allow(clippy::too_many_arguments)]
fn prove_compressed<C: CurveGroup, R: Rng>(
    x: &[C],
    y: &[C],
    xbar: &[C],
    ybar: &[C],
    g: C,
    h: C,
    b: &[C::ScalarField],
    pi: &[usize],
    rng: &mut R,
) -> ShuffleArgument<C> {
    let k = x.len();
    let (u, v) = pedersen_generators::<C>();

    let mut tr = ProofTranscript::new(TRANSCRIPT_DOMAIN);
    tr.append_point(b"g", &g);
    tr.append_point(b"h", &h);
    tr.append_points(b"x", x);
    tr.append_points(b"y", y);
    tr.append_points(b"xbar", xbar);
    tr.append_points(b"ybar", ybar);

    let t: Vec<C::ScalarField> = tr.challenge_scalars(b"row-challenges", k);
    let s: Vec<C::ScalarField> = pi.iter().map(|&p| t[p]).collect();

    let r: Vec<C::ScalarField> = (0..k).map(|_| C::ScalarField::rand(rng)).collect();
    let commitments: Vec<C> = s
        .iter()
        .zip(r.iter())
        .map(|(si, ri)| u * *si + v * *ri)
        .collect();
    tr.append_points(b"exponent-commitments", &commitments);
    let x_chal: C::ScalarField = tr.challenge_scalar(b"product-challenge");

    // Running products of the shifted committed exponents, with a fresh
    // commitment randomness chain anchored at r[0].
    let diffs: Vec<C::ScalarField> = s.iter().map(|si| *si - x_chal).collect();
    let mut p = Vec::with_capacity(k);
    p.push(diffs[0]);
    for j in 1..k {
        let prev: C::ScalarField = p[j - 1];
        p.push(prev * diffs[j]);
    }
    let mut rp = Vec::with_capacity(k);
    rp.push(r[0]);
    for _ in 1..k {
        rp.push(C::ScalarField::rand(rng));
    }
    let partial_products: Vec<C> = (1..k).map(|j| u * p[j] + v * rp[j]).collect();
    tr.append_points(b"partial-products", &partial_products);

    let mut product_steps = Vec::with_capacity(k.saturating_sub(1));
    for j in 1..k {
        let b_point = commitments[j] - u * x_chal;
        let ua = C::ScalarField::rand(rng);
        let u1 = C::ScalarField::rand(rng);
        let u2 = C::ScalarField::rand(rng);
        let ann_value = u * ua + v * u1;
        let ann_product = b_point * ua + v * u2;
        tr.append_point(b"mul-ann-value", &ann_value);
        tr.append_point(b"mul-ann-product", &ann_product);
        let ch: C::ScalarField = tr.challenge_scalar(b"mul-challenge");
        product_steps.push(MultiplicationProof {
            ann_value,
            ann_product,
            resp_value: ua + ch * p[j - 1],
            resp_value_rand: u1 + ch * rp[j - 1],
            resp_product_rand: u2 + ch * (rp[j] - p[j - 1] * r[j]),
        });
    }
    let final_randomness = rp[k - 1];
    tr.append_scalar(b"final-randomness", &final_randomness);

    // Link the exponent commitments to the compressed output lists.
    let cap_b: C::ScalarField = s
        .iter()
        .zip(b.iter())
        .fold(C::ScalarField::ZERO, |acc, (si, bi)| acc + *si * *bi);
    let us: Vec<C::ScalarField> = (0..k).map(|_| C::ScalarField::rand(rng)).collect();
    let vs: Vec<C::ScalarField> = (0..k).map(|_| C::ScalarField::rand(rng)).collect();
    let w = C::ScalarField::rand(rng);
    let commitment_anns: Vec<C> = us
        .iter()
        .zip(vs.iter())
        .map(|(ui, vi)| u * *ui + v * *vi)
        .collect();
    let ann_x = us
        .iter()
        .zip(xbar.iter())
        .fold(C::zero(), |acc, (ui, p)| acc + *p * *ui)
        - g * w;
    let ann_y = us
        .iter()
        .zip(ybar.iter())
        .fold(C::zero(), |acc, (ui, p)| acc + *p * *ui)
        - h * w;
    tr.append_points(b"link-commit-anns", &commitment_anns);
    tr.append_point(b"link-ann-x", &ann_x);
    tr.append_point(b"link-ann-y", &ann_y);
    let ch: C::ScalarField = tr.challenge_scalar(b"link-challenge");

    let link = MultiExpProof {
        commitment_anns,
        ann_x,
        ann_y,
        resp_exponents: us.iter().zip(s.iter()).map(|(ui, si)| *ui + ch * *si).collect(),
        resp_commit_rands: vs.iter().zip(r.iter()).map(|(vi, ri)| *vi + ch * *ri).collect(),
        resp_blinding: w + ch * cap_b,
    };

    ShuffleArgument {
        commitments,
        partial_products,
        product_steps,
        final_randomness,
        link,
    }
}

/// Verify a shuffle proof against the challenge seed (normally the shuffling
/// key the shuffle was performed under).
///
/// Structural defects in the statement itself (empty or ragged lists) are
/// fatal errors; a well-formed proof that fails its checks yields `Ok(false)`.
pub fn verify_shuffle<C: CurveGroup>(
    proof: &ShuffleProof<C>,
    seed: &C,
) -> Result<bool, ProtocolError> {
    let k = proof.original.len();
    if k == 0 {
        return Err(ProtocolError::Proof(
            "shuffle proof over an empty list".into(),
        ));
    }
    if proof.shuffled.len() != k {
        return Err(ProtocolError::LengthMismatch {
            expected: k,
            actual: proof.shuffled.len(),
        });
    }
    let cols = proof.original[0].len();

    let e = challenge_vector_from_seed::<C>(seed, cols);
    let (x, y) = compress_list(&proof.original, &e)?;
    let (xbar, ybar) = compress_list(&proof.shuffled, &e)?;

    let arg = &proof.argument;
    if arg.commitments.len() != k
        || arg.partial_products.len() != k - 1
        || arg.product_steps.len() != k - 1
        || arg.link.commitment_anns.len() != k
        || arg.link.resp_exponents.len() != k
        || arg.link.resp_commit_rands.len() != k
    {
        tracing::warn!(target: LOG_TARGET, rows = k, "shuffle argument has wrong shape");
        return Ok(false);
    }

    let (u, v) = pedersen_generators::<C>();

    let mut tr = ProofTranscript::new(TRANSCRIPT_DOMAIN);
    tr.append_point(b"g", &proof.g);
    tr.append_point(b"h", &proof.h);
    tr.append_points(b"x", &x);
    tr.append_points(b"y", &y);
    tr.append_points(b"xbar", &xbar);
    tr.append_points(b"ybar", &ybar);

    let t: Vec<C::ScalarField> = tr.challenge_scalars(b"row-challenges", k);
    tr.append_points(b"exponent-commitments", &arg.commitments);
    let x_chal: C::ScalarField = tr.challenge_scalar(b"product-challenge");
    tr.append_points(b"partial-products", &arg.partial_products);

    let mut ok = true;
    for (j, step) in (1..k).zip(arg.product_steps.iter()) {
        let a_point = if j == 1 {
            arg.commitments[0] - u * x_chal
        } else {
            arg.partial_products[j - 2]
        };
        let b_point = arg.commitments[j] - u * x_chal;
        let c_point = arg.partial_products[j - 1];
        tr.append_point(b"mul-ann-value", &step.ann_value);
        tr.append_point(b"mul-ann-product", &step.ann_product);
        let ch: C::ScalarField = tr.challenge_scalar(b"mul-challenge");
        ok &= u * step.resp_value + v * step.resp_value_rand == step.ann_value + a_point * ch;
        ok &= b_point * step.resp_value + v * step.resp_product_rand
            == step.ann_product + c_point * ch;
    }
    tr.append_scalar(b"final-randomness", &arg.final_randomness);

    // The committed running product must open to the product over the
    // unpermuted challenges, which only a permutation can satisfy.
    let known_product = t
        .iter()
        .fold(C::ScalarField::ONE, |acc, ti| acc * (*ti - x_chal));
    let final_commitment = if k == 1 {
        arg.commitments[0] - u * x_chal
    } else {
        arg.partial_products[k - 2]
    };
    ok &= final_commitment == u * known_product + v * arg.final_randomness;

    let t_x = t
        .iter()
        .zip(x.iter())
        .fold(C::zero(), |acc, (ti, p)| acc + *p * *ti);
    let t_y = t
        .iter()
        .zip(y.iter())
        .fold(C::zero(), |acc, (ti, p)| acc + *p * *ti);
    let link = &arg.link;
    tr.append_points(b"link-commit-anns", &link.commitment_anns);
    tr.append_point(b"link-ann-x", &link.ann_x);
    tr.append_point(b"link-ann-y", &link.ann_y);
    let ch: C::ScalarField = tr.challenge_scalar(b"link-challenge");

    for i in 0..k {
        ok &= u * link.resp_exponents[i] + v * link.resp_commit_rands[i]
            == link.commitment_anns[i] + arg.commitments[i] * ch;
    }
    let lhs_x = link
        .resp_exponents
        .iter()
        .zip(xbar.iter())
        .fold(C::zero(), |acc, (zi, p)| acc + *p * *zi)
        - proof.g * link.resp_blinding;
    let lhs_y = link
        .resp_exponents
        .iter()
        .zip(ybar.iter())
        .fold(C::zero(), |acc, (zi, p)| acc + *p * *zi)
        - proof.h * link.resp_blinding;
    ok &= lhs_x == link.ann_x + t_x * ch;
    ok &= lhs_y == link.ann_y + t_y * ch;

    if !ok {
        tracing::warn!(target: LOG_TARGET, rows = k, "shuffle proof rejected");
    }
    Ok(ok)
}

/// One proving task for [`prove_shuffle_list`]: the statement plus the
/// shuffle's private outputs.
pub struct ShuffleInstance<'a, C: CurveGroup> {
    pub original: &'a [CipherVector<C>],
    pub shuffled: &'a [CipherVector<C>],
    pub beta: &'a [Vec<C::ScalarField>],
    pub permutation: &'a [usize],
}

/// Prove a batch of shuffles under the same generators.
pub fn prove_shuffle_list<C: CurveGroup, R: Rng>(
    instances: &[ShuffleInstance<'_, C>],
    g: C,
    h: C,
    rng: &mut R,
) -> Result<Vec<ShuffleProof<C>>, ProtocolError> {
    instances
        .iter()
        .map(|inst| {
            prove_shuffle(
                inst.original,
                inst.shuffled,
                g,
                h,
                inst.beta,
                inst.permutation,
                rng,
            )
        })
        .collect()
}

/// Verify a batch of shuffle proofs, checking `ceil(fraction * n)` of them in
/// parallel. A fraction of 1.0 checks every proof; lower fractions trade
/// assurance for speed on long pipelines.
pub fn verify_shuffle_list<C: CurveGroup>(
    proofs: &[ShuffleProof<C>],
    seed: &C,
    fraction: f64,
) -> Result<bool, ProtocolError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(ProtocolError::InvalidConfiguration(
            "verification fraction must lie in [0, 1]",
        ));
    }
    let n = ((fraction * proofs.len() as f64).ceil() as usize).min(proofs.len());
    tracing::info!(target: LOG_TARGET, total = proofs.len(), checked = n, "verifying shuffle proofs");
    let results: Vec<Result<bool, ProtocolError>> =
        map_chunked(&proofs[..n], |p| verify_shuffle(p, seed));
    let mut ok = true;
    for r in results {
        ok &= r?;
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::KeyPair;
    use crate::shuffle::shuffle_sequence;
    use ark_bn254::G1Projective;
    use ark_ec::PrimeGroup;
    use ark_std::test_rng;

    type Curve = G1Projective;

    fn shuffled_with_proof(
        rows: &[Vec<i64>],
        rng: &mut impl Rng,
    ) -> (Curve, ShuffleProof<Curve>) {
        let keys = KeyPair::<Curve>::generate(rng);
        let g = Curve::generator();
        let input: Vec<CipherVector<Curve>> = rows
            .iter()
            .map(|r| CipherVector::encrypt_ints(keys.public, r, rng))
            .collect();
        let out = shuffle_sequence(&input, g, keys.public, None, rng).unwrap();
        let proof = prove_shuffle(
            &input,
            &out.shuffled,
            g,
            keys.public,
            &out.beta,
            &out.permutation,
            rng,
        )
        .unwrap();
        (keys.public, proof)
    }

    #[test]
    fn honest_shuffle_proof_verifies() {
        let mut rng = test_rng();
        let rows = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![10, 11, 12]];
        let (seed, proof) = shuffled_with_proof(&rows, &mut rng);
        assert!(verify_shuffle(&proof, &seed).unwrap());
    }

    #[test]
    fn single_row_proof_verifies() {
        let mut rng = test_rng();
        let (seed, proof) = shuffled_with_proof(&[vec![42]], &mut rng);
        assert!(verify_shuffle(&proof, &seed).unwrap());
    }

    #[test]
    fn tampered_output_is_rejected() {
        let mut rng = test_rng();
        let rows = vec![vec![1, 2], vec![3, 4], vec![5, 6]];
        let (seed, mut proof) = shuffled_with_proof(&rows, &mut rng);

        // Substitute one output ciphertext; the multiset no longer matches.
        let g = Curve::generator();
        proof.shuffled[1].0[0] = proof.shuffled[1].0[0] + CipherText::new(g, g);
        assert!(!verify_shuffle(&proof, &seed).unwrap());
    }

    #[test]
    fn wrong_seed_is_rejected() {
        let mut rng = test_rng();
        let rows = vec![vec![1], vec![2]];
        let (seed, proof) = shuffled_with_proof(&rows, &mut rng);
        assert!(!verify_shuffle(&proof, &(seed + seed)).unwrap());
    }

    #[test]
    fn length_mismatch_is_fatal() {
        let mut rng = test_rng();
        let (seed, mut proof) = shuffled_with_proof(&[vec![1], vec![2]], &mut rng);
        proof.shuffled.pop();
        assert!(verify_shuffle(&proof, &seed).is_err());
    }

    #[test]
    fn list_verification_respects_fraction() {
        let mut rng = test_rng();
        let rows = vec![vec![1], vec![2], vec![3]];

        let keys = KeyPair::<Curve>::generate(&mut rng);
        let g = Curve::generator();
        let input: Vec<CipherVector<Curve>> = rows
            .iter()
            .map(|r| CipherVector::encrypt_ints(keys.public, r, &mut rng))
            .collect();

        let outputs: Vec<_> = (0..4)
            .map(|_| shuffle_sequence(&input, g, keys.public, None, &mut rng).unwrap())
            .collect();
        let instances: Vec<ShuffleInstance<'_, Curve>> = outputs
            .iter()
            .map(|out| ShuffleInstance {
                original: &input,
                shuffled: &out.shuffled,
                beta: &out.beta,
                permutation: &out.permutation,
            })
            .collect();
        let mut proofs = prove_shuffle_list(&instances, g, keys.public, &mut rng).unwrap();
        assert!(verify_shuffle_list(&proofs, &keys.public, 1.0).unwrap());
        assert!(verify_shuffle_list(&proofs, &keys.public, 0.5).unwrap());

        // Break the last proof: a half check skips it, a full check catches it.
        proofs[3].argument.final_randomness += ark_bn254::Fr::ONE;
        assert!(verify_shuffle_list(&proofs, &keys.public, 0.5).unwrap());
        assert!(!verify_shuffle_list(&proofs, &keys.public, 1.0).unwrap());

        assert!(verify_shuffle_list(&proofs, &keys.public, 1.5).is_err());
    }
}
