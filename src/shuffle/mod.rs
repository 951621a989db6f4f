//! Verifiable randomized shuffle of ciphertext vectors.
//!
//! [`shuffle_sequence`] hides the correspondence between input and output
//! records by drawing a uniform permutation and rerandomizing every
//! ciphertext with an encryption of zero; [`proofs`] attaches a
//! non-interactive argument that no record was added, dropped or altered.

pub mod proofs;

pub use proofs::*;

use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_std::rand::seq::SliceRandom;
use ark_std::rand::Rng;

use crate::crypto::elgamal::{CipherText, CipherVector};
use crate::crypto::parallel::map_chunked;
use crate::error::ProtocolError;

const LOG_TARGET: &str = "veilstats::shuffle";

/// A precomputed rerandomizer: one encryption of zero per column together
/// with the blinding scalars that produced it. Pools must be built for the
/// same base point and shuffling key they are later consumed with.
#[derive(Clone, Debug)]
pub struct CipherVectorScalar<C: CurveGroup> {
    pub cipher: CipherVector<C>,
    pub scalars: Vec<C::ScalarField>,
}

/// Build a pool of `rows` precomputed rerandomizers of `cols` columns each,
/// taking the blinding cost off the shuffle's critical path.
pub fn precompute_randomizers<C: CurveGroup, R: Rng>(
    g: C,
    h: C,
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Vec<CipherVectorScalar<C>> {
    let scalar_rows: Vec<Vec<C::ScalarField>> = (0..rows)
        .map(|_| (0..cols).map(|_| C::ScalarField::rand(rng)).collect())
        .collect();
    map_chunked(&scalar_rows, |scalars| CipherVectorScalar {
        cipher: CipherVector(
            scalars
                .iter()
                .map(|b| CipherText::new(g * *b, h * *b))
                .collect(),
        ),
        scalars: scalars.clone(),
    })
}

/// Permute and rerandomize a list of cipher vectors.
///
/// Returns the shuffled list, the permutation `pi` (output slot `i` holds
/// input `pi[i]`) and the blinding factors indexed by output slot. All rows
/// must have the same number of columns.
pub fn shuffle_sequence<C: CurveGroup, R: Rng>(
    input: &[CipherVector<C>],
    g: C,
    h: C,
    precomputed: Option<&[CipherVectorScalar<C>]>,
    rng: &mut R,
) -> Result<ShuffleOutput<C>, ProtocolError> {
    let k = input.len();
    let cols = input.first().map(|cv| cv.len()).unwrap_or(0);
    for row in input {
        if row.len() != cols {
            return Err(ProtocolError::LengthMismatch {
                expected: cols,
                actual: row.len(),
            });
        }
    }

    let mut pi: Vec<usize> = (0..k).collect();
    pi.shuffle(rng);

    // Blinding material per output slot, drawn from the pool when available.
    let randomizers: Vec<CipherVectorScalar<C>> = match precomputed {
        Some(pool) => {
            if pool.len() < k {
                return Err(ProtocolError::LengthMismatch {
                    expected: k,
                    actual: pool.len(),
                });
            }
            tracing::debug!(target: LOG_TARGET, rows = k, "using precomputed rerandomizers");
            pool[..k]
                .iter()
                .map(|entry| {
                    if entry.scalars.len() != cols {
                        return Err(ProtocolError::LengthMismatch {
                            expected: cols,
                            actual: entry.scalars.len(),
                        });
                    }
                    Ok(entry.clone())
                })
                .collect::<Result<_, _>>()?
        }
        None => precompute_randomizers(g, h, k, cols, rng),
    };

    let indices: Vec<usize> = (0..k).collect();
    let shuffled: Vec<CipherVector<C>> = map_chunked(&indices, |&i| {
        let source = &input[pi[i]];
        CipherVector(
            source
                .iter()
                .zip(randomizers[i].cipher.iter())
                .map(|(ct, zero_enc)| *ct + *zero_enc)
                .collect(),
        )
    });

    let beta: Vec<Vec<C::ScalarField>> = randomizers.into_iter().map(|r| r.scalars).collect();

    Ok(ShuffleOutput {
        shuffled,
        permutation: pi,
        beta,
    })
}

/// Result of one shuffle pass.
pub struct ShuffleOutput<C: CurveGroup> {
    pub shuffled: Vec<CipherVector<C>>,
    pub permutation: Vec<usize>,
    pub beta: Vec<Vec<C::ScalarField>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::KeyPair;
    use ark_bn254::G1Projective;
    use ark_ec::PrimeGroup;
    use ark_std::test_rng;

    type Curve = G1Projective;

    fn encrypt_rows(
        public: Curve,
        rows: &[Vec<i64>],
        rng: &mut impl Rng,
    ) -> Vec<CipherVector<Curve>> {
        rows.iter()
            .map(|r| CipherVector::encrypt_ints(public, r, rng))
            .collect()
    }

    #[test]
    fn shuffle_preserves_plaintext_multiset() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let g = Curve::generator();

        let rows = vec![vec![1, 10], vec![2, 20], vec![3, 30]];
        let input = encrypt_rows(keys.public, &rows, &mut rng);
        let out = shuffle_sequence(&input, g, keys.public, None, &mut rng).unwrap();

        let mut decrypted: Vec<Vec<i64>> = out
            .shuffled
            .iter()
            .map(|cv| cv.decrypt_ints(keys.private).unwrap())
            .collect();
        decrypted.sort();
        assert_eq!(decrypted, rows);

        // The permutation maps output slots back to their sources.
        for (i, &src) in out.permutation.iter().enumerate() {
            assert_eq!(
                out.shuffled[i].decrypt_ints(keys.private).unwrap(),
                rows[src]
            );
        }
    }

    #[test]
    fn shuffle_rejects_ragged_rows() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let g = Curve::generator();

        let input = encrypt_rows(keys.public, &[vec![1, 2], vec![3]], &mut rng);
        assert!(shuffle_sequence(&input, g, keys.public, None, &mut rng).is_err());
    }

    #[test]
    fn shuffle_with_precomputed_pool_matches_pool_blindings() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let g = Curve::generator();

        let rows = vec![vec![5], vec![6]];
        let input = encrypt_rows(keys.public, &rows, &mut rng);
        let pool = precompute_randomizers(g, keys.public, 2, 1, &mut rng);
        let out = shuffle_sequence(&input, g, keys.public, Some(&pool), &mut rng).unwrap();

        for (i, betas) in out.beta.iter().enumerate() {
            assert_eq!(betas, &pool[i].scalars);
        }
        let mut decrypted: Vec<Vec<i64>> = out
            .shuffled
            .iter()
            .map(|cv| cv.decrypt_ints(keys.private).unwrap())
            .collect();
        decrypted.sort();
        assert_eq!(decrypted, rows);
    }

    #[test]
    fn shuffle_positions_look_uniform() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let g = Curve::generator();

        let rows = vec![vec![0], vec![1], vec![2]];
        let input = encrypt_rows(keys.public, &rows, &mut rng);

        // Count which source record lands in output slot 0 across many runs;
        // a stuck permutation would concentrate the counts.
        let mut counts = [0usize; 3];
        for _ in 0..300 {
            let out = shuffle_sequence(&input, g, keys.public, None, &mut rng).unwrap();
            counts[out.permutation[0]] += 1;
        }
        for &c in &counts {
            assert!(c > 50, "source distribution skewed: {counts:?}");
        }
    }
}
