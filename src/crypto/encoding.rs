//! Aggregation-friendly encodings of query answers.

use ark_ec::CurveGroup;
use ark_std::rand::Rng;

use crate::crypto::elgamal::CipherText;
use crate::error::ProtocolError;

/// Encode a sum query: add the inputs in the clear at the data provider and
/// encrypt the total under the collective key.
pub fn encode_sum<C: CurveGroup, R: Rng>(
    values: &[i64],
    public_key: C,
    rng: &mut R,
) -> CipherText<C> {
    let total: i64 = values.iter().sum();
    CipherText::encrypt_int(public_key, total, rng)
}

/// Decode a sum query answer at the querier.
pub fn decode_sum<C: CurveGroup>(
    result: &CipherText<C>,
    private_key: C::ScalarField,
) -> Result<i64, ProtocolError> {
    result.decrypt_int(private_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::KeyPair;
    use ark_bn254::G1Projective;
    use ark_std::test_rng;

    #[test]
    fn encode_decode_sum() {
        let mut rng = test_rng();
        let keys = KeyPair::<G1Projective>::generate(&mut rng);
        let inputs: Vec<i64> = (0..=10).collect();

        let encrypted = encode_sum(&inputs, keys.public, &mut rng);
        assert_eq!(decode_sum(&encrypted, keys.private).unwrap(), 55);
    }
}
