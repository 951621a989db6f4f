//! Serde adapters for arkworks types, encoded as 0x-prefixed hex strings.

use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

fn to_hex<T: CanonicalSerialize>(value: &T) -> Result<String, String> {
    let mut bytes = Vec::with_capacity(value.compressed_size());
    value
        .serialize_compressed(&mut bytes)
        .map_err(|e| e.to_string())?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

fn from_hex<T: CanonicalDeserialize>(s: &str) -> Result<T, String> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| e.to_string())?;
    T::deserialize_compressed(&mut bytes.as_slice()).map_err(|e| e.to_string())
}

/// Single curve point or scalar as a hex string.
pub mod canonical {
    use super::*;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: CanonicalSerialize,
        S: Serializer,
    {
        let hex = to_hex(value).map_err(SerError::custom)?;
        serializer.serialize_str(&hex)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: CanonicalDeserialize,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        from_hex(&s).map_err(DeError::custom)
    }
}

/// Vec of curve points or scalars, element-wise hex strings.
pub mod canonical_vec {
    use super::*;

    pub fn serialize<T, S>(values: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        T: CanonicalSerialize,
        S: Serializer,
    {
        let hexes: Vec<String> = values
            .iter()
            .map(|v| to_hex(v).map_err(SerError::custom))
            .collect::<Result<_, _>>()?;
        hexes.serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: CanonicalDeserialize,
        D: Deserializer<'de>,
    {
        let hexes = Vec::<String>::deserialize(deserializer)?;
        hexes
            .into_iter()
            .map(|s| from_hex(&s).map_err(DeError::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::elgamal::{CipherText, CipherVector, KeyPair};
    use ark_bn254::G1Projective;
    use ark_std::test_rng;

    #[test]
    fn cipher_text_json_round_trip() {
        let mut rng = test_rng();
        let keys = KeyPair::<G1Projective>::generate(&mut rng);
        let ct = CipherText::encrypt_int(keys.public, 42, &mut rng);

        let json = serde_json::to_string(&ct).unwrap();
        assert!(json.contains("0x"));
        let back: CipherText<G1Projective> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ct);
    }

    #[test]
    fn cipher_vector_json_round_trip() {
        let mut rng = test_rng();
        let keys = KeyPair::<G1Projective>::generate(&mut rng);
        let cv = CipherVector::encrypt_ints(keys.public, &[1, 2, 3], &mut rng);

        let json = serde_json::to_string(&cv).unwrap();
        let back: CipherVector<G1Projective> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cv);
    }

    #[test]
    fn malformed_hex_is_a_deserialize_error() {
        assert!(serde_json::from_str::<CipherText<G1Projective>>(
            r#"{"k":"0xzz","c":"0x00"}"#
        )
        .is_err());
    }
}
