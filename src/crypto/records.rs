//! Record-level structures flowing through the pipeline: deterministic tags,
//! grouping keys and filtered responses.

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::crypto::elgamal::{cipher_text_byte_size, point_byte_size, CipherVector};
use crate::error::ProtocolError;

/// Canonical byte encoding of a deterministic tag vector, used as a hash-map
/// bucket key. Equal across servers iff the underlying plaintext grouping
/// attributes were equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupingKey(pub String);

/// Default bucket for data that was never grouped.
pub const EMPTY_KEY: &str = "";

impl GroupingKey {
    pub fn empty() -> Self {
        Self(EMPTY_KEY.to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The C-component projection of a tagged ciphertext. After the full ring
/// pass this point depends only on the plaintext and the session parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct DeterministicCipherText<C: CurveGroup> {
    #[serde(with = "crate::crypto_serde::canonical")]
    pub point: C,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct DeterministicCipherVector<C: CurveGroup>(pub Vec<DeterministicCipherText<C>>);

impl<C: CurveGroup> DeterministicCipherVector<C> {
    /// Derive the grouping key: hex of each compressed tag point,
    /// concatenated in column order. Fixed width for a given column count.
    pub fn key(&self) -> Result<GroupingKey, ProtocolError> {
        let mut out = String::with_capacity(self.0.len() * 2 * point_byte_size::<C>());
        for tag in &self.0 {
            let mut bytes = Vec::with_capacity(point_byte_size::<C>());
            tag.point.serialize_compressed(&mut bytes)?;
            out.push_str(&hex::encode(bytes));
        }
        Ok(GroupingKey(out))
    }
}

/// One client record after filtering: the encrypted grouping attributes and
/// the encrypted values to aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct FilteredResponse<C: CurveGroup> {
    pub group_by_enc: CipherVector<C>,
    pub aggregating_attributes: CipherVector<C>,
}

impl<C: CurveGroup> FilteredResponse<C> {
    /// Sum the aggregating attributes of two responses column-wise, keeping
    /// `self`'s grouping ciphertexts. Lengths must already agree.
    pub fn add(&self, other: &Self) -> Result<Self, ProtocolError> {
        Ok(Self {
            group_by_enc: self.group_by_enc.clone(),
            aggregating_attributes: self
                .aggregating_attributes
                .add(&other.aggregating_attributes)?,
        })
    }

    /// Wire form plus the element counts needed to read it back.
    pub fn to_bytes(&self) -> Result<(Vec<u8>, u32, u32), ProtocolError> {
        let mut bytes = self.group_by_enc.to_bytes()?;
        bytes.extend_from_slice(&self.aggregating_attributes.to_bytes()?);
        Ok((
            bytes,
            self.group_by_enc.len() as u32,
            self.aggregating_attributes.len() as u32,
        ))
    }

    pub fn from_bytes(bytes: &[u8], gacb_len: u32, aab_len: u32) -> Result<Self, ProtocolError> {
        let stride = cipher_text_byte_size::<C>();
        let split = gacb_len as usize * stride;
        let expected = split + aab_len as usize * stride;
        if bytes.len() != expected {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            group_by_enc: CipherVector::from_bytes(&bytes[..split])?,
            aggregating_attributes: CipherVector::from_bytes(&bytes[split..])?,
        })
    }
}

/// A filtered response together with its deterministic grouping tag.
/// Produced once per record by the tagging pipeline, consumed by
/// aggregation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct FilteredResponseDet<C: CurveGroup> {
    pub det_tag_group_by: GroupingKey,
    pub fr: FilteredResponse<C>,
}

impl<C: CurveGroup> FilteredResponseDet<C> {
    pub fn to_bytes(&self) -> Result<(Vec<u8>, u32, u32, u32), ProtocolError> {
        let (mut bytes, gacb_len, aab_len) = self.fr.to_bytes()?;
        let tag = self.det_tag_group_by.as_bytes();
        bytes.extend_from_slice(tag);
        Ok((bytes, gacb_len, aab_len, tag.len() as u32))
    }

    pub fn from_bytes(
        bytes: &[u8],
        gacb_len: u32,
        aab_len: u32,
        dtb_len: u32,
    ) -> Result<Self, ProtocolError> {
        let stride = cipher_text_byte_size::<C>();
        let fr_len = (gacb_len as usize + aab_len as usize) * stride;
        let expected = fr_len + dtb_len as usize;
        if bytes.len() != expected {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let fr = FilteredResponse::from_bytes(&bytes[..fr_len], gacb_len, aab_len)?;
        let tag = String::from_utf8(bytes[fr_len..].to_vec())
            .map_err(|e| ProtocolError::MalformedData(format!("grouping key not utf-8: {e}")))?;
        Ok(Self {
            det_tag_group_by: GroupingKey(tag),
            fr,
        })
    }
}

/// Accumulate a response into a grouped-data map, summing when the bucket
/// already exists.
pub fn add_in_map<C: CurveGroup>(
    map: &mut HashMap<GroupingKey, FilteredResponse<C>>,
    key: GroupingKey,
    fr: FilteredResponse<C>,
) -> Result<(), ProtocolError> {
    match map.get_mut(&key) {
        Some(existing) => {
            *existing = existing.add(&fr)?;
        }
        None => {
            map.insert(key, fr);
        }
    }
    Ok(())
}
