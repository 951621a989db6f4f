//! Collective aggregation over a server tree.
//!
//! The root announces the query down the tree; every server then folds its
//! children's grouped responses into its own bucket map and passes the merge
//! upward, so the root ends up with one ciphertext sum per grouping key
//! while individual contributions stay hidden inside the homomorphic sums.
//! Vectors of unequal width meeting in one bucket are padded with
//! encryptions of zero under the collective key before summing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::crypto::elgamal::{cipher_text_byte_size, CipherText, CipherVector};
use crate::crypto::records::{FilteredResponse, FilteredResponseDet, GroupingKey};
use crate::error::ProtocolError;
use crate::protocols::transport::Transport;

const LOG_TARGET: &str = "veilstats::protocols::aggregation";

/// Frame kinds of the aggregation protocol.
pub const AGG_ANNOUNCE: u8 = 1;
pub const AGG_HEADER: u8 = 2;
pub const AGG_PAYLOAD: u8 = 3;

/// Responses bucketed by grouping key.
pub type GroupedData<C> = HashMap<GroupingKey, FilteredResponse<C>>;

/// Hook invoked at every in-tree merge, so deployments can attach proofs of
/// correct aggregation (or any other audit trail) without the protocol
/// knowing about them.
pub trait ProofRecorder<C: CurveGroup>: Send + Sync {
    fn record(&self, key: &GroupingKey, inputs: &[FilteredResponse<C>], merged: &FilteredResponse<C>);
}

/// Default recorder: no audit trail.
pub struct NoopRecorder;

impl<C: CurveGroup> ProofRecorder<C> for NoopRecorder {
    fn record(&self, _: &GroupingKey, _: &[FilteredResponse<C>], _: &FilteredResponse<C>) {}
}

/// This server's local contribution. Exactly one of the two forms must be
/// set: either responses already bucketed by grouping key, or a flat list of
/// ciphertexts that aggregates into the unnamed bucket.
pub struct AggregationData<C: CurveGroup> {
    pub grouped: Option<GroupedData<C>>,
    pub simple: Option<Vec<CipherText<C>>>,
}

impl<C: CurveGroup> AggregationData<C> {
    fn into_map(self) -> Result<GroupedData<C>, ProtocolError> {
        match (self.grouped, self.simple) {
            (Some(grouped), None) => Ok(grouped),
            (None, Some(simple)) => {
                let mut map = HashMap::new();
                map.insert(
                    GroupingKey::empty(),
                    FilteredResponse {
                        group_by_enc: CipherVector(Vec::new()),
                        aggregating_attributes: CipherVector(simple),
                    },
                );
                Ok(map)
            }
            (Some(_), Some(_)) => Err(ProtocolError::InvalidConfiguration(
                "grouped and simple data are mutually exclusive",
            )),
            (None, None) => Err(ProtocolError::InvalidConfiguration(
                "aggregation needs either grouped or simple data",
            )),
        }
    }
}

/// One server's view of the aggregation tree.
pub struct AggregationNode<C: CurveGroup, T: Transport, P: ProofRecorder<C> = NoopRecorder> {
    pub transport: T,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub collective_key: C,
    pub recorder: P,
}

fn encode_grouped<C: CurveGroup>(map: &GroupedData<C>) -> Result<(Vec<u8>, Vec<u8>), ProtocolError> {
    let mut keys: Vec<&GroupingKey> = map.keys().collect();
    keys.sort();

    let mut lengths: Vec<u32> = Vec::with_capacity(3 * map.len());
    let mut payload = Vec::new();
    for key in keys {
        let entry = FilteredResponseDet {
            det_tag_group_by: key.clone(),
            fr: map[key].clone(),
        };
        let (bytes, gacb, aab, dtb) = entry.to_bytes()?;
        lengths.extend_from_slice(&[gacb, aab, dtb]);
        payload.extend_from_slice(&bytes);
    }
    let mut header = Vec::new();
    lengths.serialize_compressed(&mut header)?;
    Ok((header, payload))
}

fn decode_grouped<C: CurveGroup>(
    header: &[u8],
    payload: &[u8],
) -> Result<Vec<FilteredResponseDet<C>>, ProtocolError> {
    let lengths: Vec<u32> = Vec::deserialize_compressed(header)?;
    if lengths.len() % 3 != 0 {
        return Err(ProtocolError::MalformedData(format!(
            "aggregation header holds {} counts, expected triples",
            lengths.len()
        )));
    }
    let stride = cipher_text_byte_size::<C>();
    let mut entries = Vec::with_capacity(lengths.len() / 3);
    let mut cursor = 0usize;
    for triple in lengths.chunks(3) {
        let (gacb, aab, dtb) = (triple[0], triple[1], triple[2]);
        let span = (gacb as usize + aab as usize) * stride + dtb as usize;
        let end = cursor + span;
        if end > payload.len() {
            return Err(ProtocolError::LengthMismatch {
                expected: end,
                actual: payload.len(),
            });
        }
        entries.push(FilteredResponseDet::from_bytes(
            &payload[cursor..end],
            gacb,
            aab,
            dtb,
        )?);
        cursor = end;
    }
    if cursor != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: cursor,
            actual: payload.len(),
        });
    }
    Ok(entries)
}

fn merge_entry<C: CurveGroup, P: ProofRecorder<C>, R: Rng>(
    map: &mut GroupedData<C>,
    key: GroupingKey,
    mut incoming: FilteredResponse<C>,
    collective_key: C,
    recorder: &P,
    rng: &mut R,
) -> Result<(), ProtocolError> {
    match map.entry(key.clone()) {
        Entry::Occupied(mut slot) => {
            let existing = slot.get_mut();
            let width = existing
                .aggregating_attributes
                .len()
                .max(incoming.aggregating_attributes.len());
            existing
                .aggregating_attributes
                .pad_with_zeros(width, collective_key, rng);
            incoming
                .aggregating_attributes
                .pad_with_zeros(width, collective_key, rng);
            let merged = existing.add(&incoming)?;
            recorder.record(&key, &[existing.clone(), incoming], &merged);
            *existing = merged;
        }
        Entry::Vacant(slot) => {
            slot.insert(incoming);
        }
    }
    Ok(())
}

impl<C: CurveGroup, T: Transport, P: ProofRecorder<C>> AggregationNode<C, T, P> {
    /// Run this server's part of the aggregation. Returns the final bucket
    /// map at the root, `None` everywhere else.
    pub async fn run(
        self,
        data: AggregationData<C>,
    ) -> Result<Option<GroupedData<C>>, ProtocolError> {
        let mut map = data.into_map()?;
        let mut rng = StdRng::from_entropy();

        // Announcement sweeps down the tree before any data moves up.
        if let Some(parent) = &self.parent {
            let frame = self
                .transport
                .recv(&format!("aggregation announcement from {parent}"))
                .await?;
            if frame.kind != AGG_ANNOUNCE {
                return Err(ProtocolError::MalformedData(format!(
                    "expected an announcement, got frame kind {}",
                    frame.kind
                )));
            }
        }
        for child in &self.children {
            self.transport
                .send(child, AGG_ANNOUNCE, Vec::new())
                .await?;
        }

        // Children's headers and payloads arrive interleaved on one inbox.
        if !self.children.is_empty() {
            let mut pending: HashMap<String, (Option<Vec<u8>>, Option<Vec<u8>>)> = self
                .children
                .iter()
                .map(|c| (c.clone(), (None, None)))
                .collect();
            while pending.values().any(|(h, p)| h.is_none() || p.is_none()) {
                let frame = self.transport.recv("aggregated data from children").await?;
                let slot = pending.get_mut(&frame.from).ok_or_else(|| {
                    ProtocolError::MalformedData(format!(
                        "unexpected aggregation frame from {}",
                        frame.from
                    ))
                })?;
                match frame.kind {
                    AGG_HEADER => slot.0 = Some(frame.bytes),
                    AGG_PAYLOAD => slot.1 = Some(frame.bytes),
                    other => {
                        return Err(ProtocolError::MalformedData(format!(
                            "unexpected aggregation frame kind {other}"
                        )));
                    }
                }
            }
            for (child, (header, payload)) in pending {
                // Both sides are present; the loop above guarantees it.
                let (header, payload) = (header.unwrap_or_default(), payload.unwrap_or_default());
                let entries = decode_grouped::<C>(&header, &payload)?;
                tracing::debug!(
                    target: LOG_TARGET,
                    child = %child,
                    buckets = entries.len(),
                    "merging child contribution"
                );
                for entry in entries {
                    merge_entry(
                        &mut map,
                        entry.det_tag_group_by,
                        entry.fr,
                        self.collective_key,
                        &self.recorder,
                        &mut rng,
                    )?;
                }
            }
        }

        match &self.parent {
            Some(parent) => {
                let (header, payload) = encode_grouped(&map)?;
                self.transport.send(parent, AGG_HEADER, header).await?;
                self.transport.send(parent, AGG_PAYLOAD, payload).await?;
                Ok(None)
            }
            None => {
                tracing::info!(target: LOG_TARGET, buckets = map.len(), "aggregation complete");
                Ok(Some(map))
            }
        }
    }
}
