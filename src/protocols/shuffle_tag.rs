//! Ring protocol combining the verifiable shuffle with distributed
//! deterministic tagging.
//!
//! The root seeds the ring with the encrypted grouping vectors and the
//! collective key. Each node in ring order shuffles the batch under the
//! remaining encryption key, folds in its session secret and runs its
//! tagging pass, then forwards the batch with its own key share subtracted
//! from the shuffling key. The root processes last; by then every key share
//! has been stripped and the C components are the deterministic tags.

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::crypto::elgamal::{
    cipher_vectors_from_bytes, cipher_vectors_to_bytes, point_byte_size, CipherVector, KeyPair,
};
use crate::crypto::records::DeterministicCipherVector;
use crate::error::ProtocolError;
use crate::protocols::transport::Transport;
use crate::shuffle::{
    prove_shuffle, shuffle_sequence, verify_shuffle, CipherVectorScalar, ShuffleProof,
};
use crate::tagging::{
    add_session_secret_vector, into_deterministic, prove_tag_addition, prove_tag_creation_vector,
    tag_cipher_vector, verify_tag_addition_list, verify_tag_creation_list, TagAdditionProof,
    TagCreationProof,
};

const LOG_TARGET: &str = "veilstats::protocols::shuffle_tag";

/// Length header for the in-flight batch: the element count of each cipher
/// vector. Always sent immediately before the matching payload frame.
pub const RING_HEADER: u8 = 0;
/// The batch itself: row-major ciphertext bytes followed by the compressed
/// shuffling key.
pub const RING_PAYLOAD: u8 = 1;

/// Everything one server publishes about its own pass, enough for an
/// auditor to replay the hop.
#[derive(Clone, Debug)]
pub struct NodeProofs<C: CurveGroup> {
    pub shuffle: ShuffleProof<C>,
    pub after_addition: Vec<CipherVector<C>>,
    pub after_tagging: Vec<CipherVector<C>>,
    pub additions: Vec<Vec<TagAdditionProof<C>>>,
    pub creations: Vec<Vec<TagCreationProof<C>>>,
}

/// Result of one node's participation in the pipeline. `tags` is populated
/// at the root only.
#[derive(Debug)]
pub struct ShuffleTagOutcome<C: CurveGroup> {
    pub proofs: Option<NodeProofs<C>>,
    pub tags: Option<Vec<DeterministicCipherVector<C>>>,
}

/// One server's view of the ring.
pub struct ShuffleTagNode<C: CurveGroup, T: Transport> {
    pub transport: T,
    /// Node names in processing order; index 0 is the root, which seeds the
    /// ring and processes last.
    pub ring: Vec<String>,
    pub position: usize,
    pub keys: KeyPair<C>,
    pub collective_key: C,
    /// Per-query session secret. Tags are reproducible across repeated
    /// queries only when every server supplies the same secret for the
    /// same session.
    pub session_secret: C::ScalarField,
    pub proofs_enabled: bool,
    pub precomputed: Option<Vec<CipherVectorScalar<C>>>,
}

fn encode_batch<C: CurveGroup>(
    data: &[CipherVector<C>],
    shuffling_key: C,
) -> Result<(Vec<u8>, Vec<u8>), ProtocolError> {
    let (mut payload, lengths) = cipher_vectors_to_bytes(data)?;
    let mut header = Vec::new();
    lengths.serialize_compressed(&mut header)?;
    shuffling_key.serialize_compressed(&mut payload)?;
    Ok((header, payload))
}

fn decode_batch<C: CurveGroup>(
    header: &[u8],
    payload: &[u8],
) -> Result<(Vec<CipherVector<C>>, C), ProtocolError> {
    let lengths: Vec<u32> = Vec::deserialize_compressed(header)?;
    let key_bytes = point_byte_size::<C>();
    if payload.len() < key_bytes {
        return Err(ProtocolError::MalformedData(format!(
            "ring payload of {} bytes cannot hold a shuffling key",
            payload.len()
        )));
    }
    let split = payload.len() - key_bytes;
    let data = cipher_vectors_from_bytes(&payload[..split], &lengths)?;
    let shuffling_key = C::deserialize_compressed(&payload[split..])?;
    Ok((data, shuffling_key))
}

impl<C: CurveGroup, T: Transport> ShuffleTagNode<C, T> {
    /// Run this node's part of the pipeline. The root passes the query data
    /// in `input`; every other node passes `None`.
    pub async fn run(
        self,
        input: Option<Vec<CipherVector<C>>>,
    ) -> Result<ShuffleTagOutcome<C>, ProtocolError> {
        let n = self.ring.len();
        if n == 0 || self.position >= n {
            return Err(ProtocolError::InvalidConfiguration(
                "ring position out of range",
            ));
        }
        if self.ring[self.position] != self.transport.local_name() {
            return Err(ProtocolError::InvalidConfiguration(
                "transport name does not match the ring position",
            ));
        }
        let is_root = self.position == 0;
        let successor = self.ring[(self.position + 1) % n].clone();
        let predecessor = self.ring[(self.position + n - 1) % n].clone();

        match (is_root, input) {
            (true, Some(data)) => {
                if data.is_empty() {
                    return Err(ProtocolError::InvalidConfiguration(
                        "the pipeline needs at least one record",
                    ));
                }
                tracing::info!(
                    target: LOG_TARGET,
                    records = data.len(),
                    ring = n,
                    "seeding shuffle+tag ring"
                );
                let (header, payload) = encode_batch(&data, self.collective_key)?;
                self.transport.send(&successor, RING_HEADER, header).await?;
                self.transport
                    .send(&successor, RING_PAYLOAD, payload)
                    .await?;
            }
            (true, None) => {
                return Err(ProtocolError::InvalidConfiguration(
                    "the root node must hold the query data",
                ));
            }
            (false, Some(_)) => {
                return Err(ProtocolError::InvalidConfiguration(
                    "only the root node seeds the pipeline",
                ));
            }
            (false, None) => {}
        }

        let header = self
            .transport
            .recv(&format!("ring length header from {predecessor}"))
            .await?;
        if header.kind != RING_HEADER {
            return Err(ProtocolError::MalformedData(format!(
                "expected a ring length header, got frame kind {}",
                header.kind
            )));
        }
        let payload = self
            .transport
            .recv(&format!("ring payload from {predecessor}"))
            .await?;
        if payload.kind != RING_PAYLOAD {
            return Err(ProtocolError::MalformedData(format!(
                "expected a ring payload, got frame kind {}",
                payload.kind
            )));
        }
        let (data, shuffling_key) = decode_batch::<C>(&header.bytes, &payload.bytes)?;

        let mut rng = StdRng::from_entropy();
        let base = C::generator();

        let shuffled = shuffle_sequence(
            &data,
            base,
            shuffling_key,
            self.precomputed.as_deref(),
            &mut rng,
        )?;

        let secret = self.session_secret;
        let after_addition: Vec<CipherVector<C>> = shuffled
            .shuffled
            .iter()
            .map(|cv| add_session_secret_vector(cv, secret, base))
            .collect();
        let after_tagging: Vec<CipherVector<C>> = after_addition
            .iter()
            .map(|cv| tag_cipher_vector(cv, self.keys.private, secret))
            .collect();

        let proofs = if self.proofs_enabled {
            let shuffle = prove_shuffle(
                &data,
                &shuffled.shuffled,
                base,
                shuffling_key,
                &shuffled.beta,
                &shuffled.permutation,
                &mut rng,
            )?;
            let additions: Vec<Vec<TagAdditionProof<C>>> = shuffled
                .shuffled
                .iter()
                .zip(after_addition.iter())
                .map(|(before, after)| {
                    before
                        .iter()
                        .zip(after.iter())
                        .map(|(b, a)| prove_tag_addition(b, a, base, secret, &mut rng))
                        .collect()
                })
                .collect();
            let creations: Vec<Vec<TagCreationProof<C>>> = after_addition
                .iter()
                .zip(after_tagging.iter())
                .map(|(before, after)| {
                    prove_tag_creation_vector(
                        &before.0,
                        &after.0,
                        base,
                        self.keys.private,
                        secret,
                        &mut rng,
                    )
                })
                .collect::<Result<_, _>>()?;
            Some(NodeProofs {
                shuffle,
                after_addition: after_addition.clone(),
                after_tagging: after_tagging.clone(),
                additions,
                creations,
            })
        } else {
            None
        };

        if is_root {
            tracing::info!(
                target: LOG_TARGET,
                records = after_tagging.len(),
                "ring complete, emitting deterministic tags"
            );
            let tags = after_tagging.iter().map(into_deterministic).collect();
            Ok(ShuffleTagOutcome {
                proofs,
                tags: Some(tags),
            })
        } else {
            // Our key share is stripped from the batch now, so the remaining
            // servers shuffle under the collective key minus ours.
            let next_key = shuffling_key - self.keys.public;
            let (header, payload) = encode_batch(&after_tagging, next_key)?;
            self.transport.send(&successor, RING_HEADER, header).await?;
            self.transport
                .send(&successor, RING_PAYLOAD, payload)
                .await?;
            Ok(ShuffleTagOutcome { proofs, tags: None })
        }
    }
}

/// Replay one server's published pass: shuffle argument, session-secret
/// additions and tagging steps, checking `fraction` of each proof list.
pub fn verify_node_proofs<C: CurveGroup>(
    proofs: &NodeProofs<C>,
    shuffle_seed: &C,
    node_public: C,
    fraction: f64,
) -> Result<bool, ProtocolError> {
    let rows = proofs.shuffle.shuffled.len();
    if proofs.after_addition.len() != rows
        || proofs.after_tagging.len() != rows
        || proofs.additions.len() != rows
        || proofs.creations.len() != rows
    {
        return Err(ProtocolError::LengthMismatch {
            expected: rows,
            actual: proofs.after_addition.len().min(proofs.after_tagging.len()),
        });
    }
    let base = C::generator();
    let mut ok = verify_shuffle(&proofs.shuffle, shuffle_seed)?;
    for i in 0..rows {
        ok &= verify_tag_addition_list(
            &proofs.additions[i],
            &proofs.shuffle.shuffled[i].0,
            &proofs.after_addition[i].0,
            base,
            fraction,
        )?;
        ok &= verify_tag_creation_list(
            &proofs.creations[i],
            &proofs.after_addition[i].0,
            &proofs.after_tagging[i].0,
            base,
            node_public,
            fraction,
        )?;
    }
    Ok(ok)
}
