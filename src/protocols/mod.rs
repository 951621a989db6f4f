//! The interactive multi-server protocols: message transport, the
//! shuffle+tag ring and collective tree aggregation.

pub mod aggregation;
pub mod shuffle_tag;
pub mod transport;

pub use aggregation::{
    AggregationData, AggregationNode, GroupedData, NoopRecorder, ProofRecorder,
};
pub use shuffle_tag::{NodeProofs, ShuffleTagNode, ShuffleTagOutcome};
pub use transport::{Frame, LocalTransport, Transport};
