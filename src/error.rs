use thiserror::Error;

/// Failure taxonomy for the protocol suite.
///
/// A proof that verifies to `false` is *not* an error: verification routines
/// return `Ok(false)` for invalid transcripts so that callers can tell
/// adversarial input apart from broken rounds.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{node} didn't get the <{expecting}> on time")]
    Timeout { node: String, expecting: String },

    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("proof construction failed: {0}")]
    Proof(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] ark_serialize::SerializationError),

    #[error("plaintext out of decryptable range")]
    PlaintextOutOfRange,
}
