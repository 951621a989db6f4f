//! Protocol-wide tunables.

use std::time::Duration;

/// Number of vector elements handed to one worker of the bounded pool.
///
/// Vector-valued cryptographic operations are split into chunks of this size
/// before being fanned out; the value trades parallel overhead against
/// throughput for typical record widths.
pub const CHUNK_SIZE: usize = 16;

/// Bound on the brute-force discrete-log search used by integer decryption.
/// Aggregates are small counts, so the window stays narrow.
pub const MAX_HOMOMORPHIC_INT: u64 = 100_000;

/// How long a protocol node waits on an expected message before failing the
/// round.
pub const PROTOCOL_TIMEOUT: Duration = Duration::from_secs(10);
