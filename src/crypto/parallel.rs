//! Chunked fan-out helpers for vector-valued cryptographic operations.
//!
//! Work is partitioned into [`CHUNK_SIZE`] slices and processed on rayon's
//! bounded pool; every call joins all workers before returning, so no task
//! outlives the operation that spawned it.

use rayon::prelude::*;

use crate::config::CHUNK_SIZE;
use crate::error::ProtocolError;

/// Apply `f` to every element, preserving order.
pub fn map_chunked<T, U, F>(items: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync,
{
    if items.len() <= CHUNK_SIZE {
        return items.iter().map(&f).collect();
    }
    items
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| chunk.iter().map(&f).collect::<Vec<_>>())
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Apply `f` pairwise over two equally long slices, preserving order.
///
/// Unequal lengths are a caller bug and fail fast; there is no implicit
/// truncation.
pub fn zip_map_chunked<A, B, U, F>(a: &[A], b: &[B], f: F) -> Result<Vec<U>, ProtocolError>
where
    A: Sync,
    B: Sync,
    U: Send,
    F: Fn(&A, &B) -> U + Sync,
{
    if a.len() != b.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    if a.len() <= CHUNK_SIZE {
        return Ok(a.iter().zip(b.iter()).map(|(x, y)| f(x, y)).collect());
    }
    let out = a
        .par_chunks(CHUNK_SIZE)
        .zip(b.par_chunks(CHUNK_SIZE))
        .map(|(ca, cb)| {
            ca.iter()
                .zip(cb.iter())
                .map(|(x, y)| f(x, y))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    Ok(out.into_iter().flatten().collect())
}

/// Mutate every element in place through `f`, chunked like [`map_chunked`].
pub fn for_each_chunked_mut<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    if items.len() <= CHUNK_SIZE {
        items.iter_mut().for_each(&f);
        return;
    }
    items
        .par_chunks_mut(CHUNK_SIZE)
        .for_each(|chunk| chunk.iter_mut().for_each(&f));
}
