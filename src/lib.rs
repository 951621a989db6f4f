//! Collective computation of aggregate statistics over encrypted records.
//!
//! The building blocks, bottom up:
//! - [`crypto`]: additively homomorphic ElGamal over any [`ark_ec::CurveGroup`],
//!   plus the record structures and Fiat-Shamir transcript the proofs use.
//! - [`shuffle`]: verifiable permutation + rerandomization of record batches.
//! - [`tagging`]: distributed deterministic tagging, mapping equal plaintexts
//!   onto equal pseudonymous tags without decryption.
//! - [`protocols`]: the interactive layers gluing a set of servers together,
//!   a shuffle+tag ring and collective tree aggregation.

pub mod config;
pub mod crypto;
pub mod crypto_serde;
pub mod error;
pub mod protocols;
pub mod shuffle;
pub mod tagging;

pub use crypto::elgamal::{CipherText, CipherVector, KeyPair};
pub use crypto::records::{FilteredResponse, FilteredResponseDet, GroupingKey};
pub use error::ProtocolError;
