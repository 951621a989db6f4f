//! The ciphertext algebra and record structures the protocols operate on.

pub mod elgamal;
pub mod encoding;
pub mod parallel;
pub mod records;
pub mod transcript;

pub use elgamal::*;
pub use records::*;
