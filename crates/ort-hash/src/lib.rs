//! Object identity for the ort merge engine.
//!
//! Provides the [`ObjectId`] content-hash type, the [`HashAlgorithm`]
//! selector, hex encoding/decoding, and a streaming [`Hasher`] used to
//! compute ids for blob and tree objects written by the merge.

mod algorithm;
mod error;
pub mod hasher;
pub mod hex;
mod oid;

pub use algorithm::HashAlgorithm;
pub use error::HashError;
pub use hasher::Hasher;
pub use oid::ObjectId;
