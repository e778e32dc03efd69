#![deny(clippy::uninlined_format_args)]
#![deny(clippy::unwrap_used)]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use color_eyre::{eyre::eyre, Result};
use derive_more::derive::{Debug, Display};
use std::str::FromStr;
use strum::AsRefStr;

pub mod backend;
pub mod fsx;
pub mod message;
pub mod pool;
pub mod tool;
pub mod worker;

/// A content digest over a file's bytes.
///
/// The pool addresses entries by the lowercase hex form of this digest,
/// so pool filenames are always 64 hex characters with no separators.
///
/// ```
/// # use std::str::FromStr;
/// let digest = lethe_lib::Digest::from_str("a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4").expect("parse digest");
/// assert_eq!(digest.as_hex(), "a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4");
/// ```
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[debug("{}", self.as_hex())]
#[display("{}", self.as_hex())]
pub struct Digest {
    hash: Vec<u8>,
}

impl Digest {
    /// Returns the hash as a lowercase hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    /// Create an instance from raw SHA-256 output.
    pub fn from_hash(hash: impl Into<Vec<u8>>) -> Self {
        Self { hash: hash.into() }
    }
}

impl FromStr for Digest {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s)
            .map(Self::from_hash)
            .map_err(|e| eyre!("invalid hex string: {e}"))
    }
}

/// Outcome reported for one processed extraction request.
///
/// The two success variants imply the status message's `outputFilePath` points
/// at a readable file; every other variant implies it is null.
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsRefStr, serde::Serialize, serde::Deserialize)]
pub enum Status {
    /// The source bytes were copied verbatim to the destination.
    Copied,

    /// A de-identified variant was produced at the destination.
    Anonymised,

    /// The source file could not be found under the filesystem root.
    FileMissing,

    /// A failure that redelivery cannot fix.
    ErrorWontRetry,
}

impl Status {
    /// Whether this status reports a materialised output.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Copied | Status::Anonymised)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}
