//! Checksum pinning for validation references.
//!
//! A reference may end in `@<hex digest>`; the digest length selects the
//! algorithm (32 MD5, 40 SHA-1, 64 SHA-256, 128 SHA-512).

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::ResolutionError;
use crate::ResolutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Select the algorithm producing digests of `len` hex characters.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Algorithm::Md5),
            40 => Some(Algorithm::Sha1),
            64 => Some(Algorithm::Sha256),
            128 => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    /// Lowercase hex digest of `data`.
    pub fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Algorithm::Md5 => hex::encode(Md5::digest(data)),
            Algorithm::Sha1 => hex::encode(Sha1::digest(data)),
            Algorithm::Sha256 => hex::encode(Sha256::digest(data)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Algorithm::Md5),
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(format!("unknown checksum algorithm: {other}")),
        }
    }
}

/// Split a trailing `@<hex>` checksum off a reference.
///
/// The suffix only counts as a checksum when it is non-empty hex, so
/// `https://user@host/v.yaml` stays intact.
pub fn split_checksum(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once('@') {
        Some((target, suffix))
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            (target, Some(suffix))
        }
        _ => (reference, None),
    }
}

/// Check `data` against `expected`, comparing hex case-insensitively.
pub fn verify(data: &[u8], expected: &str) -> ResolutionResult<()> {
    let algorithm = Algorithm::from_hex_len(expected.len()).ok_or(
        ResolutionError::UnsupportedAlgorithm {
            length: expected.len(),
        },
    )?;
    let actual = algorithm.digest_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ResolutionError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
