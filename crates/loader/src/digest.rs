//! Content digests in OCI `algorithm:hex` form.

use sha2::{Digest, Sha256, Sha512};

use crate::{Error, Result};

/// Compute the SHA256 digest of `bytes` as `sha256:<hex>`.
#[must_use]
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Check that `digest` is a supported `algorithm:hex` digest and split it.
///
/// Only sha256 and sha512 are accepted, with a hex part of the matching
/// length. The hex part is safe to use as a single path component.
pub fn validate_digest(digest: &str) -> Result<(&str, &str)> {
    let (algo, hash) = digest
        .split_once(':')
        .ok_or_else(|| Error::invalid_digest(digest, "expected <algorithm>:<hex>"))?;

    let expected_len = match algo {
        "sha256" => 64,
        "sha512" => 128,
        other => {
            return Err(Error::invalid_digest(
                digest,
                format!("unsupported algorithm '{other}'"),
            ));
        }
    };

    if hash.len() != expected_len || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_digest(
            digest,
            format!("{algo} digests are {expected_len} hex characters"),
        ));
    }

    Ok((algo, hash))
}

/// Check that `bytes` hash to `expected`.
pub fn verify_digest(expected: &str, bytes: &[u8]) -> Result<()> {
    let (algo, hash) = validate_digest(expected)?;
    let computed = if algo == "sha512" {
        hex::encode(Sha512::digest(bytes))
    } else {
        hex::encode(Sha256::digest(bytes))
    };

    if computed.eq_ignore_ascii_case(hash) {
        Ok(())
    } else {
        Err(Error::digest_mismatch(expected, format!("{algo}:{computed}")))
    }
}
