//! Security utilities covering HTTPS enforcement and credential fingerprinting.
//!
//! Credentials must never appear in logs or `Debug` output. Everything that needs to identify a
//! credential (log lines, status reports) uses [`fingerprint`] instead of the value.

// crates.io
use base64::prelude::*;
use sha2::{Digest, Sha256};
use url::Url;
// self
use crate::_prelude::*;

/// Number of base64 characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 12;

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Upstream URL {url} must use HTTPS.")))
	}
}

/// Short, stable, non-reversible identifier for a secret value.
pub fn fingerprint(secret: &str) -> String {
	let digest = Sha256::digest(secret.as_bytes());
	let mut encoded = BASE64_URL_SAFE_NO_PAD.encode(digest);

	encoded.truncate(FINGERPRINT_LEN);

	encoded
}
