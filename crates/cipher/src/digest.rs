use sha1::{Digest, Sha1};

/// Hex encoded SHA-1 of the raw SHA-1 digest of `input`.
///
/// The value is stable across processes and is used as the file stem for download
/// bundles, so it must not change between releases.
pub fn string_to_sha1(input: &str) -> String {
    let inner = Sha1::digest(input.as_bytes());
    hex::encode(Sha1::digest(inner))
}
