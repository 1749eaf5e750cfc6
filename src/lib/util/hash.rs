//! Content-address hashing helpers.
//!
//! Grounded on `elba::retrieve::cache::Cache::get_src_dir`, which hashes a
//! package's name/location/version into a scratch-directory name. Used here
//! both for that purpose and for deriving the scratch-directory name for a
//! build from its build identifier (spec §4.I).

use sha2::{Digest, Sha256};

/// Lowercase hex-encode a digest.
pub fn hexify_hash(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Hash an arbitrary sequence of byte-convertible parts into a single hex
/// digest, used to derive a deterministic scratch-directory name from a
/// build identifier without leaking the identifier's slashes into a path.
pub fn hash_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::default();
    for part in parts {
        hasher.input(part.as_ref());
    }
    hexify_hash(hasher.result().as_slice())
}
