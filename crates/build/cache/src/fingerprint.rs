//! Content fingerprints used as cache-validity keys.
//!
//! A fingerprint is a SHA-256 digest over the full contents of an ordered
//! list of files. Each readable file contributes its byte length followed by
//! its bytes, so moving bytes from one file to the next changes the digest.
//! Unreadable or missing files contribute nothing: a wiped output directory
//! must show up as a fingerprint mismatch, not as an error.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A hex-encoded SHA-256 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex digest, e.g. one read back from the cache index.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint the given files, in order.
pub fn fingerprint<P: AsRef<Path>>(files: &[P]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for path in files {
        let path = path.as_ref();
        match read_all(path) {
            Ok(data) => {
                hasher.update((data.len() as u64).to_le_bytes());
                hasher.update(&data);
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "fingerprint input unreadable, skipped");
            }
        }
    }
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Hash the compiler identity and the ordered classpath into one digest.
///
/// Stored in the cache index; a change means every cached artifact was built
/// against a different toolchain or library set.
pub fn environment_hash(compiler_identity: &[u8], classpath: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(compiler_identity);
    for entry in classpath {
        hasher.update(b"\0");
        hasher.update(entry.as_os_str().as_encoded_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn read_all(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(data)
}
