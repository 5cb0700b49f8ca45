//! Streaming content hashing.
//!
//! Computes any subset of the supported digest algorithms over a file in a
//! single read pass. A missing or non-regular file is a normal outcome
//! (`Ok(None)`), not an error: files vanishing mid-batch is expected during
//! long runs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use digest::Digest;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::{PreserveError, Result};

/// Buffer size for hashing I/O (128KB, same as the copy path)
const BUFFER_SIZE: usize = 128 * 1024;

/// Digest algorithms recorded in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA1")]
    Sha1,
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA512")]
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
    ];

    /// Canonical name as written into manifest `hashes` keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Parse a manifest key or CLI value. Case-insensitive, tolerates the
    /// dashed spellings ("sha-256").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Some(HashAlgorithm::Md5),
            "SHA1" => Some(HashAlgorithm::Sha1),
            "SHA256" => Some(HashAlgorithm::Sha256),
            "SHA512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown hash algorithm: {s}"))
    }
}

/// In-flight digest state, one variant per algorithm.
enum HasherState {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HasherState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            HasherState::Md5(state) => state.update(data),
            HasherState::Sha1(state) => state.update(data),
            HasherState::Sha256(state) => state.update(data),
            HasherState::Sha512(state) => state.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            HasherState::Md5(state) => state.finalize().as_slice().to_vec(),
            HasherState::Sha1(state) => state.finalize().as_slice().to_vec(),
            HasherState::Sha256(state) => state.finalize().as_slice().to_vec(),
            HasherState::Sha512(state) => state.finalize().as_slice().to_vec(),
        }
    }
}

/// Hex digests keyed by algorithm name, as stored in the manifest.
pub type HashMap = BTreeMap<String, String>;

/// Hash a file with every requested algorithm in one streaming pass.
///
/// Returns `Ok(None)` when the path does not name a regular file. Duplicate
/// algorithms in the request are computed once.
pub fn digest_file(path: &Path, algorithms: &[HashAlgorithm]) -> Result<Option<HashMap>> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PreserveError::io(path, e)),
    }

    let mut requested: Vec<HashAlgorithm> = Vec::new();
    for alg in algorithms {
        if !requested.contains(alg) {
            requested.push(*alg);
        }
    }

    let file = match File::open(path) {
        Ok(f) => f,
        // Vanished between the metadata check and the open
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PreserveError::io(path, e)),
    };

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut states: Vec<(HashAlgorithm, HasherState)> = requested
        .iter()
        .map(|alg| (*alg, HasherState::new(*alg)))
        .collect();

    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| PreserveError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        for (_, state) in states.iter_mut() {
            state.update(&buffer[..bytes_read]);
        }
    }

    let mut hashes = HashMap::new();
    for (alg, state) in states {
        hashes.insert(alg.as_str().to_string(), hex::encode(state.finalize()));
    }

    Ok(Some(hashes))
}
