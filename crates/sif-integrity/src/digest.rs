//! Hash plumbing over the closed set of hash types the format can record.

use std::io::Read;

use blake2::{Blake2b512, Blake2s256};
use digest::{Digest as _, DynDigest};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use sif::HashType;

use crate::{Error, Result};

fn hasher(hash: HashType) -> Box<dyn DynDigest> {
    match hash {
        HashType::Sha256 => Box::new(Sha256::new()),
        HashType::Sha384 => Box::new(Sha384::new()),
        HashType::Sha512 => Box::new(Sha512::new()),
        HashType::Blake2s => Box::new(Blake2s256::new()),
        HashType::Blake2b => Box::new(Blake2b512::new()),
    }
}

/// The JSON name of a hash type.
pub(crate) fn hash_name(hash: HashType) -> &'static str {
    match hash {
        HashType::Sha256 => "sha256",
        HashType::Sha384 => "sha384",
        HashType::Sha512 => "sha512",
        HashType::Blake2s => "blake2s",
        HashType::Blake2b => "blake2b",
    }
}

pub(crate) fn hash_from_name(name: &str) -> Option<HashType> {
    Some(match name {
        "sha256" => HashType::Sha256,
        "sha384" => HashType::Sha384,
        "sha512" => HashType::Sha512,
        "blake2s" => HashType::Blake2s,
        "blake2b" => HashType::Blake2b,
        _ => return None,
    })
}

/// Streams `r` through the given hash function.
pub(crate) fn digest_reader(hash: HashType, mut r: impl Read) -> Result<Vec<u8>> {
    let mut h = hasher(hash);
    let mut buf = [0u8; 32 * 1024];
    loop {
        match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => h.update(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(h.finalize().to_vec())
}

/// Incremental hashing over several payload streams, used by the legacy
/// signature scheme which covers concatenated payloads.
pub(crate) struct Hasher(Box<dyn DynDigest>);

impl Hasher {
    pub(crate) fn new(hash: HashType) -> Self {
        Hasher(hasher(hash))
    }

    pub(crate) fn update_reader(&mut self, mut r: impl Read) -> Result<()> {
        let mut buf = [0u8; 32 * 1024];
        loop {
            match r.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => self.0.update(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn finalize(self) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

/// A named hash over one object payload, as embedded in signed messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDigest {
    /// Hash algorithm name (`sha256`, `sha384`, ...).
    #[serde(rename = "Alg")]
    pub alg: String,
    /// Lowercase hex digest value.
    #[serde(rename = "Value")]
    pub value: String,
}

impl ObjectDigest {
    /// Computes the digest of `r` with `hash`.
    pub(crate) fn compute(hash: HashType, r: impl Read) -> Result<Self> {
        Ok(ObjectDigest {
            alg: hash_name(hash).into(),
            value: hex::encode(digest_reader(hash, r)?),
        })
    }

    /// Recomputes the digest over `r` and compares it to the recorded
    /// value.
    pub(crate) fn verify(&self, r: impl Read) -> Result<()> {
        let hash = hash_from_name(&self.alg).ok_or(Error::DigestMismatch)?;
        let got = hex::encode(digest_reader(hash, r)?);
        if got != self.value.to_lowercase() {
            return Err(Error::DigestMismatch);
        }
        Ok(())
    }
}
