use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::StorageError;

/// Content hash families the backends verify with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn hasher(self) -> ContentHasher {
        ContentHasher::new(self)
    }

    /// Hex digest of a complete buffer
    pub fn digest(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(StorageError::unsupported(format!("hash algorithm '{other}'"))),
        }
    }
}

/// Rolling hash fed chunk by chunk during a transfer
pub enum ContentHasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => ContentHasher::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            ContentHasher::Md5(_) => HashAlgorithm::Md5,
            ContentHasher::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Md5(ctx) => ctx.consume(data),
            ContentHasher::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Lowercase hex digest
    pub fn finalize(self) -> String {
        match self {
            ContentHasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            ContentHasher::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentHasher").field(&self.algorithm()).finish()
    }
}

/// Case-insensitive comparison of two hex digests
pub fn same_digest(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(HashAlgorithm::Md5.digest(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            HashAlgorithm::Sha256.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn rolling_hash_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Sha256] {
            let mut hasher = algorithm.hasher();
            for chunk in data.chunks(333) {
                hasher.update(chunk);
            }
            assert_eq!(hasher.finalize(), algorithm.digest(&data));
        }
    }

    #[test]
    fn digest_comparison_ignores_case() {
        assert!(same_digest("ABCDEF", "abcdef"));
        assert!(!same_digest("abcdef", "abcdee"));
    }
}
