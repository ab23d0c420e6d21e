use digest::DynDigest;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::{Error, Result};

/// Digest algorithms this registry knows how to compute.
///
/// Other syntactically valid algorithms are accepted on read paths but
/// rejected for writes, since a blob can only be verified with an algorithm
/// the registry can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding of a digest produced by this algorithm.
    fn encoded_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    pub fn digester(&self) -> Digester {
        let inner: Box<dyn DynDigest + Send + Sync> = match self {
            DigestAlgorithm::Sha256 => Box::new(Sha256::new()),
            DigestAlgorithm::Sha512 => Box::new(Sha512::new()),
        };
        Digester {
            algorithm: *self,
            inner,
            bytes: 0,
        }
    }
}

impl TryFrom<&str> for DigestAlgorithm {
    type Error = Error;

    fn try_from(a: &str) -> Result<Self> {
        match a {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            s => Err(Error::UnsupportedDigestAlgorithm(String::from(s))),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// https://github.com/opencontainers/image-spec/blob/main/descriptor.md#digests
//
// Syntactic grammar first, semantic algorithm check second: `sha666:...` is
// unsupported, `sha256meow` is invalid.
static DIGEST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_+.-]+:[A-Fa-f0-9]+$").unwrap());

/// A content digest in `<algorithm>:<hex>` form.
///
/// Always refers to the exact bytes of the addressed object; a stored blob's
/// bytes hash to its identifier digest, and a manifest's digest is computed
/// over the bytes exactly as received on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    algorithm: DigestAlgorithm,
    encoded: String,
}

impl TryFrom<&str> for ContentDigest {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        if !DIGEST_RE.is_match(s) {
            return Err(Error::InvalidDigest(s.to_string()));
        }
        let (algo, encoded) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(s.to_string()))?;
        let algorithm = DigestAlgorithm::try_from(algo)?;
        if encoded.len() != algorithm.encoded_len() {
            return Err(Error::InvalidDigest(s.to_string()));
        }
        Ok(Self {
            algorithm,
            encoded: encoded.to_lowercase(),
        })
    }
}

impl std::str::FromStr for ContentDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s)
    }
}

impl From<&ContentDigest> for String {
    fn from(d: &ContentDigest) -> String {
        format!("{}:{}", d.algorithm, d.encoded)
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> String {
        String::from(&d)
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl ContentDigest {
    /// Digest the given bytes with the canonical algorithm (sha256).
    pub fn from_content(bs: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, bs);
        Self {
            algorithm: DigestAlgorithm::Sha256,
            encoded: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The hex-encoded hash without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn digester(&self) -> Digester {
        self.algorithm.digester()
    }
}

/// Incremental digest computation over a byte stream.
pub struct Digester {
    algorithm: DigestAlgorithm,
    inner: Box<dyn DynDigest + Send + Sync>,
    bytes: u64,
}

impl Digester {
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes digested so far.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest {
            algorithm: self.algorithm,
            encoded: hex::encode(self.inner.finalize()),
        }
    }

    pub fn state(&self) -> DigestState {
        DigestState {
            algorithm: self.algorithm,
            offset: self.bytes,
        }
    }
}

impl Default for Digester {
    fn default() -> Self {
        DigestAlgorithm::Sha256.digester()
    }
}

/// Checkpoint of an in-progress digest, persisted between chunked upload
/// requests. The hash compressor itself is not serializable, so the state
/// records how far into the upload the digest has progressed; a resume
/// replays any bytes past `offset` from the stored upload data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DigestState {
    pub algorithm: DigestAlgorithm,
    pub offset: u64,
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    const HELLO_SHA256: &str =
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[rstest]
    #[case::ok_sha256(HELLO_SHA256, true)]
    #[case::ok_sha512(
        "sha512:9b71d224bd62f3785d96d46ad3ea3d73319bfbc2890caadae2dff72519673ca72323c3d99ba5c11d7c7acc6e14b8c5da0c4663475c2e5c3adef46f73bcdec043",
        true
    )]
    #[case::unknown_algorithm("sha666:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", false)]
    #[case::missing_separator("sha256meow", false)]
    #[case::empty_hex("sha256:", false)]
    #[case::empty_algorithm(":meow", false)]
    #[case::truncated_hex("sha256:2cf24d", false)]
    #[case::nonhex("sha256:zzzzdba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", false)]
    fn parse(#[case] input: &str, #[case] ok: bool) {
        let actual = ContentDigest::try_from(input);
        assert_eq!(actual.is_ok(), ok, "{input}: {actual:?}");
        if let Ok(d) = actual {
            assert_eq!(String::from(&d), input.to_lowercase());
        }
    }

    #[test]
    fn digest_of_content() {
        let d = ContentDigest::from_content(b"hello");
        assert_eq!(String::from(&d), HELLO_SHA256);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut digester = DigestAlgorithm::Sha256.digester();
        digester.update(b"he");
        digester.update(b"llo");
        assert_eq!(digester.bytes(), 5);
        assert_eq!(digester.finalize(), ContentDigest::from_content(b"hello"));
    }

    #[test]
    fn state_round_trip() {
        let mut digester = Digester::default();
        digester.update(b"hello");
        let state = digester.state();
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: DigestState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.offset, 5);
        assert_eq!(decoded.algorithm, DigestAlgorithm::Sha256);
    }
}
