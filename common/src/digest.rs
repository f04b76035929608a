use std::fmt::{self, Debug, Display};

use serde::{Serialize, Serializer};
use sha1::{Digest, Sha1};

const BASE32: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// A finalized SHA-1 digest in the form WARC records carry: `sha1:` followed
/// by the RFC 4648 upper-case base32 of the raw 20 bytes. 160 bits align on
/// the base32 quantum, so no padding ever appears.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Sha1Digest([u8; 20]);

impl Sha1Digest {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_base32(&self) -> String {
        base32::encode(BASE32, &self.0)
    }

    /// Compares against either the bare base32 form or the `sha1:`-prefixed one.
    pub fn matches(&self, other: &str) -> bool {
        let bare = other.strip_prefix("sha1:").unwrap_or(other);
        bare == self.to_base32()
    }
}

impl Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha1:{}", self.to_base32())
    }
}

impl Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl PartialEq<str> for Sha1Digest {
    fn eq(&self, other: &str) -> bool {
        self.matches(other)
    }
}

impl Serialize for Sha1Digest {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_string())
    }
}

/// Incremental SHA-1 over a byte stream.
#[derive(Clone, Default)]
pub struct Digester {
    inner: Sha1,
}

impl Digester {
    pub fn new() -> Digester {
        Digester { inner: Sha1::new() }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> Sha1Digest {
        Sha1Digest(self.inner.finalize().into())
    }
}

pub fn sha1_of(bytes: &[u8]) -> Sha1Digest {
    let mut digester = Digester::new();
    digester.update(bytes);
    digester.finalize()
}
