use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct InfoHash([u8; Self::INFO_HASH_SIZE]);

impl InfoHash {
    pub const INFO_HASH_SIZE: usize = sha1_smol::DIGEST_LENGTH;

    pub fn new(bytes: [u8; Self::INFO_HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8; Self::INFO_HASH_SIZE]> for InfoHash {
    fn as_ref(&self) -> &[u8; Self::INFO_HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash(")?;
        self.0.iter().try_for_each(|byte| write!(f, "{byte:02x}"))?;
        write!(f, ")")
    }
}
