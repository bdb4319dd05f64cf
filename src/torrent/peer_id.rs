use rand::distributions::{Alphanumeric, DistString};
use serde::Serialize;
use std::fmt;

/// 20 byte identity announced in the handshake and to the tracker.
#[derive(Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PeerId([u8; Self::PEER_ID_SIZE]);

impl AsRef<[u8; Self::PEER_ID_SIZE]> for PeerId {
    fn as_ref(&self) -> &[u8; Self::PEER_ID_SIZE] {
        &self.0
    }
}

impl PeerId {
    pub const PEER_ID_SIZE: usize = 20;
    pub const CLIENT_PREFIX: &'static [u8; 8] = b"-CX0000-";
    pub const SUFFIX_LEN: usize = Self::PEER_ID_SIZE - Self::CLIENT_PREFIX.len();

    pub fn new(bytes: [u8; Self::PEER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn with_suffix(suffix: &[u8; Self::SUFFIX_LEN]) -> Self {
        let mut peer_id = [0; Self::PEER_ID_SIZE];

        let (prefix, rest) = peer_id.split_at_mut(Self::CLIENT_PREFIX.len());
        prefix.copy_from_slice(Self::CLIENT_PREFIX);
        rest.copy_from_slice(suffix);

        Self(peer_id)
    }

    /// our own id for a download session: the client prefix plus random alphanumerics.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let suffix = Alphanumeric.sample_string(&mut rng, Self::SUFFIX_LEN);

        let mut suffix_bytes = [0u8; Self::SUFFIX_LEN];
        // Alphanumeric only yields ascii, one byte per char.
        suffix_bytes.copy_from_slice(&suffix.as_bytes()[..Self::SUFFIX_LEN]);

        Self::with_suffix(&suffix_bytes)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // peer ids are usually ascii client tags, fall back to escapes otherwise.
        for byte in self.0 {
            write!(f, "{}", std::ascii::escape_default(byte))?;
        }
        Ok(())
    }
}
