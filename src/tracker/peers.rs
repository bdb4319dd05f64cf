use crate::peers::PeerDescriptor;
use serde::de::{self, Visitor};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};

/// the compact peer list of a tracker response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddresses(Vec<SocketAddrV4>);

impl PeerAddresses {
    /// peers in announced order, numbered by their position.
    pub fn descriptors(&self) -> Vec<PeerDescriptor> {
        self.0
            .iter()
            .enumerate()
            .map(|(id, addr)| PeerDescriptor::new(*addr, id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for PeerAddresses {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(PeerAddresses(
            deserializer.deserialize_bytes(SocketAddressesVisitor)?,
        ))
    }
}

struct SocketAddressesVisitor;
impl SocketAddressesVisitor {
    const SOCKET_ADDR_SIZE_BYTES: usize = 6;
}

impl<'de> Visitor<'de> for SocketAddressesVisitor {
    type Value = Vec<SocketAddrV4>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str(
            "byte string of 6 byte peers, a 4 byte ipv4 address followed by a big endian port",
        )
    }

    fn visit_bytes<E>(self, bytes: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let addr_byte_chunks = bytes.chunks_exact(Self::SOCKET_ADDR_SIZE_BYTES);

        if !addr_byte_chunks.remainder().is_empty() {
            return Err(E::custom(
                "socket addresses byte string should have a length which is a multiple of 6",
            ));
        }

        let socket_addresses = addr_byte_chunks
            .map(|chunk| {
                let ip_addr = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddrV4::new(ip_addr, port)
            })
            .collect();

        Ok(socket_addresses)
    }
}
