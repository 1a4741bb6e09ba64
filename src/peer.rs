//! Peer addresses.
//!
//! Trackers return peers in a compact binary list of 6-byte entries, an
//! IPv4 address followed by a big-endian port.

use crate::error::Error;

use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const COMPACT_PEER_SIZE: usize = 6;

/// Network address of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Peer { ip, port }
    }

    /// Socket address used for the TCP connect.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.ip), self.port)
    }

    /// Parse a compact peer list as returned by a tracker.
    pub fn parse_compact(bytes: &[u8]) -> Result<Vec<Peer>, Error> {
        if bytes.len() % COMPACT_PEER_SIZE != 0 {
            return Err(Error::Usage(format!(
                "compact peer list length {} is not a multiple of {}",
                bytes.len(),
                COMPACT_PEER_SIZE
            )));
        }

        let mut peers = Vec::with_capacity(bytes.len() / COMPACT_PEER_SIZE);
        for entry in bytes.chunks_exact(COMPACT_PEER_SIZE) {
            let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
            let port = Cursor::new(&entry[4..6]).read_u16::<BigEndian>()?;
            peers.push(Peer::new(ip, port));
        }

        Ok(peers)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
