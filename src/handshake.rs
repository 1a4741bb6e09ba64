//! Handshake frames.
//!
//! The first bytes exchanged on a fresh peer connection:
//!
//! ```text
//! <pstrlen: u8><pstr><reserved: 8 zero bytes><info_hash: 20><peer_id: 20>
//! ```
//!
//! `pstr` is the literal `"BitTorrent protocol"`, so a standard handshake
//! is 68 bytes. The reader tolerates other protocol strings as long as the
//! length byte is nonzero; the info-hash comparison happens one layer up,
//! in session establishment.

use crate::error::{Error, ProtocolError};

use byteorder::ReadBytesExt;

use std::io::{ErrorKind, Read};

pub const PROTOCOL_ID: &[u8] = b"BitTorrent protocol";

/// A handshake frame, ours or a peer's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub pstr: Vec<u8>,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Build a standard handshake for the given torrent and identity.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            pstr: PROTOCOL_ID.to_vec(),
            info_hash,
            peer_id,
        }
    }

    /// Serialize into the `49 + pstr.len()` byte wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(49 + self.pstr.len());
        frame.push(self.pstr.len() as u8);
        frame.extend_from_slice(&self.pstr);
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(&self.info_hash);
        frame.extend_from_slice(&self.peer_id);
        frame
    }

    /// Read one handshake frame from the stream.
    pub fn read<R: Read>(r: &mut R) -> Result<Handshake, Error> {
        let pstrlen = r.read_u8()? as usize;
        if pstrlen == 0 {
            return Err(ProtocolError::EmptyProtocolString.into());
        }

        let mut frame = vec![0; pstrlen + 48];
        r.read_exact(&mut frame).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                Error::Protocol(ProtocolError::TruncatedFrame {
                    expected: pstrlen + 48,
                })
            } else {
                Error::Transport(e)
            }
        })?;

        let mut info_hash = [0u8; 20];
        let mut peer_id = [0u8; 20];
        info_hash.copy_from_slice(&frame[pstrlen + 8..pstrlen + 28]);
        peer_id.copy_from_slice(&frame[pstrlen + 28..pstrlen + 48]);

        Ok(Handshake {
            pstr: frame[..pstrlen].to_vec(),
            info_hash,
            peer_id,
        })
    }
}
