//! Peer sessions.
//!
//! A `Client` owns one connection to one remote peer and the protocol
//! state that goes with it: the choke flag and the peer's advertised
//! bitfield. Establishment runs in three steps, each under its own
//! deadline:
//!
//! 1. TCP connect (3 s).
//! 2. Handshake exchange (3 s); the reply must carry our info hash.
//! 3. Exactly one message (5 s), which must be a Bitfield.
//!
//! The session talks to anything that looks like a bidirectional byte
//! stream with deadline support, so tests can drive it with scripted
//! in-memory streams instead of sockets.

use crate::bitfield::Bitfield;
use crate::error::{Error, ProtocolError};
use crate::handshake::Handshake;
use crate::message::{self, Message, MESSAGE_BITFIELD};
use crate::peer::Peer;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

/// A bidirectional byte stream with per-operation deadlines.
pub trait PeerStream: Read + Write + Send {
    /// Apply `timeout` to every subsequent read and write.
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl PeerStream for TcpStream {
    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

/// An established session with a remote peer.
pub struct Client<S: PeerStream> {
    conn: S,
    peer: Peer,
    bitfield: Bitfield,
    choked: bool,
}

impl Client<TcpStream> {
    /// Connect to `peer` and run session establishment.
    pub fn connect(peer: Peer, peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<Self, Error> {
        let conn = TcpStream::connect_timeout(&peer.socket_addr(), CONNECT_TIMEOUT)?;
        Client::establish(conn, peer, peer_id, info_hash)
    }
}

impl<S: PeerStream> Client<S> {
    /// Establish a session over an already-connected stream: handshake
    /// exchange followed by the mandatory Bitfield.
    pub fn establish(
        mut conn: S,
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
    ) -> Result<Self, Error> {
        conn.set_io_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let handshake = Handshake::new(info_hash, peer_id);
        conn.write_all(&handshake.serialize())?;

        let reply = Handshake::read(&mut conn)?;
        if reply.info_hash != info_hash {
            return Err(Error::HandshakeMismatch);
        }

        conn.set_io_timeout(Some(BITFIELD_TIMEOUT))?;
        let bitfield = match message::read(&mut conn)? {
            Some(message) if message.id == MESSAGE_BITFIELD => Bitfield::new(message.payload),
            Some(message) => {
                return Err(ProtocolError::UnexpectedId {
                    expected: MESSAGE_BITFIELD,
                    actual: message.id,
                }
                .into())
            }
            None => {
                return Err(ProtocolError::UnexpectedKeepAlive {
                    expected: MESSAGE_BITFIELD,
                }
                .into())
            }
        };

        info!("established session with peer {}", peer);

        Ok(Client {
            conn,
            peer,
            bitfield,
            choked: true,
        })
    }

    /// Address of the remote peer, for logging.
    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Whether the peer currently has us choked.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// Record a Choke from the peer.
    pub fn read_choke(&mut self) {
        debug!("peer {} choked us", self.peer);
        self.choked = true;
    }

    /// Record an Unchoke from the peer.
    pub fn read_unchoke(&mut self) {
        debug!("peer {} unchoked us", self.peer);
        self.choked = false;
    }

    /// Whether the peer advertises piece `index`.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Mark piece `index` as held by the peer, after a Have.
    pub fn set_piece(&mut self, index: u32) {
        self.bitfield.set_piece(index);
    }

    /// Apply `timeout` to all subsequent I/O on this session.
    pub fn set_io_timeout(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        self.conn.set_io_timeout(timeout)?;
        Ok(())
    }

    /// Read one message from the peer. `Ok(None)` is a keep-alive.
    pub fn read_message(&mut self) -> Result<Option<Message>, Error> {
        message::read(&mut self.conn)
    }

    pub fn send_unchoke(&mut self) -> Result<(), Error> {
        self.send(&Message::new(message::MESSAGE_UNCHOKE))
    }

    pub fn send_interested(&mut self) -> Result<(), Error> {
        self.send(&Message::new(message::MESSAGE_INTERESTED))
    }

    /// Request `length` bytes of piece `index` starting at `begin`.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<(), Error> {
        debug!(
            "request piece {} [{}..{}] from peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );
        self.send(&Message::request(index, begin, length))
    }

    /// Announce a completed piece to the peer.
    pub fn send_have(&mut self, index: u32) -> Result<(), Error> {
        self.send(&Message::have(index))
    }

    fn send(&mut self, message: &Message) -> Result<(), Error> {
        self.conn.write_all(&message.serialize())?;
        Ok(())
    }

    /// Consume the session and hand back the underlying stream.
    #[cfg(test)]
    pub(crate) fn into_stream(self) -> S {
        self.conn
    }
}
