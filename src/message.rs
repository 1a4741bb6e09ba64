//! Peer wire messages.
//!
//! Every frame on the wire is a 4-byte big-endian length prefix followed by
//! a one-byte message ID and its payload:
//!
//! ```text
//! <length: u32><id: u8><payload: [u8]>
//! ```
//!
//! | ID | Name           | Payload                        |
//! |----|----------------|--------------------------------|
//! | 0  | Choke          | empty                          |
//! | 1  | Unchoke        | empty                          |
//! | 2  | Interested     | empty                          |
//! | 3  | NotInterested  | empty                          |
//! | 4  | Have           | piece index (u32)              |
//! | 5  | Bitfield       | bit vector                     |
//! | 6  | Request        | index, begin, length (3 × u32) |
//! | 7  | Piece          | index, begin, block bytes      |
//! | 8  | Cancel         | same as Request                |
//!
//! A zero length prefix is a keep-alive. It is not a message: the reader
//! surfaces it as `None`, distinct from a Choke frame whose ID happens to
//! be zero.

use crate::error::{Error, ProtocolError};

use byteorder::{BigEndian, ReadBytesExt};

use std::io::{ErrorKind, Read};

type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
#[allow(dead_code)]
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
#[allow(dead_code)]
pub const MESSAGE_CANCEL: MessageId = 8;

// Largest frame we are willing to buffer. Block payloads top out at
// 16 KiB + 9 bytes; only a Bitfield for an absurd piece count comes close.
const MAX_FRAME_SIZE: usize = 1 << 20;

/// A peer wire message: ID plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a payload-less message.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a message carrying a payload.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Self {
        Message { id, payload }
    }

    /// Build a Request for `length` bytes of piece `index` starting at `begin`.
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        Message::new_with_payload(MESSAGE_REQUEST, payload)
    }

    /// Build a Have announcing piece `index`.
    pub fn have(index: u32) -> Self {
        Message::new_with_payload(MESSAGE_HAVE, index.to_be_bytes().to_vec())
    }

    /// Serialize into a length-prefixed frame.
    pub fn serialize(&self) -> Vec<u8> {
        let message_len = 1 + self.payload.len();

        let mut frame = Vec::with_capacity(4 + message_len);
        frame.extend_from_slice(&(message_len as u32).to_be_bytes());
        frame.push(self.id);
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Serialize an optional message. Absence encodes as a keep-alive frame,
/// four zero bytes.
#[allow(dead_code)]
pub fn serialize_opt(message: Option<&Message>) -> Vec<u8> {
    match message {
        Some(message) => message.serialize(),
        None => vec![0; 4],
    }
}

/// Read one frame from the stream. `Ok(None)` is a keep-alive.
pub fn read<R: Read>(r: &mut R) -> Result<Option<Message>, Error> {
    let message_len = r.read_u32::<BigEndian>()? as usize;

    if message_len == 0 {
        return Ok(None);
    }
    if message_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::OversizedFrame {
            length: message_len,
        }
        .into());
    }

    let mut frame = vec![0; message_len];
    r.read_exact(&mut frame).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::Protocol(ProtocolError::TruncatedFrame {
                expected: message_len,
            })
        } else {
            Error::Transport(e)
        }
    })?;

    Ok(Some(Message {
        id: frame[0],
        payload: frame[1..].to_vec(),
    }))
}

/// Extract the piece index from a Have message.
pub fn parse_have(message: &Message) -> Result<u32, ProtocolError> {
    if message.id != MESSAGE_HAVE {
        return Err(ProtocolError::UnexpectedId {
            expected: MESSAGE_HAVE,
            actual: message.id,
        });
    }
    if message.payload.len() != 4 {
        return Err(ProtocolError::ShortPayload {
            id: MESSAGE_HAVE,
            len: message.payload.len(),
        });
    }

    Ok(be_u32(&message.payload))
}

/// Apply a Piece message for the piece `index` in flight to its buffer.
///
/// The block is accepted only if the payload parses, the carried index
/// matches, and the block lies entirely inside `buf`. On any violation the
/// buffer is left untouched. Returns the number of bytes written.
pub fn parse_piece(index: u32, buf: &mut [u8], message: &Message) -> Result<usize, ProtocolError> {
    if message.id != MESSAGE_PIECE {
        return Err(ProtocolError::UnexpectedId {
            expected: MESSAGE_PIECE,
            actual: message.id,
        });
    }
    if message.payload.len() < 8 {
        return Err(ProtocolError::ShortPayload {
            id: MESSAGE_PIECE,
            len: message.payload.len(),
        });
    }

    let parsed_index = be_u32(&message.payload[0..4]);
    if parsed_index != index {
        return Err(ProtocolError::WrongPieceIndex {
            expected: index,
            actual: parsed_index,
        });
    }

    let begin = be_u32(&message.payload[4..8]);
    let data = &message.payload[8..];

    if begin as usize >= buf.len() || begin as usize + data.len() > buf.len() {
        return Err(ProtocolError::BlockOutOfRange {
            begin,
            block_len: data.len() as u32,
            piece_len: buf.len() as u32,
        });
    }

    buf[begin as usize..begin as usize + data.len()].copy_from_slice(data);
    Ok(data.len())
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn round_trip(message: Message) -> Message {
        let frame = message.serialize();
        read(&mut Cursor::new(frame)).unwrap().unwrap()
    }

    #[test]
    fn serialize_then_read_round_trips_every_id() {
        for id in MESSAGE_CHOKE..=MESSAGE_CANCEL {
            let message = Message::new_with_payload(id, vec![0xDE, 0xAD, 0xBE, 0xEF]);
            assert_eq!(round_trip(message.clone()), message);
        }

        let empty = Message::new(MESSAGE_UNCHOKE);
        assert_eq!(round_trip(empty.clone()), empty);
    }

    #[test]
    fn absent_message_serializes_to_bare_length() {
        assert_eq!(serialize_opt(None), vec![0, 0, 0, 0]);

        let choke = Message::new(MESSAGE_CHOKE);
        assert_eq!(serialize_opt(Some(&choke)), choke.serialize());
    }

    #[test]
    fn zero_length_frame_reads_as_keep_alive() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        assert_eq!(read(&mut cursor).unwrap(), None);

        // A Choke frame is a message, not a keep-alive.
        let mut cursor = Cursor::new(vec![0, 0, 0, 1, 0]);
        assert_eq!(
            read(&mut cursor).unwrap(),
            Some(Message::new(MESSAGE_CHOKE))
        );
    }

    #[test]
    fn truncated_frame_is_a_protocol_error() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 5, 6, 0]);
        match read(&mut cursor) {
            Err(Error::Protocol(ProtocolError::TruncatedFrame { expected: 5 })) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut cursor = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            read(&mut cursor),
            Err(Error::Protocol(ProtocolError::OversizedFrame { .. }))
        ));
    }

    #[test]
    fn request_frame_layout() {
        let frame = Message::request(1, 16384, 16384).serialize();
        assert_eq!(
            frame,
            vec![
                0x00, 0x00, 0x00, 0x0D, // length prefix
                0x06, // id
                0x00, 0x00, 0x00, 0x01, // index
                0x00, 0x00, 0x40, 0x00, // begin
                0x00, 0x00, 0x40, 0x00, // length
            ]
        );
        assert_eq!(frame.len(), 17);
    }

    #[test]
    fn parse_have_extracts_index() {
        let message = Message::new_with_payload(MESSAGE_HAVE, vec![0x00, 0x00, 0x01, 0x00]);
        assert_eq!(parse_have(&message).unwrap(), 256);

        assert_eq!(
            Message::have(256),
            Message::new_with_payload(MESSAGE_HAVE, vec![0x00, 0x00, 0x01, 0x00])
        );
    }

    #[test]
    fn parse_have_rejects_short_payload() {
        let message = Message::new_with_payload(MESSAGE_HAVE, vec![0x00, 0x00]);
        assert_eq!(
            parse_have(&message),
            Err(ProtocolError::ShortPayload {
                id: MESSAGE_HAVE,
                len: 2
            })
        );
    }

    #[test]
    fn parse_have_rejects_wrong_id() {
        let message = Message::new_with_payload(MESSAGE_NOT_INTERESTED, vec![0, 0, 1, 0]);
        assert_eq!(
            parse_have(&message),
            Err(ProtocolError::UnexpectedId {
                expected: MESSAGE_HAVE,
                actual: MESSAGE_NOT_INTERESTED
            })
        );
    }

    fn piece_message(index: u32, begin: u32, data: &[u8]) -> Message {
        let mut payload = Vec::new();
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(data);
        Message::new_with_payload(MESSAGE_PIECE, payload)
    }

    #[test]
    fn parse_piece_writes_block_at_offset() {
        let mut buf = vec![0u8; 32];
        let block = [0xAB; 16];

        let n = parse_piece(0, &mut buf, &piece_message(0, 16, &block)).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf[..16], &[0u8; 16]);
        assert_eq!(&buf[16..], &block);
    }

    #[test]
    fn parse_piece_rejects_begin_past_buffer() {
        let mut buf = vec![0u8; 32];
        let err = parse_piece(0, &mut buf, &piece_message(0, 32, &[0xAB; 4])).unwrap_err();
        assert!(matches!(err, ProtocolError::BlockOutOfRange { begin: 32, .. }));
        assert_eq!(buf, vec![0u8; 32]);
    }

    #[test]
    fn parse_piece_rejects_overlong_block() {
        let mut buf = vec![0u8; 32];
        let err = parse_piece(0, &mut buf, &piece_message(0, 24, &[0xAB; 16])).unwrap_err();
        assert!(matches!(err, ProtocolError::BlockOutOfRange { .. }));
        assert_eq!(buf, vec![0u8; 32]);
    }

    #[test]
    fn parse_piece_rejects_wrong_index() {
        let mut buf = vec![0u8; 32];
        let err = parse_piece(1, &mut buf, &piece_message(2, 0, &[0xAB; 8])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::WrongPieceIndex {
                expected: 1,
                actual: 2
            }
        );
        assert_eq!(buf, vec![0u8; 32]);
    }

    #[test]
    fn parse_piece_rejects_short_payload() {
        let mut buf = vec![0u8; 32];
        let message = Message::new_with_payload(MESSAGE_PIECE, vec![0, 0, 0, 0, 0]);
        assert_eq!(
            parse_piece(0, &mut buf, &message),
            Err(ProtocolError::ShortPayload {
                id: MESSAGE_PIECE,
                len: 5
            })
        );
    }

    #[test]
    fn parse_piece_rejects_wrong_id() {
        let mut buf = vec![0u8; 32];
        let message = Message::new_with_payload(MESSAGE_HAVE, vec![0; 12]);
        assert!(matches!(
            parse_piece(0, &mut buf, &message),
            Err(ProtocolError::UnexpectedId { .. })
        ));
    }
}
