//! Work and result records exchanged over the coordinator's channels.

/// A piece waiting to be downloaded. Immutable once enqueued; ownership
/// moves queue -> worker and back to the queue on failure.
#[derive(Debug, Clone)]
pub struct PieceWork {
    /// Zero-based piece index.
    pub index: u32,
    /// Expected SHA-1 digest of the piece.
    pub hash: [u8; 20],
    /// Piece length in bytes. Every piece is the torrent's nominal length
    /// except possibly the last.
    pub length: u32,
}

impl PieceWork {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> Self {
        PieceWork {
            index,
            hash,
            length,
        }
    }
}

/// A downloaded piece whose digest matched.
#[derive(Debug)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}

impl PieceResult {
    pub fn new(index: u32, data: Vec<u8>) -> Self {
        PieceResult { index, data }
    }
}
