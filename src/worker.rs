//! Per-peer download workers.
//!
//! One worker owns one peer session. It pulls pieces off the shared work
//! queue, skips (re-enqueues) pieces its peer does not hold, runs the
//! block-pipelined download loop, and hands verified pieces to the
//! coordinator. Any failure puts the piece back on the queue tail and
//! ends the worker; the remaining workers pick up its share.
//!
//! Requests are pipelined up to `MAX_BACKLOG` blocks ahead of the
//! responses, the usual way to keep a peer connection saturated without
//! tripping per-peer request limits.

use crate::client::{Client, PeerStream};
use crate::error::Error;
use crate::message::{
    self, MESSAGE_BITFIELD, MESSAGE_CHOKE, MESSAGE_HAVE, MESSAGE_PIECE, MESSAGE_UNCHOKE,
};
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};

use crossbeam_channel::{select, Receiver, Sender};
use sha1::{Digest, Sha1};

use std::time::Duration;

/// In-flight block requests allowed per peer.
const MAX_BACKLOG: u32 = 5;

/// Largest block asked for in one Request message.
const MAX_BLOCK_SIZE: u32 = 16384;

/// I/O deadline covering one whole piece attempt.
const PIECE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transient state for the piece currently being downloaded.
struct PieceProgress {
    index: u32,
    buf: Vec<u8>,
    downloaded: u32,
    requested: u32,
    backlog: u32,
}

impl PieceProgress {
    fn new(piece_work: &PieceWork) -> Self {
        PieceProgress {
            index: piece_work.index,
            buf: vec![0; piece_work.length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    /// Read one message from the peer and fold it into the progress state.
    fn read_message<S: PeerStream>(&mut self, client: &mut Client<S>) -> Result<(), Error> {
        let message = match client.read_message()? {
            Some(message) => message,
            // Keep-alive.
            None => return Ok(()),
        };

        match message.id {
            MESSAGE_UNCHOKE => client.read_unchoke(),
            MESSAGE_CHOKE => client.read_choke(),
            MESSAGE_HAVE => {
                let index = message::parse_have(&message)?;
                client.set_piece(index);
            }
            MESSAGE_PIECE => {
                let n = message::parse_piece(self.index, &mut self.buf, &message)?;
                self.downloaded += n as u32;
                // An unsolicited block must not drive the count negative.
                self.backlog = self.backlog.saturating_sub(1);
            }
            MESSAGE_BITFIELD => {
                debug!("peer {} sent a bitfield mid-session, ignoring", client.peer())
            }
            id => debug!("peer {} sent unhandled message id {}", client.peer(), id),
        }

        Ok(())
    }
}

/// Download one piece over an established session.
///
/// While unchoked, keeps up to `MAX_BACKLOG` block requests in flight, in
/// strictly increasing offset order. A Choke pauses new requests but
/// blocks already requested are still accepted.
fn download_piece<S: PeerStream>(
    client: &mut Client<S>,
    piece_work: &PieceWork,
) -> Result<Vec<u8>, Error> {
    let mut state = PieceProgress::new(piece_work);

    // One deadline for the whole attempt, renewed per piece.
    client.set_io_timeout(Some(PIECE_TIMEOUT))?;

    while state.downloaded < piece_work.length {
        if !client.is_choked() {
            while state.backlog < MAX_BACKLOG && state.requested < piece_work.length {
                let block_size = MAX_BLOCK_SIZE.min(piece_work.length - state.requested);

                client.send_request(piece_work.index, state.requested, block_size)?;
                state.backlog += 1;
                state.requested += block_size;
            }
        }

        state.read_message(client)?;
    }

    Ok(state.buf)
}

/// Compare the assembled piece against its expected digest.
fn verify_integrity(piece_work: &PieceWork, data: Vec<u8>) -> Result<Vec<u8>, Error> {
    let digest = Sha1::digest(&data);
    if digest.as_slice() != piece_work.hash.as_slice() {
        return Err(Error::Integrity {
            index: piece_work.index,
        });
    }
    Ok(data)
}

/// Downloads pieces from a single peer until the queue closes or the
/// session fails.
pub struct Worker {
    peer: Peer,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    work_tx: Sender<PieceWork>,
    work_rx: Receiver<PieceWork>,
    result_tx: Sender<PieceResult>,
    shutdown_rx: Receiver<()>,
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work: (Sender<PieceWork>, Receiver<PieceWork>),
        result_tx: Sender<PieceResult>,
        shutdown_rx: Receiver<()>,
    ) -> Self {
        Worker {
            peer,
            peer_id,
            info_hash,
            work_tx: work.0,
            work_rx: work.1,
            result_tx,
            shutdown_rx,
        }
    }

    /// Run the worker to completion. Never panics on peer misbehavior;
    /// every exit path leaves undone work on the queue for other workers.
    pub fn run(self) {
        let mut client = match Client::connect(self.peer, self.peer_id, self.info_hash) {
            Ok(client) => client,
            Err(e) => {
                warn!("peer {}: session not established: {}", self.peer, e);
                return;
            }
        };

        if let Err(e) = client.send_unchoke() {
            warn!("peer {}: {}", self.peer, e);
            return;
        }
        if let Err(e) = client.send_interested() {
            warn!("peer {}: {}", self.peer, e);
            return;
        }

        loop {
            select! {
                recv(self.work_rx) -> work => {
                    let piece_work = match work {
                        Ok(piece_work) => piece_work,
                        Err(_) => return,
                    };

                    if !client.has_piece(piece_work.index) {
                        if self.work_tx.send(piece_work).is_err() {
                            return;
                        }
                        continue;
                    }

                    let attempt = download_piece(&mut client, &piece_work)
                        .and_then(|data| verify_integrity(&piece_work, data));

                    let data = match attempt {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(
                                "peer {}: piece {} failed: {}",
                                self.peer, piece_work.index, e
                            );
                            let _ = self.work_tx.send(piece_work);
                            return;
                        }
                    };

                    info!("piece {} complete via peer {}", piece_work.index, self.peer);

                    if let Err(e) = client.send_have(piece_work.index) {
                        warn!(
                            "peer {}: could not announce piece {}: {}",
                            self.peer, piece_work.index, e
                        );
                    }

                    if self.result_tx.send(PieceResult::new(piece_work.index, data)).is_err() {
                        // Coordinator is gone; surplus results are dropped.
                        return;
                    }
                }
                recv(self.shutdown_rx) -> _ => return,
            }
        }
    }
}
