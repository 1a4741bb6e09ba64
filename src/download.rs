//! Download coordination.
//!
//! The coordinator owns the two shared channels of the engine: a bounded
//! work queue seeded with every piece in index order, and the result
//! channel the workers feed. One worker thread runs per peer. Workers
//! re-enqueue pieces they cannot serve and exit on failure, so work
//! migrates to whichever peers remain healthy.
//!
//! Worker liveness is tracked through the result channel itself: every
//! worker holds a sender, so once the last worker exits the channel
//! disconnects and the collection loop, after draining any buffered
//! results, knows no more pieces can arrive.

use crate::error::Error;
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::worker::Worker;

use crossbeam_channel::{bounded, unbounded};
use indicatif::{ProgressBar, ProgressStyle};

use std::thread;

/// Everything the engine needs to fetch one torrent: where to find the
/// swarm and how to verify what it serves.
pub struct Download {
    /// Peers to attempt sessions with, one worker each.
    pub peers: Vec<Peer>,
    /// Our 20-byte identity, sent in every handshake.
    pub peer_id: [u8; 20],
    /// SHA-1 of the torrent's bencoded info dictionary.
    pub info_hash: [u8; 20],
    /// Expected SHA-1 digest per piece, in index order.
    pub piece_hashes: Vec<[u8; 20]>,
    /// Nominal piece length in bytes.
    pub piece_length: u32,
    /// Total content length in bytes.
    pub total_length: u32,
    /// Display name, used for logging only.
    pub name: String,
}

impl Download {
    /// Download the full content into memory.
    ///
    /// Returns the assembled buffer of `total_length` bytes once every
    /// piece has been fetched and verified, or a terminal error if the
    /// inputs are inconsistent or every peer is exhausted first.
    pub fn run(&self) -> Result<Vec<u8>, Error> {
        self.validate()?;

        let piece_count = self.piece_hashes.len();
        let mut data = vec![0u8; self.total_length as usize];
        if piece_count == 0 {
            return Ok(data);
        }

        info!(
            "downloading {:?}: {} pieces from {} peers",
            self.name,
            piece_count,
            self.peers.len()
        );

        let (work_tx, work_rx) = bounded::<PieceWork>(piece_count);
        let (result_tx, result_rx) = unbounded::<PieceResult>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        for (index, hash) in self.piece_hashes.iter().enumerate() {
            let index = index as u32;
            let piece_work = PieceWork::new(index, *hash, self.piece_length_at(index));
            work_tx
                .send(piece_work)
                .expect("work queue holds every piece while seeding");
        }

        for &peer in &self.peers {
            let worker = Worker::new(
                peer,
                self.peer_id,
                self.info_hash,
                (work_tx.clone(), work_rx.clone()),
                result_tx.clone(),
                shutdown_rx.clone(),
            );
            thread::spawn(move || worker.run());
        }

        // Workers hold their own clones. The coordinator keeps only the
        // result receiver and the shutdown sender.
        drop(work_tx);
        drop(work_rx);
        drop(result_tx);
        drop(shutdown_rx);

        let progress = ProgressBar::new(self.total_length as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut completed = 0;
        while completed < piece_count {
            let piece = match result_rx.recv() {
                Ok(piece) => piece,
                Err(_) => {
                    // Every worker is gone and the channel is drained.
                    progress.abandon();
                    return Err(Error::InsufficientPeers {
                        remaining: piece_count - completed,
                    });
                }
            };

            let begin = piece.index as u64 * self.piece_length as u64;
            let end = begin as usize + piece.data.len();
            data[begin as usize..end].copy_from_slice(&piece.data);

            progress.inc(piece.data.len() as u64);
            completed += 1;
        }

        progress.finish_and_clear();

        // Dropping shutdown_tx here closes the queue; idle workers wake
        // up and terminate. Workers still mid-piece exit when their
        // result send finds the receiver gone.
        drop(shutdown_tx);

        Ok(data)
    }

    /// Length of piece `index`: nominal, except the final piece takes
    /// whatever remains.
    pub fn piece_length_at(&self, index: u32) -> u32 {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.total_length as u64);
        (end - begin) as u32
    }

    fn validate(&self) -> Result<(), Error> {
        if self.piece_length == 0 {
            return Err(Error::Usage("piece length must be positive".into()));
        }

        let expected = (self.total_length as u64).div_ceil(self.piece_length as u64) as usize;
        if self.piece_hashes.len() != expected {
            return Err(Error::Usage(format!(
                "{} piece hashes for {} bytes in {}-byte pieces (expected {})",
                self.piece_hashes.len(),
                self.total_length,
                self.piece_length,
                expected
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::handshake::Handshake;
    use crate::message::{
        Message, MESSAGE_BITFIELD, MESSAGE_PIECE, MESSAGE_REQUEST, MESSAGE_UNCHOKE,
    };

    use byteorder::{BigEndian, ReadBytesExt};
    use sha1::{Digest, Sha1};

    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    const INFO_HASH: [u8; 20] = [0x42; 20];

    fn test_file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 % 239) as u8).collect()
    }

    fn piece_hashes(file: &[u8], piece_length: u32) -> Vec<[u8; 20]> {
        file.chunks(piece_length as usize)
            .map(|chunk| Sha1::digest(chunk).into())
            .collect()
    }

    /// Spawn a scripted peer on loopback serving `file`. With `corrupt`
    /// set, every block goes out with its first byte flipped.
    fn spawn_stub_peer(file: Vec<u8>, piece_length: u32, corrupt: bool) -> Peer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (mut conn, _) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(_) => return,
            };

            let mut handshake = [0u8; 68];
            if conn.read_exact(&mut handshake).is_err() {
                return;
            }
            let reply = Handshake::new(INFO_HASH, [0x77; 20]).serialize();
            if conn.write_all(&reply).is_err() {
                return;
            }

            let piece_count = file.len().div_ceil(piece_length as usize);
            let bitfield = vec![0xFF; piece_count.div_ceil(8)];
            let preamble = [
                Message::new_with_payload(MESSAGE_BITFIELD, bitfield).serialize(),
                Message::new(MESSAGE_UNCHOKE).serialize(),
            ]
            .concat();
            if conn.write_all(&preamble).is_err() {
                return;
            }

            loop {
                let frame_len = match conn.read_u32::<BigEndian>() {
                    Ok(len) => len as usize,
                    Err(_) => return,
                };
                if frame_len == 0 {
                    continue;
                }
                let mut frame = vec![0; frame_len];
                if conn.read_exact(&mut frame).is_err() {
                    return;
                }
                if frame[0] != MESSAGE_REQUEST {
                    continue;
                }

                let index = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
                let begin = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]);
                let length = u32::from_be_bytes([frame[9], frame[10], frame[11], frame[12]]);

                let start = index as usize * piece_length as usize + begin as usize;
                let mut block = file[start..start + length as usize].to_vec();
                if corrupt {
                    block[0] ^= 0x01;
                }

                let mut payload = Vec::new();
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&block);
                let piece = Message::new_with_payload(MESSAGE_PIECE, payload).serialize();
                if conn.write_all(&piece).is_err() {
                    return;
                }
            }
        });

        Peer::new(Ipv4Addr::LOCALHOST, port)
    }

    fn download_for(file: &[u8], piece_length: u32, peers: Vec<Peer>) -> Download {
        Download {
            peers,
            peer_id: [0x01; 20],
            info_hash: INFO_HASH,
            piece_hashes: piece_hashes(file, piece_length),
            piece_length,
            total_length: file.len() as u32,
            name: "stub".into(),
        }
    }

    #[test]
    fn run_assembles_file_from_multiple_peers() {
        // 4 pieces of 1024, 1024, 1024 and 928 bytes.
        let file = test_file(4000);
        let peers = (0..3)
            .map(|_| spawn_stub_peer(file.clone(), 1024, false))
            .collect();

        let download = download_for(&file, 1024, peers);
        assert_eq!(download.run().unwrap(), file);
    }

    #[test]
    fn run_recovers_pieces_a_corrupting_peer_fails() {
        let file = test_file(4000);
        let peers = vec![
            spawn_stub_peer(file.clone(), 1024, true),
            spawn_stub_peer(file.clone(), 1024, false),
        ];

        let download = download_for(&file, 1024, peers);
        assert_eq!(download.run().unwrap(), file);
    }

    #[test]
    fn run_without_peers_reports_insufficient_peers() {
        let file = test_file(2048);
        let download = download_for(&file, 1024, vec![]);

        assert!(matches!(
            download.run(),
            Err(Error::InsufficientPeers { remaining: 2 })
        ));
    }

    #[test]
    fn run_reports_insufficient_peers_when_every_session_fails() {
        // This peer drops every connection before handshaking.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            while let Ok((conn, _)) = listener.accept() {
                drop(conn);
            }
        });

        let file = test_file(2048);
        let download = download_for(&file, 1024, vec![Peer::new(Ipv4Addr::LOCALHOST, port)]);

        assert!(matches!(
            download.run(),
            Err(Error::InsufficientPeers { remaining: 2 })
        ));
    }

    #[test]
    fn run_rejects_inconsistent_piece_hashes() {
        let file = test_file(4000);
        let mut download = download_for(&file, 1024, vec![]);
        download.piece_hashes.pop();

        assert!(matches!(download.run(), Err(Error::Usage(_))));
    }

    #[test]
    fn run_rejects_zero_piece_length() {
        let download = download_for(&[], 1024, vec![]);
        let download = Download {
            piece_length: 0,
            ..download
        };

        assert!(matches!(download.run(), Err(Error::Usage(_))));
    }

    #[test]
    fn empty_download_completes_without_peers() {
        let download = download_for(&[], 1024, vec![]);
        assert_eq!(download.run().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn piece_length_gives_final_piece_the_remainder() {
        let file = test_file(4000);
        let download = download_for(&file, 1024, vec![]);

        assert_eq!(download.piece_length_at(0), 1024);
        assert_eq!(download.piece_length_at(1), 1024);
        assert_eq!(download.piece_length_at(2), 1024);
        assert_eq!(download.piece_length_at(3), 928);
    }
}
