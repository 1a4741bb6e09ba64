//! Torrent metainfo and tracker announce.
//!
//! This layer feeds the download engine. A `.torrent` file is a bencoded
//! dictionary; the `info` sub-dictionary carries the piece length, the
//! content length, the display name and the concatenated 20-byte SHA-1
//! digests of every piece. The info hash identifying the torrent to the
//! swarm is the SHA-1 of that sub-dictionary, re-encoded.
//!
//! The tracker is asked once, over plain HTTP, for a compact peer list.
//! Re-announcing during the download is deliberately not done.

use crate::peer::Peer;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};
use url::Url;

use std::fs;
use std::path::Path;
use std::time::Duration;

const SHA1_HASH_SIZE: usize = 20;
const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// The `info` dictionary of a single-file torrent.
#[derive(Deserialize, Serialize)]
struct BencodeInfo {
    /// Concatenated 20-byte SHA-1 digests, one per piece.
    pieces: ByteBuf,
    #[serde(rename = "piece length")]
    piece_length: u32,
    /// Content length in bytes.
    length: u32,
    /// Suggested filename.
    name: String,
}

#[derive(Deserialize)]
struct BencodeTorrent {
    #[serde(default)]
    announce: String,
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    info: BencodeInfo,
}

#[derive(Deserialize)]
struct BencodeTrackerResponse {
    /// Seconds until the tracker wants to hear from us again. Unused,
    /// since we never re-announce.
    #[serde(default)]
    #[allow(dead_code)]
    interval: u32,
    /// Compact peer list, 6 bytes per peer.
    peers: ByteBuf,
}

impl BencodeInfo {
    /// SHA-1 of the re-encoded info dictionary.
    fn hash(&self) -> Result<[u8; 20]> {
        let encoded = ser::to_bytes(self).context("could not re-encode info dictionary")?;
        Ok(Sha1::digest(&encoded).into())
    }

    fn split_piece_hashes(&self) -> Result<Vec<[u8; 20]>> {
        if self.pieces.len() % SHA1_HASH_SIZE != 0 {
            return Err(anyhow!(
                "pieces blob of {} bytes is not a multiple of {}",
                self.pieces.len(),
                SHA1_HASH_SIZE
            ));
        }

        Ok(self
            .pieces
            .chunks_exact(SHA1_HASH_SIZE)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }
}

/// Parsed torrent metadata.
pub struct Metainfo {
    announce_urls: Vec<String>,
    pub info_hash: [u8; 20],
    pub piece_hashes: Vec<[u8; 20]>,
    pub piece_length: u32,
    pub total_length: u32,
    pub name: String,
}

impl Metainfo {
    /// Read and decode a `.torrent` file.
    pub fn open(path: &Path) -> Result<Metainfo> {
        let buf =
            fs::read(path).with_context(|| format!("could not read torrent file {:?}", path))?;
        Metainfo::from_bytes(&buf)
    }

    /// Decode torrent metadata from its bencoded form.
    pub fn from_bytes(buf: &[u8]) -> Result<Metainfo> {
        let bencode: BencodeTorrent =
            de::from_bytes(buf).context("could not decode torrent file")?;

        // Flatten announce-list tiers into one ordered, deduplicated list;
        // the plain announce field is the fallback.
        let mut announce_urls: Vec<String> = vec![];
        for tier in &bencode.announce_list {
            for tracker_url in tier {
                if !announce_urls.contains(tracker_url) {
                    announce_urls.push(tracker_url.clone());
                }
            }
        }
        if announce_urls.is_empty() && !bencode.announce.is_empty() {
            announce_urls.push(bencode.announce.clone());
        }
        if announce_urls.is_empty() {
            return Err(anyhow!("torrent has no announce or announce-list"));
        }

        Ok(Metainfo {
            announce_urls,
            info_hash: bencode.info.hash()?,
            piece_hashes: bencode.info.split_piece_hashes()?,
            piece_length: bencode.info.piece_length,
            total_length: bencode.info.length,
            name: bencode.info.name,
        })
    }

    /// Announce to the trackers in order and return the first non-empty
    /// peer list.
    pub fn announce(&self, peer_id: [u8; 20], port: u16) -> Result<Vec<Peer>> {
        let http = reqwest::blocking::Client::builder()
            .timeout(TRACKER_TIMEOUT)
            .build()
            .context("could not build tracker client")?;

        for announce in &self.announce_urls {
            let tracker_url = match self.tracker_url(announce, peer_id, port) {
                Ok(tracker_url) => tracker_url,
                Err(e) => {
                    warn!("skipping tracker {}: {}", announce, e);
                    continue;
                }
            };

            let response = match http.get(&tracker_url).send().and_then(|r| r.bytes()) {
                Ok(response) => response,
                Err(e) => {
                    warn!("tracker {} did not respond: {}", announce, e);
                    continue;
                }
            };

            let tracker: BencodeTrackerResponse = match de::from_bytes(&response) {
                Ok(tracker) => tracker,
                Err(e) => {
                    warn!("tracker {} sent an undecodable response: {}", announce, e);
                    continue;
                }
            };

            match Peer::parse_compact(&tracker.peers) {
                Ok(peers) if !peers.is_empty() => {
                    info!("tracker {} returned {} peers", announce, peers.len());
                    return Ok(peers);
                }
                Ok(_) => warn!("tracker {} returned no peers", announce),
                Err(e) => warn!("tracker {} sent a malformed peer list: {}", announce, e),
            }
        }

        Err(anyhow!("could not get peers from any tracker"))
    }

    fn tracker_url(&self, announce: &str, peer_id: [u8; 20], port: u16) -> Result<String> {
        Url::parse(announce).with_context(|| format!("could not parse tracker url {}", announce))?;

        // info_hash and peer_id are raw bytes, so the query string is
        // assembled by hand rather than through a string-typed builder.
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1&event=started",
            percent_encode_binary(&self.info_hash),
            percent_encode_binary(&peer_id),
            port,
            self.total_length
        );

        let separator = if announce.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", announce, separator, query))
    }
}

/// Encode every byte as `%XX`, uppercase hex.
fn percent_encode_binary(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut encoded = String::with_capacity(data.len() * 3);
    for byte in data {
        // Writing into a String cannot fail.
        let _ = write!(encoded, "%{:02X}", byte);
    }
    encoded
}
