//! remora, a minimal BitTorrent leech client.
//!
//! Remora downloads one single-file torrent into memory and writes it
//! out: parse the metainfo, announce once to a tracker, then run one
//! worker thread per peer against a shared queue of pieces. Every piece
//! is SHA-1 verified before it is accepted. It never uploads.
//!
//! ```bash
//! remora file.torrent
//! remora file.torrent -o file.iso
//! ```

#[macro_use]
extern crate log;

mod bitfield;
mod client;
mod download;
mod error;
mod handshake;
mod message;
mod peer;
mod piece;
mod torrent;
mod worker;

use crate::download::Download;
use crate::torrent::Metainfo;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;

use std::fs;
use std::path::Path;

/// Port reported to trackers. We never listen on it; this client only
/// makes outbound connections.
const PORT: u16 = 6881;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A minimal BitTorrent leech client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: String,

    /// Output filename (defaults to the name from the torrent)
    #[arg(short = 'o', long)]
    output: Option<String>,
}

/// Keep the torrent-supplied filename from escaping the working directory.
fn sanitize_filename(filename: &str) -> String {
    let safe_name = filename.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

fn run(args: Args) -> Result<()> {
    let metainfo = Metainfo::open(Path::new(&args.torrent))?;

    let mut peer_id = [0u8; 20];
    rand::thread_rng().fill(&mut peer_id[..]);

    let peers = metainfo.announce(peer_id, PORT)?;

    let download = Download {
        peers,
        peer_id,
        info_hash: metainfo.info_hash,
        piece_hashes: metainfo.piece_hashes.clone(),
        piece_length: metainfo.piece_length,
        total_length: metainfo.total_length,
        name: metainfo.name.clone(),
    };
    let data = download.run()?;

    let output = args
        .output
        .unwrap_or_else(|| sanitize_filename(&metainfo.name));
    fs::write(&output, &data)
        .with_context(|| format!("could not write output file {:?}", output))?;

    println!("Saved in {:?}.", output);

    Ok(())
}

fn main() {
    pretty_env_logger::init_timed();

    let args = Args::parse();

    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_strips_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a\\b"), "a_b");
        assert_eq!(sanitize_filename("plain.iso"), "plain.iso");
        assert_eq!(sanitize_filename("   "), "download");
    }
}
