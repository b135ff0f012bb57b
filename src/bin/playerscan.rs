//! Scans a directory of gzip-framed player data files for a named Int tag
//! and reports each occurrence as a JSON line keyed by the player UUID.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use log::{info, warn};
use rayon::iter::{ParallelBridge, ParallelIterator};
use serde::Serialize;

use anvil_query::{decompress_gzip, provider, OwnedTagHeader, Reader, TagId};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Directory containing <uuid>.dat player files.
    directory: PathBuf,

    /// Name of the Int tag to search for.
    #[arg(long, default_value = "computerID")]
    tag: String,

    /// Worker threads decoding player files.
    #[arg(long, default_value_t = 8)]
    workers: usize,
}

#[derive(Serialize)]
struct PlayerTag {
    computer_id: i32,
    player: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let start = Instant::now();

    let files = match provider::player_files(&args.directory) {
        Ok(files) => files,
        Err(err) => {
            eprintln!("cannot read {}: {}", args.directory.display(), err);
            exit(1);
        }
    };

    if files.is_empty() {
        eprintln!("no player files found in {}", args.directory.display());
        exit(1);
    }

    let pattern = OwnedTagHeader::new(TagId::Int, args.tag.as_bytes().to_vec()).to_bytes();

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(args.workers)
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("cannot start worker pool: {}", err);
            exit(1);
        }
    };

    let (sender, receiver) = mpsc::channel::<PlayerTag>();

    let printer = thread::spawn(move || {
        let mut total = 0u64;

        for found in receiver {
            match serde_json::to_string(&found) {
                Ok(line) => {
                    println!("{}", line);
                    total += 1;
                }
                Err(err) => warn!("cannot serialize result: {}", err),
            }
        }

        total
    });

    let worker_sender = sender.clone();

    pool.install(|| {
        files
            .iter()
            .par_bridge()
            .for_each_with(worker_sender, |sender, file| {
                for found in scan_player_file(file, &pattern) {
                    let _ = sender.send(found);
                }
            });
    });

    drop(sender);
    let total = printer.join().expect("printer thread panicked");

    info!("took {:?}, found {} tags", start.elapsed(), total);
}

fn scan_player_file(file: &Path, pattern: &[u8]) -> Vec<PlayerTag> {
    let mut results = Vec::new();

    let player = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let data = match fs::read(file) {
        Ok(data) => data,
        Err(err) => {
            warn!("failed to read player file {}: {}", file.display(), err);
            return results;
        }
    };

    let blob = match decompress_gzip(&data) {
        Ok(blob) => blob,
        Err(err) => {
            warn!("failed to ungzip player file {}: {:?}", player, err);
            return results;
        }
    };

    let mut reader = Reader::new(&blob);

    if !reader.possible_tag_match(&[vec![pattern.to_vec()]]) {
        return results;
    }

    if let Err(err) = reader.prepare_index(None) {
        warn!("error indexing player file {}: {:?}", player, err);
        return results;
    }

    let matches = match reader.match_tags(&[pattern.to_vec()]) {
        Ok(matches) => matches,
        Err(err) => {
            warn!("error matching player file {}: {:?}", player, err);
            return results;
        }
    };

    let index = match reader.index() {
        Some(index) => index,
        None => return results,
    };

    for entry_id in matches {
        let entry = index.entry(entry_id);

        match reader.copy(entry.pos).read_int(entry.header.id) {
            Ok(computer_id) => results.push(PlayerTag {
                computer_id,
                player: player.clone(),
            }),
            Err(err) => warn!("error reading matched value: {:?}", err),
        }
    }

    results
}
