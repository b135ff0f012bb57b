//! Scans a directory of region files for a named Int tag and reports every
//! occurrence as a JSON line with its tile-entity context.

use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use log::{info, warn};
use rayon::iter::{ParallelBridge, ParallelIterator};
use serde::Serialize;

use anvil_query::{
    provider, tile_entities_window, ChunkData, Coord, OwnedTagHeader, Reader, RegionReader, TagId,
};

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Directory containing r.<X>.<Z>.mca region files.
    directory: PathBuf,

    /// Name of the Int tag to search for.
    #[arg(long, default_value = "computerID")]
    tag: String,

    /// Worker threads decoding chunks.
    #[arg(long, default_value_t = 12)]
    workers: usize,
}

#[derive(Serialize)]
struct FoundTag {
    id: i32,
    coord: Coord,
    container: bool,
    count: i32,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let start = Instant::now();

    let files = match provider::region_files(&args.directory) {
        Ok(files) => files,
        Err(err) => {
            eprintln!("cannot read {}: {}", args.directory.display(), err);
            exit(1);
        }
    };

    if files.is_empty() {
        eprintln!("no region files found in {}", args.directory.display());
        exit(1);
    }

    let pattern = OwnedTagHeader::new(TagId::Int, args.tag.as_bytes().to_vec()).to_bytes();
    let selection = [OwnedTagHeader::new(TagId::List, "TileEntities")];

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

    let (sender, receiver) = mpsc::channel::<FoundTag>();

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

    let total_bytes = AtomicU64::new(0);

    for file in &files {
        let mut region = match RegionReader::open(file) {
            Ok(region) => region,
            Err(err) => {
                warn!("failed to open {}: {:?}", file.display(), err);
                continue;
            }
        };

        let region_sender = sender.clone();

        pool.install(|| {
            region
                .chunks()
                .par_bridge()
                .for_each_with(region_sender, |sender, chunk| {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            warn!("failed to read chunk: {:?}", err);
                            return;
                        }
                    };

                    for found in scan_chunk(&chunk, &pattern, &selection, &total_bytes) {
                        let _ = sender.send(found);
                    }
                });
        });

        info!(
            "processed {} ({} bytes scanned)",
            file.display(),
            total_bytes.load(Ordering::Relaxed)
        );
    }

    drop(sender);
    let total = printer.join().expect("printer thread panicked");

    info!("took {:?}, found {} tags", start.elapsed(), total);
}

/// Runs the cheap-to-expensive pipeline over one chunk: cut the
/// tile-entity window, reject on a missing substring, then selectively
/// index, match, and resolve details. Any failure drops only this chunk.
fn scan_chunk(
    chunk: &ChunkData,
    pattern: &[u8],
    selection: &[OwnedTagHeader],
    total_bytes: &AtomicU64,
) -> Vec<FoundTag> {
    let mut results = Vec::new();

    let window = match tile_entities_window(chunk) {
        Ok(window) => window,
        Err(_) => return results,
    };

    total_bytes.fetch_add(window.len() as u64, Ordering::Relaxed);

    let mut reader = Reader::new(&window);

    if !reader.possible_tag_match(&[vec![pattern.to_vec()]]) {
        return results;
    }

    if let Err(err) = reader.prepare_index(Some(selection)) {
        warn!(
            "error indexing chunk {} {}: {:?}",
            chunk.chunk.x, chunk.chunk.z, err
        );
        return results;
    }

    let matches = match reader.match_tags(&[pattern.to_vec()]) {
        Ok(matches) => matches,
        Err(err) => {
            warn!("error matching: {:?}", err);
            return results;
        }
    };

    let index = match reader.index() {
        Some(index) => index,
        None => return results,
    };

    for entry_id in matches {
        let entry = index.entry(entry_id);

        let details = match reader.tile_entity_details(entry_id) {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!("no tile entity details for match in chunk {} {}", chunk.chunk.x, chunk.chunk.z);
                continue;
            }
            Err(err) => {
                warn!("error resolving details: {:?}", err);
                continue;
            }
        };

        let id = match reader.copy(entry.pos).read_int(entry.header.id) {
            Ok(id) => id,
            Err(err) => {
                warn!("error reading matched value: {:?}", err);
                continue;
            }
        };

        results.push(FoundTag {
            id,
            coord: details.location,
            container: details.container,
            count: details.count,
        });
    }

    results
}
