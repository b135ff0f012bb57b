use std::fs::read_dir;
use std::io;
use std::path::{Path, PathBuf};

use crate::position::RegionPos;

/// Paths of all `r.<X>.<Z>.mca` files directly inside `folder`, sorted by
/// filename so scans are deterministic.
pub fn region_files(folder: &Path) -> Result<Vec<PathBuf>, io::Error> {
    files_with_extension(folder, "mca", |path| {
        RegionPos::from_filename(path).is_ok()
    })
}

/// Paths of all `.dat` player files directly inside `folder`, sorted by
/// filename.
pub fn player_files(folder: &Path) -> Result<Vec<PathBuf>, io::Error> {
    files_with_extension(folder, "dat", |_| true)
}

fn files_with_extension(
    folder: &Path,
    extension: &str,
    accept: impl Fn(&Path) -> bool,
) -> Result<Vec<PathBuf>, io::Error> {
    let mut paths: Vec<_> = read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == extension))
        .filter(|path| accept(path))
        .collect();

    paths.sort();

    Ok(paths)
}
