use std::fs;
use std::path::{Path, PathBuf};

use crate::app::{ProgressEvent, ProgressSink};
use crate::engine::{Dataset, GisEngine, MosaicSpec};
use crate::error::PrepError;
use crate::fs_util::{ensure_dir, release};

/// Raster tiles directly inside `dir` (`.tif`/`.tiff`, any case), sorted by
/// file name. The sort fixes tile precedence for the mosaic.
pub fn collect_tiles(dir: &Path) -> Result<Vec<PathBuf>, PrepError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(PrepError::Filesystem(err.to_string())),
    };

    let mut tiles = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PrepError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_tile = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
            .unwrap_or(false);
        if is_tile {
            tiles.push(path);
        }
    }
    tiles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(tiles)
}

/// Merges every tile of `tile_dir` into a single-band Float32 raster at
/// `output`. Where tiles overlap, the first tile in name order wins.
pub fn mosaic(
    engine: &dyn GisEngine,
    tile_dir: &Path,
    output: &Path,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, PrepError> {
    let tiles = collect_tiles(tile_dir)?;
    if tiles.is_empty() {
        return Err(PrepError::NoTiles(tile_dir.to_path_buf()));
    }

    if let Some(parent) = output.parent() {
        ensure_dir(parent)?;
    }
    release(engine, &Dataset::Raster(output.to_path_buf()))?;

    sink.event(ProgressEvent::new(format!(
        "phase=Mosaic; merging {} tiles from {}",
        tiles.len(),
        tile_dir.display()
    )));
    engine.mosaic_rasters(&tiles, output, &MosaicSpec::default())?;
    Ok(output.to_path_buf())
}
