use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;
use zip::ZipArchive;

use crate::engine::{Dataset, GisEngine};
use crate::error::PrepError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, PrepError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| PrepError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| PrepError::Archive(err.to_string()))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PrepError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(PrepError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| PrepError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| PrepError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| PrepError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| PrepError::Archive(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Writes through a sibling temp file so a half-written file never shows up
/// under its final name.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), PrepError> {
    let parent = path
        .parent()
        .ok_or_else(|| PrepError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| PrepError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".mpat-prep")
        .tempfile_in(parent)
        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| PrepError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Moves a finished staging file onto its final name. Callers stage in the
/// same directory, so the rename is atomic.
pub fn promote(staged: &Path, target: &Path) -> Result<(), PrepError> {
    fs::rename(staged, target).map_err(|err| {
        PrepError::Filesystem(format!("promote {}: {err}", target.display()))
    })
}

/// Removes a scratch or staging file. Absence is fine; any other failure is
/// logged and otherwise ignored.
pub fn discard_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "could not remove leftover file"),
    }
}

pub fn dir_has_entries(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub fn ensure_dir(path: &Path) -> Result<(), PrepError> {
    fs::create_dir_all(path).map_err(|err| PrepError::Filesystem(err.to_string()))
}

/// Best-effort release of an existing dataset before it is rewritten.
///
/// Engine-level delete first; if that fails, plain filesystem removal. A
/// layer inside a container has no filesystem fallback, so its engine error
/// is returned.
pub fn release(engine: &dyn GisEngine, dataset: &Dataset) -> Result<(), PrepError> {
    let present = match dataset {
        Dataset::Raster(path) => path.exists(),
        Dataset::Vector(vector) => match &vector.layer {
            Some(layer) => engine.has_vector_layer(&vector.container, layer)?,
            None => vector.container.exists(),
        },
    };
    if !present {
        return Ok(());
    }

    let err = match engine.delete(dataset) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    let path = dataset.path();
    let layered = matches!(dataset, Dataset::Vector(vector) if vector.layer.is_some());
    if layered {
        return Err(err);
    }
    warn!(dataset = %dataset, error = %err, "engine delete failed; removing from filesystem");
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(io_err) if io_err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(io_err) => Err(PrepError::Filesystem(io_err.to_string())),
    }
}
