use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{Epsg, Resampling};
use crate::engine::{Dataset, GisEngine, VectorRef};
use crate::error::PrepError;
use crate::fetch::part_path;
use crate::fs_util::{discard_file, ensure_dir, promote, release};

pub const SCRATCH_VECTORS: &str = "scratch_vectors.gpkg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Source already in the target CRS; values carried over unchanged.
    Copied,
    Projected,
}

/// EPSG code of `dataset`, or `None` when it carries no identifiable CRS.
pub fn resolve_crs(engine: &dyn GisEngine, dataset: &Dataset) -> Result<Option<Epsg>, PrepError> {
    Ok(engine
        .describe_epsg(dataset)?
        .and_then(|code| Epsg::new(code).ok()))
}

/// Returns `raster` itself when it has a CRS. Otherwise copies it to
/// `<scratch>/<stem>_defined.tif` and labels the copy with `assumed`; pixel
/// values are not resampled.
pub fn stamp_crs_if_missing(
    engine: &dyn GisEngine,
    raster: &Path,
    assumed: Epsg,
    scratch_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, PrepError> {
    let dataset = Dataset::Raster(raster.to_path_buf());
    if resolve_crs(engine, &dataset)?.is_some() {
        return Ok(raster.to_path_buf());
    }

    ensure_dir(scratch_dir)?;
    let stem = raster
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "raster".to_string());
    let defined = scratch_dir.join(format!("{stem}_defined.tif"));
    release(engine, &Dataset::Raster(defined.clone()))?;

    sink.event(ProgressEvent::new(format!(
        "phase=Project; no CRS on {}, assuming {assumed}",
        raster.display()
    )));
    engine.copy_raster(raster, &defined)?;
    engine.define_projection(&defined, assumed)?;
    Ok(defined)
}

/// Writes `source` to `target` in `target_epsg`. A source already in the
/// target CRS is copied, never resampled.
///
/// The engine writes `<target>.part` in the same folder; `target` appears only
/// through the final rename, so its existence always means a finished layer.
pub fn reproject_raster(
    engine: &dyn GisEngine,
    source: &Path,
    target: &Path,
    target_epsg: Epsg,
    resampling: Resampling,
    sink: &dyn ProgressSink,
) -> Result<Normalization, PrepError> {
    let source_epsg = resolve_crs(engine, &Dataset::Raster(source.to_path_buf()))?
        .ok_or_else(|| PrepError::CrsUnresolvable(source.to_path_buf()))?;

    if let Some(parent) = target.parent() {
        ensure_dir(parent)?;
    }
    release(engine, &Dataset::Raster(target.to_path_buf()))?;
    let staged = part_path(target);
    discard_file(&staged);

    let written = if source_epsg == target_epsg {
        sink.event(ProgressEvent::new(format!(
            "phase=Project; already {target_epsg}, copying {}",
            source.display()
        )));
        engine
            .copy_raster(source, &staged)
            .map(|()| Normalization::Copied)
    } else {
        sink.event(ProgressEvent::new(format!(
            "phase=Project; {source_epsg} -> {target_epsg} ({resampling})"
        )));
        engine
            .project_raster(source, &staged, target_epsg, resampling)
            .map(|()| Normalization::Projected)
    };

    match written {
        Ok(normalization) => {
            promote(&staged, target)?;
            Ok(normalization)
        }
        Err(err) => {
            discard_file(&staged);
            Err(err)
        }
    }
}

/// Writes `source` as layer `target` of the shared container. Reprojected
/// features are staged in `<scratch>/scratch_vectors.gpkg` first so the shared
/// container only ever receives a finished layer.
pub fn reproject_vector(
    engine: &dyn GisEngine,
    source: &VectorRef,
    target: &VectorRef,
    target_epsg: Epsg,
    scratch_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<Normalization, PrepError> {
    let layer = target
        .layer
        .as_deref()
        .ok_or_else(|| PrepError::Engine(format!("{target} is not a container layer")))?;
    ensure_geopackage(engine, &target.container)?;

    let source_epsg = resolve_crs(engine, &Dataset::Vector(source.clone()))?
        .ok_or_else(|| PrepError::CrsUnresolvable(source.container.clone()))?;

    let (staged, normalization) = if source_epsg == target_epsg {
        (source.clone(), Normalization::Copied)
    } else {
        ensure_dir(scratch_dir)?;
        let scratch = scratch_dir.join(SCRATCH_VECTORS);
        ensure_geopackage(engine, &scratch)?;
        let staged = VectorRef::layer(scratch, format!("{layer}_tmp_{}", target_epsg.code()));
        release(engine, &Dataset::Vector(staged.clone()))?;

        sink.event(ProgressEvent::new(format!(
            "phase=Project; {source_epsg} -> {target_epsg} staging {staged}"
        )));
        engine.project_vector(source, &staged, target_epsg)?;
        (staged, Normalization::Projected)
    };

    release(engine, &Dataset::Vector(target.clone()))?;
    sink.event(ProgressEvent::new(format!("phase=Store; writing {target}")));
    engine.copy_vector(&staged, target)?;
    Ok(normalization)
}

fn ensure_geopackage(engine: &dyn GisEngine, path: &Path) -> Result<(), PrepError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    engine.create_geopackage(path)
}
