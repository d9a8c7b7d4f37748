use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, elapsed_secs, fmt_elapsed};
use crate::config::SourceCatalog;
use crate::crs::{Normalization, reproject_raster, reproject_vector, stamp_crs_if_missing};
use crate::domain::{Epsg, LayerKey, LayerKind, LayerRecipe};
use crate::engine::{GisEngine, VectorRef};
use crate::error::PrepError;
use crate::fs_util::ensure_dir;
use crate::mosaic::{collect_tiles, mosaic};
use crate::store::{LayerStatus, PreparedManifest, PreparedStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareOptions {
    /// Rebuild layers whose prepared output already exists.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerAction {
    Skipped,
    Copied,
    Projected,
}

impl From<Normalization> for LayerAction {
    fn from(value: Normalization) -> Self {
        match value {
            Normalization::Copied => LayerAction::Copied,
            Normalization::Projected => LayerAction::Projected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub key: LayerKey,
    pub action: LayerAction,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub manifest: PreparedManifest,
    pub layers: Vec<LayerReport>,
    pub elapsed_secs: f64,
}

/// Runs one layer from its raw source to its prepared output.
pub struct LayerPreparer<'a> {
    engine: &'a dyn GisEngine,
    sources: &'a SourceCatalog,
    store: &'a PreparedStore,
    scratch_dir: &'a Path,
    target_epsg: Epsg,
}

impl<'a> LayerPreparer<'a> {
    pub fn new(
        engine: &'a dyn GisEngine,
        sources: &'a SourceCatalog,
        store: &'a PreparedStore,
        scratch_dir: &'a Path,
        target_epsg: Epsg,
    ) -> Self {
        Self {
            engine,
            sources,
            store,
            scratch_dir,
            target_epsg,
        }
    }

    pub fn prepare_layer(
        &self,
        key: LayerKey,
        sink: &dyn ProgressSink,
    ) -> Result<Normalization, PrepError> {
        let source = self.sources.get(key)?.as_std_path();
        match key.recipe() {
            LayerRecipe::TiledRaster {
                assume_epsg,
                resampling,
            } => {
                let tiles = collect_tiles(source)?;
                step(sink, "Mosaic", key, format!("found {} rasters to mosaic", tiles.len()));
                ensure_dir(self.scratch_dir)?;
                let mosaic_path = self.scratch_dir.join(format!("{key}_mosaic_tmp.tif"));
                step(sink, "Mosaic", key, "mosaicking rasters");
                let mosaicked = mosaic(self.engine, source, &mosaic_path, sink)?;

                let working = match assume_epsg {
                    Some(assumed) => stamp_crs_if_missing(
                        self.engine,
                        &mosaicked,
                        assumed,
                        self.scratch_dir,
                        sink,
                    )?,
                    None => mosaicked,
                };
                step(sink, "Project", key, "projecting to target CRS");
                reproject_raster(
                    self.engine,
                    &working,
                    &self.store.raster_output(key)?,
                    self.target_epsg,
                    resampling,
                    sink,
                )
            }
            LayerRecipe::SingleRaster { resampling } => {
                require_source(source)?;
                step(sink, "Project", key, "projecting to target CRS");
                reproject_raster(
                    self.engine,
                    source,
                    &self.store.raster_output(key)?,
                    self.target_epsg,
                    resampling,
                    sink,
                )
            }
            LayerRecipe::Vector => {
                require_source(source)?;
                step(sink, "Project", key, "projecting to target CRS (if needed)");
                reproject_vector(
                    self.engine,
                    &VectorRef::file(source),
                    &self.store.vector_output(key)?,
                    self.target_epsg,
                    self.scratch_dir,
                    sink,
                )
            }
        }
    }

    /// Prepares every layer whose output is missing: rasters first, then
    /// vectors, each group in declared order.
    pub fn prepare_all(
        &self,
        options: PrepareOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PrepareReport, PrepError> {
        let start = Instant::now();
        let manifest = self.store.manifest(self.target_epsg)?;
        sink.event(ProgressEvent::new(format!(
            "phase=Resolve; target CRS: {}",
            self.target_epsg
        )));

        let mut pending = Vec::new();
        for key in LayerKey::ALL {
            if options.overwrite || self.store.status(key, self.engine)? != LayerStatus::Complete {
                pending.push(key);
            }
        }
        sink.event(ProgressEvent::new(format!(
            "phase=Resolve; missing prepared outputs: {} of {}",
            pending.len(),
            LayerKey::ALL.len()
        )));

        if pending.is_empty() {
            sink.event(ProgressEvent {
                message: "phase=Store; all prepared inputs already exist, skipping".to_string(),
                elapsed: Some(start.elapsed()),
            });
            let layers = LayerKey::ALL
                .into_iter()
                .map(|key| LayerReport {
                    key,
                    action: LayerAction::Skipped,
                    elapsed_secs: 0.0,
                })
                .collect();
            return Ok(PrepareReport {
                manifest,
                layers,
                elapsed_secs: elapsed_secs(start.elapsed()),
            });
        }

        let mut layers = Vec::with_capacity(LayerKey::ALL.len());
        for kind in [LayerKind::Raster, LayerKind::Vector] {
            for key in LayerKey::ALL.into_iter().filter(|key| key.kind() == kind) {
                if !pending.contains(&key) {
                    step(sink, "Resolve", key, "prepared output exists, skipping");
                    layers.push(LayerReport {
                        key,
                        action: LayerAction::Skipped,
                        elapsed_secs: 0.0,
                    });
                    continue;
                }

                let layer_start = Instant::now();
                let normalization = self.prepare_layer(key, sink)?;
                let elapsed = layer_start.elapsed();
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Store; {}: export complete ({})",
                        key.label(),
                        fmt_elapsed(elapsed)
                    ),
                    elapsed: Some(elapsed),
                });
                layers.push(LayerReport {
                    key,
                    action: normalization.into(),
                    elapsed_secs: elapsed_secs(elapsed),
                });
            }
        }

        let total = start.elapsed();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; prepared inputs are ready, total time {}",
                fmt_elapsed(total)
            ),
            elapsed: Some(total),
        });
        Ok(PrepareReport {
            manifest,
            layers,
            elapsed_secs: elapsed_secs(total),
        })
    }
}

fn step(sink: &dyn ProgressSink, phase: &str, key: LayerKey, text: impl AsRef<str>) {
    sink.event(ProgressEvent::new(format!(
        "phase={phase}; {}: {}",
        key.label(),
        text.as_ref()
    )));
}

fn require_source(source: &Path) -> Result<(), PrepError> {
    if source.exists() {
        Ok(())
    } else {
        Err(PrepError::MissingIntermediate(source.to_path_buf()))
    }
}
