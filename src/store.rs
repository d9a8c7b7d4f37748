use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::config::PreparedCatalog;
use crate::domain::{Epsg, LayerKey, LayerKind};
use crate::engine::{Dataset, GisEngine, VectorRef};
use crate::error::PrepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Missing,
    /// Output folder exists but the final file does not (interrupted run).
    Partial,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerLocation {
    Raster { path: Utf8PathBuf },
    Vector { container: Utf8PathBuf, layer: String },
}

impl LayerLocation {
    pub fn dataset(&self) -> Dataset {
        match self {
            LayerLocation::Raster { path } => Dataset::Raster(path.clone().into_std_path_buf()),
            LayerLocation::Vector { container, layer } => Dataset::Vector(VectorRef::layer(
                container.clone().into_std_path_buf(),
                layer.clone(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub key: LayerKey,
    #[serde(flatten)]
    pub location: LayerLocation,
}

/// Canonical location of every prepared layer. Independent of what a run
/// actually did, so re-runs produce the same manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedManifest {
    pub target_epsg: Epsg,
    pub layers: Vec<ManifestEntry>,
}

impl PreparedManifest {
    pub fn get(&self, key: LayerKey) -> Option<&LayerLocation> {
        self.layers
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.location)
    }
}

/// `prepared/dem_mosaic.tif` -> `prepared/dem_mosaic/dem_mosaic.tif`.
pub fn raster_subfolder_path(declared: &Utf8Path) -> Utf8PathBuf {
    let folder = declared.with_extension("");
    match declared.file_name() {
        Some(name) => folder.join(name),
        None => folder,
    }
}

#[derive(Debug, Clone)]
pub struct PreparedStore {
    catalog: PreparedCatalog,
}

impl PreparedStore {
    pub fn new(catalog: PreparedCatalog) -> Self {
        Self { catalog }
    }

    pub fn geopackage(&self) -> &Utf8Path {
        self.catalog.geopackage()
    }

    pub fn location(&self, key: LayerKey) -> Result<LayerLocation, PrepError> {
        match key.kind() {
            LayerKind::Raster => Ok(LayerLocation::Raster {
                path: raster_subfolder_path(&self.catalog.raster_path(key)?),
            }),
            LayerKind::Vector => Ok(LayerLocation::Vector {
                container: self.catalog.geopackage().to_path_buf(),
                layer: self.catalog.vector_layer(key)?.to_string(),
            }),
        }
    }

    pub fn raster_output(&self, key: LayerKey) -> Result<PathBuf, PrepError> {
        match self.location(key)? {
            LayerLocation::Raster { path } => Ok(path.into_std_path_buf()),
            LayerLocation::Vector { .. } => Err(PrepError::Engine(format!(
                "{key} is a vector layer, not a raster"
            ))),
        }
    }

    pub fn vector_output(&self, key: LayerKey) -> Result<VectorRef, PrepError> {
        match self.location(key)? {
            LayerLocation::Vector { container, layer } => {
                Ok(VectorRef::layer(container.into_std_path_buf(), layer))
            }
            LayerLocation::Raster { .. } => Err(PrepError::Engine(format!(
                "{key} is a raster layer, not a vector"
            ))),
        }
    }

    /// Completeness is existence of the final output. Vector layers are looked
    /// up with a read-only engine query.
    pub fn status(&self, key: LayerKey, engine: &dyn GisEngine) -> Result<LayerStatus, PrepError> {
        match self.location(key)? {
            LayerLocation::Raster { path } => {
                if path.as_std_path().is_file() {
                    Ok(LayerStatus::Complete)
                } else if path.parent().is_some_and(|dir| dir.as_std_path().is_dir()) {
                    Ok(LayerStatus::Partial)
                } else {
                    Ok(LayerStatus::Missing)
                }
            }
            LayerLocation::Vector { container, layer } => {
                if !container.as_std_path().exists() {
                    return Ok(LayerStatus::Missing);
                }
                if engine.has_vector_layer(container.as_std_path(), &layer)? {
                    Ok(LayerStatus::Complete)
                } else {
                    Ok(LayerStatus::Missing)
                }
            }
        }
    }

    pub fn manifest(&self, target_epsg: Epsg) -> Result<PreparedManifest, PrepError> {
        let layers = LayerKey::ALL
            .into_iter()
            .map(|key| {
                Ok(ManifestEntry {
                    key,
                    location: self.location(key)?,
                })
            })
            .collect::<Result<Vec<_>, PrepError>>()?;
        Ok(PreparedManifest {
            target_epsg,
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_lands_in_named_subfolder() {
        let declared = Utf8Path::new("/data/prepared/dem_hi_pacioos_mosaic_32604.tif");
        assert_eq!(
            raster_subfolder_path(declared),
            Utf8PathBuf::from(
                "/data/prepared/dem_hi_pacioos_mosaic_32604/dem_hi_pacioos_mosaic_32604.tif"
            )
        );
    }
}
