//! Capability boundary to the geospatial engine.
//!
//! The pipeline only speaks these verbs; [`crate::gdal_cli::GdalCli`] maps
//! them onto the GDAL command-line tools and tests substitute a fake.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::domain::{Epsg, Resampling};
use crate::error::PrepError;

/// A vector dataset: a standalone file (shapefile) or a named layer inside a
/// multi-layer container (GeoPackage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorRef {
    pub container: PathBuf,
    pub layer: Option<String>,
}

impl VectorRef {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            container: path.into(),
            layer: None,
        }
    }

    pub fn layer(container: impl Into<PathBuf>, layer: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            layer: Some(layer.into()),
        }
    }
}

impl fmt::Display for VectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layer {
            Some(layer) => write!(f, "{}:{layer}", self.container.display()),
            None => write!(f, "{}", self.container.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dataset {
    Raster(PathBuf),
    Vector(VectorRef),
}

impl Dataset {
    pub fn path(&self) -> &Path {
        match self {
            Dataset::Raster(path) => path,
            Dataset::Vector(vector) => &vector.container,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Raster(path) => write!(f, "{}", path.display()),
            Dataset::Vector(vector) => write!(f, "{vector}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Float32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosaicMethod {
    /// Earlier inputs keep their pixels where tiles overlap.
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicSpec {
    pub bands: u32,
    pub pixel_type: PixelType,
    pub method: MosaicMethod,
}

impl Default for MosaicSpec {
    fn default() -> Self {
        Self {
            bands: 1,
            pixel_type: PixelType::Float32,
            method: MosaicMethod::First,
        }
    }
}

pub trait GisEngine: Send + Sync {
    /// Raw authority code of the dataset's CRS, if the engine can read one.
    /// Zero means "present but unidentified".
    fn describe_epsg(&self, dataset: &Dataset) -> Result<Option<u32>, PrepError>;

    /// Copies pixels and metadata unchanged.
    fn copy_raster(&self, source: &Path, target: &Path) -> Result<(), PrepError>;

    /// Labels `raster` with `epsg` in place. Pixels are not touched.
    fn define_projection(&self, raster: &Path, epsg: Epsg) -> Result<(), PrepError>;

    fn project_raster(
        &self,
        source: &Path,
        target: &Path,
        epsg: Epsg,
        resampling: Resampling,
    ) -> Result<(), PrepError>;

    /// `tiles` arrive in precedence order.
    fn mosaic_rasters(
        &self,
        tiles: &[PathBuf],
        target: &Path,
        spec: &MosaicSpec,
    ) -> Result<(), PrepError>;

    fn create_geopackage(&self, path: &Path) -> Result<(), PrepError>;

    fn has_vector_layer(&self, container: &Path, layer: &str) -> Result<bool, PrepError>;

    fn copy_vector(&self, source: &VectorRef, target: &VectorRef) -> Result<(), PrepError>;

    fn project_vector(
        &self,
        source: &VectorRef,
        target: &VectorRef,
        epsg: Epsg,
    ) -> Result<(), PrepError>;

    fn delete(&self, dataset: &Dataset) -> Result<(), PrepError>;
}
