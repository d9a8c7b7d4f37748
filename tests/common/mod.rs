#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use mpat_prep::app::{ProgressEvent, ProgressSink};
use mpat_prep::config::{Config, ConfigLoader, ResolvedConfig, default_config};
use mpat_prep::convert::ArrayConverter;
use mpat_prep::domain::{Epsg, Resampling};
use mpat_prep::engine::{Dataset, GisEngine, MosaicSpec, VectorRef};
use mpat_prep::error::PrepError;
use mpat_prep::http::{HttpBody, HttpSource, Pause};

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockHttp {
    pub resources: HashMap<String, Vec<u8>>,
    /// Per `open` call: serve this many bytes, then drop the connection.
    pub cuts: Mutex<VecDeque<usize>>,
    pub ignore_range: bool,
    pub always_fail: bool,
    pub opens: Mutex<Vec<(String, Option<u64>)>>,
    pub gets: Mutex<Vec<String>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(url.to_string(), body.into());
        self
    }

    pub fn cut_next_open_after(&self, bytes: usize) {
        self.cuts.lock().unwrap().push_back(bytes);
    }

    pub fn opens(&self) -> Vec<(String, Option<u64>)> {
        self.opens.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }
}

/// Yields `data` up to `cut`, then fails like a reset connection.
struct DroppingReader {
    inner: Cursor<Vec<u8>>,
    remaining: Option<usize>,
}

impl Read for DroppingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.remaining {
            Some(0) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            Some(left) => {
                let limit = left.min(buf.len());
                let read = self.inner.read(&mut buf[..limit])?;
                self.remaining = Some(left - read);
                if read == 0 {
                    self.remaining = Some(0);
                }
                Ok(read)
            }
            None => self.inner.read(buf),
        }
    }
}

impl HttpSource for MockHttp {
    fn open(&self, url: &str, offset: Option<u64>) -> Result<HttpBody, PrepError> {
        self.opens.lock().unwrap().push((url.to_string(), offset));
        if self.always_fail {
            return Err(PrepError::Http("connection refused".to_string()));
        }
        let Some(data) = self.resources.get(url) else {
            return Ok(HttpBody {
                status: 404,
                reader: Box::new(Cursor::new(Vec::new())),
            });
        };

        let (status, body) = match offset {
            Some(start) if !self.ignore_range => {
                let start = start as usize;
                if start >= data.len() {
                    return Ok(HttpBody {
                        status: 416,
                        reader: Box::new(Cursor::new(Vec::new())),
                    });
                }
                (206, data[start..].to_vec())
            }
            _ => (200, data.clone()),
        };
        let remaining = self.cuts.lock().unwrap().pop_front();
        Ok(HttpBody {
            status,
            reader: Box::new(DroppingReader {
                inner: Cursor::new(body),
                remaining,
            }),
        })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, PrepError> {
        self.gets.lock().unwrap().push(url.to_string());
        if self.always_fail {
            return Err(PrepError::Http("connection refused".to_string()));
        }
        self.resources
            .get(url)
            .cloned()
            .ok_or_else(|| PrepError::HttpStatus {
                status: 404,
                message: format!("not found: {url}"),
            })
    }
}

/// Records waits instead of sleeping. Clones share one log.
#[derive(Clone, Default)]
pub struct RecordingPause {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPause {
    pub fn waits(&self) -> Vec<u64> {
        self.waits
            .lock()
            .unwrap()
            .iter()
            .map(|wait| wait.as_secs())
            .collect()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

pub struct FakeConverter {
    pub available: bool,
    pub fail: bool,
    pub conversions: Mutex<Vec<PathBuf>>,
}

impl FakeConverter {
    pub fn available() -> Self {
        Self {
            available: true,
            fail: false,
            conversions: Mutex::new(Vec::new()),
        }
    }

    pub fn missing() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    pub fn count(&self) -> usize {
        self.conversions.lock().unwrap().len()
    }
}

impl ArrayConverter for FakeConverter {
    fn ensure_available(&self) -> Result<(), PrepError> {
        if self.available {
            Ok(())
        } else {
            Err(PrepError::MissingTool {
                tool: "gdal_translate".to_string(),
                hint: "install GDAL".to_string(),
            })
        }
    }

    fn convert(&self, source: &Path, target: &Path) -> Result<(), PrepError> {
        self.ensure_available()?;
        if self.fail {
            // Dies mid-write, like gdal_translate killed halfway.
            fs::write(target, b"II*\0truncated").unwrap();
            return Err(PrepError::Conversion("unsupported NetCDF".to_string()));
        }
        let bytes = fs::read(source).map_err(|err| PrepError::Conversion(err.to_string()))?;
        let raster = FakeRaster::new(Some(4326), &[((0, 0), bytes.len() as f64)]);
        raster.write(target);
        self.conversions.lock().unwrap().push(source.to_path_buf());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GIS engine
// ---------------------------------------------------------------------------

/// Tiny raster stored as JSON: CRS plus a sparse pixel grid keyed `"x,y"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeRaster {
    pub epsg: Option<u32>,
    pub cells: BTreeMap<String, f64>,
    #[serde(default)]
    pub resampled: Option<String>,
}

impl FakeRaster {
    pub fn new(epsg: Option<u32>, cells: &[((i32, i32), f64)]) -> Self {
        Self {
            epsg,
            cells: cells
                .iter()
                .map(|((x, y), value)| (format!("{x},{y}"), *value))
                .collect(),
            resampled: None,
        }
    }

    pub fn read(path: &Path) -> Self {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, serde_json::to_vec(self).unwrap()).unwrap();
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<f64> {
        self.cells.get(&format!("{x},{y}")).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeVector {
    pub epsg: Option<u32>,
    pub features: Vec<String>,
}

impl FakeVector {
    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, serde_json::to_vec(self).unwrap()).unwrap();
    }
}

type FakeContainer = BTreeMap<String, FakeVector>;

#[derive(Default)]
pub struct FakeEngine {
    /// Mutating operations only; describe and layer lookups are reads.
    pub ops: Mutex<Vec<String>>,
    pub fail_delete: bool,
    /// `project_raster` leaves a partial file at its target and fails.
    pub interrupt_projection: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn op_count(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn read_layer(&self, container: &Path, layer: &str) -> Option<FakeVector> {
        read_container(container).ok()?.remove(layer)
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn read_vector(&self, source: &VectorRef) -> Result<FakeVector, PrepError> {
        match &source.layer {
            Some(layer) => read_container(&source.container)?
                .remove(layer)
                .ok_or_else(|| PrepError::Engine(format!("no layer {source}"))),
            None => {
                let bytes = fs::read(&source.container)
                    .map_err(|err| PrepError::Engine(err.to_string()))?;
                serde_json::from_slice(&bytes).map_err(|err| PrepError::Engine(err.to_string()))
            }
        }
    }

    fn write_vector(&self, target: &VectorRef, vector: FakeVector) -> Result<(), PrepError> {
        let layer = target
            .layer
            .clone()
            .ok_or_else(|| PrepError::Engine("target must be a layer".to_string()))?;
        let mut container = read_container(&target.container)?;
        container.insert(layer, vector);
        write_container(&target.container, &container)
    }
}

fn read_raster(path: &Path) -> Result<FakeRaster, PrepError> {
    let bytes = fs::read(path).map_err(|err| PrepError::Engine(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| PrepError::Engine(err.to_string()))
}

fn write_raster(path: &Path, raster: &FakeRaster) -> Result<(), PrepError> {
    let bytes = serde_json::to_vec(raster).map_err(|err| PrepError::Engine(err.to_string()))?;
    fs::write(path, bytes).map_err(|err| PrepError::Engine(err.to_string()))
}

fn read_container(path: &Path) -> Result<FakeContainer, PrepError> {
    let bytes = fs::read(path).map_err(|err| PrepError::Engine(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| PrepError::Engine(err.to_string()))
}

fn write_container(path: &Path, container: &FakeContainer) -> Result<(), PrepError> {
    let bytes =
        serde_json::to_vec(container).map_err(|err| PrepError::Engine(err.to_string()))?;
    fs::write(path, bytes).map_err(|err| PrepError::Engine(err.to_string()))
}

fn name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl GisEngine for FakeEngine {
    fn describe_epsg(&self, dataset: &Dataset) -> Result<Option<u32>, PrepError> {
        match dataset {
            Dataset::Raster(path) => Ok(read_raster(path)?.epsg),
            Dataset::Vector(vector) => Ok(self.read_vector(vector)?.epsg),
        }
    }

    fn copy_raster(&self, source: &Path, target: &Path) -> Result<(), PrepError> {
        self.record(format!("copy_raster {} -> {}", name(source), name(target)));
        fs::copy(source, target).map_err(|err| PrepError::Engine(err.to_string()))?;
        Ok(())
    }

    fn define_projection(&self, raster: &Path, epsg: Epsg) -> Result<(), PrepError> {
        self.record(format!("define_projection {} {epsg}", name(raster)));
        let mut data = read_raster(raster)?;
        data.epsg = Some(epsg.code());
        write_raster(raster, &data)
    }

    fn project_raster(
        &self,
        source: &Path,
        target: &Path,
        epsg: Epsg,
        resampling: Resampling,
    ) -> Result<(), PrepError> {
        self.record(format!(
            "project_raster {} -> {} {epsg} {}",
            name(source),
            name(target),
            resampling.gdal_name()
        ));
        if self.interrupt_projection {
            fs::write(target, b"half warped").map_err(|err| PrepError::Engine(err.to_string()))?;
            return Err(PrepError::Engine("gdalwarp terminated".to_string()));
        }
        let mut data = read_raster(source)?;
        data.epsg = Some(epsg.code());
        data.resampled = Some(resampling.gdal_name().to_string());
        write_raster(target, &data)
    }

    fn mosaic_rasters(
        &self,
        tiles: &[PathBuf],
        target: &Path,
        spec: &MosaicSpec,
    ) -> Result<(), PrepError> {
        let names: Vec<String> = tiles.iter().map(|tile| name(tile)).collect();
        self.record(format!("mosaic_rasters [{}] -> {}", names.join(","), name(target)));
        assert_eq!(spec.bands, 1);

        let mut merged = FakeRaster::new(None, &[]);
        for (index, tile) in tiles.iter().enumerate() {
            let data = read_raster(tile)?;
            if index == 0 {
                merged.epsg = data.epsg;
            }
            for (cell, value) in data.cells {
                merged.cells.entry(cell).or_insert(value);
            }
        }
        write_raster(target, &merged)
    }

    fn create_geopackage(&self, path: &Path) -> Result<(), PrepError> {
        self.record(format!("create_geopackage {}", name(path)));
        write_container(path, &FakeContainer::new())
    }

    fn has_vector_layer(&self, container: &Path, layer: &str) -> Result<bool, PrepError> {
        if !container.exists() {
            return Ok(false);
        }
        Ok(read_container(container)?.contains_key(layer))
    }

    fn copy_vector(&self, source: &VectorRef, target: &VectorRef) -> Result<(), PrepError> {
        self.record(format!("copy_vector {source} -> {target}"));
        let vector = self.read_vector(source)?;
        self.write_vector(target, vector)
    }

    fn project_vector(
        &self,
        source: &VectorRef,
        target: &VectorRef,
        epsg: Epsg,
    ) -> Result<(), PrepError> {
        self.record(format!("project_vector {source} -> {target} {epsg}"));
        let mut vector = self.read_vector(source)?;
        vector.epsg = Some(epsg.code());
        self.write_vector(target, vector)
    }

    fn delete(&self, dataset: &Dataset) -> Result<(), PrepError> {
        self.record(format!("delete {dataset}"));
        if self.fail_delete {
            return Err(PrepError::Engine("dataset is locked".to_string()));
        }
        match dataset {
            Dataset::Raster(path) => {
                fs::remove_file(path).map_err(|err| PrepError::Engine(err.to_string()))
            }
            Dataset::Vector(vector) => match &vector.layer {
                Some(layer) => {
                    let mut container = read_container(&vector.container)?;
                    container.remove(layer);
                    write_container(&vector.container, &container)
                }
                None => fs::remove_file(&vector.container)
                    .map_err(|err| PrepError::Engine(err.to_string())),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Default catalog with relative roots, scratch kept local and no
/// acquisition sources.
pub fn test_config() -> Config {
    let mut config = default_config();
    config.raw_dir = "raw".to_string();
    config.prepared_dir = "prepared".to_string();
    config.scratch_dir = Some("scratch".to_string());
    config.acquisition.zip_sources.clear();
    config.acquisition.folder_sources.clear();
    config.acquisition.dem_tiles = None;
    config.acquisition.tabular_sources.clear();
    config
}

pub fn resolve(config: Config, root: &Path) -> ResolvedConfig {
    let base = Utf8Path::from_path(root).unwrap();
    ConfigLoader::resolve_config(config, base).unwrap()
}

/// Raw inputs for every layer of the default catalog: DEM and slope tiles
/// without a CRS, water table tiles in WGS84, rainfall already in the
/// target CRS, vectors in WGS84.
pub fn seed_raw_inputs(raw: &Path) {
    for (x, tile) in ["tile_a.tif", "tile_b.tif", "tile_c.tif"].iter().enumerate() {
        let x = x as i32;
        FakeRaster::new(None, &[((x, 0), 100.0 + f64::from(x))])
            .write(&raw.join("dem_hi_pacioos").join(tile));
        FakeRaster::new(None, &[((x, 0), 5.0 + f64::from(x))])
            .write(&raw.join("slope_hi_hcpt").join(tile));
    }
    for (x, tile) in ["wt_1.tif", "wt_2.tif"].iter().enumerate() {
        FakeRaster::new(Some(4326), &[((x as i32, 0), 3.0)])
            .write(&raw.join("watertable_hi_hcpt").join(tile));
    }
    FakeRaster::new(Some(32604), &[((0, 0), 2100.5), ((1, 0), 1800.25)]).write(
        &raw.join("annual_rainfall_hi_hcpt")
            .join("annual_rainfall_mm.tif"),
    );

    let vectors = [
        "parcels_hi/parcels.shp",
        "cesspools_hi_hcpt/cesspools.shp",
        "coastline_hi_op/coastline.shp",
        "sma_hi_op/sma.shp",
        "streams_hi_hcpt/streams.shp",
        "wells_hi_hcpt/wells_domestic.shp",
        "wells_hi_hcpt/wells_municipal.shp",
        "buildings_hi/building_footprints.shp",
        "soils_hi/soils.shp",
        "flood_zones_hi/flood_zones.shp",
    ];
    for path in vectors {
        FakeVector {
            epsg: Some(4326),
            features: vec![format!("feature of {path}")],
        }
        .write(&raw.join(path));
    }
}
