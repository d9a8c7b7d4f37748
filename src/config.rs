use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Epsg, LayerKey, LayerKind};
use crate::error::PrepError;
use crate::fetch::FetchPolicy;

pub const CONFIG_FILE: &str = "mpat-prep.json";
pub const DEFAULT_TARGET_EPSG: u32 = 32604;
pub const PACIOOS_NCSS_BASE: &str = "https://pae-paha.pacioos.hawaii.edu/thredds/ncss";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub raw_dir: String,
    pub prepared_dir: String,
    #[serde(default)]
    pub scratch_dir: Option<String>,
    #[serde(default)]
    pub target_epsg: Option<u32>,
    #[serde(default)]
    pub geopackage: Option<String>,
    pub sources: BTreeMap<String, String>,
    pub prepared: BTreeMap<String, String>,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub zip_sources: Vec<SourceEntry>,
    #[serde(default)]
    pub folder_sources: Vec<SourceEntry>,
    #[serde(default)]
    pub dem_tiles: Option<DemTileConfig>,
    #[serde(default)]
    pub tabular_sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEntry {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DemTileConfig {
    pub dir: String,
    #[serde(default)]
    pub ncss_base: Option<String>,
    pub islands: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
}

/// Raw source location per layer. Tiled rasters point at a tile directory.
#[derive(Debug, Clone)]
pub struct SourceCatalog(BTreeMap<LayerKey, Utf8PathBuf>);

impl SourceCatalog {
    pub fn new(entries: BTreeMap<LayerKey, Utf8PathBuf>) -> Result<Self, PrepError> {
        require_all_keys("sources", &entries)?;
        Ok(Self(entries))
    }

    pub fn get(&self, key: LayerKey) -> Result<&Utf8Path, PrepError> {
        self.0
            .get(&key)
            .map(|path| path.as_path())
            .ok_or_else(|| missing_key("sources", key))
    }
}

/// Declared prepared output per layer: a `.tif` path for rasters, a layer
/// name inside the shared GeoPackage for vectors.
#[derive(Debug, Clone)]
pub struct PreparedCatalog {
    prepared_dir: Utf8PathBuf,
    geopackage: Utf8PathBuf,
    entries: BTreeMap<LayerKey, String>,
}

impl PreparedCatalog {
    pub fn new(
        prepared_dir: Utf8PathBuf,
        geopackage: Utf8PathBuf,
        entries: BTreeMap<LayerKey, String>,
    ) -> Result<Self, PrepError> {
        require_all_keys("prepared", &entries)?;
        Ok(Self {
            prepared_dir,
            geopackage,
            entries,
        })
    }

    pub fn prepared_dir(&self) -> &Utf8Path {
        &self.prepared_dir
    }

    pub fn geopackage(&self) -> &Utf8Path {
        &self.geopackage
    }

    /// Declared raster path, e.g. `prepared/dem_mosaic_32604.tif`.
    pub fn raster_path(&self, key: LayerKey) -> Result<Utf8PathBuf, PrepError> {
        let value = self
            .entries
            .get(&key)
            .ok_or_else(|| missing_key("prepared", key))?;
        Ok(resolve_path(&self.prepared_dir, value))
    }

    pub fn vector_layer(&self, key: LayerKey) -> Result<&str, PrepError> {
        self.entries
            .get(&key)
            .map(|value| value.as_str())
            .ok_or_else(|| missing_key("prepared", key))
    }
}

#[derive(Debug, Clone)]
pub struct DemTileCatalog {
    pub dir: String,
    pub ncss_base: String,
    pub islands: Vec<String>,
}

impl DemTileCatalog {
    pub fn ncss_url(&self, island: &str) -> String {
        format!(
            "{}/{island}?var=elev&horizStride=1&accept=netcdf",
            self.ncss_base.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct AcquisitionPlan {
    pub zip_sources: Vec<SourceEntry>,
    pub folder_sources: Vec<SourceEntry>,
    pub dem_tiles: Option<DemTileCatalog>,
    pub tabular_sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub raw_dir: Utf8PathBuf,
    pub scratch_dir: Utf8PathBuf,
    pub target_epsg: Epsg,
    pub sources: SourceCatalog,
    pub prepared: PreparedCatalog,
    pub acquisition: AcquisitionPlan,
    pub fetch: FetchPolicy,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PrepError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(PrepError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| PrepError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PrepError::ConfigParse(err.to_string()))?;

        let base = config_path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        Self::resolve_config(config, &base)
    }

    /// Validates the catalog and anchors relative paths: `raw_dir`,
    /// `prepared_dir`, `scratch_dir` against `base`; sources against
    /// `raw_dir`; prepared rasters and the GeoPackage against `prepared_dir`.
    pub fn resolve_config(config: Config, base: &Utf8Path) -> Result<ResolvedConfig, PrepError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let target_epsg = Epsg::new(config.target_epsg.unwrap_or(DEFAULT_TARGET_EPSG))?;

        let raw_dir = resolve_path(base, &config.raw_dir);
        let prepared_dir = resolve_path(base, &config.prepared_dir);
        let scratch_dir = match config.scratch_dir.as_deref() {
            Some(dir) => resolve_path(base, dir),
            None => default_scratch_dir()?,
        };
        let geopackage = resolve_path(
            &prepared_dir,
            config
                .geopackage
                .as_deref()
                .unwrap_or("prepared_vectors.gpkg"),
        );

        let sources = parse_layer_map(config.sources)?
            .into_iter()
            .map(|(key, value)| (key, resolve_path(&raw_dir, &value)))
            .collect();
        let prepared = parse_layer_map(config.prepared)?;
        for (key, value) in &prepared {
            if key.kind() == LayerKind::Raster && !value.to_ascii_lowercase().ends_with(".tif") {
                return Err(PrepError::ConfigParse(format!(
                    "prepared raster `{key}` must be a .tif path, got `{value}`"
                )));
            }
        }

        let acquisition = AcquisitionPlan {
            zip_sources: config.acquisition.zip_sources,
            folder_sources: config.acquisition.folder_sources,
            dem_tiles: config.acquisition.dem_tiles.map(|dem| DemTileCatalog {
                dir: dem.dir,
                ncss_base: dem
                    .ncss_base
                    .unwrap_or_else(|| PACIOOS_NCSS_BASE.to_string()),
                islands: dem.islands,
            }),
            tabular_sources: config.acquisition.tabular_sources,
        };

        let defaults = FetchPolicy::default();
        let fetch = FetchPolicy {
            attempts: config.fetch.attempts.unwrap_or(defaults.attempts).max(1),
            chunk_size: config
                .fetch
                .chunk_size
                .unwrap_or(defaults.chunk_size)
                .max(1),
            connect_timeout: config
                .fetch
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            read_timeout: config
                .fetch
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
        };

        Ok(ResolvedConfig {
            schema_version,
            raw_dir,
            scratch_dir,
            target_epsg,
            sources: SourceCatalog::new(sources)?,
            prepared: PreparedCatalog::new(prepared_dir, geopackage, prepared)?,
            acquisition,
            fetch,
        })
    }
}

/// Starter config for the Hawaii MPAT inputs, written by `mpat-prep init`.
pub fn default_config() -> Config {
    let sources = [
        ("dem", "dem_hi_pacioos"),
        ("watertable", "watertable_hi_hcpt"),
        ("slope", "slope_hi_hcpt"),
        ("rainfall", "annual_rainfall_hi_hcpt/annual_rainfall_mm.tif"),
        ("parcels", "parcels_hi/parcels.shp"),
        ("cesspools", "cesspools_hi_hcpt/cesspools.shp"),
        ("coastline", "coastline_hi_op/coastline.shp"),
        ("sma", "sma_hi_op/sma.shp"),
        ("streams", "streams_hi_hcpt/streams.shp"),
        ("wells_dom", "wells_hi_hcpt/wells_domestic.shp"),
        ("wells_mun", "wells_hi_hcpt/wells_municipal.shp"),
        ("buildings_fps", "buildings_hi/building_footprints.shp"),
        ("soils", "soils_hi/soils.shp"),
        ("flood_zones", "flood_zones_hi/flood_zones.shp"),
    ];
    let prepared = LayerKey::ALL.into_iter().map(|key| {
        let value = match key {
            LayerKey::Dem => "dem_hi_pacioos_mosaic_32604.tif".to_string(),
            LayerKey::Watertable => "watertable_hi_hcpt_mosaic_32604.tif".to_string(),
            LayerKey::Slope => "slope_hi_hcpt_mosaic_32604.tif".to_string(),
            LayerKey::Rainfall => "annual_rainfall_hi_hcpt_32604.tif".to_string(),
            other => other.as_str().to_string(),
        };
        (key.as_str().to_string(), value)
    });

    Config {
        schema_version: Some(1),
        raw_dir: "data/01_raw".to_string(),
        prepared_dir: "data/02_prepared".to_string(),
        scratch_dir: None,
        target_epsg: Some(DEFAULT_TARGET_EPSG),
        geopackage: Some("prepared_vectors.gpkg".to_string()),
        sources: sources
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        prepared: prepared.collect(),
        acquisition: AcquisitionConfig {
            zip_sources: entries(&[
                (
                    "coastline_hi_op",
                    "https://files.hawaii.gov/dbedt/op/gis/data/coastline.shp.zip",
                ),
                (
                    "sma_hi_op",
                    "https://files.hawaii.gov/dbedt/op/gis/data/sma.shp.zip",
                ),
            ]),
            folder_sources: entries(&[
                (
                    "slope_hi_hcpt",
                    "https://api.github.com/repos/cshuler/Act132_Cesspool_Prioritization/contents/Projected_data/DEMs/Slope_WGS",
                ),
                (
                    "watertable_hi_hcpt",
                    "https://api.github.com/repos/cshuler/Act132_Cesspool_Prioritization/contents/Projected_data/Water_table/Tiffs",
                ),
                (
                    "streams_hi_hcpt",
                    "https://api.github.com/repos/cshuler/Act132_Cesspool_Prioritization/contents/Projected_data/Streams",
                ),
                (
                    "wells_hi_hcpt",
                    "https://api.github.com/repos/cshuler/HCPT_Molokai/contents/Projected_data/Wells",
                ),
                (
                    "annual_rainfall_hi_hcpt",
                    "https://api.github.com/repos/cshuler/Act132_Cesspool_Prioritization/contents/Projected_data/Rain",
                ),
            ]),
            dem_tiles: Some(DemTileConfig {
                dir: "dem_hi_pacioos".to_string(),
                ncss_base: Some(PACIOOS_NCSS_BASE.to_string()),
                islands: default_dem_islands(),
            }),
            tabular_sources: Vec::new(),
        },
        fetch: FetchConfig::default(),
    }
}

pub fn default_dem_islands() -> Vec<String> {
    [
        "usgs_dem_10m_kahoolawe",
        "usgs_dem_10m_lanai",
        "usgs_dem_10m_molokai",
        "usgs_dem_10m_kauai",
        "usgs_dem_10m_niihau",
        "usgs_dem_10m_maui",
        "usgs_dem_10m_oahu",
        "usgs_dem_10m_bigisland",
    ]
    .iter()
    .map(|id| id.to_string())
    .collect()
}

fn entries(pairs: &[(&str, &str)]) -> Vec<SourceEntry> {
    pairs
        .iter()
        .map(|(id, url)| SourceEntry {
            id: id.to_string(),
            url: url.to_string(),
        })
        .collect()
}

fn parse_layer_map(raw: BTreeMap<String, String>) -> Result<BTreeMap<LayerKey, String>, PrepError> {
    raw.into_iter()
        .map(|(key, value)| Ok((key.parse::<LayerKey>()?, value)))
        .collect()
}

fn require_all_keys<V>(section: &str, entries: &BTreeMap<LayerKey, V>) -> Result<(), PrepError> {
    match LayerKey::ALL.into_iter().find(|key| !entries.contains_key(key)) {
        Some(key) => Err(missing_key(section, key)),
        None => Ok(()),
    }
}

fn missing_key(section: &str, key: LayerKey) -> PrepError {
    PrepError::MissingLayerKey {
        section: section.to_string(),
        key: key.as_str().to_string(),
    }
}

fn resolve_path(base: &Utf8Path, value: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_scratch_dir() -> Result<Utf8PathBuf, PrepError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("mpat-prep").join("scratch")).ok()
        })
        .ok_or_else(|| PrepError::Filesystem("unable to resolve scratch directory".to_string()))
}
