use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Epsg(u32);

impl Epsg {
    pub const WGS84: Epsg = Epsg(4326);

    pub fn new(code: u32) -> Result<Self, PrepError> {
        if code == 0 {
            return Err(PrepError::InvalidEpsg(code.to_string()));
        }
        Ok(Self(code))
    }

    pub fn code(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Epsg {
    type Error = PrepError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Epsg::new(value)
    }
}

impl From<Epsg> for u32 {
    fn from(value: Epsg) -> Self {
        value.0
    }
}

impl fmt::Display for Epsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Epsg {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let code = digits
            .parse::<u32>()
            .map_err(|_| PrepError::InvalidEpsg(value.to_string()))?;
        Epsg::new(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Bilinear,
    Nearest,
}

impl Resampling {
    pub fn gdal_name(self) -> &'static str {
        match self {
            Resampling::Bilinear => "bilinear",
            Resampling::Nearest => "near",
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resampling::Bilinear => write!(f, "bilinear"),
            Resampling::Nearest => write!(f, "nearest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Raster,
    Vector,
}

/// How a layer travels from its raw source to its prepared output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRecipe {
    /// Directory of tiles: mosaic, optionally stamp an assumed CRS, project.
    TiledRaster {
        assume_epsg: Option<Epsg>,
        resampling: Resampling,
    },
    SingleRaster {
        resampling: Resampling,
    },
    Vector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKey {
    Dem,
    Watertable,
    Slope,
    Rainfall,
    Parcels,
    Cesspools,
    Coastline,
    Sma,
    Streams,
    WellsDom,
    WellsMun,
    BuildingsFps,
    Soils,
    FloodZones,
}

impl LayerKey {
    /// Rasters first, then vectors, each in processing order.
    pub const ALL: [LayerKey; 14] = [
        LayerKey::Dem,
        LayerKey::Watertable,
        LayerKey::Slope,
        LayerKey::Rainfall,
        LayerKey::Parcels,
        LayerKey::Cesspools,
        LayerKey::Coastline,
        LayerKey::Sma,
        LayerKey::Streams,
        LayerKey::WellsDom,
        LayerKey::WellsMun,
        LayerKey::BuildingsFps,
        LayerKey::Soils,
        LayerKey::FloodZones,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayerKey::Dem => "dem",
            LayerKey::Watertable => "watertable",
            LayerKey::Slope => "slope",
            LayerKey::Rainfall => "rainfall",
            LayerKey::Parcels => "parcels",
            LayerKey::Cesspools => "cesspools",
            LayerKey::Coastline => "coastline",
            LayerKey::Sma => "sma",
            LayerKey::Streams => "streams",
            LayerKey::WellsDom => "wells_dom",
            LayerKey::WellsMun => "wells_mun",
            LayerKey::BuildingsFps => "buildings_fps",
            LayerKey::Soils => "soils",
            LayerKey::FloodZones => "flood_zones",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LayerKey::Dem => "DEM",
            LayerKey::Watertable => "Water table",
            LayerKey::Slope => "Slope",
            LayerKey::Rainfall => "Rainfall",
            other => other.as_str(),
        }
    }

    pub fn kind(self) -> LayerKind {
        match self.recipe() {
            LayerRecipe::TiledRaster { .. } | LayerRecipe::SingleRaster { .. } => {
                LayerKind::Raster
            }
            LayerRecipe::Vector => LayerKind::Vector,
        }
    }

    pub fn recipe(self) -> LayerRecipe {
        match self {
            // Raw DEM and slope tiles ship without projection metadata.
            LayerKey::Dem | LayerKey::Slope => LayerRecipe::TiledRaster {
                assume_epsg: Some(Epsg::WGS84),
                resampling: Resampling::Bilinear,
            },
            // Depth bands are discrete; nearest keeps them intact.
            LayerKey::Watertable => LayerRecipe::TiledRaster {
                assume_epsg: None,
                resampling: Resampling::Nearest,
            },
            LayerKey::Rainfall => LayerRecipe::SingleRaster {
                resampling: Resampling::Bilinear,
            },
            _ => LayerRecipe::Vector,
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LayerKey {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        LayerKey::ALL
            .into_iter()
            .find(|key| key.as_str() == trimmed)
            .ok_or_else(|| PrepError::UnknownLayerKey(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMechanism {
    Zip,
    FolderListing,
    ScientificArray,
    Tabular,
}

impl fmt::Display for FetchMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMechanism::Zip => write!(f, "zip"),
            FetchMechanism::FolderListing => write!(f, "folder"),
            FetchMechanism::ScientificArray => write!(f, "netcdf"),
            FetchMechanism::Tabular => write!(f, "tabular"),
        }
    }
}
