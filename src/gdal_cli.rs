use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::domain::{Epsg, Resampling};
use crate::engine::{Dataset, GisEngine, MosaicMethod, MosaicSpec, PixelType, VectorRef};
use crate::error::PrepError;
use crate::fs_util::discard_file;
use crate::tools::{find_in_path, run_tool, tool_version};

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub gdal: Option<String>,
    pub missing: Vec<String>,
}

/// [`GisEngine`] backed by the GDAL/OGR command-line utilities on `PATH`.
#[derive(Debug, Clone)]
pub struct GdalCli {
    gdalsrsinfo: Option<PathBuf>,
    gdal_translate: Option<PathBuf>,
    gdalwarp: Option<PathBuf>,
    gdalbuildvrt: Option<PathBuf>,
    gdalmanage: Option<PathBuf>,
    ogr2ogr: Option<PathBuf>,
    ogrinfo: Option<PathBuf>,
}

impl Default for GdalCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GdalCli {
    pub fn new() -> Self {
        Self {
            gdalsrsinfo: find_in_path("gdalsrsinfo"),
            gdal_translate: find_in_path("gdal_translate"),
            gdalwarp: find_in_path("gdalwarp"),
            gdalbuildvrt: find_in_path("gdalbuildvrt"),
            gdalmanage: find_in_path("gdalmanage"),
            ogr2ogr: find_in_path("ogr2ogr"),
            ogrinfo: find_in_path("ogrinfo"),
        }
    }

    pub fn tool_info(&self) -> ToolInfo {
        let slots = [
            ("gdalsrsinfo", &self.gdalsrsinfo),
            ("gdal_translate", &self.gdal_translate),
            ("gdalwarp", &self.gdalwarp),
            ("gdalbuildvrt", &self.gdalbuildvrt),
            ("gdalmanage", &self.gdalmanage),
            ("ogr2ogr", &self.ogr2ogr),
            ("ogrinfo", &self.ogrinfo),
        ];
        ToolInfo {
            gdal: self
                .gdal_translate
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            missing: slots
                .iter()
                .filter(|(_, slot)| slot.is_none())
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }

    fn run(&self, slot: &Option<PathBuf>, name: &str, args: Vec<OsString>) -> Result<String, PrepError> {
        let program = slot.as_ref().ok_or_else(|| PrepError::missing_gdal(name))?;
        run_tool(program, &args).map_err(PrepError::Engine)
    }

    fn ogr2ogr_into(
        &self,
        source: &VectorRef,
        target: &VectorRef,
        epsg: Option<Epsg>,
    ) -> Result<(), PrepError> {
        ensure_parent(&target.container)?;
        let args = ogr2ogr_args(source, target, epsg, target.container.exists());
        self.run(&self.ogr2ogr, "ogr2ogr", args).map(|_| ())
    }
}

impl GisEngine for GdalCli {
    fn describe_epsg(&self, dataset: &Dataset) -> Result<Option<u32>, PrepError> {
        if !dataset.path().exists() {
            return Err(PrepError::Engine(format!("dataset not found: {dataset}")));
        }
        match dataset {
            Dataset::Vector(VectorRef {
                container,
                layer: Some(layer),
            }) => {
                let output = self.run(
                    &self.ogrinfo,
                    "ogrinfo",
                    vec![os("-ro"), os("-so"), container.clone().into_os_string(), os(layer)],
                )?;
                parse_layer_epsg(&output)
            }
            other => {
                let args = vec![os("-o"), os("epsg"), other.path().as_os_str().to_owned()];
                // gdalsrsinfo exits non-zero when the dataset carries no SRS.
                match self.run(&self.gdalsrsinfo, "gdalsrsinfo", args) {
                    Ok(output) => parse_srsinfo_epsg(&output),
                    Err(PrepError::Engine(_)) => Ok(None),
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn copy_raster(&self, source: &Path, target: &Path) -> Result<(), PrepError> {
        ensure_parent(target)?;
        let args = vec![
            os("-of"),
            os("GTiff"),
            source.as_os_str().to_owned(),
            target.as_os_str().to_owned(),
        ];
        self.run(&self.gdal_translate, "gdal_translate", args).map(|_| ())
    }

    fn define_projection(&self, raster: &Path, epsg: Epsg) -> Result<(), PrepError> {
        let stamped = sibling(raster, "stamp.tif");
        let args = vec![
            os("-of"),
            os("GTiff"),
            os("-a_srs"),
            os(&epsg.to_string()),
            raster.as_os_str().to_owned(),
            stamped.as_os_str().to_owned(),
        ];
        self.run(&self.gdal_translate, "gdal_translate", args)?;
        fs::rename(&stamped, raster).map_err(|err| PrepError::Filesystem(err.to_string()))
    }

    fn project_raster(
        &self,
        source: &Path,
        target: &Path,
        epsg: Epsg,
        resampling: Resampling,
    ) -> Result<(), PrepError> {
        ensure_parent(target)?;
        let args = warp_args(source, target, epsg, resampling);
        self.run(&self.gdalwarp, "gdalwarp", args).map(|_| ())
    }

    fn mosaic_rasters(
        &self,
        tiles: &[PathBuf],
        target: &Path,
        spec: &MosaicSpec,
    ) -> Result<(), PrepError> {
        ensure_parent(target)?;
        let vrt = sibling(target, "vrt");
        self.run(&self.gdalbuildvrt, "gdalbuildvrt", buildvrt_args(tiles, &vrt, spec))?;
        let result = self.run(
            &self.gdal_translate,
            "gdal_translate",
            mosaic_translate_args(&vrt, target, spec),
        );
        discard_file(&vrt);
        result.map(|_| ())
    }

    /// GDAL has no CLI verb for an empty GeoPackage; the first layer copy
    /// materializes the file, so only the parent directory is prepared here.
    fn create_geopackage(&self, path: &Path) -> Result<(), PrepError> {
        ensure_parent(path)
    }

    fn has_vector_layer(&self, container: &Path, layer: &str) -> Result<bool, PrepError> {
        if !container.exists() {
            return Ok(false);
        }
        let args = vec![
            os("-ro"),
            os("-so"),
            os("-q"),
            container.as_os_str().to_owned(),
            os(layer),
        ];
        match self.run(&self.ogrinfo, "ogrinfo", args) {
            Ok(_) => Ok(true),
            Err(PrepError::Engine(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn copy_vector(&self, source: &VectorRef, target: &VectorRef) -> Result<(), PrepError> {
        self.ogr2ogr_into(source, target, None)
    }

    fn project_vector(
        &self,
        source: &VectorRef,
        target: &VectorRef,
        epsg: Epsg,
    ) -> Result<(), PrepError> {
        self.ogr2ogr_into(source, target, Some(epsg))
    }

    fn delete(&self, dataset: &Dataset) -> Result<(), PrepError> {
        match dataset {
            Dataset::Vector(VectorRef {
                container,
                layer: Some(layer),
            }) => {
                let sql = format!("DROP TABLE \"{}\"", layer.replace('"', "\"\""));
                let args = vec![container.clone().into_os_string(), os("-sql"), os(&sql)];
                self.run(&self.ogrinfo, "ogrinfo", args).map(|_| ())
            }
            other => {
                let args = vec![os("delete"), other.path().as_os_str().to_owned()];
                self.run(&self.gdalmanage, "gdalmanage", args).map(|_| ())
            }
        }
    }
}

fn warp_args(source: &Path, target: &Path, epsg: Epsg, resampling: Resampling) -> Vec<OsString> {
    vec![
        os("-overwrite"),
        os("-of"),
        os("GTiff"),
        os("-t_srs"),
        os(&epsg.to_string()),
        os("-r"),
        os(resampling.gdal_name()),
        source.as_os_str().to_owned(),
        target.as_os_str().to_owned(),
    ]
}

/// gdalbuildvrt lets later inputs win, so first-wins precedence is fed in
/// reverse.
fn buildvrt_args(tiles: &[PathBuf], vrt: &Path, spec: &MosaicSpec) -> Vec<OsString> {
    let mut args = vec![os("-overwrite")];
    for band in 1..=spec.bands {
        args.extend([os("-b"), os(&band.to_string())]);
    }
    args.push(vrt.as_os_str().to_owned());
    let ordered: Vec<&PathBuf> = match spec.method {
        MosaicMethod::First => tiles.iter().rev().collect(),
    };
    args.extend(ordered.into_iter().map(|tile| tile.as_os_str().to_owned()));
    args
}

fn mosaic_translate_args(vrt: &Path, target: &Path, spec: &MosaicSpec) -> Vec<OsString> {
    let pixel_type = match spec.pixel_type {
        PixelType::Float32 => "Float32",
    };
    vec![
        os("-of"),
        os("GTiff"),
        os("-ot"),
        os(pixel_type),
        vrt.as_os_str().to_owned(),
        target.as_os_str().to_owned(),
    ]
}

/// `update` appends to an existing container, replacing a same-named layer.
fn ogr2ogr_args(
    source: &VectorRef,
    target: &VectorRef,
    epsg: Option<Epsg>,
    update: bool,
) -> Vec<OsString> {
    let mut args = vec![os("-f"), os("GPKG")];
    if update {
        args.extend([os("-update"), os("-overwrite")]);
    }
    if let Some(epsg) = epsg {
        args.extend([os("-t_srs"), os(&epsg.to_string())]);
    }
    args.push(target.container.clone().into_os_string());
    args.push(source.container.clone().into_os_string());
    if let Some(layer) = &source.layer {
        args.push(os(layer));
    }
    if let Some(layer) = &target.layer {
        args.extend([os("-nln"), os(layer)]);
    }
    args
}

fn parse_srsinfo_epsg(output: &str) -> Result<Option<u32>, PrepError> {
    let re = Regex::new(r"EPSG:(\d+)").map_err(|err| PrepError::Engine(err.to_string()))?;
    Ok(re
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse::<u32>().ok()))
}

/// The CRS-level identifier closes the WKT, so the last `ID["EPSG",n]` wins.
fn parse_layer_epsg(output: &str) -> Result<Option<u32>, PrepError> {
    let re = Regex::new(r#"(?:ID|AUTHORITY)\["EPSG",\s*"?(\d+)"?\]"#)
        .map_err(|err| PrepError::Engine(err.to_string()))?;
    Ok(re
        .captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse::<u32>().ok()))
}

fn ensure_parent(path: &Path) -> Result<(), PrepError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| PrepError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{extension}"));
    PathBuf::from(name)
}

fn os(value: &str) -> OsString {
    OsString::from(value)
}
