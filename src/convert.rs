use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::PrepError;
use crate::fetch::part_path;
use crate::fs_util::{discard_file, promote};
use crate::tools::{find_in_path, run_tool};

/// Turns a fetched scientific array (NetCDF `elev`) into a GeoTIFF.
pub trait ArrayConverter: Send + Sync {
    /// Fails with [`PrepError::MissingTool`] when conversion cannot run.
    fn ensure_available(&self) -> Result<(), PrepError>;

    fn convert(&self, source: &Path, target: &Path) -> Result<(), PrepError>;
}

#[derive(Debug, Clone)]
pub struct GdalTranslate {
    program: Option<PathBuf>,
    variable: String,
}

impl Default for GdalTranslate {
    fn default() -> Self {
        Self::new()
    }
}

impl GdalTranslate {
    pub fn new() -> Self {
        Self::with_program(find_in_path("gdal_translate"))
    }

    pub fn with_program(program: Option<PathBuf>) -> Self {
        Self {
            program,
            variable: "elev".to_string(),
        }
    }

    /// Tiled, DEFLATE + horizontal predictor, BigTIFF when needed.
    fn creation_args(&self, source: &Path, target: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-of",
            "GTiff",
            "-co",
            "TILED=YES",
            "-co",
            "COMPRESS=DEFLATE",
            "-co",
            "PREDICTOR=2",
            "-co",
            "BIGTIFF=IF_SAFER",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(OsString::from(format!(
            "NETCDF:\"{}\":{}",
            source.display(),
            self.variable
        )));
        args.push(target.as_os_str().to_owned());
        args
    }
}

impl ArrayConverter for GdalTranslate {
    fn ensure_available(&self) -> Result<(), PrepError> {
        match self.program {
            Some(_) => Ok(()),
            None => Err(PrepError::MissingTool {
                tool: "gdal_translate".to_string(),
                hint: "install the GDAL command-line utilities (with NetCDF support) and make sure gdal_translate is on PATH".to_string(),
            }),
        }
    }

    fn convert(&self, source: &Path, target: &Path) -> Result<(), PrepError> {
        self.ensure_available()?;
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| PrepError::missing_gdal("gdal_translate"))?;
        run_tool(program, &self.creation_args(source, target)).map_err(PrepError::Conversion)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOutcome {
    AlreadyConverted,
    Converted,
}

/// Converts `source` into `target` and deletes `source` afterwards.
///
/// The converter writes `<target>.part`, which is renamed onto `target` only
/// once conversion succeeds, so an existing `target` is always complete. It
/// counts as done unless `overwrite` is set: the source and any stale `.part`
/// sidecar are removed without reconverting. A failed conversion leaves the
/// source in place and no output behind.
pub fn convert_and_discard(
    converter: &dyn ArrayConverter,
    source: &Path,
    target: &Path,
    overwrite: bool,
    sink: &dyn ProgressSink,
) -> Result<ConvertOutcome, PrepError> {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    if target.exists() && !overwrite {
        sink.event(ProgressEvent::new(format!(
            "phase=Convert; skip (tif exists): {name}"
        )));
        discard_source(source)?;
        return Ok(ConvertOutcome::AlreadyConverted);
    }

    converter.ensure_available()?;

    if !source.exists() {
        return Err(PrepError::MissingIntermediate(source.to_path_buf()));
    }

    sink.event(ProgressEvent::new(format!("phase=Convert; converting {name}")));
    let staged = part_path(target);
    discard_file(&staged);
    if let Err(err) = converter.convert(source, &staged) {
        discard_file(&staged);
        return Err(err);
    }
    promote(&staged, target)?;
    sink.event(ProgressEvent::new(format!("phase=Convert; tiff: {name}")));

    fs::remove_file(source).map_err(|err| PrepError::Filesystem(err.to_string()))?;
    Ok(ConvertOutcome::Converted)
}

/// Removes a source array and its partial sidecar, whichever exist.
pub fn discard_source(source: &Path) -> Result<(), PrepError> {
    for path in [source.to_path_buf(), part_path(source)] {
        if path.exists() {
            fs::remove_file(&path).map_err(|err| PrepError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}
