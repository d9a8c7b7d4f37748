use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PrepError {
    #[error("missing config file mpat-prep.json in current directory")]
    #[diagnostic(help("run `mpat-prep init` to write the default catalog"))]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown layer key: {0}")]
    UnknownLayerKey(String),

    #[error("missing layer key in {section}: {key}")]
    MissingLayerKey { section: String, key: String },

    #[error("invalid EPSG code: {0}")]
    InvalidEpsg(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("failed after {attempts} attempts: {destination}")]
    RetriesExhausted { destination: PathBuf, attempts: u32 },

    #[error("invalid directory listing: {0}")]
    Listing(String),

    #[error("unreadable archive: {0}")]
    Archive(String),

    #[error("required tool not found: {tool}")]
    #[diagnostic(help("{hint}"))]
    MissingTool { tool: String, hint: String },

    #[error("raster conversion failed: {0}")]
    Conversion(String),

    #[error("expected intermediate file does not exist: {0}")]
    MissingIntermediate(PathBuf),

    #[error("no .tif rasters found in: {0}")]
    NoTiles(PathBuf),

    #[error("dataset has no readable CRS: {0}")]
    CrsUnresolvable(PathBuf),

    #[error("GIS engine failed: {0}")]
    Engine(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl PrepError {
    pub(crate) fn missing_gdal(tool: &str) -> Self {
        PrepError::MissingTool {
            tool: tool.to_string(),
            hint: format!("{tool} not found on PATH; install the GDAL command-line utilities"),
        }
    }
}
