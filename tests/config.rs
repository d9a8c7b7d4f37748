use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use mpat_prep::config::{Config, ConfigLoader, default_config};
use mpat_prep::domain::LayerKey;
use mpat_prep::error::PrepError;

#[test]
fn config_file_round_trips_through_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpat-prep.json");
    let mut config = default_config();
    config.scratch_dir = Some("tmp/scratch".to_string());
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();

    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    assert_eq!(resolved.raw_dir, base.join("data/01_raw"));
    assert_eq!(resolved.scratch_dir, base.join("tmp/scratch"));
    assert_eq!(
        resolved.sources.get(LayerKey::Rainfall).unwrap(),
        base.join("data/01_raw/annual_rainfall_hi_hcpt/annual_rainfall_mm.tif")
    );
    assert_eq!(
        resolved.prepared.raster_path(LayerKey::Dem).unwrap(),
        base.join("data/02_prepared/dem_hi_pacioos_mosaic_32604.tif")
    );
    assert_eq!(
        resolved.prepared.vector_layer(LayerKey::WellsMun).unwrap(),
        "wells_mun"
    );
}

#[test]
fn minimal_config_uses_defaults() {
    let json = serde_json::json!({
        "raw_dir": "raw",
        "prepared_dir": "/srv/prepared",
        "scratch_dir": "scratch",
        "sources": default_config().sources,
        "prepared": default_config().prepared,
    });
    let config: Config = serde_json::from_value(json).unwrap();

    let resolved = ConfigLoader::resolve_config(config, Utf8Path::new("/work")).unwrap();

    assert_eq!(resolved.target_epsg.code(), 32604);
    assert_eq!(
        resolved.prepared.geopackage(),
        Utf8Path::new("/srv/prepared/prepared_vectors.gpkg")
    );
    assert!(resolved.acquisition.zip_sources.is_empty());
    assert!(resolved.acquisition.dem_tiles.is_none());
    assert_eq!(resolved.fetch.attempts, 8);
    assert_eq!(resolved.fetch.chunk_size, 1024 * 1024);
}

#[test]
fn fetch_overrides_are_clamped() {
    let mut config = default_config();
    config.scratch_dir = Some("scratch".to_string());
    config.fetch.attempts = Some(0);
    config.fetch.read_timeout_secs = Some(12);

    let resolved = ConfigLoader::resolve_config(config, Utf8Path::new("/work")).unwrap();

    assert_eq!(resolved.fetch.attempts, 1);
    assert_eq!(resolved.fetch.read_timeout.as_secs(), 12);
}

#[test]
fn zero_target_epsg_is_rejected() {
    let mut config = default_config();
    config.target_epsg = Some(0);
    let err = ConfigLoader::resolve_config(config, Utf8Path::new("/work")).unwrap_err();
    assert_matches!(err, PrepError::InvalidEpsg(_));
}

#[test]
fn prepared_raster_must_be_tif() {
    let mut config = default_config();
    config
        .prepared
        .insert("slope".to_string(), "slope_32604.img".to_string());
    let err = ConfigLoader::resolve_config(config, Utf8Path::new("/work")).unwrap_err();
    assert_matches!(err, PrepError::ConfigParse(message) if message.contains("slope"));
}

#[test]
fn unreadable_explicit_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, PrepError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpat-prep.json");
    fs::write(&path, "{ \"raw_dir\": ").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, PrepError::ConfigParse(_));
}
