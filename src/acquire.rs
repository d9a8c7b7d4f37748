use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::{DemTileCatalog, SourceEntry};
use crate::convert::{ArrayConverter, ConvertOutcome, convert_and_discard, discard_source};
use crate::domain::FetchMechanism;
use crate::error::PrepError;
use crate::fetch::ResumableFetcher;
use crate::fs_util::{dir_has_entries, ensure_dir, extract_zip, write_bytes_atomic};
use crate::http::HttpSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquireAction {
    Downloaded,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub id: String,
    pub mechanism: FetchMechanism,
    pub action: AcquireAction,
    pub files: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionReport {
    pub datasets: Vec<DatasetReport>,
    pub elapsed_secs: f64,
}

/// One entry of a directory-listing API response (GitHub contents API shape).
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ListingKind,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    File,
    Dir,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub downloaded: usize,
    pub skipped: usize,
}

impl MirrorStats {
    pub fn action(&self) -> AcquireAction {
        if self.downloaded > 0 {
            AcquireAction::Downloaded
        } else {
            AcquireAction::Skipped
        }
    }
}

/// Whole-file acquisition into `<raw_dir>/<dataset_id>/`.
pub struct Acquirer<'a, H: HttpSource + ?Sized> {
    http: &'a H,
    raw_dir: &'a Path,
}

impl<'a, H: HttpSource + ?Sized> Acquirer<'a, H> {
    pub fn new(http: &'a H, raw_dir: &'a Path) -> Self {
        Self { http, raw_dir }
    }

    pub fn dataset_dir(&self, id: &str) -> PathBuf {
        self.raw_dir.join(id)
    }

    /// Downloads `<id>.zip` into the dataset folder, unpacks it there and
    /// removes the archive.
    pub fn acquire_zip(
        &self,
        source: &SourceEntry,
        overwrite: bool,
        sink: &dyn ProgressSink,
    ) -> Result<(AcquireAction, usize), PrepError> {
        let out_dir = self.dataset_dir(&source.id);
        let zip_path = out_dir.join(format!("{}.zip", source.id));
        if !overwrite && dir_has_entries(&out_dir) && !zip_path.exists() {
            sink.event(ProgressEvent::new(format!(
                "phase=Fetch; skip (extracted): {}",
                source.id
            )));
            return Ok((AcquireAction::Skipped, 0));
        }

        ensure_dir(&out_dir)?;
        sink.event(ProgressEvent::new(format!(
            "phase=Fetch; zip {} <- {}",
            source.id, source.url
        )));
        let bytes = self.http.get_bytes(&source.url)?;
        write_bytes_atomic(&zip_path, &bytes)?;

        sink.event(ProgressEvent::new(format!(
            "phase=Store; unzipping {}",
            zip_path.display()
        )));
        let count = extract_zip(&zip_path, &out_dir)?;
        fs::remove_file(&zip_path).map_err(|err| PrepError::Filesystem(err.to_string()))?;
        Ok((AcquireAction::Downloaded, count))
    }

    /// Mirrors a remote directory tree into the dataset folder. Existing files
    /// are kept unless `overwrite` is set.
    pub fn mirror_folder(
        &self,
        source: &SourceEntry,
        overwrite: bool,
        sink: &dyn ProgressSink,
    ) -> Result<MirrorStats, PrepError> {
        let out_dir = self.dataset_dir(&source.id);
        ensure_dir(&out_dir)?;
        sink.event(ProgressEvent::new(format!(
            "phase=Resolve; listing {} <- {}",
            source.id, source.url
        )));
        let mut stats = MirrorStats::default();
        self.mirror_listing(&source.url, &out_dir, overwrite, sink, &mut stats)?;
        Ok(stats)
    }

    fn mirror_listing(
        &self,
        url: &str,
        dest: &Path,
        overwrite: bool,
        sink: &dyn ProgressSink,
        stats: &mut MirrorStats,
    ) -> Result<(), PrepError> {
        let body = self.http.get_bytes(url)?;
        let entries = parse_listing(&body)?;

        for entry in entries {
            let name = checked_entry_name(&entry.name)?;
            match entry.kind {
                ListingKind::File => {
                    let target = dest.join(name);
                    if target.exists() && !overwrite {
                        sink.event(ProgressEvent::new(format!(
                            "phase=Fetch; skip (exists): {}",
                            entry.name
                        )));
                        stats.skipped += 1;
                        continue;
                    }
                    let download_url = entry.download_url.as_deref().ok_or_else(|| {
                        PrepError::Listing(format!("file entry {} has no download_url", entry.name))
                    })?;
                    sink.event(ProgressEvent::new(format!(
                        "phase=Fetch; downloading {}",
                        entry.name
                    )));
                    let bytes = self.http.get_bytes(download_url)?;
                    write_bytes_atomic(&target, &bytes)?;
                    stats.downloaded += 1;
                }
                ListingKind::Dir => {
                    let nested = entry.url.as_deref().ok_or_else(|| {
                        PrepError::Listing(format!("dir entry {} has no url", entry.name))
                    })?;
                    let subfolder = dest.join(name);
                    ensure_dir(&subfolder)?;
                    self.mirror_listing(nested, &subfolder, overwrite, sink, stats)?;
                }
                ListingKind::Other => {}
            }
        }
        Ok(())
    }

    /// Single flat file into `<raw_dir>/<id>/<last url segment>`.
    pub fn fetch_tabular(
        &self,
        source: &SourceEntry,
        overwrite: bool,
        sink: &dyn ProgressSink,
    ) -> Result<AcquireAction, PrepError> {
        let target = self.dataset_dir(&source.id).join(tabular_file_name(source));
        if target.exists() && !overwrite {
            sink.event(ProgressEvent::new(format!(
                "phase=Fetch; skip (exists): {}",
                target.display()
            )));
            return Ok(AcquireAction::Skipped);
        }
        sink.event(ProgressEvent::new(format!(
            "phase=Fetch; tabular {} <- {}",
            source.id, source.url
        )));
        let bytes = self.http.get_bytes(&source.url)?;
        write_bytes_atomic(&target, &bytes)?;
        Ok(AcquireAction::Downloaded)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DemOverwrite {
    pub nc: bool,
    pub tif: bool,
}

/// Streams every island's NetCDF and converts it to `<id>.tif` in the tile
/// directory. Returns how many tiles were converted in this call.
pub fn acquire_dem_tiles<H: HttpSource + ?Sized>(
    fetcher: &ResumableFetcher<'_, H>,
    converter: &dyn ArrayConverter,
    catalog: &DemTileCatalog,
    tile_dir: &Path,
    overwrite: DemOverwrite,
    sink: &dyn ProgressSink,
) -> Result<usize, PrepError> {
    ensure_dir(tile_dir)?;
    let needs_work = catalog
        .islands
        .iter()
        .any(|island| overwrite.tif || !tile_dir.join(format!("{island}.tif")).exists());
    if needs_work {
        converter.ensure_available()?;
    }

    let mut converted = 0usize;
    for island in &catalog.islands {
        let nc_path = tile_dir.join(format!("{island}.nc"));
        let tif_path = tile_dir.join(format!("{island}.tif"));

        if tif_path.exists() && !overwrite.tif {
            sink.event(ProgressEvent::new(format!(
                "phase=Fetch; skip (already have tif): {island}"
            )));
            discard_source(&nc_path)?;
            continue;
        }

        let url = catalog.ncss_url(island);
        fetcher.fetch(&url, &nc_path, overwrite.nc, sink)?;
        if convert_and_discard(converter, &nc_path, &tif_path, overwrite.tif, sink)?
            == ConvertOutcome::Converted
        {
            converted += 1;
        }
    }
    Ok(converted)
}

fn parse_listing(body: &[u8]) -> Result<Vec<ListingEntry>, PrepError> {
    serde_json::from_slice::<Vec<ListingEntry>>(body)
        .map_err(|err| PrepError::Listing(format!("expected a directory listing: {err}")))
}

/// Listing names become path components; anything that could escape the
/// destination folder is rejected.
fn checked_entry_name(name: &str) -> Result<&str, PrepError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(PrepError::Listing(format!("unsafe entry name: {name}"))),
    }
}

fn tabular_file_name(source: &SourceEntry) -> String {
    let path = source.url.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() && checked_entry_name(segment).is_ok() => {
            segment.to_string()
        }
        _ => format!("{}.csv", source.id),
    }
}
