use std::time::{Duration, Instant};

use serde::Serialize;

use crate::acquire::{
    AcquireAction, Acquirer, AcquisitionReport, DatasetReport, DemOverwrite, acquire_dem_tiles,
};
use crate::config::ResolvedConfig;
use crate::convert::ArrayConverter;
use crate::domain::{Epsg, FetchMechanism, LayerKey, LayerKind};
use crate::engine::GisEngine;
use crate::error::PrepError;
use crate::fetch::ResumableFetcher;
use crate::http::{HttpSource, Pause, ThreadPause};
use crate::prepare::{LayerPreparer, PrepareOptions, PrepareReport};
use crate::store::{LayerLocation, LayerStatus, PreparedStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    /// Re-download ZIP, folder and tabular datasets.
    pub overwrite: bool,
    /// Re-stream DEM NetCDF files even when a finished `.nc` exists.
    pub overwrite_nc: bool,
    /// Reconvert DEM tiles even when the `.tif` exists.
    pub overwrite_tif: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerStatusEntry {
    pub key: LayerKey,
    pub kind: LayerKind,
    pub status: LayerStatus,
    #[serde(flatten)]
    pub location: LayerLocation,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub target_epsg: Epsg,
    pub layers: Vec<LayerStatusEntry>,
}

impl StatusReport {
    pub fn complete(&self) -> usize {
        self.layers
            .iter()
            .filter(|entry| entry.status == LayerStatus::Complete)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub acquisition: AcquisitionReport,
    pub preparation: PrepareReport,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Acquire,
    Prepare,
    Run,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<H: HttpSource, E: GisEngine, C: ArrayConverter> {
    config: ResolvedConfig,
    http: H,
    engine: E,
    converter: C,
    pause: Box<dyn Pause>,
}

impl<H: HttpSource, E: GisEngine, C: ArrayConverter> App<H, E, C> {
    pub fn new(config: ResolvedConfig, http: H, engine: E, converter: C) -> Self {
        Self {
            config,
            http,
            engine,
            converter,
            pause: Box::new(ThreadPause),
        }
    }

    pub fn with_pause(mut self, pause: Box<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// ZIP sources, then folder listings, then DEM tiles, then tabular files.
    /// A failure stops the run; datasets finished before it stay on disk.
    pub fn acquire(
        &self,
        options: AcquireOptions,
        sink: &dyn ProgressSink,
    ) -> Result<AcquisitionReport, PrepError> {
        let start = Instant::now();
        let raw_dir = self.config.raw_dir.as_std_path();
        let plan = &self.config.acquisition;
        let acquirer = Acquirer::new(&self.http, raw_dir);
        let mut datasets = Vec::new();

        for source in &plan.zip_sources {
            let dataset_start = Instant::now();
            let (action, files) = acquirer.acquire_zip(source, options.overwrite, sink)?;
            datasets.push(self.finish_dataset(
                &source.id,
                FetchMechanism::Zip,
                action,
                files,
                dataset_start,
                sink,
            ));
        }

        for source in &plan.folder_sources {
            let dataset_start = Instant::now();
            let stats = acquirer.mirror_folder(source, options.overwrite, sink)?;
            datasets.push(self.finish_dataset(
                &source.id,
                FetchMechanism::FolderListing,
                stats.action(),
                stats.downloaded,
                dataset_start,
                sink,
            ));
        }

        if let Some(catalog) = &plan.dem_tiles {
            let dataset_start = Instant::now();
            let fetcher = ResumableFetcher::new(&self.http, self.pause.as_ref(), &self.config.fetch);
            let tile_dir = raw_dir.join(&catalog.dir);
            let converted = acquire_dem_tiles(
                &fetcher,
                &self.converter,
                catalog,
                &tile_dir,
                DemOverwrite {
                    nc: options.overwrite_nc,
                    tif: options.overwrite_tif,
                },
                sink,
            )?;
            let action = if converted > 0 {
                AcquireAction::Downloaded
            } else {
                AcquireAction::Skipped
            };
            datasets.push(self.finish_dataset(
                &catalog.dir,
                FetchMechanism::ScientificArray,
                action,
                converted,
                dataset_start,
                sink,
            ));
        }

        for source in &plan.tabular_sources {
            let dataset_start = Instant::now();
            let action = acquirer.fetch_tabular(source, options.overwrite, sink)?;
            let files = usize::from(action == AcquireAction::Downloaded);
            datasets.push(self.finish_dataset(
                &source.id,
                FetchMechanism::Tabular,
                action,
                files,
                dataset_start,
                sink,
            ));
        }

        let total = start.elapsed();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; all downloads completed in {}",
                fmt_elapsed(total)
            ),
            elapsed: Some(total),
        });
        Ok(AcquisitionReport {
            datasets,
            elapsed_secs: elapsed_secs(total),
        })
    }

    pub fn prepare(
        &self,
        options: PrepareOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PrepareReport, PrepError> {
        let store = PreparedStore::new(self.config.prepared.clone());
        let preparer = LayerPreparer::new(
            &self.engine,
            &self.config.sources,
            &store,
            self.config.scratch_dir.as_std_path(),
            self.config.target_epsg,
        );
        preparer.prepare_all(options, sink)
    }

    pub fn run(
        &self,
        acquire: AcquireOptions,
        prepare: PrepareOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, PrepError> {
        let acquisition = self.acquire(acquire, sink)?;
        let preparation = self.prepare(prepare, sink)?;
        Ok(RunReport {
            acquisition,
            preparation,
        })
    }

    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StatusReport, PrepError> {
        sink.event(ProgressEvent::new("phase=Resolve; checking prepared outputs"));
        let store = PreparedStore::new(self.config.prepared.clone());
        let layers = LayerKey::ALL
            .into_iter()
            .map(|key| {
                Ok(LayerStatusEntry {
                    key,
                    kind: key.kind(),
                    status: store.status(key, &self.engine)?,
                    location: store.location(key)?,
                })
            })
            .collect::<Result<Vec<_>, PrepError>>()?;
        Ok(StatusReport {
            target_epsg: self.config.target_epsg,
            layers,
        })
    }

    fn finish_dataset(
        &self,
        id: &str,
        mechanism: FetchMechanism,
        action: AcquireAction,
        files: usize,
        started: Instant,
        sink: &dyn ProgressSink,
    ) -> DatasetReport {
        let elapsed = started.elapsed();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {id} ({mechanism}): completed in {}",
                fmt_elapsed(elapsed)
            ),
            elapsed: Some(elapsed),
        });
        DatasetReport {
            id: id.to_string(),
            mechanism,
            action,
            files,
            elapsed_secs: elapsed_secs(elapsed),
        }
    }
}

/// `1h 2m 3s`, `2m 3s` or `3s`, rounded to whole seconds.
pub fn fmt_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64().round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub(crate) fn elapsed_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10.0).round() / 10.0
}
