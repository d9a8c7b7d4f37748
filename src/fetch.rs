use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::PrepError;
use crate::http::{HttpSource, Pause};

const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Total attempts, counting the first one.
    pub attempts: u32,
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 8,
            chunk_size: 1024 * 1024,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Skipped,
    Downloaded { bytes: u64 },
}

/// Streams a remote resource into `<destination>.part` and promotes it with
/// a rename once the body is complete.
pub struct ResumableFetcher<'a, H: HttpSource + ?Sized> {
    http: &'a H,
    pause: &'a dyn Pause,
    policy: &'a FetchPolicy,
}

impl<'a, H: HttpSource + ?Sized> ResumableFetcher<'a, H> {
    pub fn new(http: &'a H, pause: &'a dyn Pause, policy: &'a FetchPolicy) -> Self {
        Self {
            http,
            pause,
            policy,
        }
    }

    pub fn fetch(
        &self,
        url: &str,
        destination: &Path,
        overwrite: bool,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, PrepError> {
        let name = file_label(destination);
        if destination.exists() && !overwrite {
            sink.event(ProgressEvent::new(format!("phase=Fetch; skip (exists): {name}")));
            return Ok(FetchOutcome::Skipped);
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| PrepError::Filesystem(err.to_string()))?;
        }
        let part = part_path(destination);
        if overwrite && part.exists() {
            fs::remove_file(&part).map_err(|err| PrepError::Filesystem(err.to_string()))?;
        }

        let attempts = self.policy.attempts.max(1);
        let start = Instant::now();
        for attempt in 1..=attempts {
            match self.attempt(url, &part) {
                Ok(()) => {
                    fs::rename(&part, destination)
                        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
                    let bytes = fs::metadata(destination)
                        .map(|meta| meta.len())
                        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
                    sink.event(ProgressEvent {
                        message: format!("phase=Fetch; done: {name} ({bytes} bytes)"),
                        elapsed: Some(start.elapsed()),
                    });
                    return Ok(FetchOutcome::Downloaded { bytes });
                }
                Err(err) => {
                    sink.event(ProgressEvent::new(format!(
                        "phase=Fetch; error attempt {attempt}/{attempts} for {name}: {err}"
                    )));
                    if attempt < attempts {
                        let wait = backoff_delay(attempt);
                        sink.event(ProgressEvent::new(format!(
                            "phase=Fetch; retry in {}s",
                            wait.as_secs()
                        )));
                        self.pause.pause(wait);
                    }
                }
            }
        }

        Err(PrepError::RetriesExhausted {
            destination: destination.to_path_buf(),
            attempts,
        })
    }

    fn attempt(&self, url: &str, part: &Path) -> Result<(), PrepError> {
        let offset = fs::metadata(part).map(|meta| meta.len()).unwrap_or(0);
        let range = (offset > 0).then_some(offset);

        let mut body = self.http.open(url, range)?;
        if body.status == 416 {
            // Sidecar no longer lines up with the remote resource.
            fs::remove_file(part).map_err(|err| PrepError::Filesystem(err.to_string()))?;
            return Err(PrepError::HttpStatus {
                status: body.status,
                message: "range not satisfiable, restarting from zero".to_string(),
            });
        }
        if !(200..300).contains(&body.status) {
            return Err(PrepError::HttpStatus {
                status: body.status,
                message: format!("unexpected status for {url}"),
            });
        }

        // A 200 to a range request carries the whole body.
        let append = range.is_some() && body.is_partial();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(part)
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;

        let mut buffer = vec![0u8; self.policy.chunk_size.max(1)];
        loop {
            let read = match body.reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(PrepError::Http(err.to_string())),
            };
            file.write_all(&buffer[..read])
                .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        }
        file.sync_all()
            .map_err(|err| PrepError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Wait before attempt `attempt + 1`: `min(60, 2^attempt)` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS))
}

pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
