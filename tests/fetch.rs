mod common;

use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::tempdir;

use common::{MockHttp, RecordingPause, RecordingSink};
use mpat_prep::error::PrepError;
use mpat_prep::fetch::{FetchOutcome, FetchPolicy, ResumableFetcher, part_path};

const URL: &str = "https://example.test/thredds/ncss/usgs_dem_10m_oahu";
const BODY: &[u8] = b"CDF\x01 elevation grid for oahu";

fn policy(attempts: u32) -> FetchPolicy {
    FetchPolicy {
        attempts,
        chunk_size: 8,
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(1),
    }
}

#[test]
fn resume_requests_range_from_sidecar_size() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("usgs_dem_10m_oahu.nc");
    fs::write(part_path(&dest), &BODY[..10]).unwrap();

    let http = MockHttp::new().with(URL, BODY);
    let pause = RecordingPause::default();
    let policy = policy(3);
    let fetcher = ResumableFetcher::new(&http, &pause, &policy);

    let outcome = fetcher
        .fetch(URL, &dest, false, &RecordingSink::default())
        .unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            bytes: BODY.len() as u64
        }
    );
    assert_eq!(http.opens(), vec![(URL.to_string(), Some(10))]);
    assert_eq!(fs::read(&dest).unwrap(), BODY);
    assert!(!part_path(&dest).exists());
    assert!(pause.waits().is_empty());
}

#[test]
fn dropped_connection_resumes_at_new_offset() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("oahu.nc");
    let http = MockHttp::new().with(URL, BODY);
    http.cut_next_open_after(5);
    let pause = RecordingPause::default();
    let policy = policy(4);
    let sink = RecordingSink::default();

    ResumableFetcher::new(&http, &pause, &policy)
        .fetch(URL, &dest, false, &sink)
        .unwrap();

    assert_eq!(
        http.opens(),
        vec![(URL.to_string(), None), (URL.to_string(), Some(5))]
    );
    assert_eq!(pause.waits(), vec![2]);
    assert_eq!(fs::read(&dest).unwrap(), BODY);
    assert!(
        sink.messages()
            .iter()
            .any(|message| message == "phase=Fetch; retry in 2s")
    );
}

#[test]
fn exhausted_retries_leave_no_destination() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("oahu.nc");
    let http = MockHttp {
        always_fail: true,
        ..MockHttp::new()
    };
    let pause = RecordingPause::default();
    let policy = policy(4);

    let err = ResumableFetcher::new(&http, &pause, &policy)
        .fetch(URL, &dest, false, &RecordingSink::default())
        .unwrap_err();

    assert_matches!(err, PrepError::RetriesExhausted { attempts: 4, .. });
    assert_eq!(http.opens().len(), 4);
    // No wait after the final attempt.
    assert_eq!(pause.waits(), vec![2, 4, 8]);
    assert!(!dest.exists());
}

#[test]
fn backoff_caps_at_sixty_seconds() {
    let dir = tempdir().unwrap();
    let http = MockHttp {
        always_fail: true,
        ..MockHttp::new()
    };
    let pause = RecordingPause::default();
    let policy = policy(8);

    let _ = ResumableFetcher::new(&http, &pause, &policy).fetch(
        URL,
        &dir.path().join("oahu.nc"),
        false,
        &RecordingSink::default(),
    );

    assert_eq!(pause.waits(), vec![2, 4, 8, 16, 32, 60, 60]);
}

#[test]
fn existing_destination_is_not_fetched() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("oahu.nc");
    fs::write(&dest, b"finished").unwrap();
    let http = MockHttp::new().with(URL, BODY);
    let pause = RecordingPause::default();
    let policy = policy(3);

    let outcome = ResumableFetcher::new(&http, &pause, &policy)
        .fetch(URL, &dest, false, &RecordingSink::default())
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Skipped);
    assert!(http.opens().is_empty());
    assert_eq!(fs::read(&dest).unwrap(), b"finished");
}

#[test]
fn full_reply_to_range_rewrites_sidecar() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("oahu.nc");
    fs::write(part_path(&dest), b"stale").unwrap();
    let http = MockHttp {
        ignore_range: true,
        ..MockHttp::new().with(URL, BODY)
    };
    let pause = RecordingPause::default();
    let policy = policy(3);

    ResumableFetcher::new(&http, &pause, &policy)
        .fetch(URL, &dest, false, &RecordingSink::default())
        .unwrap();

    assert_eq!(http.opens(), vec![(URL.to_string(), Some(5))]);
    assert_eq!(fs::read(&dest).unwrap(), BODY);
}

#[test]
fn unsatisfiable_range_restarts_from_zero() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("oahu.nc");
    let oversized = [BODY, b"trailing garbage"].concat();
    fs::write(part_path(&dest), &oversized).unwrap();
    let http = MockHttp::new().with(URL, BODY);
    let pause = RecordingPause::default();
    let policy = policy(3);

    ResumableFetcher::new(&http, &pause, &policy)
        .fetch(URL, &dest, false, &RecordingSink::default())
        .unwrap();

    assert_eq!(
        http.opens(),
        vec![
            (URL.to_string(), Some(oversized.len() as u64)),
            (URL.to_string(), None)
        ]
    );
    assert_eq!(pause.waits(), vec![2]);
    assert_eq!(fs::read(&dest).unwrap(), BODY);
}

#[test]
fn overwrite_discards_sidecar_and_destination() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("oahu.nc");
    fs::write(&dest, b"old").unwrap();
    fs::write(part_path(&dest), b"half").unwrap();
    let http = MockHttp::new().with(URL, BODY);
    let pause = RecordingPause::default();
    let policy = policy(3);

    ResumableFetcher::new(&http, &pause, &policy)
        .fetch(URL, &dest, true, &RecordingSink::default())
        .unwrap();

    assert_eq!(http.opens(), vec![(URL.to_string(), None)]);
    assert_eq!(fs::read(&dest).unwrap(), BODY);
}

#[test]
fn missing_resource_exhausts_attempts() {
    let dir = tempdir().unwrap();
    let http = MockHttp::new();
    let pause = RecordingPause::default();
    let policy = policy(2);

    let err = ResumableFetcher::new(&http, &pause, &policy)
        .fetch(
            URL,
            &dir.path().join("oahu.nc"),
            false,
            &RecordingSink::default(),
        )
        .unwrap_err();

    assert_matches!(err, PrepError::RetriesExhausted { attempts: 2, .. });
    assert_eq!(pause.waits(), vec![2]);
}
