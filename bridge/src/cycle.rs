//! One trigger-to-payload cycle against the capture store.
//!
//! Order matters: the baseline is taken before the flag is raised, so any
//! capture the producer writes in response is strictly newer than it.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use urbansight_common::config::Config;
use urbansight_common::stable::read_when_stable;
use urbansight_common::store::{Baseline, CaptureFile, CaptureStore};

use crate::error::BridgeError;

/// Ask the producer for a fresh capture and return its bytes once stable.
///
/// Blocks for up to `capture_timeout` plus the stable-read attempts.
pub fn capture_fresh(store: &CaptureStore, config: &Config) -> Result<Vec<u8>, BridgeError> {
    let baseline = store.baseline();

    if let Err(e) = store.raise_flag(config.flag_owner.as_deref()) {
        // A local keypress on the producer can still satisfy the wait.
        warn!("Failed to create trigger flag: {e}");
    }

    let fresh = wait_for_fresh(store, baseline, config.capture_timeout, config.freshness_poll)
        .ok_or_else(|| {
            BridgeError::NoCaptureAvailable(format!(
                "no new image within {:.1}s",
                config.capture_timeout.as_secs_f64()
            ))
        })?;
    info!("New image detected: {fresh}");

    let bytes = read_settled(store, baseline, fresh, config)?;
    if (bytes.len() as u64) < store.min_valid_size() {
        return Err(BridgeError::NoCaptureAvailable(format!(
            "payload of {} bytes is below the {} byte minimum",
            bytes.len(),
            store.min_valid_size()
        )));
    }
    Ok(bytes)
}

/// Poll until a valid capture strictly newer than `baseline` shows up.
pub fn wait_for_fresh(
    store: &CaptureStore,
    baseline: Baseline,
    timeout: Duration,
    poll_interval: Duration,
) -> Option<CaptureFile> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(file) = store.newer_than(baseline) {
            return Some(file);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        std::thread::sleep(poll_interval.min(remaining));
    }
}

/// Run the stable-read guard, retrying on the newest fresh capture each
/// time since the producer writes the indexed file before the alias.
fn read_settled(
    store: &CaptureStore,
    baseline: Baseline,
    first: CaptureFile,
    config: &Config,
) -> Result<Vec<u8>, BridgeError> {
    let mut candidate = first;
    for attempt in 1..=config.stable_read_attempts {
        match read_when_stable(&candidate.path, config.stable_delay, store.min_valid_size())
            .map_err(BridgeError::UnstableOrTruncatedFile)
        {
            Ok(bytes) => return Ok(bytes),
            Err(e) => debug!("Stable read attempt {attempt}: {e}"),
        }
        if let Some(newer) = store.newer_than(baseline) {
            candidate = newer;
        }
    }
    Err(BridgeError::NoCaptureAvailable(format!(
        "{} never settled after {} attempt(s)",
        candidate.path.display(),
        config.stable_read_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        Config {
            capture_dir: dir.to_path_buf(),
            stable_aliases: vec![dir.join("capture_latest.png")],
            flag_path: dir.join("snap.flag"),
            capture_timeout: Duration::from_millis(800),
            freshness_poll: Duration::from_millis(10),
            stable_delay: Duration::from_millis(20),
            ..Config::default()
        }
    }

    /// Waits for the flag, consumes it, then writes `size` bytes after `delay`.
    fn respond_once(store: CaptureStore, size: usize, delay: Duration) -> std::thread::JoinHandle<bool> {
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if store.consume_flag().unwrap() {
                    std::thread::sleep(delay);
                    std::fs::write(store.indexed_path(store.next_index()), vec![7u8; size]).unwrap();
                    return true;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            false
        })
    }

    #[test]
    fn test_capture_fresh_returns_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = CaptureStore::new(&config);

        let producer = respond_once(store.clone(), 50_000, Duration::from_millis(50));
        let bytes = capture_fresh(&store, &config).unwrap();
        assert!(producer.join().unwrap());
        assert_eq!(bytes.len(), 50_000);
        assert!(!store.flag_present());
    }

    #[test]
    fn test_existing_capture_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = CaptureStore::new(&config);
        std::fs::write(store.indexed_path(0), vec![1u8; 4096]).unwrap();

        let result = capture_fresh(&store, &config);
        assert!(matches!(result, Err(BridgeError::NoCaptureAvailable(_))));
        // nobody consumed the request
        assert!(store.flag_present());
    }

    #[test]
    fn test_small_capture_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = CaptureStore::new(&config);

        let producer = respond_once(store.clone(), 100, Duration::ZERO);
        let result = capture_fresh(&store, &config);
        assert!(producer.join().unwrap());
        assert!(matches!(result, Err(BridgeError::NoCaptureAvailable(_))));
    }

    #[test]
    fn test_wait_for_fresh_without_producer() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(&test_config(dir.path()));
        let start = Instant::now();
        let found = wait_for_fresh(
            &store,
            Baseline::NONE,
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
        assert!(found.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_read_settled_gives_up_on_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.stable_read_attempts = 2;
        config.stable_delay = Duration::from_millis(40);
        let store = CaptureStore::new(&config);

        let path = store.indexed_path(0);
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        let first = CaptureFile::stat(&path).unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            let mut f = std::fs::OpenOptions::new().append(true).open(writer_path).unwrap();
            for _ in 0..30 {
                f.write_all(&[1u8; 512]).unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let result = read_settled(&store, Baseline::NONE, first, &config);
        writer.join().unwrap();
        assert!(matches!(result, Err(BridgeError::NoCaptureAvailable(_))));
    }
}
