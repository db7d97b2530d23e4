//! Stable-read guard: read a capture only once it has stopped growing.
//!
//! The producer writes captures in place with no fsync or rename, so the
//! only signal that a write has finished is a size that holds still across
//! a short sampling window.  Known limitation: a writer that pauses for at
//! least `sample_delay` in the middle of a write is indistinguishable from a
//! finished one and its partial file will be returned.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::StoreError;

/// Sample the size of `path` twice, `sample_delay` apart, and read it only
/// when both samples agree and reach `min_size`.
pub fn read_when_stable(
    path: &Path,
    sample_delay: Duration,
    min_size: u64,
) -> Result<Vec<u8>, StoreError> {
    let first = file_size(path)?;
    std::thread::sleep(sample_delay);
    let second = file_size(path)?;

    if first != second {
        return Err(StoreError::Unstable {
            path: path.to_path_buf(),
            first,
            second,
        });
    }
    if second < min_size {
        return Err(StoreError::Truncated {
            path: path.to_path_buf(),
            size: second,
            min: min_size,
        });
    }

    let bytes = std::fs::read(path).map_err(|e| StoreError::not_accessible(path, e))?;
    debug!("Read {} stable bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

fn file_size(path: &Path) -> Result<u64, StoreError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| StoreError::not_accessible(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_settled_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture_0.png");
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let bytes = read_when_stable(&path, Duration::from_millis(10), 1024).unwrap();
        assert_eq!(bytes, content);
    }

    #[test]
    fn test_rejects_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture_0.png");
        std::fs::write(&path, vec![1u8; 2000]).unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            f.write_all(&[2u8; 3000]).unwrap();
        });

        let result = read_when_stable(&path, Duration::from_millis(300), 1024);
        writer.join().unwrap();
        match result {
            Err(StoreError::Unstable { first, second, .. }) => {
                assert_eq!(first, 2000);
                assert_eq!(second, 5000);
            }
            other => panic!("expected Unstable, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture_0.png");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let result = read_when_stable(&path, Duration::from_millis(5), 1024);
        assert!(matches!(
            result,
            Err(StoreError::Truncated { size: 100, min: 1024, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_not_accessible() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_when_stable(&dir.path().join("gone.png"), Duration::ZERO, 1);
        assert!(matches!(result, Err(StoreError::NotAccessible { .. })));
    }
}
