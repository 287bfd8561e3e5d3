//! Progress-instrumented byte sources.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

/// Invoked per chunk with the cumulative bytes transferred and the
/// total size, when known up front.
pub type ProgressCallback = Box<dyn FnMut(u64, Option<u64>) + Send>;

/// A transparent [`Read`] wrapper that reports cumulative transfer
/// progress.
///
/// Without a callback it behaves exactly like the wrapped reader. The
/// total is `None` (not zero) for sources whose size is unknown.
pub struct ProgressReader<R: Read> {
    inner: R,
    total: Option<u64>,
    transferred: u64,
    callback: Option<ProgressCallback>,
}

impl ProgressReader<Cursor<Vec<u8>>> {
    /// Wraps an in-memory buffer; the total size is known.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let total = bytes.len() as u64;
        Self::new(Cursor::new(bytes), Some(total))
    }
}

impl ProgressReader<File> {
    /// Opens a file to read with progress; the total size comes from
    /// its metadata.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        Ok(Self::new(file, Some(total)))
    }
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, total: Option<u64>) -> Self {
        Self {
            inner,
            total,
            transferred: 0,
            callback: None,
        }
    }

    pub fn with_callback(
        mut self,
        callback: impl FnMut(u64, Option<u64>) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The total size of the source, if known up front.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Cumulative bytes read so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.transferred += n as u64;
        if let Some(callback) = &mut self.callback {
            callback(self.transferred, self.total);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::{Arc, Mutex};

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn reports_cumulative_progress_and_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut reader = ProgressReader::from_bytes(vec![0xab; 4096])
            .with_callback(move |transferred, total| {
                sink.lock().unwrap().push((transferred, total));
            });

        let mut out = Vec::new();
        let mut chunk = [0; 1024];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }

        assert_eq!(out.len(), 4096);
        assert_eq!(reader.transferred(), 4096);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&(4096, Some(4096))));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn file_total_comes_from_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0; 100]).unwrap();

        let reader = ProgressReader::from_file(file.path()).unwrap();
        assert_eq!(reader.total(), Some(100));
    }

    #[test]
    fn unknown_total_is_none_not_zero() {
        let reader = ProgressReader::new(std::io::empty(), None);
        assert_eq!(reader.total(), None);
    }
}
