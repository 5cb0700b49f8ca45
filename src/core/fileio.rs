//! Buffered byte-copy primitive.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::trace;

use crate::error::{PreserveError, Result};

const BUFFER_SIZE: usize = 128 * 1024;

/// Copy `source` to `dest` in buffered chunks and return the bytes
/// written.
///
/// Creates missing parent directories, flushes, and syncs the destination
/// to disk before returning. Truncates an existing destination; callers
/// decide beforehand whether overwriting is allowed.
pub fn copy_file(source: &Path, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| PreserveError::io(parent, e))?;
    }

    let source_file = File::open(source).map_err(|e| PreserveError::io(source, e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    let dest_file = File::create(dest).map_err(|e| PreserveError::io(dest, e))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| PreserveError::io(source, e))?;
        if bytes_read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| PreserveError::io(dest, e))?;
        bytes_written += bytes_read as u64;
    }

    writer.flush().map_err(|e| PreserveError::io(dest, e))?;
    let inner = writer
        .into_inner()
        .map_err(|e| PreserveError::io(dest, e.into_error()))?;
    inner.sync_all().map_err(|e| PreserveError::io(dest, e))?;

    trace!(source = %source.display(), dest = %dest.display(), bytes_written, "Copied file");
    Ok(bytes_written)
}

/// Delete a file, mapping the failure onto its path.
pub fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| PreserveError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_content_and_counts_bytes() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source.txt");
        let dest = temp.path().join("dest.txt");
        std::fs::write(&source, b"hello").unwrap();

        let written = copy_file(&source, &dest).unwrap();
        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[test]
    fn copies_content_larger_than_one_buffer() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("large.bin");
        let dest = temp.path().join("copy.bin");
        let content: Vec<u8> = (0..BUFFER_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &content).unwrap();

        let written = copy_file(&source, &dest).unwrap();
        assert_eq!(written, content.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), content);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source.txt");
        let dest = temp.path().join("deep/nested/dest.txt");
        std::fs::write(&source, b"x").unwrap();

        copy_file(&source, &dest).unwrap();
        assert!(dest.is_file());
    }

    #[test]
    fn empty_file_copies_as_zero_bytes() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("empty");
        let dest = temp.path().join("empty-copy");
        std::fs::write(&source, b"").unwrap();

        assert_eq!(copy_file(&source, &dest).unwrap(), 0);
        assert!(dest.is_file());
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let temp = tempdir().unwrap();
        let err = copy_file(&temp.path().join("ghost"), &temp.path().join("dest")).unwrap_err();
        assert!(matches!(err, PreserveError::Io { .. }));
    }
}
