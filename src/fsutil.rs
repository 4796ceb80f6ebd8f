use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Reads a whole file as a trimmed string.
///
/// Returns `None` if the file cannot be opened or read. Cgroup pseudo-files
/// come and go with their container, so absence is an expected state rather
/// than an error.
pub fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    let mut reader = open_file_reader(path).ok()?;
    let mut buf = String::new();
    reader.read_to_string(&mut buf).ok()?;
    Some(buf.trim().to_owned())
}

/// Reads a single unsigned integer from a file, defaulting to `0` when the
/// file is missing, unreadable, or not a number.
///
/// This is the read discipline for cgroup counter files: a failed read on
/// any field produces a zero-valued sample field instead of failing the
/// whole sampling pass.
pub fn read_u64_or_zero(path: impl AsRef<Path>) -> u64 {
    read_trimmed(path)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_open_file_reader_success() {
        let tmp = tempfile::NamedTempFile::new().expect("failed to create temp file");
        let reader = open_file_reader(tmp.path()).expect("should open test file");
        let metadata = reader.get_ref().metadata().unwrap();
        assert!(metadata.is_file());
    }

    #[test]
    fn test_open_file_reader_error() {
        let result = open_file_reader("/definitely/does/not/exist");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.path, PathBuf::from("/definitely/does/not/exist"));
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_read_u64_or_zero() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "1234567890").unwrap();
        assert_eq!(read_u64_or_zero(tmp.path()), 1_234_567_890);
    }

    #[test]
    fn test_read_u64_or_zero_missing_file() {
        assert_eq!(read_u64_or_zero("/definitely/does/not/exist"), 0);
    }

    #[test]
    fn test_read_u64_or_zero_garbage() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "max").unwrap();
        assert_eq!(read_u64_or_zero(tmp.path()), 0);
    }
}
