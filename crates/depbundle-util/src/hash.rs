use std::fs::File;
use std::io;
use std::path::Path;

/// Hex-encoded BLAKE3 digest of the file at `path`.
///
/// Archives are streamed through the hasher, never read into memory whole.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn blake3_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_blake3_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert_eq!(
            blake3_file(file.path()).unwrap(),
            blake3::hash(b"hello world").to_hex().to_string()
        );
    }

    #[test]
    fn test_blake3_file_larger_than_one_read() {
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        assert_eq!(
            blake3_file(file.path()).unwrap(),
            blake3::hash(&content).to_hex().to_string()
        );
    }

    #[test]
    fn test_blake3_file_not_found() {
        assert!(blake3_file(Path::new("/nonexistent/file")).is_err());
    }
}
