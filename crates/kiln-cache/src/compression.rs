//! Compression of archive streams.

use crate::types::ArchiveKind;
use kiln_core::{Error, Result};
use std::borrow::Cow;
use std::io::{Read, Write};

/// Compress a tar stream for the given archive kind.
pub fn compress(tarball: Vec<u8>, kind: ArchiveKind) -> Result<Vec<u8>> {
    match kind {
        ArchiveKind::Tar => Ok(tarball),
        ArchiveKind::Gzip => compress_gzip(&tarball),
    }
}

/// Recover the tar stream from archive bytes of the given kind.
pub fn decompress(data: &[u8], kind: ArchiveKind) -> Result<Cow<'_, [u8]>> {
    match kind {
        ArchiveKind::Tar => Ok(Cow::Borrowed(data)),
        ArchiveKind::Gzip => decompress_gzip(data).map(Cow::Owned),
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Internal(format!("Gzip write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Internal(format!("Gzip finish failed: {}", e)))
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::CorruptArchive(format!("gzip stream could not be decoded: {}", e)))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"Hello, World! This is a test of compression.".to_vec();
        let compressed = compress(data.clone(), ArchiveKind::Gzip).unwrap();
        assert_ne!(compressed, data);
        let decompressed = decompress(&compressed, ArchiveKind::Gzip).unwrap();
        assert_eq!(data.as_slice(), &*decompressed);
    }

    #[test]
    fn test_tar_passthrough_borrows() {
        let data = b"raw tar bytes".to_vec();
        let compressed = compress(data.clone(), ArchiveKind::Tar).unwrap();
        assert_eq!(compressed, data);
        assert!(matches!(decompress(&data, ArchiveKind::Tar).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_gzip_garbage_is_corrupt() {
        let err = decompress(b"definitely not gzip", ArchiveKind::Gzip).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)));
    }
}
