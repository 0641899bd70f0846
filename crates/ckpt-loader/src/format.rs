//! Container format detection.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use tracing::trace;

/// Size of a tar header block.
pub const TAR_BLOCK: usize = 512;

/// How a checkpoint file is packaged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerFormat {
    /// Zip archive written by the current serializer.
    Zip,
    /// Legacy stream wrapped in a tar archive.
    LegacyTar,
    /// Bare legacy stream.
    LegacyRaw,
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Zip => "zip",
            Self::LegacyTar => "legacy-tar",
            Self::LegacyRaw => "legacy-raw",
        })
    }
}

/// Detect the container format of the file at `path`.
pub fn detect(path: impl AsRef<Path>) -> io::Result<ContainerFormat> {
    let mut file = File::open(path.as_ref())?;
    detect_reader(&mut file)
}

/// Detect the container format of `reader`, leaving its position where it
/// was on entry.
pub fn detect_reader<R: Read + Seek>(reader: &mut R) -> io::Result<ContainerFormat> {
    let start = reader.stream_position()?;
    let is_zip = zip::ZipArchive::new(&mut *reader).is_ok();
    reader.seek(SeekFrom::Start(start))?;
    if is_zip {
        return Ok(ContainerFormat::Zip);
    }

    let mut block = [0u8; TAR_BLOCK];
    let n = read_up_to(reader, &mut block)?;
    reader.seek(SeekFrom::Start(start))?;
    let format = if n == TAR_BLOCK && is_tar_header(&block) {
        ContainerFormat::LegacyTar
    } else {
        ContainerFormat::LegacyRaw
    };
    trace!(%format, "detected container format");
    Ok(format)
}

/// Whether `block` is a tar header with a valid checksum.
pub fn is_tar_header(block: &[u8; TAR_BLOCK]) -> bool {
    if block.iter().all(|&b| b == 0) {
        return false;
    }
    let header = tar::Header::from_byte_slice(block);
    let Ok(stored) = header.cksum() else {
        return false;
    };
    let mut computed = header.clone();
    computed.set_cksum();
    computed.cksum().is_ok_and(|c| c == stored)
}

/// Like `read_exact`, but a short read at end of input is not an error.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testutil::{checkpoint, tar_with, EMPTY_ZIP};

    #[test]
    fn raw_stream() {
        let bytes = checkpoint(|w| { w.none(); }, &[], &[]);
        let mut cursor = Cursor::new(bytes);
        assert_eq!(detect_reader(&mut cursor).unwrap(), ContainerFormat::LegacyRaw);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn tar_stream() {
        let mut cursor = Cursor::new(tar_with("pickle", b"payload"));
        assert_eq!(detect_reader(&mut cursor).unwrap(), ContainerFormat::LegacyTar);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn zip_archive() {
        let mut cursor = Cursor::new(EMPTY_ZIP.to_vec());
        assert_eq!(detect_reader(&mut cursor).unwrap(), ContainerFormat::Zip);
    }

    #[test]
    fn position_is_restored_mid_stream() {
        let mut data = vec![0xaa; 10];
        data.extend(tar_with("pickle", b"x"));
        let mut cursor = Cursor::new(data);
        cursor.set_position(10);
        assert_eq!(detect_reader(&mut cursor).unwrap(), ContainerFormat::LegacyTar);
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn corrupted_tar_checksum_is_raw() {
        let mut data = tar_with("pickle", b"payload");
        data[0] ^= 0xff;
        assert_eq!(detect_reader(&mut Cursor::new(data)).unwrap(), ContainerFormat::LegacyRaw);
    }

    #[test]
    fn short_and_zeroed_inputs_are_raw() {
        assert_eq!(detect_reader(&mut Cursor::new(vec![1u8; 3])).unwrap(), ContainerFormat::LegacyRaw);
        assert!(!is_tar_header(&[0u8; TAR_BLOCK]));
    }

    #[test]
    fn detect_by_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), tar_with("pickle", b"")).unwrap();
        assert_eq!(detect(file.path()).unwrap(), ContainerFormat::LegacyTar);
    }

    #[test]
    fn display_names() {
        assert_eq!(ContainerFormat::LegacyTar.to_string(), "legacy-tar");
        assert_eq!(ContainerFormat::Zip.to_string(), "zip");
    }
}
