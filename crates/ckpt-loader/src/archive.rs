//! Container handling: the zip entry point and tar member extraction.

use std::io::{Read, Seek};

use tracing::debug;

use crate::error::{LoadError, LoadResult};

/// Zip checkpoints are recognized but not decoded.
///
/// The archive's member list is logged so that a caller can see what the
/// file contains before the load is refused.
pub fn reject_zip<R: Read + Seek, T>(reader: R) -> LoadResult<T> {
    match zip::ZipArchive::new(reader) {
        Ok(archive) => {
            let members: Vec<&str> = archive.file_names().collect();
            debug!(count = members.len(), ?members, "zip checkpoint members");
            Err(LoadError::UnsupportedContainerFormat(format!(
                "zip archive with {} members",
                members.len()
            )))
        }
        Err(e) => Err(LoadError::UnsupportedContainerFormat(format!("zip archive ({e})"))),
    }
}

/// Read the member named `name` out of a tar archive.
///
/// The member's declared size comes from an untrusted header, so it is
/// checked against `limit` and the buffer only grows as bytes arrive.
pub fn extract_tar_member<R: Read>(reader: R, name: &str, limit: u64) -> LoadResult<Vec<u8>> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;
        let matches = path.as_os_str() == name;
        debug!(member = %path.display(), size = entry.size(), "tar member");
        if matches {
            let size = entry.size();
            if size > limit {
                return Err(LoadError::TarMemberTooLarge {
                    name: name.to_owned(),
                    size,
                    limit,
                });
            }
            let mut data = Vec::new();
            (&mut entry).take(size).read_to_end(&mut data)?;
            if (data.len() as u64) < size {
                return Err(LoadError::TarMemberTruncated {
                    name: name.to_owned(),
                    declared: size,
                    read: data.len() as u64,
                });
            }
            return Ok(data);
        }
    }
    Err(LoadError::TarMemberNotFound(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::ErrorCategory;
    use crate::testutil::{tar_with, EMPTY_ZIP};

    const LIMIT: u64 = 1 << 20;

    /// A single GNU header declaring `size` bytes, followed by `body`.
    fn tar_header_only(name: &str, size: u64, body: usize) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_cksum();
        let mut out = header.as_bytes().to_vec();
        out.resize(out.len() + body, 0);
        out
    }

    #[test]
    fn zip_is_unsupported() {
        let err = reject_zip::<_, ()>(Cursor::new(EMPTY_ZIP.to_vec())).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedContainerFormat(_)));
        assert_eq!(err.category(), ErrorCategory::Unsupported);
    }

    #[test]
    fn extracts_named_member() {
        let data = tar_with("pickle", b"stream bytes");
        assert_eq!(extract_tar_member(&data[..], "pickle", LIMIT).unwrap(), b"stream bytes");
    }

    #[test]
    fn missing_member() {
        let data = tar_with("storages", b"x");
        match extract_tar_member(&data[..], "pickle", LIMIT).unwrap_err() {
            LoadError::TarMemberNotFound(name) => assert_eq!(name, "pickle"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oversized_member_is_refused_before_reading() {
        let data = tar_header_only("pickle", u64::MAX / 2, 1024);
        let err = extract_tar_member(&data[..], "pickle", LIMIT).unwrap_err();
        match &err {
            LoadError::TarMemberTooLarge { name, size, limit } => {
                assert_eq!(name, "pickle");
                assert_eq!(*size, u64::MAX / 2);
                assert_eq!(*limit, LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.category(), ErrorCategory::Corrupt);
    }

    #[test]
    fn short_member_is_truncated() {
        let data = tar_header_only("pickle", 4096, 1024);
        match extract_tar_member(&data[..], "pickle", LIMIT).unwrap_err() {
            LoadError::TarMemberTruncated { declared, read, .. } => {
                assert_eq!(declared, 4096);
                assert_eq!(read, 1024);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn member_at_limit_is_read() {
        let data = tar_with("pickle", &[7u8; 64]);
        assert_eq!(extract_tar_member(&data[..], "pickle", 64).unwrap().len(), 64);
        assert!(matches!(
            extract_tar_member(&data[..], "pickle", 63),
            Err(LoadError::TarMemberTooLarge { .. })
        ));
    }
}
