use std::fmt;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use crate::error::{StorageError, StorageResult};
use crate::kind::{Elements, StorageKind};

struct StorageInner {
    key: String,
    kind: StorageKind,
    location: String,
    len: usize,
    data: OnceLock<Vec<u8>>,
}

/// A flat typed buffer, shared by every tensor that references it.
///
/// Cloning a `Storage` clones the handle, not the buffer: all clones observe
/// the same bytes and compare equal under [`Storage::ptr_eq`]. Kind, element
/// count and location are fixed at allocation; the bytes are written once by
/// [`Storage::fill_from`].
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn kind(&self) -> StorageKind {
        self.inner.kind
    }

    /// Device placement hint recorded with the storage (`cpu`, `cuda:0`, ...).
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Payload size in bytes. Allocation guarantees this does not overflow.
    pub fn byte_len(&self) -> u64 {
        self.inner.len as u64 * self.inner.kind.element_size() as u64
    }

    /// Whether the payload bytes have been read.
    pub fn is_materialized(&self) -> bool {
        self.inner.data.get().is_some()
    }

    /// Payload bytes, or `None` before materialization.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.inner.data.get().map(Vec::as_slice)
    }

    /// Payload decoded as typed elements, or `None` before materialization.
    pub fn elements(&self) -> Option<Elements> {
        self.bytes().map(|b| Elements::decode(self.kind(), b))
    }

    /// Identity comparison: true when both handles refer to the same buffer.
    pub fn ptr_eq(a: &Storage, b: &Storage) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Read exactly [`byte_len`](Self::byte_len) bytes from `reader` into
    /// this storage.
    pub fn fill_from<R: Read>(&self, reader: &mut R) -> StorageResult<()> {
        if self.is_materialized() {
            return Err(StorageError::AlreadyMaterialized(self.key().to_owned()));
        }
        let expected = self.byte_len();
        let mut buf = Vec::new();
        reader.take(expected).read_to_end(&mut buf)?;
        if (buf.len() as u64) < expected {
            return Err(StorageError::Truncated {
                key: self.key().to_owned(),
                expected,
                actual: buf.len() as u64,
            });
        }
        self.inner
            .data
            .set(buf)
            .map_err(|_| StorageError::AlreadyMaterialized(self.key().to_owned()))
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("key", &self.inner.key)
            .field("kind", &self.inner.kind)
            .field("location", &self.inner.location)
            .field("len", &self.inner.len)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl PartialEq for Storage {
    fn eq(&self, other: &Self) -> bool {
        Storage::ptr_eq(self, other)
    }
}

struct ViewInner {
    key: String,
    root: Storage,
    offset: usize,
    len: usize,
}

/// A window `[offset, offset + len)` (in elements) onto a root [`Storage`].
///
/// A view never owns bytes; once the root is materialized the view's bytes
/// are the corresponding sub-slice of the root's.
#[derive(Clone)]
pub struct StorageView {
    inner: Arc<ViewInner>,
}

impl StorageView {
    pub(crate) fn new(key: &str, root: &Storage, offset: usize, len: usize) -> StorageResult<Self> {
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= root.len());
        if !in_bounds {
            return Err(StorageError::ViewOutOfBounds {
                view: key.to_owned(),
                root: root.key().to_owned(),
                offset,
                len,
                root_len: root.len(),
            });
        }
        Ok(Self {
            inner: Arc::new(ViewInner {
                key: key.to_owned(),
                root: root.clone(),
                offset,
                len,
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The storage this view aliases.
    pub fn root(&self) -> &Storage {
        &self.inner.root
    }

    /// Offset into the root, in elements.
    pub fn offset(&self) -> usize {
        self.inner.offset
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn kind(&self) -> StorageKind {
        self.inner.root.kind()
    }

    /// Sub-slice of the root's bytes, or `None` before the root is materialized.
    pub fn bytes(&self) -> Option<&[u8]> {
        let size = self.kind().element_size();
        let start = self.inner.offset * size;
        let end = start + self.inner.len * size;
        self.inner.root.bytes().map(|b| &b[start..end])
    }

    pub fn elements(&self) -> Option<Elements> {
        self.bytes().map(|b| Elements::decode(self.kind(), b))
    }

    pub fn ptr_eq(a: &StorageView, b: &StorageView) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for StorageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageView")
            .field("key", &self.inner.key)
            .field("root", &self.inner.root.key())
            .field("offset", &self.inner.offset)
            .field("len", &self.inner.len)
            .finish()
    }
}

impl PartialEq for StorageView {
    fn eq(&self, other: &Self) -> bool {
        StorageView::ptr_eq(self, other)
    }
}

/// Capability token for one storage kind: knows how to allocate a buffer of
/// that kind. Produced by class resolution for the `*Storage` classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StorageClass {
    kind: StorageKind,
}

impl StorageClass {
    pub const fn new(kind: StorageKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Allocate an unfilled storage of `element_count` elements.
    pub fn allocate(&self, key: &str, element_count: usize, location: &str) -> StorageResult<Storage> {
        let fits = (element_count as u64)
            .checked_mul(self.kind.element_size() as u64)
            .is_some();
        if !fits {
            return Err(StorageError::SizeOverflow {
                key: key.to_owned(),
                element_count,
            });
        }
        Ok(Storage {
            inner: Arc::new(StorageInner {
                key: key.to_owned(),
                kind: self.kind,
                location: location.to_owned(),
                len: element_count,
                data: OnceLock::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_storage(key: &str, len: usize) -> Storage {
        StorageClass::new(StorageKind::Float32)
            .allocate(key, len, "cpu")
            .unwrap()
    }

    #[test]
    fn allocate_is_unfilled() {
        let s = float_storage("0", 10);
        assert_eq!(s.key(), "0");
        assert_eq!(s.len(), 10);
        assert_eq!(s.byte_len(), 40);
        assert_eq!(s.location(), "cpu");
        assert!(!s.is_materialized());
        assert!(s.bytes().is_none());
    }

    #[test]
    fn fill_reads_exact_byte_len() {
        let s = float_storage("0", 2);
        let mut data: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 99];
        s.fill_from(&mut data).unwrap();
        assert_eq!(s.bytes().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(data, &[99]);
    }

    #[test]
    fn fill_twice_fails() {
        let s = float_storage("0", 1);
        let mut data: &[u8] = &[0; 8];
        s.fill_from(&mut data).unwrap();
        let err = s.fill_from(&mut data).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyMaterialized(k) if k == "0"));
    }

    #[test]
    fn fill_truncated() {
        let s = float_storage("k", 4);
        let mut data: &[u8] = &[0; 10];
        let err = s.fill_from(&mut data).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Truncated { expected: 16, actual: 10, .. }
        ));
        assert!(!s.is_materialized());
    }

    #[test]
    fn clones_share_identity_and_bytes() {
        let a = float_storage("0", 1);
        let b = a.clone();
        let other = float_storage("0", 1);
        assert!(Storage::ptr_eq(&a, &b));
        assert!(!Storage::ptr_eq(&a, &other));
        let mut data: &[u8] = &[1, 0, 128, 63];
        a.fill_from(&mut data).unwrap();
        assert_eq!(b.elements(), Some(Elements::Float32(vec![1.0])));
    }

    #[test]
    fn view_aliases_root_bytes() {
        let root = StorageClass::new(StorageKind::Int16)
            .allocate("r", 4, "cpu")
            .unwrap();
        let view = StorageView::new("v", &root, 1, 2).unwrap();
        assert!(view.bytes().is_none());
        let mut data: &[u8] = &[1, 0, 2, 0, 3, 0, 4, 0];
        root.fill_from(&mut data).unwrap();
        assert_eq!(view.bytes().unwrap(), &[2, 0, 3, 0]);
        assert_eq!(view.elements(), Some(Elements::Int16(vec![2, 3])));
        assert!(Storage::ptr_eq(view.root(), &root));
    }

    #[test]
    fn view_out_of_bounds() {
        let root = float_storage("r", 4);
        let err = StorageView::new("v", &root, 3, 2).unwrap_err();
        assert!(matches!(err, StorageError::ViewOutOfBounds { root_len: 4, .. }));
        assert!(StorageView::new("v", &root, usize::MAX, 2).is_err());
        assert!(StorageView::new("v", &root, 4, 0).is_ok());
    }

    #[test]
    fn allocate_overflow() {
        let err = StorageClass::new(StorageKind::Float64)
            .allocate("big", usize::MAX, "cpu")
            .unwrap_err();
        assert!(matches!(err, StorageError::SizeOverflow { .. }));
    }
}
