//! Storage buffers for reconstructed checkpoints.
//!
//! A checkpoint's tensors do not carry their own data. They point at
//! *storages*: flat typed buffers identified by a key that is unique within
//! one load. Several tensors may share a storage, and a *view* may alias a
//! window of one.
//!
//! # Ownership
//!
//! - [`StorageRegistry`] owns the root handle of every storage for one load.
//! - [`Storage`] is a reference-counted handle; clones share the buffer.
//! - [`StorageView`] holds a handle to its root plus an element window and
//!   never copies bytes.
//! - [`StorageClass`] is the capability token that allocates storages of one
//!   [`StorageKind`].
//!
//! Buffers are allocated unfilled and written exactly once, after the whole
//! object graph has been decoded.

pub mod error;
pub mod kind;
pub mod registry;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use kind::{Elements, StorageKind};
pub use registry::StorageRegistry;
pub use storage::{Storage, StorageClass, StorageView};
