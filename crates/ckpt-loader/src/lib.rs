//! Reconstruction of legacy-format model checkpoints.
//!
//! A legacy checkpoint is a sequence of pickle records followed by raw
//! storage payload:
//!
//! 1. magic number, protocol version and system info (the header)
//! 2. the object graph, whose persistent references name storages
//! 3. the list of root storage keys, in payload order
//! 4. one payload block per key
//!
//! The stream may be bare or wrapped in a tar archive. Zip checkpoints are
//! detected and refused with [`LoadError::UnsupportedContainerFormat`].
//!
//! ```no_run
//! use ckpt_loader::{CheckpointLoader, LoadConfig};
//!
//! let loader = CheckpointLoader::new(LoadConfig::default());
//! let checkpoint = loader.load("model.pt")?;
//! println!("{} storages", checkpoint.storages.len());
//! # Ok::<(), ckpt_loader::LoadError>(())
//! ```

pub mod archive;
pub mod classes;
pub mod config;
pub mod error;
pub mod format;
pub mod header;
pub mod loader;
pub mod materialize;
pub mod object;
pub mod persistent;
pub mod provenance;
pub mod tensor;

#[cfg(test)]
mod testutil;

pub use config::{BlockLayout, LoadConfig};
pub use error::{ErrorCategory, LoadError, LoadResult};
pub use format::{detect, ContainerFormat};
pub use loader::{load, Checkpoint, CheckpointLoader};
pub use object::{Class, Tensor, TensorSource, Torch, TorchValue};
pub use provenance::{NoopSourceVerifier, SourceFileVerifier, SourceVerifier};
