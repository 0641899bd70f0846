//! Checks on the source code recorded next to serialized module containers.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{LoadError, LoadResult};
use crate::object::TorchValue;

/// Called for every module reference whose provenance fields are all
/// present.
pub trait SourceVerifier: Send + Sync {
    fn verify(&self, container: &TorchValue, source_file: &str, source: &str) -> LoadResult<()>;
}

/// Accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSourceVerifier;

impl SourceVerifier for NoopSourceVerifier {
    fn verify(&self, _container: &TorchValue, _source_file: &str, _source: &str) -> LoadResult<()> {
        Ok(())
    }
}

/// Compares the recorded source with the file currently at the recorded path.
///
/// A missing file is skipped. A differing file logs a warning, or fails the
/// load with [`LoadError::SourceMismatch`] when `strict` is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceFileVerifier {
    pub strict: bool,
}

impl SourceFileVerifier {
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl SourceVerifier for SourceFileVerifier {
    fn verify(&self, _container: &TorchValue, source_file: &str, source: &str) -> LoadResult<()> {
        let current = match fs::read_to_string(Path::new(source_file)) {
            Ok(text) => text,
            Err(e) => {
                debug!(source_file, error = %e, "module source not readable, skipping check");
                return Ok(());
            }
        };
        if current == source {
            return Ok(());
        }
        if self.strict {
            return Err(LoadError::SourceMismatch(format!(
                "source of {source_file} has changed since the checkpoint was saved"
            )));
        }
        warn!(source_file, "module source has changed since the checkpoint was saved");
        Ok(())
    }
}
