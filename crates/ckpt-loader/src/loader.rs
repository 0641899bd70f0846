use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use ckpt_pickle::Unpickler;
use ckpt_storage::{Storage, StorageRegistry};
use tracing::{debug, info};

use crate::archive;
use crate::config::LoadConfig;
use crate::error::LoadResult;
use crate::format::{self, ContainerFormat};
use crate::header;
use crate::materialize;
use crate::object::TorchValue;
use crate::persistent::Resolver;
use crate::provenance::{NoopSourceVerifier, SourceVerifier};

/// Result of a successful load.
#[derive(Debug)]
pub struct Checkpoint {
    /// The decoded object graph.
    pub graph: TorchValue,
    pub format: ContainerFormat,
    /// Root storage keys in payload order.
    pub storage_keys: Vec<String>,
    /// Materialized root storages, in payload order.
    pub storages: Vec<Storage>,
}

impl Checkpoint {
    /// Total payload size of all storages.
    pub fn payload_bytes(&self) -> u64 {
        self.storages.iter().map(Storage::byte_len).sum()
    }
}

/// Loads checkpoints with a fixed configuration.
///
/// A loader holds no per-load state; one instance can serve concurrent
/// loads from several threads.
#[derive(Clone)]
pub struct CheckpointLoader {
    config: LoadConfig,
    verifier: Arc<dyn SourceVerifier>,
}

impl Default for CheckpointLoader {
    fn default() -> Self {
        Self::new(LoadConfig::default())
    }
}

impl CheckpointLoader {
    pub fn new(config: LoadConfig) -> Self {
        Self {
            config,
            verifier: Arc::new(NoopSourceVerifier),
        }
    }

    /// Use `verifier` for module references that carry their source.
    pub fn with_source_verifier(mut self, verifier: impl SourceVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Load the checkpoint at `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> LoadResult<Checkpoint> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading checkpoint");
        let file = File::open(path)?;
        self.load_reader(file)
    }

    /// Load a checkpoint from a seekable reader positioned at its start.
    pub fn load_reader<R: Read + Seek>(&self, mut reader: R) -> LoadResult<Checkpoint> {
        let format = format::detect_reader(&mut reader)?;
        debug!(%format, "detected container format");
        match format {
            ContainerFormat::Zip => archive::reject_zip(reader),
            ContainerFormat::LegacyTar => {
                let stream = archive::extract_tar_member(
                    reader,
                    &self.config.tar_payload_member,
                    self.config.max_tar_member_bytes,
                )?;
                let mut checkpoint = self.load_legacy(Cursor::new(stream))?;
                checkpoint.format = ContainerFormat::LegacyTar;
                Ok(checkpoint)
            }
            ContainerFormat::LegacyRaw => self.load_legacy(BufReader::new(reader)),
        }
    }

    /// Load a bare legacy stream: header, object graph, key order, payload.
    ///
    /// Every call uses a fresh storage registry, so storages never leak
    /// between loads.
    pub fn load_legacy<R: Read>(&self, mut reader: R) -> LoadResult<Checkpoint> {
        header::read_header(&mut reader)?;

        let mut registry = StorageRegistry::new();
        let graph = {
            let mut resolver = Resolver::new(&mut registry, &self.config, self.verifier.as_ref());
            Unpickler::new(&mut reader, &mut resolver)
                .with_memo_copy_limit(self.config.max_memo_copy_nodes)
                .load()?
        };
        debug!(
            storages = registry.root_count(),
            views = registry.view_count(),
            "decoded object graph"
        );

        let storage_keys = materialize::read_storage_keys(&mut reader)?;
        let storages = materialize::materialize(&mut reader, &registry, &storage_keys, self.config.block_layout)?;
        Ok(Checkpoint {
            graph,
            format: ContainerFormat::LegacyRaw,
            storage_keys,
            storages,
        })
    }
}

/// Load the checkpoint at `path` with the default configuration and return
/// its object graph.
pub fn load(path: impl AsRef<Path>) -> LoadResult<TorchValue> {
    CheckpointLoader::default().load(path).map(|c| c.graph)
}
