use std::collections::HashMap;

use tracing::debug;

use crate::error::StorageResult;
use crate::storage::{Storage, StorageClass, StorageView};

/// Storages and views created during one load, keyed by their stream keys.
///
/// The registry holds the owning handle of every root storage. It is created
/// empty for each load and dropped when the load returns; nested loads get a
/// registry of their own.
#[derive(Debug, Default)]
pub struct StorageRegistry {
    roots: HashMap<String, Storage>,
    views: HashMap<String, StorageView>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the root storage for `key`, allocating it on first sight.
    ///
    /// A key seen before returns the existing storage even if the new
    /// record disagrees on kind or size; the first record wins.
    pub fn get_or_allocate(
        &mut self,
        class: StorageClass,
        key: &str,
        element_count: usize,
        location: &str,
    ) -> StorageResult<Storage> {
        if let Some(existing) = self.roots.get(key) {
            return Ok(existing.clone());
        }
        let storage = class.allocate(key, element_count, location)?;
        debug!(key, kind = %class.kind(), element_count, location, "allocated storage");
        self.roots.insert(key.to_owned(), storage.clone());
        Ok(storage)
    }

    /// Return the view for `view_key`, creating it over `root` on first sight.
    pub fn get_or_create_view(
        &mut self,
        root: &Storage,
        view_key: &str,
        offset: usize,
        len: usize,
    ) -> StorageResult<StorageView> {
        if let Some(existing) = self.views.get(view_key) {
            return Ok(existing.clone());
        }
        let view = StorageView::new(view_key, root, offset, len)?;
        debug!(view_key, root = root.key(), offset, len, "created storage view");
        self.views.insert(view_key.to_owned(), view.clone());
        Ok(view)
    }

    pub fn root(&self, key: &str) -> Option<&Storage> {
        self.roots.get(key)
    }

    pub fn view(&self, key: &str) -> Option<&StorageView> {
        self.views.get(key)
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Root storages sorted by key.
    pub fn roots(&self) -> Vec<Storage> {
        let mut roots: Vec<Storage> = self.roots.values().cloned().collect();
        roots.sort_by(|a, b| a.key().cmp(b.key()));
        roots
    }
}
