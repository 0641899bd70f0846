//! Filling storages from the payload that follows the object graph.

use std::io::Read;

use ckpt_pickle::Value;
use ckpt_storage::{Storage, StorageRegistry};
use tracing::{debug, info};

use crate::config::BlockLayout;
use crate::error::{LoadError, LoadResult};

/// Decode the key-order record: a list of root storage keys.
pub fn read_storage_keys<R: Read>(reader: &mut R) -> LoadResult<Vec<String>> {
    let value = ckpt_pickle::from_reader(&mut *reader)?;
    let items = match &value {
        Value::List(items) | Value::Tuple(items) => items,
        other => {
            return Err(LoadError::InvalidStorageKeys(format!(
                "expected a list, found {}",
                other.type_name()
            )))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Str(s) => Ok(s.clone()),
            other => Err(LoadError::InvalidStorageKeys(format!(
                "entry {i} is {}, not a string",
                other.type_name()
            ))),
        })
        .collect()
}

/// Fill every storage named in `keys`, in order, from consecutive payload
/// blocks. Returns the storages in key order.
///
/// Stops at the first failure; storages filled before it keep their bytes.
pub fn materialize<R: Read>(
    reader: &mut R,
    registry: &StorageRegistry,
    keys: &[String],
    layout: BlockLayout,
) -> LoadResult<Vec<Storage>> {
    let mut filled = Vec::with_capacity(keys.len());
    let mut total: u64 = 0;
    for key in keys {
        let storage = registry
            .root(key)
            .ok_or_else(|| LoadError::UnknownStorageKey(key.clone()))?;
        if layout == BlockLayout::SizePrefixed {
            read_block_prefix(reader, storage)?;
        }
        storage.fill_from(reader)?;
        debug!(key = key.as_str(), bytes = storage.byte_len(), "materialized storage");
        total += storage.byte_len();
        filled.push(storage.clone());
    }
    info!(storages = filled.len(), bytes = total, "storage payload read");
    Ok(filled)
}

fn read_block_prefix<R: Read>(reader: &mut R, storage: &Storage) -> LoadResult<()> {
    let mut prefix = [0u8; 8];
    reader.read_exact(&mut prefix)?;
    let declared = u64::from_le_bytes(prefix);
    let expected = storage.len() as u64;
    if declared != expected {
        return Err(LoadError::BlockSizeMismatch {
            key: storage.key().to_owned(),
            declared,
            expected,
        });
    }
    Ok(())
}
