use serde::{Deserialize, Serialize};

/// Layout of the storage payload blocks that trail the key list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockLayout {
    /// Blocks are back to back; the storage record's element count is the
    /// only length information.
    #[default]
    Raw,
    /// Each block starts with its element count as a little-endian `u64`,
    /// which must agree with the storage record.
    SizePrefixed,
}

/// Configuration for a checkpoint load.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// How storage payload blocks are framed.
    pub block_layout: BlockLayout,
    /// Name of the tar member that holds the nested checkpoint stream.
    pub tar_payload_member: String,
    /// Upper bound on a single storage's declared size, in bytes.
    pub max_storage_bytes: u64,
    /// Upper bound on the tar member holding the nested stream, in bytes.
    pub max_tar_member_bytes: u64,
    /// Upper bound on the values copied out of the memo while decoding the
    /// object graph. Nested memo references grow exponentially otherwise.
    pub max_memo_copy_nodes: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            block_layout: BlockLayout::Raw,
            tar_payload_member: "pickle".into(),
            max_storage_bytes: 64 * 1024 * 1024 * 1024, // 64 GiB
            max_tar_member_bytes: 64 * 1024 * 1024 * 1024,
            max_memo_copy_nodes: ckpt_pickle::decode::DEFAULT_MEMO_COPY_LIMIT,
        }
    }
}
