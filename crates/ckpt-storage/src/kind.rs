use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a storage buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Float32,
    Float16,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Bool,
}

impl StorageKind {
    /// All kinds, in a stable order.
    pub const ALL: [StorageKind; 9] = [
        Self::Float32,
        Self::Float16,
        Self::Float64,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::Bool,
    ];

    /// Size of one element in bytes.
    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => 1,
            Self::Float16 | Self::Int16 => 2,
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
        }
    }

    /// Serialized class name of the storage type (`FloatStorage`, ...).
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Float32 => "FloatStorage",
            Self::Float16 => "HalfStorage",
            Self::Float64 => "DoubleStorage",
            Self::Int8 => "CharStorage",
            Self::Int16 => "ShortStorage",
            Self::Int32 => "IntStorage",
            Self::Int64 => "LongStorage",
            Self::UInt8 => "ByteStorage",
            Self::Bool => "BoolStorage",
        }
    }

    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.class_name() == name)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::Float64 => "float64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// Storage contents decoded into typed elements (little-endian).
///
/// Half-precision values are returned as raw IEEE 754 binary16 bit patterns.
#[derive(Clone, Debug, PartialEq)]
pub enum Elements {
    Float32(Vec<f32>),
    Float16(Vec<u16>),
    Float64(Vec<f64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    Bool(Vec<bool>),
}

macro_rules! decode_le {
    ( $bytes:expr, $ty:ty ) => {
        $bytes
            .chunks_exact(std::mem::size_of::<$ty>())
            .map(|c| <$ty>::from_le_bytes(c.try_into().expect("chunk has element size")))
            .collect()
    };
}

impl Elements {
    /// Decode `bytes` as elements of `kind`. Trailing partial elements are ignored.
    pub fn decode(kind: StorageKind, bytes: &[u8]) -> Self {
        match kind {
            StorageKind::Float32 => Self::Float32(decode_le!(bytes, f32)),
            StorageKind::Float16 => Self::Float16(decode_le!(bytes, u16)),
            StorageKind::Float64 => Self::Float64(decode_le!(bytes, f64)),
            StorageKind::Int8 => Self::Int8(bytes.iter().map(|&b| b as i8).collect()),
            StorageKind::Int16 => Self::Int16(decode_le!(bytes, i16)),
            StorageKind::Int32 => Self::Int32(decode_le!(bytes, i32)),
            StorageKind::Int64 => Self::Int64(decode_le!(bytes, i64)),
            StorageKind::UInt8 => Self::UInt8(bytes.to_vec()),
            StorageKind::Bool => Self::Bool(bytes.iter().map(|&b| b != 0).collect()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float16(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt8(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
