//! Static table of the globals a checkpoint may reference.

use ckpt_storage::{StorageClass, StorageKind};

use crate::object::Class;

const fn storage(kind: StorageKind) -> Class {
    Class::Storage(StorageClass::new(kind))
}

/// `(module, name) -> class` for every global the loader can construct.
pub const CLASS_TABLE: &[(&str, &str, Class)] = &[
    ("torch._utils", "_rebuild_tensor", Class::RebuildTensor),
    ("torch._utils", "_rebuild_tensor_v2", Class::RebuildTensorV2),
    ("torch._utils", "_rebuild_parameter", Class::RebuildParameter),
    ("collections", "OrderedDict", Class::OrderedDict),
    ("torch", "FloatStorage", storage(StorageKind::Float32)),
    ("torch", "HalfStorage", storage(StorageKind::Float16)),
    ("torch", "DoubleStorage", storage(StorageKind::Float64)),
    ("torch", "CharStorage", storage(StorageKind::Int8)),
    ("torch", "ShortStorage", storage(StorageKind::Int16)),
    ("torch", "IntStorage", storage(StorageKind::Int32)),
    ("torch", "LongStorage", storage(StorageKind::Int64)),
    ("torch", "ByteStorage", storage(StorageKind::UInt8)),
    ("torch", "BoolStorage", storage(StorageKind::Bool)),
];

/// Look up a global by module and name.
pub fn resolve(module: &str, name: &str) -> Option<Class> {
    CLASS_TABLE
        .iter()
        .find(|(m, n, _)| *m == module && *n == name)
        .map(|(_, _, class)| *class)
}
