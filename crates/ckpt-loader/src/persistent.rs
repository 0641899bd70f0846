//! Decoding hooks for the object graph record.
//!
//! Persistent references are validated into a [`PersistentRecord`] before
//! anything is allocated, so a malformed reference never leaves a partial
//! storage behind in the registry.

use ckpt_pickle::{Hooks, Value};
use ckpt_storage::{StorageClass, StorageRegistry};
use tracing::debug;

use crate::classes;
use crate::config::LoadConfig;
use crate::error::{LoadError, LoadResult};
use crate::object::{Class, Torch, TorchValue};
use crate::provenance::SourceVerifier;
use crate::tensor;

/// A validated persistent reference.
#[derive(Debug)]
pub enum PersistentRecord {
    Storage(StorageRecord),
    Module(ModuleRecord),
}

#[derive(Debug)]
pub struct StorageRecord {
    pub class: StorageClass,
    pub root_key: String,
    pub location: String,
    pub element_count: usize,
    pub view: Option<ViewRecord>,
}

#[derive(Debug)]
pub struct ViewRecord {
    pub key: String,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug)]
pub struct ModuleRecord {
    pub container: TorchValue,
    /// `(source_file, source)` when every provenance field is present.
    pub provenance: Option<(String, String)>,
}

impl PersistentRecord {
    /// Check the shape of a persistent id and split it by discriminator.
    pub fn parse(pid: TorchValue) -> LoadResult<Self> {
        let items = match pid {
            Value::Tuple(items) if !items.is_empty() => items,
            Value::Tuple(_) => return Err(LoadError::MalformedPersistentId("empty tuple".into())),
            other => {
                return Err(LoadError::MalformedPersistentId(format!(
                    "expected a tuple, found {}",
                    other.type_name()
                )))
            }
        };
        match text(&items[0]).as_deref() {
            Some("storage") => StorageRecord::parse(items).map(Self::Storage),
            Some("module") => ModuleRecord::parse(items).map(Self::Module),
            Some(other) => Err(LoadError::UnexpectedPersistentIdType(other.to_owned())),
            None => Err(LoadError::UnexpectedPersistentIdType(format!("{:?}", items[0]))),
        }
    }
}

impl StorageRecord {
    const FIELDS: usize = 6;

    fn parse(items: Vec<TorchValue>) -> LoadResult<Self> {
        let malformed = LoadError::MalformedStorageRecord;
        if items.len() != Self::FIELDS {
            return Err(malformed(format!(
                "expected {} elements, found {}",
                Self::FIELDS,
                items.len()
            )));
        }
        let class = match &items[1] {
            Value::Ext(Torch::Class(Class::Storage(class))) => *class,
            other => return Err(malformed(format!("storage type is {}, not a storage class", other.type_name()))),
        };
        let root_key = text(&items[2]).ok_or_else(|| malformed("root key is not a string".into()))?;
        let location = text(&items[3]).ok_or_else(|| malformed("location is not a string".into()))?;
        let element_count = items[4]
            .as_usize()
            .ok_or_else(|| malformed("element count is not a non-negative integer".into()))?;
        let view = match &items[5] {
            Value::None => None,
            meta if meta.len() == Some(0) => None,
            meta => Some(ViewRecord::parse(meta)?),
        };
        Ok(Self {
            class,
            root_key,
            location,
            element_count,
            view,
        })
    }

    fn byte_len(&self) -> Option<u64> {
        (self.element_count as u64).checked_mul(self.class.kind().element_size() as u64)
    }
}

impl ViewRecord {
    fn parse(meta: &TorchValue) -> LoadResult<Self> {
        let malformed = |reason: &str| LoadError::MalformedStorageRecord(format!("view metadata {reason}"));
        let fields = match meta.as_sequence() {
            Some(fields) if fields.len() == 3 => fields,
            _ => return Err(malformed("must be a 3-element sequence or None")),
        };
        Ok(Self {
            key: text(&fields[0]).ok_or_else(|| malformed("key is not a string"))?,
            offset: fields[1]
                .as_usize()
                .ok_or_else(|| malformed("offset is not a non-negative integer"))?,
            len: fields[2]
                .as_usize()
                .ok_or_else(|| malformed("size is not a non-negative integer"))?,
        })
    }
}

impl ModuleRecord {
    fn parse(items: Vec<TorchValue>) -> LoadResult<Self> {
        if items.len() < 2 {
            return Err(LoadError::MalformedModuleRecord("missing container".into()));
        }
        let mut items = items.into_iter().skip(1);
        let container = items.next().unwrap_or(Value::None);
        let rest: Vec<TorchValue> = items.collect();

        let provenance = match rest.as_slice() {
            [file, source] if truthy(file) && truthy(source) => {
                let (Some(file), Some(source)) = (text(file), text(source)) else {
                    return Err(LoadError::MalformedModuleRecord(
                        "source file and source must be strings".into(),
                    ));
                };
                Some((file, source))
            }
            _ => None,
        };
        Ok(Self { container, provenance })
    }
}

/// Strings may be written as text or, by older writers, as ASCII bytes.
fn text(value: &TorchValue) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Bytes(b) if b.is_ascii() => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

fn truthy(value: &TorchValue) -> bool {
    match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Long(l) => *l != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        other => other.len().map_or(true, |n| n > 0),
    }
}

/// [`Hooks`] that resolve persistent references against a registry and
/// construct the classes listed in [`classes::CLASS_TABLE`].
pub struct Resolver<'a> {
    registry: &'a mut StorageRegistry,
    config: &'a LoadConfig,
    verifier: &'a dyn SourceVerifier,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a mut StorageRegistry, config: &'a LoadConfig, verifier: &'a dyn SourceVerifier) -> Self {
        Self {
            registry,
            config,
            verifier,
        }
    }

    fn resolve(&mut self, record: PersistentRecord) -> LoadResult<TorchValue> {
        match record {
            PersistentRecord::Storage(record) => self.resolve_storage(record),
            PersistentRecord::Module(record) => {
                if let Some((source_file, source)) = &record.provenance {
                    self.verifier.verify(&record.container, source_file, source)?;
                }
                Ok(record.container)
            }
        }
    }

    fn resolve_storage(&mut self, record: StorageRecord) -> LoadResult<TorchValue> {
        match record.byte_len() {
            Some(n) if n <= self.config.max_storage_bytes => {}
            _ => {
                return Err(LoadError::MalformedStorageRecord(format!(
                    "storage '{}' declares {} elements, over the {} byte limit",
                    record.root_key, record.element_count, self.config.max_storage_bytes
                )))
            }
        }
        let root = self.registry.get_or_allocate(
            record.class,
            &record.root_key,
            record.element_count,
            &record.location,
        )?;
        match record.view {
            None => Ok(Value::Ext(Torch::Storage(root))),
            Some(view) => {
                let view = self
                    .registry
                    .get_or_create_view(&root, &view.key, view.offset, view.len)?;
                Ok(Value::Ext(Torch::View(view)))
            }
        }
    }
}

impl Hooks for Resolver<'_> {
    type Ext = Torch;
    type Error = LoadError;

    fn resolve_class(&mut self, module: &str, name: &str) -> LoadResult<TorchValue> {
        classes::resolve(module, name)
            .map(|class| Value::Ext(Torch::Class(class)))
            .ok_or_else(|| LoadError::UnknownClass {
                module: module.to_owned(),
                name: name.to_owned(),
            })
    }

    fn persistent_load(&mut self, pid: TorchValue) -> LoadResult<TorchValue> {
        let record = PersistentRecord::parse(pid)?;
        self.resolve(record)
    }

    fn reduce(&mut self, callable: TorchValue, args: Vec<TorchValue>) -> LoadResult<TorchValue> {
        let class = match callable {
            Value::Ext(Torch::Class(class)) => class,
            other => return Err(ckpt_pickle::PickleError::NotCallable(other.type_name()).into()),
        };
        match class {
            Class::RebuildTensor => Ok(Value::Ext(Torch::Tensor(tensor::rebuild_tensor(args)?))),
            Class::RebuildTensorV2 => Ok(Value::Ext(Torch::Tensor(tensor::rebuild_tensor_v2(args)?))),
            Class::RebuildParameter => Ok(Value::Ext(Torch::Parameter(tensor::rebuild_parameter(args)?))),
            Class::OrderedDict => ordered_dict(args),
            Class::Storage(class) => Err(ckpt_pickle::PickleError::Unsupported(format!(
                "constructing torch.{} directly",
                class.kind().class_name()
            ))
            .into()),
        }
    }

    fn build(&mut self, target: TorchValue, state: TorchValue) -> LoadResult<TorchValue> {
        match target {
            // state_dict() pickles its `_metadata` attribute as BUILD state.
            Value::Dict(_) => {
                debug!(state = state.type_name(), "dropped dict attribute state");
                Ok(target)
            }
            other => Err(ckpt_pickle::PickleError::Unsupported(format!("BUILD on {}", other.type_name())).into()),
        }
    }
}

/// `OrderedDict()` or `OrderedDict(iterable_of_pairs)`.
fn ordered_dict(args: Vec<TorchValue>) -> LoadResult<TorchValue> {
    let mut args = args.into_iter();
    let Some(items) = args.next() else {
        return Ok(Value::Dict(Vec::new()));
    };
    let malformed = || ckpt_pickle::PickleError::Unsupported("OrderedDict argument is not a sequence of pairs".into());
    let pairs = match items {
        Value::Dict(pairs) => pairs,
        Value::List(items) | Value::Tuple(items) => items
            .into_iter()
            .map(|pair| match pair {
                Value::Tuple(kv) | Value::List(kv) if kv.len() == 2 => {
                    let mut kv = kv.into_iter();
                    match (kv.next(), kv.next()) {
                        (Some(k), Some(v)) => Ok((k, v)),
                        _ => Err(malformed()),
                    }
                }
                _ => Err(malformed()),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(malformed().into()),
    };
    Ok(Value::Dict(pairs))
}
