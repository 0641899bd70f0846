use std::convert::Infallible;
use std::fmt;

use crate::error::PickleError;
use crate::value::Value;

/// Callbacks the decoder uses for everything that is not plain data.
///
/// Implementations decide which globals exist, how persistent references map
/// to out-of-band resources, and what calling a resolved class produces. Every
/// method defaults to rejecting the input, so a stream that only contains
/// primitives decodes with no overrides at all.
pub trait Hooks {
    /// Extension payload carried by [`Value::Ext`].
    type Ext: Clone + fmt::Debug;
    /// Error type returned by [`Unpickler::load`](crate::Unpickler::load).
    type Error: From<PickleError>;

    /// Map a `(module, name)` global reference to a value.
    fn resolve_class(&mut self, module: &str, name: &str) -> Result<Value<Self::Ext>, Self::Error> {
        Err(PickleError::UnresolvedGlobal {
            module: module.to_owned(),
            name: name.to_owned(),
        }
        .into())
    }

    /// Resolve a persistent reference marker.
    fn persistent_load(&mut self, pid: Value<Self::Ext>) -> Result<Value<Self::Ext>, Self::Error> {
        let _ = pid;
        Err(PickleError::MissingPersistentLoad.into())
    }

    /// Call `callable` with positional `args` (REDUCE, NEWOBJ).
    fn reduce(
        &mut self,
        callable: Value<Self::Ext>,
        args: Vec<Value<Self::Ext>>,
    ) -> Result<Value<Self::Ext>, Self::Error> {
        let _ = args;
        Err(PickleError::NotCallable(callable.type_name()).into())
    }

    /// Apply `state` to `target` (BUILD).
    fn build(
        &mut self,
        target: Value<Self::Ext>,
        state: Value<Self::Ext>,
    ) -> Result<Value<Self::Ext>, Self::Error> {
        let _ = state;
        Err(PickleError::Unsupported(format!("BUILD on {}", target.type_name())).into())
    }
}

/// Hooks for streams that contain only primitive values.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainHooks;

impl Hooks for PlainHooks {
    type Ext = Infallible;
    type Error = PickleError;
}
