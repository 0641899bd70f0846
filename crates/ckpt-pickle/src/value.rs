/// A decoded value.
///
/// `E` is the extension type supplied by the [`Hooks`](crate::Hooks)
/// implementation. Class references, persistent references and the results of
/// reducing a resolved class all surface as `Ext(E)`; everything else is a
/// plain data value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value<E> {
    None,
    Bool(bool),
    Int(i64),
    /// Integer that does not fit in an `i64`.
    Long(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value<E>>),
    List(Vec<Value<E>>),
    /// Key/value pairs in stream order.
    Dict(Vec<(Value<E>, Value<E>)>),
    Set(Vec<Value<E>>),
    FrozenSet(Vec<Value<E>>),
    Ext(E),
}

impl<E> Value<E> {
    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Long(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::FrozenSet(_) => "frozenset",
            Self::Ext(_) => "extension",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value if it fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Long(l) => i64::try_from(*l).ok(),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int(i) => Some(i128::from(*i)),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Non-negative integer that fits in a `usize`.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_i128().and_then(|i| usize::try_from(i).ok())
    }

    /// Elements of a tuple or list.
    pub fn as_sequence(&self) -> Option<&[Value<E>]> {
        match self {
            Self::Tuple(items) | Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_ext(&self) -> Option<&E> {
        match self {
            Self::Ext(e) => Some(e),
            _ => None,
        }
    }

    /// Look up a string key in a dict.
    pub fn get(&self, key: &str) -> Option<&Value<E>> {
        match self {
            Self::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Total number of values in this tree, itself included, or `None` once
    /// the count passes `max`.
    pub fn node_count_within(&self, max: usize) -> Option<usize> {
        let mut count = 0usize;
        let mut pending = vec![self];
        while let Some(value) = pending.pop() {
            count += 1;
            if count > max {
                return None;
            }
            match value {
                Self::Tuple(items) | Self::List(items) | Self::Set(items) | Self::FrozenSet(items) => {
                    pending.extend(items)
                }
                Self::Dict(pairs) => pending.extend(pairs.iter().flat_map(|(k, v)| [k, v])),
                _ => {}
            }
        }
        Some(count)
    }

    /// Number of direct children of a container, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Tuple(v) | Self::List(v) | Self::Set(v) | Self::FrozenSet(v) => Some(v.len()),
            Self::Dict(pairs) => Some(pairs.len()),
            _ => None,
        }
    }
}
