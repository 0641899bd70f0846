//! Object graph decoder for the pickle serialization format.
//!
//! The decoder is a small stack machine that understands the opcodes of
//! protocols 0 through 5. Anything beyond plain data (global class
//! references, persistent references, calling a class, applying state) is
//! delegated to a [`Hooks`] implementation, so callers decide what those
//! constructs turn into.
//!
//! ```no_run
//! use ckpt_pickle::{from_reader, Value};
//!
//! let mut bytes: &[u8] = b"\x80\x02K\x2a.";
//! assert_eq!(from_reader(&mut bytes).unwrap(), Value::Int(42));
//! ```

pub mod decode;
pub mod error;
pub mod hooks;
pub mod opcodes;
pub mod value;

use std::convert::Infallible;
use std::io::Read;

pub use decode::Unpickler;
pub use error::{PickleError, PickleResult};
pub use hooks::{Hooks, PlainHooks};
pub use value::Value;

/// Decode one primitive-only value from `reader`.
pub fn from_reader<R: Read>(reader: R) -> PickleResult<Value<Infallible>> {
    let mut hooks = PlainHooks;
    Unpickler::new(reader, &mut hooks).load()
}

/// Decode one value from `reader`, delegating non-data constructs to `hooks`.
pub fn from_reader_with<R: Read, H: Hooks>(reader: R, hooks: &mut H) -> Result<Value<H::Ext>, H::Error> {
    Unpickler::new(reader, hooks).load()
}
