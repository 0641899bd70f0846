use std::collections::HashMap;
use std::io::Read;

use tracing::trace;

use crate::error::{PickleError, PickleResult};
use crate::hooks::Hooks;
use crate::opcodes as op;
use crate::value::Value;

/// Default cap on the number of values cloned into or out of the memo
/// during one [`Unpickler::load`].
pub const DEFAULT_MEMO_COPY_LIMIT: usize = 1 << 22;

/// A stack entry, remembering which memo slot (if any) aliases it so that
/// in-place mutations stay visible to later GETs.
struct Slot<E> {
    value: Value<E>,
    memo: Option<u32>,
}

impl<E> Slot<E> {
    fn new(value: Value<E>) -> Self {
        Self { value, memo: None }
    }
}

/// Stack machine that decodes one value per [`load`](Self::load) call.
///
/// The reader is consumed one opcode at a time and never past STOP, so
/// several values written back to back can be decoded from the same reader.
pub struct Unpickler<'h, R, H: Hooks> {
    reader: R,
    hooks: &'h mut H,
    stack: Vec<Slot<H::Ext>>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value<H::Ext>>,
    offset: u64,
    copy_limit: usize,
    copies_left: usize,
}

impl<'h, R: Read, H: Hooks> Unpickler<'h, R, H> {
    pub fn new(reader: R, hooks: &'h mut H) -> Self {
        Self {
            reader,
            hooks,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            offset: 0,
            copy_limit: DEFAULT_MEMO_COPY_LIMIT,
            copies_left: DEFAULT_MEMO_COPY_LIMIT,
        }
    }

    /// Cap the values copied by memo stores, memo fetches and DUP.
    ///
    /// Every memo fetch is a deep copy, so a short stream that fetches a
    /// container holding two references to the previous one doubles the
    /// graph per opcode. Exceeding the cap fails with
    /// [`PickleError::MemoCopyLimit`].
    pub fn with_memo_copy_limit(mut self, limit: usize) -> Self {
        self.copy_limit = limit;
        self.copies_left = limit;
        self
    }

    /// Bytes consumed from the reader so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode the next value. Stack, marks and memo start empty on each call.
    pub fn load(&mut self) -> Result<Value<H::Ext>, H::Error> {
        self.stack.clear();
        self.marks.clear();
        self.memo.clear();
        self.copies_left = self.copy_limit;

        loop {
            let at = self.offset;
            let code = self.read_byte()?;
            trace!(opcode = code, offset = at, "opcode");
            match code {
                op::STOP => return Ok(self.pop("STOP")?),

                op::PROTO => {
                    let version = self.read_byte()?;
                    if version > op::HIGHEST_PROTOCOL {
                        return Err(PickleError::Unsupported(format!("protocol {version}")).into());
                    }
                }
                op::FRAME => {
                    self.read_fixed::<8>()?;
                }

                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    if self.marks.last() == Some(&self.stack.len()) {
                        self.marks.pop();
                    } else {
                        self.pop("POP")?;
                    }
                }
                op::POP_MARK => {
                    self.pop_mark("POP_MARK")?;
                }
                op::DUP => {
                    let top = self.stack.last().ok_or(PickleError::StackUnderflow("DUP"))?;
                    charge_copy(&mut self.copies_left, self.copy_limit, &top.value)?;
                    let slot = Slot {
                        value: top.value.clone(),
                        memo: top.memo,
                    };
                    self.stack.push(slot);
                }

                op::NONE => self.push(Value::None),
                op::NEWTRUE => self.push(Value::Bool(true)),
                op::NEWFALSE => self.push(Value::Bool(false)),

                op::INT => {
                    let line = self.read_line()?;
                    let value = match line.as_slice() {
                        b"00" => Value::Bool(false),
                        b"01" => Value::Bool(true),
                        _ => int_value(self.parse_int(&line, at)?),
                    };
                    self.push(value);
                }
                op::BININT => {
                    let v = i32::from_le_bytes(self.read_fixed::<4>()?);
                    self.push(Value::Int(i64::from(v)));
                }
                op::BININT1 => {
                    let v = self.read_byte()?;
                    self.push(Value::Int(i64::from(v)));
                }
                op::BININT2 => {
                    let v = u16::from_le_bytes(self.read_fixed::<2>()?);
                    self.push(Value::Int(i64::from(v)));
                }
                op::LONG => {
                    let mut line = self.read_line()?;
                    if line.last() == Some(&b'L') {
                        line.pop();
                    }
                    let v = self.parse_int(&line, at)?;
                    self.push(int_value(v));
                }
                op::LONG1 => {
                    let n = self.read_byte()?;
                    let bytes = self.read_bytes(u64::from(n))?;
                    self.push(int_value(decode_long(&bytes)?));
                }
                op::LONG4 => {
                    let n = i32::from_le_bytes(self.read_fixed::<4>()?);
                    let n = u64::try_from(n).map_err(|_| PickleError::InvalidLiteral {
                        offset: at,
                        reason: "negative LONG4 length".into(),
                    })?;
                    let bytes = self.read_bytes(n)?;
                    self.push(int_value(decode_long(&bytes)?));
                }

                op::FLOAT => {
                    let line = self.read_line()?;
                    let v = std::str::from_utf8(&line)
                        .ok()
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .ok_or_else(|| PickleError::InvalidLiteral {
                            offset: at,
                            reason: "malformed FLOAT".into(),
                        })?;
                    self.push(Value::Float(v));
                }
                op::BINFLOAT => {
                    let v = f64::from_be_bytes(self.read_fixed::<8>()?);
                    self.push(Value::Float(v));
                }

                op::STRING => {
                    let line = self.read_line()?;
                    let bytes = unquote(&line).ok_or_else(|| PickleError::InvalidLiteral {
                        offset: at,
                        reason: "malformed STRING".into(),
                    })?;
                    self.push(text_or_bytes(bytes));
                }
                op::BINSTRING => {
                    let n = i32::from_le_bytes(self.read_fixed::<4>()?);
                    let n = u64::try_from(n).map_err(|_| PickleError::InvalidLiteral {
                        offset: at,
                        reason: "negative BINSTRING length".into(),
                    })?;
                    let bytes = self.read_bytes(n)?;
                    self.push(text_or_bytes(bytes));
                }
                op::SHORT_BINSTRING => {
                    let n = self.read_byte()?;
                    let bytes = self.read_bytes(u64::from(n))?;
                    self.push(text_or_bytes(bytes));
                }

                op::BINBYTES => {
                    let n = u32::from_le_bytes(self.read_fixed::<4>()?);
                    let bytes = self.read_bytes(u64::from(n))?;
                    self.push(Value::Bytes(bytes));
                }
                op::SHORT_BINBYTES => {
                    let n = self.read_byte()?;
                    let bytes = self.read_bytes(u64::from(n))?;
                    self.push(Value::Bytes(bytes));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let n = u64::from_le_bytes(self.read_fixed::<8>()?);
                    let bytes = self.read_bytes(n)?;
                    self.push(Value::Bytes(bytes));
                }

                op::UNICODE => {
                    let line = self.read_line()?;
                    let s = raw_unicode_unescape(&line).ok_or_else(|| PickleError::InvalidLiteral {
                        offset: at,
                        reason: "malformed UNICODE escape".into(),
                    })?;
                    self.push(Value::Str(s));
                }
                op::BINUNICODE => {
                    let n = u32::from_le_bytes(self.read_fixed::<4>()?);
                    let s = self.read_utf8(u64::from(n), at)?;
                    self.push(Value::Str(s));
                }
                op::SHORT_BINUNICODE => {
                    let n = self.read_byte()?;
                    let s = self.read_utf8(u64::from(n), at)?;
                    self.push(Value::Str(s));
                }
                op::BINUNICODE8 => {
                    let n = u64::from_le_bytes(self.read_fixed::<8>()?);
                    let s = self.read_utf8(n, at)?;
                    self.push(Value::Str(s));
                }

                op::EMPTY_TUPLE => self.push(Value::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark("TUPLE")?;
                    self.push(Value::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(code - op::TUPLE1 + 1);
                    let floor = self.marks.last().copied().unwrap_or(0);
                    if self.stack.len() < floor + n {
                        return Err(PickleError::StackUnderflow("TUPLE1/2/3").into());
                    }
                    let items = self
                        .stack
                        .split_off(self.stack.len() - n)
                        .into_iter()
                        .map(|s| s.value)
                        .collect();
                    self.push(Value::Tuple(items));
                }

                op::EMPTY_LIST => self.push(Value::List(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark("LIST")?;
                    self.push(Value::List(items));
                }
                op::APPEND => {
                    let item = self.pop("APPEND")?;
                    self.extend_list("APPEND", vec![item])?;
                }
                op::APPENDS => {
                    let items = self.pop_mark("APPENDS")?;
                    self.extend_list("APPENDS", items)?;
                }

                op::EMPTY_DICT => self.push(Value::Dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark("DICT")?;
                    let pairs = pairs("DICT", items)?;
                    self.push(Value::Dict(pairs));
                }
                op::SETITEM => {
                    let value = self.pop("SETITEM")?;
                    let key = self.pop("SETITEM")?;
                    self.extend_dict("SETITEM", vec![(key, value)])?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark("SETITEMS")?;
                    let pairs = pairs("SETITEMS", items)?;
                    self.extend_dict("SETITEMS", pairs)?;
                }

                op::EMPTY_SET => self.push(Value::Set(Vec::new())),
                op::ADDITEMS => {
                    let items = self.pop_mark("ADDITEMS")?;
                    let top = self.top_mut("ADDITEMS")?;
                    match &mut top.value {
                        Value::Set(set) => set.extend(items),
                        other => return Err(unexpected("ADDITEMS", "set", other).into()),
                    }
                    self.sync_top_memo()?;
                }
                op::FROZENSET => {
                    let items = self.pop_mark("FROZENSET")?;
                    self.push(Value::FrozenSet(items));
                }

                op::GLOBAL => {
                    let module = self.read_text_line(at)?;
                    let name = self.read_text_line(at)?;
                    let class = self.hooks.resolve_class(&module, &name)?;
                    self.push(class);
                }
                op::STACK_GLOBAL => {
                    let name = self.pop("STACK_GLOBAL")?;
                    let module = self.pop("STACK_GLOBAL")?;
                    let (module, name) = match (module, name) {
                        (Value::Str(m), Value::Str(n)) => (m, n),
                        (m, _) => return Err(unexpected("STACK_GLOBAL", "str", &m).into()),
                    };
                    let class = self.hooks.resolve_class(&module, &name)?;
                    self.push(class);
                }

                op::REDUCE | op::NEWOBJ => {
                    let name = if code == op::REDUCE { "REDUCE" } else { "NEWOBJ" };
                    let args = self.pop(name)?;
                    let callable = self.pop(name)?;
                    let args = match args {
                        Value::Tuple(items) => items,
                        other => return Err(unexpected(name, "tuple", &other).into()),
                    };
                    let result = self.hooks.reduce(callable, args)?;
                    self.push(result);
                }
                op::NEWOBJ_EX => {
                    let kwargs = self.pop("NEWOBJ_EX")?;
                    let args = self.pop("NEWOBJ_EX")?;
                    let cls = self.pop("NEWOBJ_EX")?;
                    if kwargs.len() != Some(0) {
                        return Err(PickleError::Unsupported("NEWOBJ_EX keyword arguments".into()).into());
                    }
                    let args = match args {
                        Value::Tuple(items) => items,
                        other => return Err(unexpected("NEWOBJ_EX", "tuple", &other).into()),
                    };
                    let result = self.hooks.reduce(cls, args)?;
                    self.push(result);
                }
                op::BUILD => {
                    let state = self.pop("BUILD")?;
                    let top = self.top_mut("BUILD")?;
                    let target = std::mem::replace(&mut top.value, Value::None);
                    let built = self.hooks.build(target, state)?;
                    self.top_mut("BUILD")?.value = built;
                    self.sync_top_memo()?;
                }

                op::PUT => {
                    let line = self.read_line()?;
                    let id = self.parse_memo_id(&line, at)?;
                    self.memoize(id)?;
                }
                op::BINPUT => {
                    let id = self.read_byte()?;
                    self.memoize(u32::from(id))?;
                }
                op::LONG_BINPUT => {
                    let id = u32::from_le_bytes(self.read_fixed::<4>()?);
                    self.memoize(id)?;
                }
                op::MEMOIZE => {
                    let id = u32::try_from(self.memo.len()).map_err(|_| PickleError::InvalidLiteral {
                        offset: at,
                        reason: "memo overflow".into(),
                    })?;
                    self.memoize(id)?;
                }
                op::GET => {
                    let line = self.read_line()?;
                    let id = self.parse_memo_id(&line, at)?;
                    self.recall(id)?;
                }
                op::BINGET => {
                    let id = self.read_byte()?;
                    self.recall(u32::from(id))?;
                }
                op::LONG_BINGET => {
                    let id = u32::from_le_bytes(self.read_fixed::<4>()?);
                    self.recall(id)?;
                }

                op::PERSID => {
                    let pid = self.read_text_line(at)?;
                    let resolved = self.hooks.persistent_load(Value::Str(pid))?;
                    self.push(resolved);
                }
                op::BINPERSID => {
                    let pid = self.pop("BINPERSID")?;
                    let resolved = self.hooks.persistent_load(pid)?;
                    self.push(resolved);
                }

                op::EXT1 | op::EXT2 | op::EXT4 => {
                    return Err(PickleError::Unsupported("extension registry opcodes".into()).into());
                }
                op::INST | op::OBJ => {
                    return Err(PickleError::Unsupported("INST/OBJ instance opcodes".into()).into());
                }
                op::NEXT_BUFFER | op::READONLY_BUFFER => {
                    return Err(PickleError::Unsupported("out-of-band buffers".into()).into());
                }

                opcode => return Err(PickleError::UnknownOpcode { opcode, offset: at }.into()),
            }
        }
    }

    fn push(&mut self, value: Value<H::Ext>) {
        self.stack.push(Slot::new(value));
    }

    fn pop(&mut self, op: &'static str) -> PickleResult<Value<H::Ext>> {
        if self.marks.last().is_some_and(|&m| m >= self.stack.len()) {
            return Err(PickleError::StackUnderflow(op));
        }
        self.stack
            .pop()
            .map(|s| s.value)
            .ok_or(PickleError::StackUnderflow(op))
    }

    fn pop_mark(&mut self, op: &'static str) -> PickleResult<Vec<Value<H::Ext>>> {
        let mark = self.marks.pop().ok_or(PickleError::MarkNotFound(op))?;
        if mark > self.stack.len() {
            return Err(PickleError::StackUnderflow(op));
        }
        Ok(self.stack.split_off(mark).into_iter().map(|s| s.value).collect())
    }

    fn top_mut(&mut self, op: &'static str) -> PickleResult<&mut Slot<H::Ext>> {
        self.stack.last_mut().ok_or(PickleError::StackUnderflow(op))
    }

    fn sync_top_memo(&mut self) -> PickleResult<()> {
        if let Some(slot) = self.stack.last() {
            if let Some(id) = slot.memo {
                charge_copy(&mut self.copies_left, self.copy_limit, &slot.value)?;
                self.memo.insert(id, slot.value.clone());
            }
        }
        Ok(())
    }

    fn extend_list(&mut self, op: &'static str, items: Vec<Value<H::Ext>>) -> PickleResult<()> {
        let top = self.top_mut(op)?;
        match &mut top.value {
            Value::List(list) => list.extend(items),
            other => return Err(unexpected(op, "list", other)),
        }
        self.sync_top_memo()
    }

    fn extend_dict(
        &mut self,
        op: &'static str,
        items: Vec<(Value<H::Ext>, Value<H::Ext>)>,
    ) -> PickleResult<()> {
        let top = self.top_mut(op)?;
        match &mut top.value {
            Value::Dict(dict) => dict.extend(items),
            other => return Err(unexpected(op, "dict", other)),
        }
        self.sync_top_memo()
    }

    fn memoize(&mut self, id: u32) -> PickleResult<()> {
        let top = self.stack.last_mut().ok_or(PickleError::StackUnderflow("PUT"))?;
        charge_copy(&mut self.copies_left, self.copy_limit, &top.value)?;
        top.memo = Some(id);
        self.memo.insert(id, top.value.clone());
        Ok(())
    }

    fn recall(&mut self, id: u32) -> PickleResult<()> {
        let stored = self.memo.get(&id).ok_or(PickleError::MemoMissing(id))?;
        charge_copy(&mut self.copies_left, self.copy_limit, stored)?;
        let value = stored.clone();
        self.stack.push(Slot {
            value,
            memo: Some(id),
        });
        Ok(())
    }

    fn read_byte(&mut self) -> PickleResult<u8> {
        let [b] = self.read_fixed::<1>()?;
        Ok(b)
    }

    fn read_fixed<const N: usize>(&mut self) -> PickleResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf)?;
        self.offset += N as u64;
        Ok(buf)
    }

    /// Read `n` bytes without trusting `n` for the up-front allocation.
    fn read_bytes(&mut self, n: u64) -> PickleResult<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.reader).take(n).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;
        if (buf.len() as u64) < n {
            return Err(PickleError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(buf)
    }

    fn read_utf8(&mut self, n: u64, at: u64) -> PickleResult<String> {
        let bytes = self.read_bytes(n)?;
        String::from_utf8(bytes).map_err(|e| PickleError::InvalidLiteral {
            offset: at,
            reason: e.to_string(),
        })
    }

    /// Read up to and excluding the next newline.
    fn read_line(&mut self) -> PickleResult<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let b = self.read_byte()?;
            if b == b'\n' {
                break;
            }
            line.push(b);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_text_line(&mut self, at: u64) -> PickleResult<String> {
        let line = self.read_line()?;
        String::from_utf8(line).map_err(|e| PickleError::InvalidLiteral {
            offset: at,
            reason: e.to_string(),
        })
    }

    fn parse_int(&self, line: &[u8], at: u64) -> PickleResult<i128> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.trim().parse::<i128>().ok())
            .ok_or_else(|| PickleError::InvalidLiteral {
                offset: at,
                reason: format!("malformed integer {:?}", String::from_utf8_lossy(line)),
            })
    }

    fn parse_memo_id(&self, line: &[u8], at: u64) -> PickleResult<u32> {
        let id = self.parse_int(line, at)?;
        u32::try_from(id).map_err(|_| PickleError::InvalidLiteral {
            offset: at,
            reason: format!("memo id {id} out of range"),
        })
    }
}

fn unexpected<E>(op: &'static str, expected: &'static str, found: &Value<E>) -> PickleError {
    PickleError::UnexpectedType {
        op,
        expected,
        found: found.type_name(),
    }
}

/// Deduct the size of `value` from the copy budget before it is cloned.
fn charge_copy<E>(left: &mut usize, limit: usize, value: &Value<E>) -> PickleResult<()> {
    let nodes = value
        .node_count_within(*left)
        .ok_or(PickleError::MemoCopyLimit { limit })?;
    *left -= nodes;
    Ok(())
}

fn pairs<E>(op: &'static str, items: Vec<Value<E>>) -> PickleResult<Vec<(Value<E>, Value<E>)>> {
    if items.len() % 2 != 0 {
        return Err(PickleError::StackUnderflow(op));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        out.push((k, v));
    }
    Ok(out)
}

fn int_value<E>(v: i128) -> Value<E> {
    match i64::try_from(v) {
        Ok(i) => Value::Int(i),
        Err(_) => Value::Long(v),
    }
}

/// Decode a little-endian two's complement integer.
pub(crate) fn decode_long(bytes: &[u8]) -> PickleResult<i128> {
    if bytes.len() > 16 {
        return Err(PickleError::LongTooLarge(bytes.len()));
    }
    let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
    let mut buf = if negative { [0xffu8; 16] } else { [0u8; 16] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i128::from_le_bytes(buf))
}

/// Legacy byte strings become `Str` when they are valid UTF-8.
fn text_or_bytes<E>(bytes: Vec<u8>) -> Value<E> {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Str(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

/// Parse a quoted `repr` literal as written by the text STRING opcode.
fn unquote(line: &[u8]) -> Option<Vec<u8>> {
    let (&first, rest) = line.split_first()?;
    let (&last, body) = rest.split_last()?;
    if first != last || (first != b'\'' && first != b'"') {
        return None;
    }
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        let esc = *body.get(i + 1)?;
        i += 2;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'x' => {
                let hex = std::str::from_utf8(body.get(i..i + 2)?).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

/// Decode `raw-unicode-escape`: latin-1 bytes with `\uXXXX` and `\UXXXXXXXX`.
fn raw_unicode_unescape(line: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        let width = match (b, line.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => {
                out.push(char::from(b));
                i += 1;
                continue;
            }
        };
        let hex = std::str::from_utf8(line.get(i + 2..i + 2 + width)?).ok()?;
        out.push(char::from_u32(u32::from_str_radix(hex, 16).ok()?)?);
        i += 2 + width;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use proptest::prelude::*;

    use super::*;
    use crate::hooks::PlainHooks;

    type V = Value<Infallible>;

    fn unpickle(mut bytes: &[u8]) -> PickleResult<V> {
        let mut hooks = PlainHooks;
        Unpickler::new(&mut bytes, &mut hooks).load()
    }

    macro_rules! assert_unpickle {
        ( $expected:expr, $bytes:expr ) => {{
            assert_eq!($expected, unpickle($bytes).unwrap());
        }};
    }

    #[test]
    fn basics() {
        assert_unpickle!(V::None, b"N.");
        assert_unpickle!(V::Bool(true), b"\x80\x02\x88.");
        assert_unpickle!(V::Bool(false), b"\x80\x02\x89.");
        assert_unpickle!(V::Bool(true), b"I01\n.");
    }

    #[test]
    fn ints() {
        assert_unpickle!(V::Int(5), b"K\x05.");
        assert_unpickle!(V::Int(1001), b"M\xe9\x03.");
        assert_unpickle!(V::Int(-2), b"J\xfe\xff\xff\xff.");
        assert_unpickle!(V::Int(42), b"I42\n.");
        assert_unpickle!(V::Int(7), b"L7L\n.");
    }

    #[test]
    fn long1_beyond_i64() {
        // 0x1950a86a20f9469cfc6c, little-endian
        let v = unpickle(b"\x8a\x0a\x6c\xfc\x9c\x46\xf9\x20\x6a\xa8\x50\x19.").unwrap();
        assert_eq!(v, V::Long(0x1950a86a20f9469cfc6c));
    }

    #[test]
    fn long1_negative_and_empty() {
        assert_unpickle!(V::Int(-1), b"\x8a\x01\xff.");
        assert_unpickle!(V::Int(0), b"\x8a\x00.");
    }

    #[test]
    fn long_too_large() {
        let mut bytes = vec![0x8a, 17];
        bytes.extend_from_slice(&[1u8; 17]);
        bytes.push(b'.');
        assert!(matches!(unpickle(&bytes), Err(PickleError::LongTooLarge(17))));
    }

    #[test]
    fn floats() {
        assert_unpickle!(V::Float(1.5), b"G\x3f\xf8\x00\x00\x00\x00\x00\x00.");
        assert_unpickle!(V::Float(0.25), b"F0.25\n.");
    }

    #[test]
    fn strings() {
        assert_unpickle!(V::Str("foo".into()), b"\x8c\x03foo.");
        assert_unpickle!(V::Str("fo\u{e9}".into()), b"X\x04\x00\x00\x00fo\xc3\xa9.");
        assert_unpickle!(V::Str("ab".into()), b"U\x02ab.");
        assert_unpickle!(V::Bytes(vec![0xff]), b"U\x01\xff.");
        assert_unpickle!(V::Str("a'b\n".into()), b"S'a\\'b\\n'\n.");
        assert_unpickle!(V::Str("\u{e9}x".into()), b"V\\u00e9x\n.");
        assert_unpickle!(V::Bytes(b"hi".to_vec()), b"C\x02hi.");
    }

    #[test]
    fn invalid_utf8_is_rejected_for_unicode() {
        let err = unpickle(b"\x8c\x01\xff.").unwrap_err();
        assert!(matches!(err, PickleError::InvalidLiteral { .. }));
    }

    #[test]
    fn tuples_and_lists() {
        assert_unpickle!(V::Tuple(vec![]), b").");
        assert_unpickle!(V::Tuple(vec![V::Int(1), V::Int(2)]), b"K\x01K\x02\x86.");
        assert_unpickle!(
            V::Tuple(vec![V::Int(1), V::Int(2), V::Int(3), V::Int(4)]),
            b"(K\x01K\x02K\x03K\x04t."
        );
        assert_unpickle!(V::List(vec![V::Int(1), V::None]), b"](K\x01Ne.");
        assert_unpickle!(V::List(vec![V::Int(9)]), b"]K\x09a.");
    }

    #[test]
    fn dicts() {
        assert_unpickle!(
            V::Dict(vec![(V::Str("a".into()), V::Int(1)), (V::Str("b".into()), V::Int(2))]),
            b"}(\x8c\x01aK\x01\x8c\x01bK\x02u."
        );
        assert_unpickle!(V::Dict(vec![(V::Int(1), V::Int(2))]), b"(K\x01K\x02d.");
        assert_unpickle!(V::Dict(vec![(V::Int(1), V::None)]), b"}K\x01Ns.");
    }

    #[test]
    fn sets() {
        assert_unpickle!(V::Set(vec![V::Int(1)]), b"\x8f(K\x01\x90.");
        assert_unpickle!(V::FrozenSet(vec![V::Int(2)]), b"(K\x02\x91.");
    }

    #[test]
    fn memo_reflects_later_mutation() {
        // d = {}; memo[0] = d; d['k'] = 1; (d, d)
        let v = unpickle(b"}q\x00\x8c\x01kK\x01sh\x00\x86.").unwrap();
        let d = V::Dict(vec![(V::Str("k".into()), V::Int(1))]);
        assert_eq!(v, V::Tuple(vec![d.clone(), d]));
    }

    #[test]
    fn memoize_and_long_get() {
        let v = unpickle(b"\x8c\x01x\x94j\x00\x00\x00\x00\x86.").unwrap();
        assert_eq!(v, V::Tuple(vec![V::Str("x".into()), V::Str("x".into())]));
    }

    #[test]
    fn missing_memo_entry() {
        assert!(matches!(unpickle(b"h\x03."), Err(PickleError::MemoMissing(3))));
    }

    /// An empty list followed by `levels` lists, each holding two memo
    /// references to the one before it.
    fn doubling_lists(levels: u8) -> Vec<u8> {
        let mut bytes = b"\x80\x02]q\x00".to_vec();
        for i in 0..levels {
            bytes.extend([b'(', b'h', i, b'h', i, b'l', b'q', i + 1]);
        }
        bytes.push(b'.');
        bytes
    }

    fn unpickle_limited(mut bytes: &[u8], limit: usize) -> PickleResult<V> {
        let mut hooks = PlainHooks;
        Unpickler::new(&mut bytes, &mut hooks).with_memo_copy_limit(limit).load()
    }

    #[test]
    fn nested_memo_fetches_hit_copy_limit() {
        let err = unpickle(&doubling_lists(64)).unwrap_err();
        assert!(matches!(
            err,
            PickleError::MemoCopyLimit { limit: DEFAULT_MEMO_COPY_LIMIT }
        ));
    }

    #[test]
    fn copy_limit_boundary() {
        // 1 + (1 + 1 + 3) + (3 + 3 + 7) values copied for two levels.
        let v = unpickle_limited(&doubling_lists(2), 19).unwrap();
        assert_eq!(v.node_count_within(usize::MAX), Some(7));
        assert!(matches!(
            unpickle_limited(&doubling_lists(2), 18),
            Err(PickleError::MemoCopyLimit { limit: 18 })
        ));
    }

    #[test]
    fn copy_budget_resets_per_load() {
        let mut bytes = doubling_lists(2);
        bytes.extend(doubling_lists(2));
        let mut reader = &bytes[..];
        let mut hooks = PlainHooks;
        let mut unpickler = Unpickler::new(&mut reader, &mut hooks).with_memo_copy_limit(19);
        assert!(unpickler.load().is_ok());
        assert!(unpickler.load().is_ok());
    }

    #[test]
    fn dup_counts_against_copy_limit() {
        // [1, 2] duplicated: three values copied.
        assert!(unpickle_limited(b"(K\x01K\x02l2\x86.", 3).is_ok());
        assert!(matches!(
            unpickle_limited(b"(K\x01K\x02l2\x86.", 2),
            Err(PickleError::MemoCopyLimit { .. })
        ));
    }

    #[test]
    fn pop_and_pop_mark() {
        assert_unpickle!(V::Int(1), b"K\x01K\x020.");
        assert_unpickle!(V::Int(1), b"K\x01(K\x02K\x031.");
        assert_unpickle!(V::Int(1), b"K\x01(0.");
    }

    #[test]
    fn dup() {
        assert_unpickle!(V::Tuple(vec![V::Int(4), V::Int(4)]), b"K\x042\x86.");
    }

    #[test]
    fn frame_is_skipped() {
        assert_unpickle!(V::None, b"\x80\x04\x95\x01\x00\x00\x00\x00\x00\x00\x00N.");
    }

    #[test]
    fn unsupported_protocol() {
        assert!(matches!(unpickle(b"\x80\x06N."), Err(PickleError::Unsupported(_))));
    }

    #[test]
    fn unknown_opcode_reports_offset() {
        let err = unpickle(b"\x80\x02\xff").unwrap_err();
        assert!(matches!(err, PickleError::UnknownOpcode { opcode: 0xff, offset: 2 }));
    }

    #[test]
    fn plain_hooks_reject_globals_and_persistent_ids() {
        assert!(matches!(
            unpickle(b"ctorch\nFloatStorage\n."),
            Err(PickleError::UnresolvedGlobal { .. })
        ));
        assert!(matches!(unpickle(b"NQ."), Err(PickleError::MissingPersistentLoad)));
    }

    #[test]
    fn truncated_stream() {
        assert!(matches!(unpickle(b"\x80\x02K"), Err(PickleError::Io(_))));
        assert!(matches!(unpickle(b"X\x10\x00\x00\x00ab"), Err(PickleError::Io(_))));
    }

    #[test]
    fn pop_across_mark_underflows() {
        assert!(matches!(unpickle(b"(\x85."), Err(PickleError::StackUnderflow(_))));
        assert!(matches!(unpickle(b"K\x01(a."), Err(PickleError::StackUnderflow(_))));
    }

    #[test]
    fn consecutive_values_from_one_reader() {
        let mut bytes: &[u8] = b"K\x01.K\x02.rest";
        let mut hooks = PlainHooks;
        let mut u = Unpickler::new(&mut bytes, &mut hooks);
        assert_eq!(u.load().unwrap(), V::Int(1));
        assert_eq!(u.load().unwrap(), V::Int(2));
        assert_eq!(u.offset(), 6);
        drop(u);
        assert_eq!(bytes, b"rest");
    }

    proptest! {
        #[test]
        fn long1_matches_twos_complement(v in any::<i64>()) {
            let bytes = v.to_le_bytes();
            prop_assert_eq!(decode_long(&bytes).unwrap(), i128::from(v));
        }
    }
}
