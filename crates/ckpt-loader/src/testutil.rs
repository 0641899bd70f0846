//! Minimal pickle writer for building checkpoint streams in tests.

use ckpt_pickle::opcodes::*;

use crate::header::{MAGIC_NUMBER, PROTOCOL_VERSION};

pub(crate) struct PickleWriter {
    buf: Vec<u8>,
}

impl PickleWriter {
    pub fn new() -> Self {
        Self { buf: vec![PROTO, 2] }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(STOP);
        self.buf
    }

    fn op(&mut self, opcode: u8) -> &mut Self {
        self.buf.push(opcode);
        self
    }

    pub fn none(&mut self) -> &mut Self {
        self.op(NONE)
    }

    pub fn bool(&mut self, b: bool) -> &mut Self {
        self.op(if b { NEWTRUE } else { NEWFALSE })
    }

    pub fn int(&mut self, v: i64) -> &mut Self {
        if (0..256).contains(&v) {
            self.buf.extend([BININT1, v as u8]);
        } else if let Ok(v) = i32::try_from(v) {
            self.buf.push(BININT);
            self.buf.extend(v.to_le_bytes());
        } else {
            self.long(i128::from(v));
        }
        self
    }

    pub fn long(&mut self, v: i128) -> &mut Self {
        let mut bytes = v.to_le_bytes().to_vec();
        while let [.., prev, last] = bytes.as_slice() {
            let (prev, last) = (*prev, *last);
            let redundant = (last == 0x00 && prev & 0x80 == 0) || (last == 0xff && prev & 0x80 != 0);
            if !redundant {
                break;
            }
            bytes.pop();
        }
        if v == 0 {
            bytes.clear();
        }
        self.buf.extend([LONG1, bytes.len() as u8]);
        self.buf.extend(bytes);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.buf.push(BINUNICODE);
        self.buf.extend((s.len() as u32).to_le_bytes());
        self.buf.extend(s.as_bytes());
        self
    }

    pub fn mark(&mut self) -> &mut Self {
        self.op(MARK)
    }

    /// Close the innermost mark into a tuple.
    pub fn tuple(&mut self) -> &mut Self {
        self.op(TUPLE)
    }

    /// Close the innermost mark into a list.
    pub fn list(&mut self) -> &mut Self {
        self.op(LIST)
    }

    /// Close the innermost mark into a dict.
    pub fn dict(&mut self) -> &mut Self {
        self.op(DICT)
    }

    pub fn ints(&mut self, values: &[i64]) -> &mut Self {
        self.mark();
        for &v in values {
            self.int(v);
        }
        self.tuple()
    }

    pub fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.buf.push(GLOBAL);
        self.buf.extend(module.as_bytes());
        self.buf.push(b'\n');
        self.buf.extend(name.as_bytes());
        self.buf.push(b'\n');
        self
    }

    pub fn put(&mut self, id: u8) -> &mut Self {
        self.buf.extend([BINPUT, id]);
        self
    }

    pub fn get(&mut self, id: u8) -> &mut Self {
        self.buf.extend([BINGET, id]);
        self
    }

    pub fn setitems(&mut self) -> &mut Self {
        self.op(SETITEMS)
    }

    pub fn reduce(&mut self) -> &mut Self {
        self.op(REDUCE)
    }

    pub fn build(&mut self) -> &mut Self {
        self.op(BUILD)
    }

    pub fn persid(&mut self) -> &mut Self {
        self.op(BINPERSID)
    }

    /// `("storage", torch.<class>, key, location, count, view)` followed by
    /// a persistent load.
    pub fn storage_ref(
        &mut self,
        class: &str,
        key: &str,
        count: i64,
        view: Option<(&str, i64, i64)>,
    ) -> &mut Self {
        self.mark().str("storage").global("torch", class).str(key).str("cpu").int(count);
        match view {
            Some((view_key, offset, len)) => {
                self.mark().str(view_key).int(offset).int(len).tuple();
            }
            None => {
                self.none();
            }
        }
        self.tuple().persid()
    }

    /// `_rebuild_tensor_v2(<storage>, offset, shape, stride, False, OrderedDict())`
    /// where the storage argument is written by `storage`.
    pub fn tensor_v2(
        &mut self,
        storage: impl FnOnce(&mut Self),
        offset: i64,
        shape: &[i64],
        stride: &[i64],
    ) -> &mut Self {
        self.global("torch._utils", "_rebuild_tensor_v2").mark();
        storage(self);
        self.int(offset).ints(shape).ints(stride).bool(false);
        self.global("collections", "OrderedDict").mark().tuple().reduce();
        self.tuple().reduce()
    }
}

pub(crate) fn pickle(write: impl FnOnce(&mut PickleWriter)) -> Vec<u8> {
    let mut w = PickleWriter::new();
    write(&mut w);
    w.finish()
}

pub(crate) fn header_with(magic: i128, version: i64) -> Vec<u8> {
    let mut out = pickle(|w| {
        w.long(magic);
    });
    out.extend(pickle(|w| {
        w.int(version);
    }));
    out.extend(pickle(|w| {
        w.mark()
            .str("protocol_version")
            .int(PROTOCOL_VERSION)
            .str("little_endian")
            .bool(true)
            .dict();
    }));
    out
}

/// A complete legacy stream: header, object graph, key list, payload.
pub(crate) fn checkpoint(graph: impl FnOnce(&mut PickleWriter), keys: &[&str], payload: &[u8]) -> Vec<u8> {
    let mut out = header_with(MAGIC_NUMBER, PROTOCOL_VERSION);
    out.extend(pickle(graph));
    out.extend(pickle(|w| {
        w.mark();
        for key in keys {
            w.str(key);
        }
        w.list();
    }));
    out.extend_from_slice(payload);
    out
}

/// Little-endian bytes of `values`.
pub(crate) fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// An empty zip archive: just the end-of-central-directory record.
pub(crate) const EMPTY_ZIP: [u8; 22] = [
    0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// A tar archive holding one regular file.
pub(crate) fn tar_with(name: &str, data: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
    builder.into_inner().unwrap()
}
