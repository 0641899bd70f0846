//! The three header records that open a legacy checkpoint stream.

use std::io::{self, Read};

use ckpt_pickle::{PickleError, Value};
use tracing::debug;

use crate::error::{LoadError, LoadResult};

/// Magic number written as the first record of a legacy checkpoint.
pub const MAGIC_NUMBER: i128 = 0x1950a86a20f9469cfc6c;

/// The only protocol version this loader accepts.
pub const PROTOCOL_VERSION: i64 = 1001;

/// Validate the magic number and protocol version, then skip the system
/// info record.
///
/// Stops reading as soon as a check fails; nothing past the failing record
/// is consumed.
pub fn read_header<R: Read>(reader: &mut R) -> LoadResult<()> {
    read_magic(reader)?;
    read_protocol_version(reader)?;

    // Platform description (endianness, type sizes). Not validated.
    let sys_info = ckpt_pickle::from_reader(&mut *reader)?;
    debug!(entries = sys_info.len().unwrap_or(0), "skipped system info record");
    Ok(())
}

fn read_magic<R: Read>(reader: &mut R) -> LoadResult<()> {
    let magic = match ckpt_pickle::from_reader(&mut *reader) {
        Ok(value) => value,
        Err(PickleError::Io(e)) if e.kind() != io::ErrorKind::UnexpectedEof => return Err(LoadError::Io(e)),
        Err(e) => {
            debug!(error = %e, "first record is not a pickle");
            return Err(LoadError::InvalidMagicNumber);
        }
    };
    if magic.as_i128() != Some(MAGIC_NUMBER) {
        debug!(found = ?magic, "magic number mismatch");
        return Err(LoadError::InvalidMagicNumber);
    }
    Ok(())
}

fn read_protocol_version<R: Read>(reader: &mut R) -> LoadResult<()> {
    let version = ckpt_pickle::from_reader(&mut *reader)?;
    match version {
        Value::Int(PROTOCOL_VERSION) => Ok(()),
        Value::Int(v) => Err(LoadError::InvalidProtocolVersion(v.to_string())),
        other => Err(LoadError::InvalidProtocolVersion(format!("{other:?}"))),
    }
}
