//! Tensor reconstruction from the `torch._utils` rebuild calls.

use tracing::trace;

use crate::error::{LoadError, LoadResult};
use crate::object::{Tensor, TensorSource, Torch, TorchValue};

fn malformed(reason: impl Into<String>) -> LoadError {
    LoadError::MalformedTensorRecord(reason.into())
}

/// `_rebuild_tensor(storage, offset, size, stride)`
pub fn rebuild_tensor(args: Vec<TorchValue>) -> LoadResult<Tensor> {
    if args.len() != 4 {
        return Err(malformed(format!("_rebuild_tensor takes 4 arguments, got {}", args.len())));
    }
    rebuild(&args, false)
}

/// `_rebuild_tensor_v2(storage, offset, size, stride, requires_grad,
/// backward_hooks[, metadata])`
///
/// Backward hooks and metadata are accepted and dropped.
pub fn rebuild_tensor_v2(args: Vec<TorchValue>) -> LoadResult<Tensor> {
    if !(6..=7).contains(&args.len()) {
        return Err(malformed(format!(
            "_rebuild_tensor_v2 takes 6 or 7 arguments, got {}",
            args.len()
        )));
    }
    let requires_grad = as_flag(&args[4]).ok_or_else(|| malformed("requires_grad is not a bool"))?;
    rebuild(&args, requires_grad)
}

/// `_rebuild_parameter(data, requires_grad, backward_hooks)`
pub fn rebuild_parameter(args: Vec<TorchValue>) -> LoadResult<Tensor> {
    if args.len() != 3 {
        return Err(malformed(format!(
            "_rebuild_parameter takes 3 arguments, got {}",
            args.len()
        )));
    }
    let mut args = args.into_iter();
    let data = args.next();
    let requires_grad = args.next();
    match (data, requires_grad) {
        (Some(TorchValue::Ext(Torch::Tensor(mut tensor))), Some(flag)) => {
            tensor.requires_grad = as_flag(&flag).ok_or_else(|| malformed("requires_grad is not a bool"))?;
            Ok(tensor)
        }
        (Some(other), _) => Err(malformed(format!("parameter data is {}, not a tensor", describe(&other)))),
        _ => Err(malformed("missing parameter arguments")),
    }
}

fn rebuild(args: &[TorchValue], requires_grad: bool) -> LoadResult<Tensor> {
    let source = match &args[0] {
        TorchValue::Ext(Torch::Storage(s)) => TensorSource::Storage(s.clone()),
        TorchValue::Ext(Torch::View(v)) => TensorSource::View(v.clone()),
        other => return Err(malformed(format!("tensor source is {}, not a storage", describe(other)))),
    };
    let storage_offset = args[1]
        .as_usize()
        .ok_or_else(|| malformed("storage offset is not a non-negative integer"))?;
    let shape = dims(&args[2], "size")?;
    let stride = dims(&args[3], "stride")?;
    if shape.len() != stride.len() {
        return Err(malformed(format!(
            "size has {} dimensions, stride has {}",
            shape.len(),
            stride.len()
        )));
    }
    check_extent(&source, storage_offset, &shape, &stride)?;

    trace!(storage = source.root().key(), ?shape, storage_offset, "rebuilt tensor");
    Ok(Tensor {
        source,
        storage_offset,
        shape,
        stride,
        requires_grad,
    })
}

/// Every addressed element must lie inside the source buffer.
fn check_extent(source: &TensorSource, offset: usize, shape: &[usize], stride: &[usize]) -> LoadResult<()> {
    let len = source.len();
    if shape.contains(&0) {
        return if offset <= len {
            Ok(())
        } else {
            Err(malformed(format!("offset {offset} is past the end of a {len}-element storage")))
        };
    }
    if shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim)).is_none() {
        return Err(malformed(format!("element count of shape {shape:?} overflows")));
    }
    let last = shape
        .iter()
        .zip(stride)
        .try_fold(offset, |acc, (&dim, &step)| (dim - 1).checked_mul(step).and_then(|d| acc.checked_add(d)))
        .ok_or_else(|| malformed("tensor extent overflows"))?;
    if last >= len {
        return Err(malformed(format!(
            "tensor reaches element {last} of a {len}-element storage"
        )));
    }
    Ok(())
}

fn dims(value: &TorchValue, what: &str) -> LoadResult<Vec<usize>> {
    let items = value
        .as_sequence()
        .ok_or_else(|| malformed(format!("{what} is {}, not a tuple", describe(value))))?;
    items
        .iter()
        .map(|d| {
            d.as_usize()
                .ok_or_else(|| malformed(format!("{what} entry is not a non-negative integer")))
        })
        .collect()
}

/// Python truthiness for the flags that older writers store as ints.
fn as_flag(value: &TorchValue) -> Option<bool> {
    match value {
        TorchValue::Bool(b) => Some(*b),
        TorchValue::Int(i) => Some(*i != 0),
        _ => None,
    }
}

fn describe(value: &TorchValue) -> &'static str {
    match value {
        TorchValue::Ext(Torch::Class(_)) => "a class",
        TorchValue::Ext(Torch::Storage(_)) => "a storage",
        TorchValue::Ext(Torch::View(_)) => "a storage view",
        TorchValue::Ext(Torch::Tensor(_)) => "a tensor",
        TorchValue::Ext(Torch::Parameter(_)) => "a parameter",
        other => other.type_name(),
    }
}
