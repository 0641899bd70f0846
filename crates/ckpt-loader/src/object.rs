use ckpt_pickle::Value;
use ckpt_storage::{Elements, Storage, StorageClass, StorageKind, StorageView};

/// A decoded checkpoint value.
pub type TorchValue = Value<Torch>;

/// Globals the loader knows how to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    /// One of the `torch.*Storage` classes.
    Storage(StorageClass),
    /// `torch._utils._rebuild_tensor`
    RebuildTensor,
    /// `torch._utils._rebuild_tensor_v2`
    RebuildTensorV2,
    /// `torch._utils._rebuild_parameter`
    RebuildParameter,
    /// `collections.OrderedDict`
    OrderedDict,
}

/// Extension payload of [`TorchValue`].
#[derive(Clone, Debug, PartialEq)]
pub enum Torch {
    Class(Class),
    Storage(Storage),
    View(StorageView),
    Tensor(Tensor),
    Parameter(Tensor),
}

impl Torch {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Tensor(t) | Self::Parameter(t) => Some(t),
            _ => None,
        }
    }
}

/// Buffer a tensor reads from: a root storage or a view onto one.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorSource {
    Storage(Storage),
    View(StorageView),
}

impl TensorSource {
    pub fn kind(&self) -> StorageKind {
        match self {
            Self::Storage(s) => s.kind(),
            Self::View(v) => v.kind(),
        }
    }

    /// Element count of the source buffer.
    pub fn len(&self) -> usize {
        match self {
            Self::Storage(s) => s.len(),
            Self::View(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The owning storage, also for views.
    pub fn root(&self) -> &Storage {
        match self {
            Self::Storage(s) => s,
            Self::View(v) => v.root(),
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Storage(s) => s.bytes(),
            Self::View(v) => v.bytes(),
        }
    }

    pub fn elements(&self) -> Option<Elements> {
        match self {
            Self::Storage(s) => s.elements(),
            Self::View(v) => v.elements(),
        }
    }
}

/// A strided window onto a storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub source: TensorSource,
    /// Offset of the first element, in elements of the source.
    pub storage_offset: usize,
    pub shape: Vec<usize>,
    pub stride: Vec<usize>,
    pub requires_grad: bool,
}

impl Tensor {
    /// Number of elements, `None` if the shape's product overflows.
    pub fn numel(&self) -> Option<usize> {
        if self.shape.contains(&0) {
            return Some(0);
        }
        self.shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    pub fn kind(&self) -> StorageKind {
        self.source.kind()
    }

    /// Whether the strides describe a dense row-major layout.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = Some(1usize);
        for (&dim, &stride) in self.shape.iter().zip(&self.stride).rev() {
            if dim != 1 && Some(stride) != expected {
                return false;
            }
            expected = expected.and_then(|e| e.checked_mul(dim));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: Vec<usize>, stride: Vec<usize>) -> Tensor {
        let storage = StorageClass::new(StorageKind::Float32)
            .allocate("0", 64, "cpu")
            .unwrap();
        Tensor {
            source: TensorSource::Storage(storage),
            storage_offset: 0,
            shape,
            stride,
            requires_grad: false,
        }
    }

    #[test]
    fn numel_and_scalar() {
        assert_eq!(tensor(vec![2, 3], vec![3, 1]).numel(), Some(6));
        assert_eq!(tensor(vec![], vec![]).numel(), Some(1));
        assert_eq!(tensor(vec![4, 0], vec![1, 1]).numel(), Some(0));
        assert_eq!(tensor(vec![usize::MAX, 2], vec![0, 0]).numel(), None);
        assert_eq!(tensor(vec![usize::MAX, usize::MAX, 0], vec![0, 0, 1]).numel(), Some(0));
    }

    #[test]
    fn contiguity() {
        assert!(tensor(vec![2, 3], vec![3, 1]).is_contiguous());
        assert!(!tensor(vec![2, 3], vec![1, 2]).is_contiguous());
        assert!(tensor(vec![1, 3], vec![99, 1]).is_contiguous());
        assert!(!tensor(vec![3, 1 << 62, 1 << 62], vec![0, 1 << 62, 1]).is_contiguous());
        assert!(tensor(vec![1 << 40, 1 << 40], vec![1 << 40, 1]).is_contiguous());
    }

    #[test]
    fn tensor_accessor() {
        let t = Torch::Parameter(tensor(vec![1], vec![1]));
        assert!(t.as_tensor().is_some());
        assert_eq!(t.as_tensor().unwrap().kind(), StorageKind::Float32);
    }
}
