//! Array descriptors and host buffers.

use crate::datatype::{Dtype, Element};
use crate::error::{Error, Result};

/// Shape and dtype of an array, without its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayDesc {
    /// Dimension sizes, outermost first
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: Dtype,
}

impl ArrayDesc {
    /// Create a descriptor.
    pub fn new(shape: &[usize], dtype: Dtype) -> Self {
        ArrayDesc {
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// Rank-0 descriptor.
    pub fn scalar(dtype: Dtype) -> Self {
        ArrayDesc {
            shape: Vec::new(),
            dtype,
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements. A zero dimension yields 0; a scalar yields 1.
    ///
    /// Fails with [`Error::InvalidCount`] when the product does not fit a
    /// `usize`; the reported count is then `i64::MAX`.
    pub fn nitems(&self) -> Result<usize> {
        if self.shape.contains(&0) {
            return Ok(0);
        }
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or(Error::InvalidCount(i64::MAX))
    }

    /// Size of the backing buffer in bytes.
    pub fn size_in_bytes(&self) -> Result<usize> {
        let nitems = self.nitems()?;
        nitems
            .checked_mul(self.dtype.size_in_bytes())
            .ok_or_else(|| Error::invalid_count(nitems))
    }
}

/// A host array: descriptor plus native-endian element bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    desc: ArrayDesc,
    data: Vec<u8>,
}

impl Array {
    /// Zero-filled array with the given descriptor.
    pub fn zeros(desc: ArrayDesc) -> Result<Self> {
        let data = vec![0u8; desc.size_in_bytes()?];
        Ok(Array { desc, data })
    }

    /// Wrap raw bytes. Fails with [`Error::InvalidBuffer`] when the length does
    /// not match the descriptor.
    pub fn from_bytes(desc: ArrayDesc, data: Vec<u8>) -> Result<Self> {
        if data.len() != desc.size_in_bytes()? {
            return Err(Error::InvalidBuffer);
        }
        Ok(Array { desc, data })
    }

    /// Build an array from typed elements laid out row-major.
    pub fn from_slice<T: Element>(shape: &[usize], values: &[T]) -> Result<Self> {
        let desc = ArrayDesc::new(shape, T::DTYPE);
        if desc.nitems()? != values.len() {
            return Err(Error::invalid_count(values.len()));
        }
        let mut data = Vec::with_capacity(desc.size_in_bytes()?);
        for v in values {
            v.write_ne(&mut data);
        }
        Ok(Array { desc, data })
    }

    /// Copy the elements out as `T`. Fails when `T` is not the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.desc.dtype {
            return Err(Error::UnsupportedDtype(T::DTYPE));
        }
        Ok(self
            .data
            .chunks_exact(self.desc.dtype.size_in_bytes())
            .map(T::read_ne)
            .collect())
    }

    /// The array's descriptor.
    pub fn desc(&self) -> &ArrayDesc {
        &self.desc
    }

    /// Raw element bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw element bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Split into descriptor and bytes.
    pub fn into_parts(self) -> (ArrayDesc, Vec<u8>) {
        (self.desc, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nitems_handles_zero_and_scalar() {
        assert_eq!(ArrayDesc::new(&[3, 0, 2], Dtype::F32).nitems(), Ok(0));
        assert_eq!(ArrayDesc::scalar(Dtype::F32).nitems(), Ok(1));
        assert_eq!(ArrayDesc::new(&[2, 3, 4], Dtype::I64).size_in_bytes(), Ok(192));
    }

    #[test]
    fn element_count_overflow_is_an_error() {
        let huge = ArrayDesc::new(&[1 << 32, 1 << 32, 2], Dtype::F32);
        assert_eq!(huge.nitems(), Err(Error::InvalidCount(i64::MAX)));
        assert_eq!(huge.size_in_bytes(), Err(Error::InvalidCount(i64::MAX)));
        assert_eq!(Array::zeros(huge).unwrap_err(), Error::InvalidCount(i64::MAX));

        // A zero dimension wins even when the other dimensions overflow.
        let empty = ArrayDesc::new(&[usize::MAX, usize::MAX, 0], Dtype::F64);
        assert_eq!(empty.nitems(), Ok(0));

        // The element count fits but the byte size does not.
        let wide = ArrayDesc::new(&[usize::MAX / 2], Dtype::C128);
        assert_eq!(
            wide.size_in_bytes(),
            Err(Error::invalid_count(usize::MAX / 2))
        );
    }

    #[test]
    fn from_slice_checks_length() {
        assert_eq!(
            Array::from_slice(&[2, 2], &[1.0f32, 2.0, 3.0]),
            Err(Error::InvalidCount(3))
        );
        let a = Array::from_slice(&[2, 2], &[1i32, 2, 3, 4]).unwrap();
        assert_eq!(a.desc().dtype, Dtype::I32);
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn to_vec_rejects_wrong_type() {
        let a = Array::zeros(ArrayDesc::new(&[4], Dtype::F64)).unwrap();
        assert!(a.to_vec::<f32>().is_err());
        assert_eq!(a.to_vec::<f64>().unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn from_bytes_checks_size() {
        let desc = ArrayDesc::new(&[2], Dtype::U16);
        assert_eq!(
            Array::from_bytes(desc.clone(), vec![0; 3]),
            Err(Error::InvalidBuffer)
        );
        assert!(Array::from_bytes(desc, vec![0; 4]).is_ok());
    }
}
