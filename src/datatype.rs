//! Array dtypes and their MPI datatype tags.
//!
//! [`Dtype`] is the element type token carried by every array descriptor.
//! [`DatatypeTag`] is the subset of dtypes the C layer knows how to map to an
//! `MPI_Datatype`; [`Dtype::tag`] is the only place that mapping lives.
//!
//! # Supported Types
//!
//! | Dtype       | MPI Equivalent          | Tag Value |
//! |-------------|-------------------------|-----------|
//! | `float32`   | `MPI_FLOAT`             | 0         |
//! | `float64`   | `MPI_DOUBLE`            | 1         |
//! | `int32`     | `MPI_INT32_T`           | 2         |
//! | `int64`     | `MPI_INT64_T`           | 3         |
//! | `uint8`     | `MPI_UINT8_T`           | 4         |
//! | `uint32`    | `MPI_UINT32_T`          | 5         |
//! | `uint64`    | `MPI_UINT64_T`          | 6         |
//! | `int8`      | `MPI_INT8_T`            | 7         |
//! | `int16`     | `MPI_INT16_T`           | 8         |
//! | `uint16`    | `MPI_UINT16_T`          | 9         |
//! | `bool`      | `MPI_C_BOOL`            | 10        |
//! | `complex64` | `MPI_C_FLOAT_COMPLEX`   | 11        |
//! | `complex128`| `MPI_C_DOUBLE_COMPLEX`  | 12        |
//!
//! `float16` and `bfloat16` have no MPI datatype.

use std::fmt;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    /// Boolean stored as one byte
    Bool,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// IEEE half precision
    F16,
    /// bfloat16
    Bf16,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Pair of 32-bit floats
    C64,
    /// Pair of 64-bit floats
    C128,
}

impl Dtype {
    /// Every dtype, in declaration order.
    pub const ALL: [Dtype; 15] = [
        Dtype::Bool,
        Dtype::I8,
        Dtype::I16,
        Dtype::I32,
        Dtype::I64,
        Dtype::U8,
        Dtype::U16,
        Dtype::U32,
        Dtype::U64,
        Dtype::F16,
        Dtype::Bf16,
        Dtype::F32,
        Dtype::F64,
        Dtype::C64,
        Dtype::C128,
    ];

    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Dtype::Bool | Dtype::I8 | Dtype::U8 => 1,
            Dtype::I16 | Dtype::U16 | Dtype::F16 | Dtype::Bf16 => 2,
            Dtype::I32 | Dtype::U32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::U64 | Dtype::F64 | Dtype::C64 => 8,
            Dtype::C128 => 16,
        }
    }

    /// The MPI datatype tag for this dtype, if MPI has one.
    pub fn tag(self) -> Option<DatatypeTag> {
        let tag = match self {
            Dtype::F32 => DatatypeTag::F32,
            Dtype::F64 => DatatypeTag::F64,
            Dtype::I32 => DatatypeTag::I32,
            Dtype::I64 => DatatypeTag::I64,
            Dtype::U8 => DatatypeTag::U8,
            Dtype::U32 => DatatypeTag::U32,
            Dtype::U64 => DatatypeTag::U64,
            Dtype::I8 => DatatypeTag::I8,
            Dtype::I16 => DatatypeTag::I16,
            Dtype::U16 => DatatypeTag::U16,
            Dtype::Bool => DatatypeTag::Bool,
            Dtype::C64 => DatatypeTag::C64,
            Dtype::C128 => DatatypeTag::C128,
            Dtype::F16 | Dtype::Bf16 => return None,
        };
        Some(tag)
    }

    /// Conventional lowercase name (`float32`, `int64`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::I8 => "int8",
            Dtype::I16 => "int16",
            Dtype::I32 => "int32",
            Dtype::I64 => "int64",
            Dtype::U8 => "uint8",
            Dtype::U16 => "uint16",
            Dtype::U32 => "uint32",
            Dtype::U64 => "uint64",
            Dtype::F16 => "float16",
            Dtype::Bf16 => "bfloat16",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
            Dtype::C64 => "complex64",
            Dtype::C128 => "complex128",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tag values matching C-side `MPIPRIM_*` defines.
///
/// These discriminants must stay in sync with the `#define MPIPRIM_*` values
/// in `csrc/mpiprim.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// 32-bit floating point (`MPI_FLOAT`)
    F32 = 0,
    /// 64-bit floating point (`MPI_DOUBLE`)
    F64 = 1,
    /// 32-bit signed integer (`MPI_INT32_T`)
    I32 = 2,
    /// 64-bit signed integer (`MPI_INT64_T`)
    I64 = 3,
    /// 8-bit unsigned integer (`MPI_UINT8_T`)
    U8 = 4,
    /// 32-bit unsigned integer (`MPI_UINT32_T`)
    U32 = 5,
    /// 64-bit unsigned integer (`MPI_UINT64_T`)
    U64 = 6,
    /// 8-bit signed integer (`MPI_INT8_T`)
    I8 = 7,
    /// 16-bit signed integer (`MPI_INT16_T`)
    I16 = 8,
    /// 16-bit unsigned integer (`MPI_UINT16_T`)
    U16 = 9,
    /// C `_Bool` (`MPI_C_BOOL`)
    Bool = 10,
    /// Single precision complex (`MPI_C_FLOAT_COMPLEX`)
    C64 = 11,
    /// Double precision complex (`MPI_C_DOUBLE_COMPLEX`)
    C128 = 12,
}

impl DatatypeTag {
    /// Every tag, ordered by discriminant.
    pub const ALL: [DatatypeTag; 13] = [
        DatatypeTag::F32,
        DatatypeTag::F64,
        DatatypeTag::I32,
        DatatypeTag::I64,
        DatatypeTag::U8,
        DatatypeTag::U32,
        DatatypeTag::U64,
        DatatypeTag::I8,
        DatatypeTag::I16,
        DatatypeTag::U16,
        DatatypeTag::Bool,
        DatatypeTag::C64,
        DatatypeTag::C128,
    ];
}

/// Sealing module for [`Element`].
mod sealed {
    pub trait Sealed {}
}

/// Rust element types that can back an [`Array`](crate::Array).
///
/// This is a **sealed trait**. It converts elements to and from the
/// native-endian byte layout arrays are stored in.
pub trait Element: sealed::Sealed + Copy + Send + 'static {
    /// The dtype token for this element type.
    const DTYPE: Dtype;

    /// Append the native-endian bytes of `self` to `out`.
    fn write_ne(self, out: &mut Vec<u8>);

    /// Read one element from exactly `size_in_bytes` native-endian bytes.
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl sealed::Sealed for $ty {}
        impl Element for $ty {
            const DTYPE: Dtype = $dtype;

            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }
        }
    };
}

impl_element!(f32, Dtype::F32);
impl_element!(f64, Dtype::F64);
impl_element!(i8, Dtype::I8);
impl_element!(i16, Dtype::I16);
impl_element!(i32, Dtype::I32);
impl_element!(i64, Dtype::I64);
impl_element!(u8, Dtype::U8);
impl_element!(u16, Dtype::U16);
impl_element!(u32, Dtype::U32);
impl_element!(u64, Dtype::U64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_match_c_defines() {
        for (i, tag) in DatatypeTag::ALL.iter().enumerate() {
            assert_eq!(*tag as i32, i as i32, "Tag {tag:?} should have value {i}");
        }
    }

    #[test]
    fn half_precision_has_no_mpi_type() {
        assert_eq!(Dtype::F16.tag(), None);
        assert_eq!(Dtype::Bf16.tag(), None);
        let mapped = Dtype::ALL.iter().filter(|d| d.tag().is_some()).count();
        assert_eq!(mapped, DatatypeTag::ALL.len());
    }

    #[test]
    fn element_dtypes_agree_with_sizes() {
        fn check<T: Element>() {
            assert_eq!(T::DTYPE.size_in_bytes(), std::mem::size_of::<T>());
        }
        check::<f32>();
        check::<f64>();
        check::<i8>();
        check::<i16>();
        check::<i32>();
        check::<i64>();
        check::<u8>();
        check::<u16>();
        check::<u32>();
        check::<u64>();
    }

    #[test]
    fn element_bytes_are_native_endian() {
        let mut out = Vec::new();
        1.5f64.write_ne(&mut out);
        (-7i16).write_ne(&mut out);
        assert_eq!(out.len(), 10);
        assert_eq!(f64::read_ne(&out[..8]), 1.5);
        assert_eq!(i16::read_ne(&out[8..]), -7);
    }

    #[test]
    fn display_uses_conventional_names() {
        assert_eq!(Dtype::F32.to_string(), "float32");
        assert_eq!(Dtype::C128.to_string(), "complex128");
    }
}
