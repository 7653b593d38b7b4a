//! Opaque native handles and their 64-bit encoding.
//!
//! Communicators, status buffers and datatypes are owned by the messaging
//! library. This layer only forwards references to them. When a compiled
//! program calls a foreign routine, each reference travels as a `u64`
//! operand; [`encode`] and [`decode`] are the only functions that convert
//! between the two forms.
//!
//! The companion routines (`csrc/mpiprim.c` and [`crate::routine`]) read
//! these operands as `uint64_t` and cast back through `uintptr_t`. Both
//! sides must agree on that width.

use std::ffi::c_void;
use std::ptr::NonNull;

const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());

/// Encode a native reference as the 64-bit operand passed to foreign routines.
pub fn encode(ptr: *const c_void) -> u64 {
    ptr as usize as u64
}

/// Decode a 64-bit operand produced by [`encode`].
///
/// Returns `None` for zero and for values that do not fit a pointer on this
/// target.
///
/// # Safety
///
/// `bits` must have been produced by [`encode`] from a reference that is
/// still alive. The returned pointer carries no lifetime and no ownership.
pub unsafe fn decode(bits: u64) -> Option<NonNull<c_void>> {
    let addr = usize::try_from(bits).ok()?;
    NonNull::new(addr as *mut c_void)
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonNull<c_void>);

        impl $name {
            /// Wrap a raw native reference. Returns `None` for null.
            ///
            /// # Safety
            ///
            /// `ptr` must point to a live native object of the right kind
            /// for as long as the handle, or any encoding of it, is used.
            pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
                NonNull::new(ptr).map($name)
            }

            /// Rebuild a handle from an operand produced by [`encode`].
            ///
            /// # Safety
            ///
            /// Same contract as [`decode`].
            pub unsafe fn from_bits(bits: u64) -> Option<Self> {
                decode(bits).map($name)
            }

            /// The raw native reference.
            pub fn as_ptr(self) -> *mut c_void {
                self.0.as_ptr()
            }

            /// The 64-bit operand encoding of this handle.
            pub fn to_bits(self) -> u64 {
                encode(self.0.as_ptr())
            }
        }
    };
}

opaque_handle!(
    /// Reference to a native communicator (`MPI_Comm*`).
    CommHandle
);

opaque_handle!(
    /// Reference to a native status buffer (`MPI_Status*`).
    StatusHandle
);

opaque_handle!(
    /// Reference to a native datatype (`MPI_Datatype*`).
    DatatypeHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut slot = 0u64;
        let ptr = (&mut slot as *mut u64).cast::<c_void>();
        let bits = encode(ptr);
        assert_eq!(bits, ptr as usize as u64);
        let back = unsafe { decode(bits) }.unwrap();
        assert_eq!(back.as_ptr(), ptr);
    }

    #[test]
    fn zero_decodes_to_none() {
        assert!(unsafe { decode(0) }.is_none());
        assert!(unsafe { CommHandle::from_raw(std::ptr::null_mut()) }.is_none());
    }

    #[test]
    fn handles_keep_their_address() {
        let mut comm = 7i32;
        let handle = unsafe { CommHandle::from_raw((&mut comm as *mut i32).cast()) }.unwrap();
        let again = unsafe { CommHandle::from_bits(handle.to_bits()) }.unwrap();
        assert_eq!(handle, again);
        assert_eq!(again.as_ptr().cast::<i32>(), &mut comm as *mut i32);
    }
}
