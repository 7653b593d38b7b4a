//! The messaging library seen from the primitive layer.
//!
//! Both the eager executor and the companion routines of compiled programs
//! end up in [`Messenger::recv`]. Implementations: [`crate::Loopback`]
//! (in-process) and, with the `native` feature, `NativeMpi`.

use crate::datatype::Dtype;
use crate::error::Result;
use crate::handle::{CommHandle, DatatypeHandle, StatusHandle};

/// A point-to-point message-passing library.
pub trait Messenger {
    /// The library's "match any sender" sentinel (`MPI_ANY_SOURCE`).
    fn any_source(&self) -> i32;

    /// The library's "match any tag" sentinel (`MPI_ANY_TAG`).
    fn any_tag(&self) -> i32;

    /// The native datatype for `dtype`, or `None` when there is none.
    fn datatype(&self, dtype: Dtype) -> Option<DatatypeHandle>;

    /// Blocking receive of `count` elements of `datatype` into `buf`.
    ///
    /// `source` and `tag` are already encoded: wildcards arrive as the
    /// sentinels returned by [`any_source`](Self::any_source) and
    /// [`any_tag`](Self::any_tag). Blocks until a matching message arrives.
    /// When `status` is given, the library writes completion metadata into it.
    #[allow(clippy::too_many_arguments)]
    fn recv(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: DatatypeHandle,
        source: i32,
        tag: i32,
        comm: CommHandle,
        status: Option<StatusHandle>,
    ) -> Result<()>;
}
