//! # mpiprim
//!
//! A blocking MPI receive as a first-class primitive of an array-program
//! tracing framework.
//!
//! A primitive is an opcode plus a table of evaluation strategies. The
//! receive primitive, `recv_mpi`, has all five:
//! - **Execute**: block until a matching message arrives and return it
//! - **Abstract evaluation**: the result has the template's shape and dtype
//! - **Encode**: emit a custom call that a compiled program runs later
//! - **Batch**: receive the whole batch as one larger message
//! - **JVP**: pass the tangent through (sum combine only)
//!
//! The messaging library sits behind the [`Messenger`] trait. [`Loopback`]
//! is an in-process implementation; with the `native` feature,
//! [`mpi::NativeMpi`] talks to a real MPI library through a thin C layer.
//!
//! ## Quick Start
//!
//! ```
//! use mpiprim::{recv, Array, ArrayDesc, Context, Dtype, Loopback, RecvParams, Tracer};
//!
//! fn main() -> Result<(), mpiprim::Error> {
//!     let lib = Loopback::new();
//!     let world = lib.world();
//!     lib.send(world, 1, 3, &Array::from_slice(&[4], &[1i32, 2, 3, 4])?)?;
//!
//!     // Eager: the receive happens now.
//!     let template = Array::zeros(ArrayDesc::new(&[4], Dtype::I32))?;
//!     let mut ctx = Context::eager(&lib);
//!     let out = recv(&mut ctx, template.into(), RecvParams::new(world).tag(3))?;
//!     assert!(matches!(out, Tracer::Plain(_)));
//!
//!     // Abstract: only the shape is computed.
//!     let mut ctx = Context::Abstract;
//!     let desc = ArrayDesc::new(&[4], Dtype::I32);
//!     recv(&mut ctx, desc.into(), RecvParams::new(world))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `native` | MPI backend and C custom-call targets | MPI library |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod array;
mod datatype;
mod error;
pub mod handle;
pub mod loopback;
pub mod lower;
mod messenger;
mod params;
mod primitive;
pub mod recv;
pub mod routine;
mod status;

#[cfg(feature = "native")]
mod ffi;
#[cfg(feature = "native")]
pub mod mpi;

pub use array::{Array, ArrayDesc};
pub use datatype::{DatatypeTag, Dtype, Element};
pub use error::{Error, Result};
pub use handle::{CommHandle, DatatypeHandle, StatusHandle};
pub use loopback::{Loopback, StatusSlot};
pub use messenger::Messenger;
pub use params::{RecvParams, Source, Tag};
pub use primitive::{
    AbstractEvalRule, BatchRule, Context, EncodeRule, ExecuteRule, JvpRule, Primitive, Rule,
    Rules, Strategy, Tracer, Value,
};
pub use recv::{recv, RECV};
pub use status::Status;

/// Combine operators of the collective family a receive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ReduceOp {
    /// Sum of values
    #[default]
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
    /// Product of values
    Prod = 3,
}
