//! MPI message status information.
//!
//! This module provides the [`Status`] struct read back from a status buffer
//! after a receive that was given one.

/// Completion metadata of a received message.
///
/// # Example
///
/// ```
/// # use mpiprim::{recv, Array, ArrayDesc, Context, Dtype, Loopback, RecvParams, StatusSlot};
/// # use mpiprim::{Tracer, Value};
/// let lib = Loopback::new();
/// let data = Array::from_slice(&[4], &[1.0f64, 2.0, 3.0, 4.0]).unwrap();
/// lib.send(lib.world(), 1, 5, &data).unwrap();
///
/// let slot = StatusSlot::new();
/// let params = RecvParams::new(lib.world()).status(slot.handle());
/// let mut ctx = Context::eager(&lib);
/// let template = Array::zeros(ArrayDesc::new(&[4], Dtype::F64)).unwrap();
/// let out = recv(&mut ctx, template.into(), params).unwrap();
/// assert!(matches!(out, Tracer::Plain(Value::Concrete(ref a)) if a == &data));
///
/// let status = lib.status(slot.handle()).unwrap();
/// assert_eq!((status.source, status.tag, status.count), (1, 5, 4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message.
    pub source: i32,
    /// Tag of the message.
    pub tag: i32,
    /// Number of elements in the message.
    pub count: i64,
}
