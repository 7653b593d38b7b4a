//! The receive primitive.
//!
//! [`RECV`] binds the opcode `recv_mpi` to its five rules:
//!
//! - **execute** allocates a buffer like the template and blocks in
//!   [`Messenger::recv`] until a matching message lands in it;
//! - **abstract eval** returns the template's descriptor unchanged;
//! - **encode** emits a custom call to [`RECV_WITH_STATUS`] or
//!   [`RECV_IGNORE_STATUS`] with the operand list
//!   `[nitems: s32, x, source: s32, tag: s32, comm: u64, datatype: u64, status: u64?]`;
//! - **batch** re-binds with unchanged parameters and keeps the batch axis,
//!   so the batch dimension is received as part of one larger message;
//! - **jvp** passes the tangent through when the combine operator is
//!   [`ReduceOp::Sum`] and has no rule otherwise.

use crate::array::{Array, ArrayDesc};
use crate::error::{Error, Result};
use crate::lower::{Builder, Op};
use crate::messenger::Messenger;
use crate::params::RecvParams;
use crate::primitive::{Context, Primitive, Rule, Rules, Tracer, Value};
use crate::ReduceOp;
use once_cell::sync::Lazy;

/// Opcode name.
pub const NAME: &str = "recv_mpi";

/// Foreign routine used when a status buffer is supplied.
pub const RECV_WITH_STATUS: &str = "mpi_recv";

/// Foreign routine used without a status buffer.
pub const RECV_IGNORE_STATUS: &str = "mpi_recv_ignore_status";

/// The process-wide receive primitive.
pub static RECV: Lazy<Primitive<RecvParams>> = Lazy::new(|| {
    let primitive = Primitive::new(
        NAME,
        Rules {
            execute,
            abstract_eval,
            encode,
        },
    );
    for rule in [Rule::Batch(batch), Rule::Jvp(jvp)] {
        if let Err(err) = primitive.register(rule) {
            unreachable!("fresh primitive has empty optional slots: {err}");
        }
    }
    primitive
});

/// Receive into an array shaped like `x`.
///
/// `x` is only a template: its shape and dtype fix the size of the message,
/// its contents are ignored.
///
/// # Example
///
/// ```
/// use mpiprim::{recv, Array, Context, Loopback, RecvParams, Tracer, Value};
///
/// let lib = Loopback::new();
/// let world = lib.world();
/// let sent = Array::from_slice(&[3], &[1.0f32, 2.0, 3.0]).unwrap();
/// lib.send(world, 1, 0, &sent).unwrap();
///
/// let template = Array::from_slice(&[3], &[0.0f32; 3]).unwrap();
/// let mut ctx = Context::eager(&lib);
/// let out = recv(&mut ctx, template.into(), RecvParams::new(world).source(1)).unwrap();
/// assert_eq!(out, Tracer::Plain(Value::Concrete(sent)));
/// ```
pub fn recv(ctx: &mut Context<'_>, x: Tracer, params: RecvParams) -> Result<Tracer> {
    RECV.invoke(ctx, std::slice::from_ref(&x), &params)
}

fn unary<T>(operands: &[T]) -> Result<&T> {
    match operands {
        [x] => Ok(x),
        _ => Err(Error::ArityMismatch {
            primitive: NAME,
            expected: 1,
            actual: operands.len(),
        }),
    }
}

fn item_count(desc: &ArrayDesc) -> Result<i32> {
    let nitems = desc.nitems()?;
    i32::try_from(nitems).map_err(|_| Error::invalid_count(nitems))
}

#[tracing::instrument(level = "debug", skip_all, fields(source = ?params.source, tag = ?params.tag))]
fn execute(messenger: &dyn Messenger, operands: &[&Array], params: &RecvParams) -> Result<Array> {
    let template = *unary(operands)?;
    let desc = template.desc().clone();
    let datatype = messenger
        .datatype(desc.dtype)
        .ok_or(Error::UnsupportedDtype(desc.dtype))?;
    let count = item_count(&desc)?;

    let mut out = Array::zeros(desc)?;
    tracing::debug!(count, "waiting for message");
    messenger.recv(
        out.as_bytes_mut(),
        count,
        datatype,
        params.source.encode(messenger),
        params.tag.encode(messenger),
        params.comm,
        params.status,
    )?;
    tracing::debug!("message received");
    Ok(out)
}

fn abstract_eval(operands: &[ArrayDesc], _params: &RecvParams) -> Result<ArrayDesc> {
    unary(operands).cloned()
}

fn encode(
    builder: &mut Builder,
    messenger: &dyn Messenger,
    operands: &[Op],
    params: &RecvParams,
) -> Result<Op> {
    let x = *unary(operands)?;
    let desc = builder.shape(x)?;
    // Everything that can fail is checked before the first instruction.
    let datatype = messenger
        .datatype(desc.dtype)
        .ok_or(Error::UnsupportedDtype(desc.dtype))?;
    let nitems = item_count(&desc)?;

    let target = if params.status.is_some() {
        RECV_WITH_STATUS
    } else {
        RECV_IGNORE_STATUS
    };
    let mut call = vec![
        builder.constant_s32(nitems),
        x,
        builder.constant_s32(params.source.encode(messenger)),
        builder.constant_s32(params.tag.encode(messenger)),
        builder.constant_u64(params.comm.to_bits()),
        builder.constant_u64(datatype.to_bits()),
    ];
    if let Some(status) = params.status {
        call.push(builder.constant_u64(status.to_bits()));
    }
    tracing::debug!(target, nitems, "encoded recv");
    builder.custom_call(target, &call, desc)
}

fn batch(
    primitive: &Primitive<RecvParams>,
    ctx: &mut Context<'_>,
    operands: &[Value],
    axes: &[Option<usize>],
    params: &RecvParams,
) -> Result<(Value, Option<usize>)> {
    let x = unary(operands)?;
    let axis = *unary(axes)?;
    if let Some(axis) = axis {
        let rank = ctx.desc_of(x)?.rank();
        if axis >= rank {
            return Err(Error::BatchAxisOutOfBounds { axis, rank });
        }
    }
    let out = primitive.bind(ctx, std::slice::from_ref(x), params)?;
    Ok((out, axis))
}

fn jvp(
    primitive: &Primitive<RecvParams>,
    ctx: &mut Context<'_>,
    primals: &[Value],
    tangents: &[Value],
    params: &RecvParams,
) -> Result<(Value, Value)> {
    let x = unary(primals)?;
    let x_tan = unary(tangents)?;
    // Checked before receiving so a failure consumes no message.
    if params.op != ReduceOp::Sum {
        return Err(Error::UnsupportedAdjoint(params.op));
    }
    let out = primitive.bind(ctx, std::slice::from_ref(x), params)?;
    Ok((out, x_tan.clone()))
}
