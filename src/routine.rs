//! Companion routines for compiled receives.
//!
//! A lowered `recv_mpi` becomes a custom call whose operands are raw bytes:
//!
//! | # | Operand | Layout |
//! |---|---------|--------|
//! | 0 | element count | `s32` |
//! | 1 | template buffer | ignored |
//! | 2 | source rank or `ANY_SOURCE` | `s32` |
//! | 3 | tag or `ANY_TAG` | `s32` |
//! | 4 | communicator reference | `u64` |
//! | 5 | datatype reference | `u64` |
//! | 6 | status reference (with-status variant only) | `u64` |
//!
//! [`RecvRoutine`] decodes them and calls [`Messenger::recv`] with the
//! output buffer as the destination. The native build links equivalent C
//! routines from `csrc/mpiprim.c`.

use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::handle::{CommHandle, DatatypeHandle, StatusHandle};
use crate::lower::{ForeignRoutine, RoutineTable};
use crate::messenger::Messenger;
use crate::recv::{RECV_IGNORE_STATUS, RECV_WITH_STATUS};

fn scalar<T: Element>(operand: &[u8]) -> Result<T> {
    if operand.len() != T::DTYPE.size_in_bytes() {
        return Err(Error::InvalidBuffer);
    }
    Ok(T::read_ne(operand))
}

/// Receive routine backed by a [`Messenger`].
pub struct RecvRoutine<'a> {
    messenger: &'a dyn Messenger,
    with_status: bool,
}

impl<'a> RecvRoutine<'a> {
    /// Routine for [`RECV_WITH_STATUS`] (`with_status`) or
    /// [`RECV_IGNORE_STATUS`].
    ///
    /// # Safety
    ///
    /// The routine turns `u64` operands back into handles. Every program it
    /// runs must have been encoded against `messenger`, and the
    /// communicators and status buffers it references must outlive the run.
    pub unsafe fn new(messenger: &'a dyn Messenger, with_status: bool) -> Self {
        RecvRoutine {
            messenger,
            with_status,
        }
    }

    fn arity(&self) -> usize {
        if self.with_status {
            7
        } else {
            6
        }
    }
}

impl std::fmt::Debug for RecvRoutine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvRoutine")
            .field("with_status", &self.with_status)
            .finish()
    }
}

impl ForeignRoutine for RecvRoutine<'_> {
    fn call(&self, out: &mut [u8], operands: &[&[u8]]) -> Result<()> {
        if operands.len() != self.arity() {
            return Err(Error::ArityMismatch {
                primitive: if self.with_status {
                    RECV_WITH_STATUS
                } else {
                    RECV_IGNORE_STATUS
                },
                expected: self.arity(),
                actual: operands.len(),
            });
        }
        let count: i32 = scalar(operands[0])?;
        let source: i32 = scalar(operands[2])?;
        let tag: i32 = scalar(operands[3])?;
        let comm_bits: u64 = scalar(operands[4])?;
        let datatype_bits: u64 = scalar(operands[5])?;

        // SAFETY: the operands were produced by `handle::encode` against the
        // same messenger (constructor contract).
        let comm = unsafe { CommHandle::from_bits(comm_bits) }.ok_or(Error::InvalidCommunicator)?;
        let datatype = unsafe { DatatypeHandle::from_bits(datatype_bits) }
            .ok_or_else(|| Error::Internal("null datatype operand".into()))?;
        let status = if self.with_status {
            let bits: u64 = scalar(operands[6])?;
            Some(
                unsafe { StatusHandle::from_bits(bits) }
                    .ok_or_else(|| Error::Internal("null status operand".into()))?,
            )
        } else {
            None
        };

        self.messenger
            .recv(out, count, datatype, source, tag, comm, status)
    }
}

/// Add both receive routines, backed by `messenger`, to `table`.
///
/// # Safety
///
/// Same contract as [`RecvRoutine::new`].
pub unsafe fn register_recv_routines<'a>(table: &mut RoutineTable<'a>, messenger: &'a dyn Messenger) {
    table.insert(RECV_WITH_STATUS, RecvRoutine::new(messenger, true));
    table.insert(RECV_IGNORE_STATUS, RecvRoutine::new(messenger, false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Array, ArrayDesc};
    use crate::datatype::Dtype;
    use crate::loopback::{Loopback, StatusSlot};
    use crate::lower::Builder;
    use crate::params::RecvParams;
    use crate::primitive::{Context, Tracer, Value};
    use crate::recv::recv;
    use crate::status::Status;

    fn compile_recv<'a>(
        lib: &'a Loopback,
        desc: ArrayDesc,
        params: RecvParams,
    ) -> crate::lower::Executable<'a> {
        let mut builder = Builder::new();
        let x = builder.parameter(desc);
        let out = {
            let mut ctx = Context::lower(&mut builder, lib);
            recv(&mut ctx, x.into(), params).unwrap()
        };
        let Tracer::Plain(Value::Lowered(root)) = out else {
            panic!("expected a lowered value");
        };
        let mut table = RoutineTable::new();
        // SAFETY: the program was encoded against `lib`, which outlives it.
        unsafe { register_recv_routines(&mut table, lib) };
        builder.build(root).unwrap().compile(table).unwrap()
    }

    #[test]
    fn compiled_recv_ignores_status() {
        let lib = Loopback::new();
        let world = lib.world();
        let sent = Array::from_slice(&[2, 2], &[1u32, 2, 3, 4]).unwrap();
        lib.send(world, 1, 5, &sent).unwrap();

        let desc = sent.desc().clone();
        let exe = compile_recv(&lib, desc.clone(), RecvParams::new(world).source(1).tag(5));
        let out = exe.run(&[Array::zeros(desc).unwrap()]).unwrap();
        assert_eq!(out, sent);
        assert_eq!(lib.pending(), 0);
    }

    #[test]
    fn compiled_recv_fills_status() {
        let lib = Loopback::new();
        let comm = lib.duplicate().unwrap();
        let slot = StatusSlot::new();
        let sent = Array::from_slice(&[3], &[7i16, 8, 9]).unwrap();
        lib.send(comm, 0, 11, &sent).unwrap();

        let desc = sent.desc().clone();
        let exe = compile_recv(&lib, desc.clone(), RecvParams::new(comm).status(slot.handle()));
        let out = exe.run(&[Array::zeros(desc).unwrap()]).unwrap();
        assert_eq!(out.to_vec::<i16>().unwrap(), vec![7, 8, 9]);
        assert_eq!(
            lib.status(slot.handle()),
            Some(Status {
                source: 0,
                tag: 11,
                count: 3
            })
        );
    }

    #[test]
    fn compiled_program_runs_repeatedly() {
        let lib = Loopback::new();
        let world = lib.world();
        let desc = ArrayDesc::new(&[2], Dtype::F64);
        let exe = compile_recv(&lib, desc.clone(), RecvParams::new(world));
        for round in 0..3 {
            let sent = Array::from_slice(&[2], &[f64::from(round), -1.0]).unwrap();
            lib.send(world, 1, round, &sent).unwrap();
            assert_eq!(exe.run(&[Array::zeros(desc.clone()).unwrap()]).unwrap(), sent);
        }
    }

    #[test]
    fn routine_checks_operands() {
        let lib = Loopback::new();
        // SAFETY: no handle is decoded on the paths exercised here.
        let routine = unsafe { RecvRoutine::new(&lib, true) };
        let mut out = [0u8; 4];
        let short: [&[u8]; 6] = [&[0; 4], &[0; 4], &[0; 4], &[0; 4], &[0; 8], &[0; 8]];
        assert_eq!(
            routine.call(&mut out, &short),
            Err(Error::ArityMismatch {
                primitive: RECV_WITH_STATUS,
                expected: 7,
                actual: 6
            })
        );

        let routine = unsafe { RecvRoutine::new(&lib, false) };
        let narrow: [&[u8]; 6] = [&[0; 2], &[0; 4], &[0; 4], &[0; 4], &[0; 8], &[0; 8]];
        assert_eq!(routine.call(&mut out, &narrow), Err(Error::InvalidBuffer));

        let null_comm: [&[u8]; 6] = [&[0; 4], &[0; 4], &[0; 4], &[0; 4], &[0; 8], &[0; 8]];
        assert_eq!(routine.call(&mut out, &null_comm), Err(Error::InvalidCommunicator));
    }
}
