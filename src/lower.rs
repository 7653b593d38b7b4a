//! A minimal compiled backend.
//!
//! Primitives lower into a [`Builder`] as a flat list of instructions:
//! parameters, scalar constants and custom calls to foreign routines. A
//! finished [`Computation`] is bound to a [`RoutineTable`] to get an
//! [`Executable`], which runs each custom call by looking its target up by
//! name, the way a CPU backend resolves custom-call symbols.

use crate::array::{Array, ArrayDesc};
use crate::datatype::Dtype;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Handle to an instruction inside a [`Builder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Op(usize);

impl Op {
    /// Position of the instruction in its builder.
    pub fn id(self) -> usize {
        self.0
    }
}

/// One emitted instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// The `index`-th argument of the computation
    Parameter {
        /// Argument position
        index: usize,
        /// Expected shape and dtype
        desc: ArrayDesc,
    },
    /// Signed 32-bit scalar constant
    ConstantS32(i32),
    /// Unsigned 64-bit scalar constant
    ConstantU64(u64),
    /// Call into a foreign routine producing one buffer
    CustomCall {
        /// Routine name
        target: String,
        /// Operands in the order the routine reads them
        operands: Vec<Op>,
        /// Declared output shape and dtype
        desc: ArrayDesc,
    },
}

impl Instruction {
    /// Shape and dtype of the value this instruction produces.
    pub fn desc(&self) -> ArrayDesc {
        match self {
            Instruction::Parameter { desc, .. } | Instruction::CustomCall { desc, .. } => {
                desc.clone()
            }
            Instruction::ConstantS32(_) => ArrayDesc::scalar(Dtype::I32),
            Instruction::ConstantU64(_) => ArrayDesc::scalar(Dtype::U64),
        }
    }
}

/// Accumulates instructions for one computation.
#[derive(Debug, Default)]
pub struct Builder {
    instructions: Vec<Instruction>,
    parameters: Vec<ArrayDesc>,
}

impl Builder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, instruction: Instruction) -> Op {
        self.instructions.push(instruction);
        Op(self.instructions.len() - 1)
    }

    /// Declare the next computation argument.
    pub fn parameter(&mut self, desc: ArrayDesc) -> Op {
        let index = self.parameters.len();
        self.parameters.push(desc.clone());
        self.push(Instruction::Parameter { index, desc })
    }

    /// Emit an `s32[]` constant.
    pub fn constant_s32(&mut self, value: i32) -> Op {
        self.push(Instruction::ConstantS32(value))
    }

    /// Emit a `u64[]` constant.
    pub fn constant_u64(&mut self, value: u64) -> Op {
        self.push(Instruction::ConstantU64(value))
    }

    /// Emit a call to the foreign routine `target`.
    pub fn custom_call(&mut self, target: &str, operands: &[Op], desc: ArrayDesc) -> Result<Op> {
        for op in operands {
            self.instruction(*op)?;
        }
        Ok(self.push(Instruction::CustomCall {
            target: target.to_string(),
            operands: operands.to_vec(),
            desc,
        }))
    }

    /// Look up an emitted instruction.
    pub fn instruction(&self, op: Op) -> Result<&Instruction> {
        self.instructions.get(op.0).ok_or(Error::InvalidOp(op.0))
    }

    /// Shape and dtype produced by `op`.
    pub fn shape(&self, op: Op) -> Result<ArrayDesc> {
        self.instruction(op).map(Instruction::desc)
    }

    /// Number of emitted instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Finish the computation with `root` as its result.
    pub fn build(self, root: Op) -> Result<Computation> {
        self.instruction(root)?;
        Ok(Computation {
            instructions: self.instructions,
            parameters: self.parameters,
            root,
        })
    }
}

/// A finished instruction list with a designated result.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    instructions: Vec<Instruction>,
    parameters: Vec<ArrayDesc>,
    root: Op,
}

impl Computation {
    /// All instructions in emission order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Descriptors of the computation arguments.
    pub fn parameters(&self) -> &[ArrayDesc] {
        &self.parameters
    }

    /// Shape and dtype of the result.
    pub fn result_desc(&self) -> ArrayDesc {
        self.instructions[self.root.0].desc()
    }

    /// Bind the computation to the routines its custom calls name.
    ///
    /// Every target must be present in `routines`; a missing one fails with
    /// [`Error::UnknownRoutine`] here rather than at run time.
    pub fn compile<'a>(self, routines: RoutineTable<'a>) -> Result<Executable<'a>> {
        for instruction in &self.instructions {
            if let Instruction::CustomCall { target, .. } = instruction {
                if !routines.contains(target) {
                    return Err(Error::UnknownRoutine(target.clone()));
                }
            }
        }
        Ok(Executable {
            computation: self,
            routines,
        })
    }
}

/// A foreign routine callable from compiled code.
///
/// Mirrors the CPU custom-call convention `void(void* out, const void** in)`:
/// one output buffer, operands as raw bytes in declaration order.
pub trait ForeignRoutine {
    /// Run the routine, filling `out`.
    fn call(&self, out: &mut [u8], operands: &[&[u8]]) -> Result<()>;
}

/// Foreign routines by target name.
#[derive(Default)]
pub struct RoutineTable<'a> {
    routines: HashMap<String, Box<dyn ForeignRoutine + 'a>>,
}

impl<'a> RoutineTable<'a> {
    /// Empty table.
    pub fn new() -> Self {
        RoutineTable {
            routines: HashMap::new(),
        }
    }

    /// Register `routine` under `target`, replacing any previous entry.
    pub fn insert(&mut self, target: &str, routine: impl ForeignRoutine + 'a) {
        self.routines.insert(target.to_string(), Box::new(routine));
    }

    /// Whether `target` has a routine.
    pub fn contains(&self, target: &str) -> bool {
        self.routines.contains_key(target)
    }

    fn get(&self, target: &str) -> Result<&(dyn ForeignRoutine + 'a)> {
        self.routines
            .get(target)
            .map(|r| r.as_ref())
            .ok_or_else(|| Error::UnknownRoutine(target.to_string()))
    }
}

impl fmt::Debug for RoutineTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.routines.keys().collect();
        names.sort();
        f.debug_struct("RoutineTable").field("routines", &names).finish()
    }
}

/// A computation ready to run.
#[derive(Debug)]
pub struct Executable<'a> {
    computation: Computation,
    routines: RoutineTable<'a>,
}

impl Executable<'_> {
    /// The underlying computation.
    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    /// Evaluate every instruction in order and return the root value.
    pub fn run(&self, args: &[Array]) -> Result<Array> {
        let expected = self.computation.parameters.len();
        if args.len() != expected {
            return Err(Error::ArityMismatch {
                primitive: "computation",
                expected,
                actual: args.len(),
            });
        }

        let mut values: Vec<Array> = Vec::with_capacity(self.computation.instructions.len());
        for instruction in &self.computation.instructions {
            let value = match instruction {
                Instruction::Parameter { index, desc } => {
                    let arg = &args[*index];
                    if arg.desc() != desc {
                        return Err(Error::InvalidBuffer);
                    }
                    arg.clone()
                }
                Instruction::ConstantS32(v) => Array::from_slice(&[], &[*v])?,
                Instruction::ConstantU64(v) => Array::from_slice(&[], &[*v])?,
                Instruction::CustomCall {
                    target,
                    operands,
                    desc,
                } => {
                    let routine = self.routines.get(target)?;
                    let inputs: Vec<&[u8]> =
                        operands.iter().map(|op| values[op.0].as_bytes()).collect();
                    let mut out = Array::zeros(desc.clone())?;
                    tracing::debug!(target = %target, operands = inputs.len(), "custom call");
                    routine.call(out.as_bytes_mut(), &inputs)?;
                    out
                }
            };
            values.push(value);
        }

        values
            .into_iter()
            .nth(self.computation.root.0)
            .ok_or(Error::InvalidOp(self.computation.root.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Copies its first buffer operand into the output and counts calls.
    struct Echo<'c> {
        calls: &'c Cell<usize>,
    }

    impl ForeignRoutine for Echo<'_> {
        fn call(&self, out: &mut [u8], operands: &[&[u8]]) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            out.copy_from_slice(operands[1]);
            Ok(())
        }
    }

    #[test]
    fn constants_have_scalar_shapes() {
        let mut b = Builder::new();
        let s = b.constant_s32(-2);
        let u = b.constant_u64(u64::MAX);
        assert_eq!(b.shape(s).unwrap(), ArrayDesc::scalar(Dtype::I32));
        assert_eq!(b.shape(u).unwrap(), ArrayDesc::scalar(Dtype::U64));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn custom_call_rejects_foreign_ops() {
        let mut b = Builder::new();
        let err = b
            .custom_call("f", &[Op(3)], ArrayDesc::scalar(Dtype::F32))
            .unwrap_err();
        assert_eq!(err, Error::InvalidOp(3));
        assert!(b.is_empty());
    }

    #[test]
    fn compile_requires_every_target() {
        let mut b = Builder::new();
        let x = b.parameter(ArrayDesc::new(&[2], Dtype::F32));
        let n = b.constant_s32(2);
        let y = b
            .custom_call("echo", &[n, x], ArrayDesc::new(&[2], Dtype::F32))
            .unwrap();
        let computation = b.build(y).unwrap();
        let err = computation.compile(RoutineTable::new()).unwrap_err();
        assert_eq!(err, Error::UnknownRoutine("echo".into()));
    }

    #[test]
    fn run_feeds_operands_in_order() {
        let calls = Cell::new(0);
        let mut b = Builder::new();
        let x = b.parameter(ArrayDesc::new(&[3], Dtype::I32));
        let n = b.constant_s32(3);
        let y = b
            .custom_call("echo", &[n, x], ArrayDesc::new(&[3], Dtype::I32))
            .unwrap();
        let computation = b.build(y).unwrap();
        assert_eq!(computation.result_desc(), ArrayDesc::new(&[3], Dtype::I32));

        let mut routines = RoutineTable::new();
        routines.insert("echo", Echo { calls: &calls });
        let exe = computation.compile(routines).unwrap();

        let input = Array::from_slice(&[3], &[4i32, 5, 6]).unwrap();
        let out = exe.run(std::slice::from_ref(&input)).unwrap();
        assert_eq!(out, input);
        assert_eq!(calls.get(), 1);

        assert!(matches!(
            exe.run(&[]),
            Err(Error::ArityMismatch { expected: 1, actual: 0, .. })
        ));
    }
}
