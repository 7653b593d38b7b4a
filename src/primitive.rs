//! Primitives and their per-strategy rule tables.
//!
//! A [`Primitive`] is one opcode plus up to five rules. Execute,
//! abstract evaluation and encode are mandatory and arrive together in
//! [`Rules`] when the primitive is created. Batch and JVP are optional and
//! are added once each with [`Primitive::register`].
//!
//! [`Primitive::invoke`] picks the rule from the operands and the
//! [`Context`]:
//!
//! | Operands | Context | Rule |
//! |----------|---------|------|
//! | plain    | `Eager` | execute |
//! | plain    | `Abstract` | abstract eval |
//! | plain    | `Lower` | abstract eval, then encode |
//! | any batched | any | batch |
//! | dual     | any | jvp |

use crate::array::{Array, ArrayDesc};
use crate::error::{Error, Result};
use crate::lower::{Builder, Op};
use crate::messenger::Messenger;
use once_cell::sync::OnceCell;
use std::fmt;

/// An evaluation strategy a primitive can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Run the operation on concrete arrays
    Execute,
    /// Infer output shape and dtype
    AbstractEval,
    /// Emit compiled instructions
    Encode,
    /// Lift the operation over a batch axis
    Batch,
    /// Forward-mode derivative
    Jvp,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Execute => "execute",
            Strategy::AbstractEval => "abstract evaluation",
            Strategy::Encode => "encode",
            Strategy::Batch => "batch",
            Strategy::Jvp => "jvp",
        })
    }
}

/// A value flowing through the framework.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Host data
    Concrete(Array),
    /// Shape and dtype only
    Abstract(ArrayDesc),
    /// An instruction in the builder of the current `Lower` context
    Lowered(Op),
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Concrete(array)
    }
}

impl From<ArrayDesc> for Value {
    fn from(desc: ArrayDesc) -> Self {
        Value::Abstract(desc)
    }
}

impl From<Op> for Value {
    fn from(op: Op) -> Self {
        Value::Lowered(op)
    }
}

/// An operand as seen by [`Primitive::invoke`]: a plain value, or a value
/// wrapped by a transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum Tracer {
    /// Untransformed value
    Plain(Value),
    /// Value carrying an extra batch dimension at `axis`
    Batched {
        /// The batched value
        value: Value,
        /// Position of the batch dimension
        axis: usize,
    },
    /// Primal value paired with its tangent
    Dual {
        /// Primal value
        primal: Value,
        /// Tangent value
        tangent: Value,
    },
}

impl From<Value> for Tracer {
    fn from(value: Value) -> Self {
        Tracer::Plain(value)
    }
}

impl From<Array> for Tracer {
    fn from(array: Array) -> Self {
        Tracer::Plain(Value::Concrete(array))
    }
}

impl From<ArrayDesc> for Tracer {
    fn from(desc: ArrayDesc) -> Self {
        Tracer::Plain(Value::Abstract(desc))
    }
}

impl From<Op> for Tracer {
    fn from(op: Op) -> Self {
        Tracer::Plain(Value::Lowered(op))
    }
}

/// Evaluation context supplied by the caller.
pub enum Context<'a> {
    /// Run operations now against a messaging library
    Eager(&'a dyn Messenger),
    /// Shape and dtype inference only
    Abstract,
    /// Emit instructions into `builder`
    Lower {
        /// Builder receiving the instructions
        builder: &'a mut Builder,
        /// Library whose sentinels and datatypes are baked into the program
        messenger: &'a dyn Messenger,
    },
}

impl<'a> Context<'a> {
    /// Eager context.
    pub fn eager(messenger: &'a dyn Messenger) -> Self {
        Context::Eager(messenger)
    }

    /// Lowering context.
    pub fn lower(builder: &'a mut Builder, messenger: &'a dyn Messenger) -> Self {
        Context::Lower { builder, messenger }
    }

    /// Shape and dtype of `value` in this context.
    pub fn desc_of(&self, value: &Value) -> Result<ArrayDesc> {
        match (self, value) {
            (_, Value::Concrete(array)) => Ok(array.desc().clone()),
            (_, Value::Abstract(desc)) => Ok(desc.clone()),
            (Context::Lower { builder, .. }, Value::Lowered(op)) => builder.shape(*op),
            (_, Value::Lowered(op)) => Err(Error::InvalidOp(op.id())),
        }
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Eager(_) => f.write_str("Eager"),
            Context::Abstract => f.write_str("Abstract"),
            Context::Lower { builder, .. } => f
                .debug_struct("Lower")
                .field("instructions", &builder.len())
                .finish(),
        }
    }
}

/// Runs the operation on concrete operands.
pub type ExecuteRule<P> = fn(&dyn Messenger, &[&Array], &P) -> Result<Array>;

/// Maps operand descriptors to the output descriptor.
pub type AbstractEvalRule<P> = fn(&[ArrayDesc], &P) -> Result<ArrayDesc>;

/// Emits instructions for the operation and returns the result instruction.
pub type EncodeRule<P> = fn(&mut Builder, &dyn Messenger, &[Op], &P) -> Result<Op>;

/// Evaluates the operation on batched operands, returning the output batch axis.
pub type BatchRule<P> = fn(
    &Primitive<P>,
    &mut Context<'_>,
    &[Value],
    &[Option<usize>],
    &P,
) -> Result<(Value, Option<usize>)>;

/// Maps (primals, tangents) to (primal output, tangent output).
pub type JvpRule<P> =
    fn(&Primitive<P>, &mut Context<'_>, &[Value], &[Value], &P) -> Result<(Value, Value)>;

/// The mandatory rules of a primitive.
pub struct Rules<P> {
    /// Eager execution
    pub execute: ExecuteRule<P>,
    /// Shape and dtype inference
    pub abstract_eval: AbstractEvalRule<P>,
    /// Compiled-code emission
    pub encode: EncodeRule<P>,
}

/// One rule, for [`Primitive::register`].
pub enum Rule<P> {
    /// Eager execution
    Execute(ExecuteRule<P>),
    /// Shape and dtype inference
    AbstractEval(AbstractEvalRule<P>),
    /// Compiled-code emission
    Encode(EncodeRule<P>),
    /// Batching
    Batch(BatchRule<P>),
    /// Forward-mode differentiation
    Jvp(JvpRule<P>),
}

impl<P> Rule<P> {
    /// The strategy this rule implements.
    pub fn strategy(&self) -> Strategy {
        match self {
            Rule::Execute(_) => Strategy::Execute,
            Rule::AbstractEval(_) => Strategy::AbstractEval,
            Rule::Encode(_) => Strategy::Encode,
            Rule::Batch(_) => Strategy::Batch,
            Rule::Jvp(_) => Strategy::Jvp,
        }
    }
}

/// An opcode and its rule table. `P` is the primitive's parameter type.
pub struct Primitive<P> {
    name: &'static str,
    rules: Rules<P>,
    batch: OnceCell<BatchRule<P>>,
    jvp: OnceCell<JvpRule<P>>,
}

impl<P> Primitive<P> {
    /// Create a primitive with its mandatory rules.
    pub fn new(name: &'static str, rules: Rules<P>) -> Self {
        Primitive {
            name,
            rules,
            batch: OnceCell::new(),
            jvp: OnceCell::new(),
        }
    }

    /// The opcode name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add an optional rule. Each strategy can be set once; mandatory
    /// strategies are always already set.
    pub fn register(&self, rule: Rule<P>) -> Result<()> {
        let strategy = rule.strategy();
        let accepted = match rule {
            Rule::Batch(f) => self.batch.set(f).is_ok(),
            Rule::Jvp(f) => self.jvp.set(f).is_ok(),
            Rule::Execute(_) | Rule::AbstractEval(_) | Rule::Encode(_) => false,
        };
        if accepted {
            tracing::debug!(primitive = self.name, %strategy, "registered rule");
            Ok(())
        } else {
            Err(Error::AlreadyRegistered {
                primitive: self.name,
                strategy,
            })
        }
    }

    /// Whether a rule exists for `strategy`.
    pub fn has_rule(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::Execute | Strategy::AbstractEval | Strategy::Encode => true,
            Strategy::Batch => self.batch.get().is_some(),
            Strategy::Jvp => self.jvp.get().is_some(),
        }
    }

    fn mismatch(&self, detail: &'static str) -> Error {
        Error::ContextMismatch {
            primitive: self.name,
            detail,
        }
    }

    /// Apply the primitive, dispatching on the operand kinds and `ctx`.
    pub fn invoke(&self, ctx: &mut Context<'_>, operands: &[Tracer], params: &P) -> Result<Tracer> {
        let duals = operands
            .iter()
            .filter(|t| matches!(t, Tracer::Dual { .. }))
            .count();
        let batched = operands
            .iter()
            .filter(|t| matches!(t, Tracer::Batched { .. }))
            .count();

        if duals > 0 {
            if duals != operands.len() {
                return Err(self.mismatch("dual operands mixed with non-dual operands"));
            }
            let mut primals = Vec::with_capacity(operands.len());
            let mut tangents = Vec::with_capacity(operands.len());
            for operand in operands {
                if let Tracer::Dual { primal, tangent } = operand {
                    primals.push(primal.clone());
                    tangents.push(tangent.clone());
                }
            }
            let (primal, tangent) = self.jvp(ctx, &primals, &tangents, params)?;
            return Ok(Tracer::Dual { primal, tangent });
        }

        if batched > 0 {
            let mut values = Vec::with_capacity(operands.len());
            let mut axes = Vec::with_capacity(operands.len());
            for operand in operands {
                match operand {
                    Tracer::Batched { value, axis } => {
                        values.push(value.clone());
                        axes.push(Some(*axis));
                    }
                    Tracer::Plain(value) => {
                        values.push(value.clone());
                        axes.push(None);
                    }
                    Tracer::Dual { .. } => unreachable!("duals handled above"),
                }
            }
            let (value, axis) = self.batch(ctx, &values, &axes, params)?;
            return Ok(match axis {
                Some(axis) => Tracer::Batched { value, axis },
                None => Tracer::Plain(value),
            });
        }

        let values: Vec<Value> = operands
            .iter()
            .filter_map(|t| match t {
                Tracer::Plain(v) => Some(v.clone()),
                _ => None,
            })
            .collect();
        self.bind(ctx, &values, params).map(Tracer::Plain)
    }

    /// Evaluate the primitive on plain values in `ctx`.
    pub fn bind(&self, ctx: &mut Context<'_>, operands: &[Value], params: &P) -> Result<Value> {
        match ctx {
            Context::Eager(messenger) => {
                let arrays = operands
                    .iter()
                    .map(|v| match v {
                        Value::Concrete(array) => Ok(array),
                        _ => Err(self.mismatch("eager evaluation needs concrete operands")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                tracing::debug!(primitive = self.name, strategy = %Strategy::Execute, "dispatch");
                (self.rules.execute)(*messenger, &arrays, params).map(Value::Concrete)
            }
            Context::Abstract => {
                let descs = operands
                    .iter()
                    .map(|v| match v {
                        Value::Concrete(array) => Ok(array.desc().clone()),
                        Value::Abstract(desc) => Ok(desc.clone()),
                        Value::Lowered(_) => {
                            Err(self.mismatch("abstract evaluation got a lowered operand"))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                tracing::debug!(primitive = self.name, strategy = %Strategy::AbstractEval, "dispatch");
                (self.rules.abstract_eval)(&descs, params).map(Value::Abstract)
            }
            Context::Lower { builder, messenger } => {
                let ops = operands
                    .iter()
                    .map(|v| match v {
                        Value::Lowered(op) => Ok(*op),
                        _ => Err(self.mismatch("lowering needs lowered operands")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let descs = ops
                    .iter()
                    .map(|op| builder.shape(*op))
                    .collect::<Result<Vec<_>>>()?;
                let expected = (self.rules.abstract_eval)(&descs, params)?;
                tracing::debug!(primitive = self.name, strategy = %Strategy::Encode, "dispatch");
                let out = (self.rules.encode)(&mut **builder, *messenger, &ops, params)?;
                let emitted = builder.shape(out)?;
                if emitted != expected {
                    return Err(Error::Internal(format!(
                        "`{}` emitted {:?}, abstract evaluation gave {:?}",
                        self.name, emitted, expected
                    )));
                }
                Ok(Value::Lowered(out))
            }
        }
    }

    /// Apply the batch rule. Fails with [`Error::UnregisteredStrategy`] when
    /// there is none.
    pub fn batch(
        &self,
        ctx: &mut Context<'_>,
        operands: &[Value],
        axes: &[Option<usize>],
        params: &P,
    ) -> Result<(Value, Option<usize>)> {
        let rule = self.batch.get().ok_or(Error::UnregisteredStrategy {
            primitive: self.name,
            strategy: Strategy::Batch,
        })?;
        tracing::debug!(primitive = self.name, strategy = %Strategy::Batch, "dispatch");
        rule(self, ctx, operands, axes, params)
    }

    /// Apply the JVP rule. Fails with [`Error::UnregisteredStrategy`] when
    /// there is none.
    pub fn jvp(
        &self,
        ctx: &mut Context<'_>,
        primals: &[Value],
        tangents: &[Value],
        params: &P,
    ) -> Result<(Value, Value)> {
        let rule = self.jvp.get().ok_or(Error::UnregisteredStrategy {
            primitive: self.name,
            strategy: Strategy::Jvp,
        })?;
        tracing::debug!(primitive = self.name, strategy = %Strategy::Jvp, "dispatch");
        rule(self, ctx, primals, tangents, params)
    }
}

impl<P> fmt::Debug for Primitive<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("name", &self.name)
            .field("batch", &self.has_rule(Strategy::Batch))
            .field("jvp", &self.has_rule(Strategy::Jvp))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Dtype;
    use crate::loopback::Loopback;

    // A parameterless unary "copy" primitive: enough to exercise dispatch.
    fn copy_execute(_: &dyn Messenger, operands: &[&Array], _: &()) -> Result<Array> {
        Ok(operands[0].clone())
    }

    fn copy_abstract(operands: &[ArrayDesc], _: &()) -> Result<ArrayDesc> {
        Ok(operands[0].clone())
    }

    fn copy_encode(b: &mut Builder, _: &dyn Messenger, operands: &[Op], _: &()) -> Result<Op> {
        let desc = b.shape(operands[0])?;
        b.custom_call("copy", operands, desc)
    }

    fn copy_batch(
        p: &Primitive<()>,
        ctx: &mut Context<'_>,
        operands: &[Value],
        axes: &[Option<usize>],
        params: &(),
    ) -> Result<(Value, Option<usize>)> {
        Ok((p.bind(ctx, operands, params)?, axes[0]))
    }

    fn copy_primitive() -> Primitive<()> {
        Primitive::new(
            "copy",
            Rules {
                execute: copy_execute,
                abstract_eval: copy_abstract,
                encode: copy_encode,
            },
        )
    }

    #[test]
    fn optional_rules_fail_closed() {
        let p = copy_primitive();
        let lib = Loopback::new();
        let mut ctx = Context::eager(&lib);
        let x = Array::zeros(ArrayDesc::new(&[2], Dtype::F32)).unwrap();

        let err = p
            .invoke(
                &mut ctx,
                &[Tracer::Batched {
                    value: x.clone().into(),
                    axis: 0,
                }],
                &(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnregisteredStrategy {
                primitive: "copy",
                strategy: Strategy::Batch
            }
        );

        let err = p
            .invoke(
                &mut ctx,
                &[Tracer::Dual {
                    primal: x.clone().into(),
                    tangent: x.into(),
                }],
                &(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnregisteredStrategy {
                primitive: "copy",
                strategy: Strategy::Jvp
            }
        );
    }

    #[test]
    fn rules_are_write_once() {
        let p = copy_primitive();
        assert!(!p.has_rule(Strategy::Batch));
        p.register(Rule::Batch(copy_batch)).unwrap();
        assert!(p.has_rule(Strategy::Batch));
        assert_eq!(
            p.register(Rule::Batch(copy_batch)),
            Err(Error::AlreadyRegistered {
                primitive: "copy",
                strategy: Strategy::Batch
            })
        );
        assert_eq!(
            p.register(Rule::Execute(copy_execute)),
            Err(Error::AlreadyRegistered {
                primitive: "copy",
                strategy: Strategy::Execute
            })
        );
    }

    #[test]
    fn dispatch_follows_context() {
        let p = copy_primitive();
        let lib = Loopback::new();
        let x = Array::from_slice(&[3], &[1.0f32, 2.0, 3.0]).unwrap();

        let mut eager = Context::eager(&lib);
        let out = p.invoke(&mut eager, &[x.clone().into()], &()).unwrap();
        assert_eq!(out, Tracer::Plain(Value::Concrete(x.clone())));

        let mut abstract_ctx = Context::Abstract;
        let out = p.invoke(&mut abstract_ctx, &[x.clone().into()], &()).unwrap();
        assert_eq!(out, Tracer::Plain(Value::Abstract(x.desc().clone())));

        let mut builder = Builder::new();
        let param = builder.parameter(x.desc().clone());
        let mut lower = Context::lower(&mut builder, &lib);
        let out = p.invoke(&mut lower, &[param.into()], &()).unwrap();
        let op = match out {
            Tracer::Plain(Value::Lowered(op)) => op,
            other => panic!("expected a lowered value, got {other:?}"),
        };
        assert_eq!(builder.shape(op).unwrap(), *x.desc());
    }

    #[test]
    fn batched_output_keeps_axis() {
        let p = copy_primitive();
        p.register(Rule::Batch(copy_batch)).unwrap();
        let mut ctx = Context::Abstract;
        let desc = ArrayDesc::new(&[4, 2], Dtype::I64);
        let out = p
            .invoke(
                &mut ctx,
                &[Tracer::Batched {
                    value: desc.clone().into(),
                    axis: 1,
                }],
                &(),
            )
            .unwrap();
        assert_eq!(
            out,
            Tracer::Batched {
                value: Value::Abstract(desc),
                axis: 1
            }
        );
    }

    #[test]
    fn wrong_value_kind_is_rejected() {
        let p = copy_primitive();
        let lib = Loopback::new();
        let mut ctx = Context::eager(&lib);
        let desc = ArrayDesc::new(&[1], Dtype::U8);
        let err = p.invoke(&mut ctx, &[desc.into()], &()).unwrap_err();
        assert!(matches!(err, Error::ContextMismatch { primitive: "copy", .. }));
    }

    #[test]
    fn strategy_names() {
        assert_eq!(Strategy::AbstractEval.to_string(), "abstract evaluation");
        assert_eq!(Strategy::Jvp.to_string(), "jvp");
    }
}
