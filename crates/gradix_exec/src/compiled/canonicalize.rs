use crate::program::{Instruction, Program};
use gradix_core::{
    error::{Error, Result},
    layout::Layout,
};
use gradix_tensor::OpKind;

/// Rewrites `program` into the smaller op set the compiled executor
/// implements directly:
///
/// * `sub(a, b)` becomes `add(a, neg(b))`
/// * `mean(x)` becomes `scale(sum(x), 1/n)`
/// * `square(x)` becomes `mul(x, x)`
/// * binary operands are broadcast explicitly, so every binary kernel sees
///   operands of one shape
///
/// The result is an ordinary program with the same feeds, constants and
/// fetches; helper values are named `<output>/<n>`.
pub fn canonicalize(program: &Program) -> Result<Program> {
    let values = program.infer()?;
    let mut out = Vec::with_capacity(program.instructions().len());

    for inst in program.instructions() {
        let output = || {
            inst.outputs
                .first()
                .cloned()
                .ok_or_else(|| Error::InvalidGraph(format!("`{}` has no outputs", inst.op)))
        };
        let mut fresh = {
            let mut counter = 0;
            move |base: &str| {
                counter += 1;
                format!("{}/{}", base, counter)
            }
        };
        let emit = |out: &mut Vec<Instruction>, op: OpKind, inputs: Vec<String>, output: String| {
            out.push(Instruction {
                op,
                inputs,
                outputs: vec![output],
            })
        };

        match &inst.op {
            op @ (OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div) => {
                let target = output()?;
                let shape = values
                    .get(&target)
                    .map(|v| v.shape.clone())
                    .ok_or_else(|| Error::Internal {
                        message: format!("no shape inferred for `{}`", target),
                    })?;

                let mut operands = Vec::with_capacity(2);
                for name in &inst.inputs {
                    let operand_shape = values.get(name).map(|v| v.shape.as_slice()).unwrap_or(&[]);
                    if operand_shape == shape.as_slice() {
                        operands.push(name.clone());
                    } else {
                        let wide = fresh(&target);
                        emit(
                            &mut out,
                            OpKind::BroadcastTo { shape: shape.clone() },
                            vec![name.clone()],
                            wide.clone(),
                        );
                        operands.push(wide);
                    }
                }

                if *op == OpKind::Sub {
                    let negated = fresh(&target);
                    emit(&mut out, OpKind::Neg, vec![operands[1].clone()], negated.clone());
                    emit(&mut out, OpKind::Add, vec![operands[0].clone(), negated], target);
                } else {
                    emit(&mut out, op.clone(), operands, target);
                }
            },
            OpKind::Mean => {
                let target = output()?;
                let n = values
                    .get(&inst.inputs[0])
                    .map(|v| Layout::compute_size(&v.shape))
                    .unwrap_or(1)
                    .max(1);
                let total = fresh(&target);
                emit(&mut out, OpKind::Sum, inst.inputs.clone(), total.clone());
                emit(
                    &mut out,
                    OpKind::Scale {
                        factor: 1.0 / n as f64,
                    },
                    vec![total],
                    target,
                );
            },
            OpKind::Square => {
                let target = output()?;
                emit(
                    &mut out,
                    OpKind::Mul,
                    vec![inst.inputs[0].clone(), inst.inputs[0].clone()],
                    target,
                );
            },
            _ => out.push(inst.clone()),
        }
    }

    Program::new(
        program.feeds().to_vec(),
        program.constants().to_vec(),
        out,
        program.fetches().to_vec(),
    )
}
