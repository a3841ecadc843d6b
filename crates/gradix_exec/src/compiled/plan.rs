use super::{canonicalize::canonicalize, CompileStrategy, Precision};
use crate::{executor::HostTensor, program::Program};
use gradix_core::{
    be::ops::{binary, matmul, reduction, transform},
    buffer::Buffer,
    cpu::{ops::unary, Element},
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
    map_data,
};
use gradix_tensor::OpKind;
use std::collections::{HashMap, HashSet};

// ────────────────────────────────────────────────────────────────────────────
//  Kernels
// ────────────────────────────────────────────────────────────────────────────

/// One elementwise function inside a fused map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Stage {
    Neg,
    Exp,
    Log,
    Sqrt,
    Relu,
    LeakyRelu(f64),
    Sigmoid,
    Tanh,
    Scale(f64),
    AddScalar(f64),
}

impl Stage {
    fn from_op(op: &OpKind) -> Option<Self> {
        Some(match op {
            OpKind::Neg => Self::Neg,
            OpKind::Exp => Self::Exp,
            OpKind::Log => Self::Log,
            OpKind::Sqrt => Self::Sqrt,
            OpKind::Relu => Self::Relu,
            OpKind::LeakyRelu { alpha } => Self::LeakyRelu(*alpha),
            OpKind::Sigmoid => Self::Sigmoid,
            OpKind::Tanh => Self::Tanh,
            OpKind::Scale { factor } => Self::Scale(*factor),
            OpKind::AddScalar { value } => Self::AddScalar(*value),
            _ => return None,
        })
    }

    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Neg => -x,
            Self::Exp => x.exp(),
            Self::Log => x.ln(),
            Self::Sqrt => x.sqrt(),
            Self::Relu => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            },
            Self::LeakyRelu(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            },
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Scale(factor) => x * factor,
            Self::AddScalar(value) => x + value,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Kernel {
    Map(Vec<Stage>),
    Add,
    Mul,
    Div,
    Sum { chunk: usize },
    SumToShape { from: Vec<usize>, to: Vec<usize> },
    BroadcastTo { from: Vec<usize>, to: Vec<usize> },
    Transpose { rows: usize, cols: usize },
    MatMul { m: usize, k: usize, n: usize },
    Split { at_elems: usize },
    Concat,
    /// Rounds through a narrower dtype and back to the plan precision.
    Round(DType),
}

impl Kernel {
    fn name(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::Add => "add",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Sum { .. } => "sum",
            Self::SumToShape { .. } => "sum_to_shape",
            Self::BroadcastTo { .. } => "broadcast_to",
            Self::Transpose { .. } => "transpose",
            Self::MatMul { .. } => "matmul",
            Self::Split { .. } => "split",
            Self::Concat => "concat",
            Self::Round(_) => "round",
        }
    }

    fn apply(&self, inputs: &[&Buffer]) -> Result<Vec<Buffer>> {
        let operand = |i: usize| {
            inputs.get(i).copied().ok_or_else(|| Error::Internal {
                message: format!("`{}` kernel is missing operand {}", self.name(), i),
            })
        };

        let out = match self {
            Self::Map(stages) => run_stages(operand(0)?, stages),
            Self::Add => binary::add(operand(0)?, operand(1)?)?,
            Self::Mul => binary::mul(operand(0)?, operand(1)?)?,
            Self::Div => binary::div(operand(0)?, operand(1)?)?,
            Self::Sum { chunk } => reduction::sum_chunked(operand(0)?, *chunk),
            Self::SumToShape { from, to } => reduction::sum_to_shape(operand(0)?, from, to),
            Self::BroadcastTo { from, to } => transform::broadcast_to(operand(0)?, from, to),
            Self::Transpose { rows, cols } => transform::transpose2d(operand(0)?, *rows, *cols),
            Self::MatMul { m, k, n } => matmul::matmul(operand(0)?, operand(1)?, *m, *k, *n)?,
            Self::Split { at_elems } => {
                let (head, tail) = transform::split(operand(0)?, *at_elems)?;
                return Ok(vec![head, tail]);
            },
            Self::Concat => transform::concat(inputs)?,
            Self::Round(via) => {
                let x = operand(0)?;
                x.to_dtype(*via).to_dtype(x.dtype())
            },
        };
        Ok(vec![out])
    }
}

fn run_stages(input: &Buffer, stages: &[Stage]) -> Buffer {
    fn kernel<T: Element>(v: &[T], stages: &[Stage]) -> Vec<T> {
        let mut out = vec![T::default(); v.len()];
        unary::map(v, &mut out, |x| stages.iter().fold(x, |acc, stage| stage.apply(acc)));
        out
    }
    Buffer::from_data(map_data!(input.data(), v => kernel(v, stages)))
}

// ────────────────────────────────────────────────────────────────────────────
//  Plan
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct Step {
    kernel: Kernel,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    // slots whose last reader is this step
    release: Vec<usize>,
}

#[derive(Clone, Debug)]
struct Fetch {
    slot: usize,
    shape: Vec<usize>,
    dtype: DType,
}

/// A program compiled for one [`CompileStrategy`]: canonical ops, fused
/// elementwise chains and a fixed slot assignment with release points.
#[derive(Clone, Debug)]
pub struct CompiledPlan {
    precision: Precision,
    num_slots: usize,
    feed_slots: Vec<usize>,
    constants: Vec<(usize, Buffer)>,
    steps: Vec<Step>,
    fetches: Vec<Fetch>,
    fused_stages: usize,
}

impl CompiledPlan {
    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Elementwise ops folded into an earlier map instead of getting a
    /// step of their own.
    pub fn fused_stages(&self) -> usize {
        self.fused_stages
    }

    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.kernel.name()).collect()
    }

    pub(crate) fn compile(program: &Program, strategy: &CompileStrategy) -> Result<Self> {
        let program = canonicalize(program)?;
        let values = program.infer()?;
        let dtype = strategy.precision.dtype();
        let info = |name: &str| {
            values.get(name).ok_or_else(|| Error::Internal {
                message: format!("no shape inferred for `{}`", name),
            })
        };

        let mut readers: HashMap<&str, usize> = HashMap::new();
        for inst in program.instructions() {
            for name in &inst.inputs {
                *readers.entry(name.as_str()).or_default() += 1;
            }
        }
        let fetched: HashSet<&str> = program.fetches().iter().map(String::as_str).collect();

        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        // names sharing each slot
        let mut aliases: Vec<usize> = Vec::new();

        let mut feed_slots = Vec::with_capacity(program.feeds().len());
        for feed in program.feeds() {
            let slot = define(&mut aliases, &mut slot_of, &feed.name);
            feed_slots.push(slot);
        }
        let mut constants = Vec::with_capacity(program.constants().len());
        for constant in program.constants() {
            let slot = define(&mut aliases, &mut slot_of, &constant.name);
            constants.push((slot, constant.buffer.to_dtype(dtype)));
        }

        let mut steps: Vec<Step> = Vec::new();
        // slot -> index of the map step that writes it
        let mut map_writer: HashMap<usize, usize> = HashMap::new();
        let mut fused_stages = 0;

        for inst in program.instructions() {
            let inputs = inst
                .inputs
                .iter()
                .map(|name| {
                    slot_of.get(name.as_str()).copied().ok_or_else(|| Error::Internal {
                        message: format!("value `{}` has no slot", name),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            // casts that cannot lose bits at this precision are views too
            let rounds = match inst.op {
                OpKind::Cast { dtype: target } => target != dtype && target.size_in_bytes() <= dtype.size_in_bytes(),
                _ => false,
            };
            // views that keep the row-major buffer share their input's slot
            if !rounds && matches!(inst.op, OpKind::Reshape { .. } | OpKind::Cast { .. }) {
                aliases[inputs[0]] += 1;
                slot_of.insert(&inst.outputs[0], inputs[0]);
                continue;
            }

            if let Some(stage) = Stage::from_op(&inst.op) {
                let src = &inst.inputs[0];
                let fusable = strategy.fuse_elementwise
                    && readers.get(src.as_str()) == Some(&1)
                    && !fetched.contains(src.as_str())
                    && aliases[inputs[0]] == 1;
                if let (true, Some(&writer)) = (fusable, map_writer.get(&inputs[0])) {
                    if let Kernel::Map(stages) = &mut steps[writer].kernel {
                        stages.push(stage);
                        fused_stages += 1;
                        slot_of.insert(&inst.outputs[0], inputs[0]);
                        continue;
                    }
                }

                let slot = define(&mut aliases, &mut slot_of, &inst.outputs[0]);
                map_writer.insert(slot, steps.len());
                steps.push(Step {
                    kernel: Kernel::Map(vec![stage]),
                    inputs,
                    outputs: vec![slot],
                    release: Vec::new(),
                });
                continue;
            }

            let kernel = match &inst.op {
                OpKind::Add => Kernel::Add,
                OpKind::Mul => Kernel::Mul,
                OpKind::Div => Kernel::Div,
                OpKind::Sum => Kernel::Sum {
                    chunk: strategy.reduce_chunk,
                },
                OpKind::SumToShape { shape } => Kernel::SumToShape {
                    from: info(&inst.inputs[0])?.shape.clone(),
                    to: shape.clone(),
                },
                OpKind::BroadcastTo { shape } => Kernel::BroadcastTo {
                    from: info(&inst.inputs[0])?.shape.clone(),
                    to: shape.clone(),
                },
                OpKind::Transpose => match info(&inst.inputs[0])?.shape[..] {
                    [rows, cols] => Kernel::Transpose { rows, cols },
                    _ => {
                        return Err(Error::Internal {
                            message: "transpose of a non-matrix survived validation".into(),
                        })
                    },
                },
                OpKind::MatMul => {
                    let lhs = &info(&inst.inputs[0])?.shape;
                    let rhs = &info(&inst.inputs[1])?.shape;
                    match (&lhs[..], &rhs[..]) {
                        (&[m, k], &[_, n]) => Kernel::MatMul { m, k, n },
                        _ => {
                            return Err(Error::Internal {
                                message: "matmul of non-matrices survived validation".into(),
                            })
                        },
                    }
                },
                OpKind::Split { at } => {
                    let shape = &info(&inst.inputs[0])?.shape;
                    Kernel::Split {
                        at_elems: at * Layout::compute_size(&shape[1..]),
                    }
                },
                OpKind::Concat => Kernel::Concat,
                OpKind::Cast { dtype: target } => Kernel::Round(*target),
                other => {
                    return Err(Error::Unsupported(format!(
                        "`{}` has no compiled kernel",
                        other
                    )))
                },
            };

            let mut outputs = Vec::with_capacity(inst.outputs.len());
            for name in &inst.outputs {
                let slot = define(&mut aliases, &mut slot_of, name);
                outputs.push(slot);
            }
            steps.push(Step {
                kernel,
                inputs,
                outputs,
                release: Vec::new(),
            });
        }

        let fetches = program
            .fetches()
            .iter()
            .map(|name| {
                let info = info(name)?;
                let slot = slot_of.get(name.as_str()).copied().ok_or_else(|| Error::Internal {
                    message: format!("fetch `{}` has no slot", name),
                })?;
                Ok(Fetch {
                    slot,
                    shape: info.shape.clone(),
                    dtype: info.dtype,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let num_slots = aliases.len();
        assign_releases(&mut steps, &fetches, num_slots);

        Ok(Self {
            precision: strategy.precision,
            num_slots,
            feed_slots,
            constants,
            steps,
            fetches,
            fused_stages,
        })
    }

    /// Runs the plan. Feeds must already match the program's declarations.
    pub(crate) fn execute(&self, feeds: &[HostTensor]) -> Result<Vec<HostTensor>> {
        let dtype = self.precision.dtype();
        let mut slots: Vec<Option<Buffer>> = vec![None; self.num_slots];
        for (&slot, feed) in self.feed_slots.iter().zip(feeds) {
            slots[slot] = Some(feed.buffer().to_dtype(dtype));
        }
        for (slot, buffer) in &self.constants {
            slots[*slot] = Some(buffer.clone());
        }

        for step in &self.steps {
            let outputs = {
                let inputs = step
                    .inputs
                    .iter()
                    .map(|&slot| read(&slots, slot))
                    .collect::<Result<Vec<_>>>()?;
                step.kernel.apply(&inputs)?
            };
            for (&slot, buffer) in step.outputs.iter().zip(outputs) {
                slots[slot] = Some(buffer);
            }
            for &slot in &step.release {
                slots[slot] = None;
            }
        }

        self.fetches
            .iter()
            .map(|fetch| HostTensor::new(read(&slots, fetch.slot)?.to_dtype(fetch.dtype), &fetch.shape))
            .collect()
    }
}

fn define<'a>(aliases: &mut Vec<usize>, slot_of: &mut HashMap<&'a str, usize>, name: &'a str) -> usize {
    aliases.push(1);
    let slot = aliases.len() - 1;
    slot_of.insert(name, slot);
    slot
}

fn read(slots: &[Option<Buffer>], slot: usize) -> Result<&Buffer> {
    slots
        .get(slot)
        .and_then(Option::as_ref)
        .ok_or_else(|| Error::Internal {
            message: format!("slot {} read after release", slot),
        })
}

/// Frees every non-fetched slot right after its last reader, and step
/// outputs nobody reads right after they are written.
fn assign_releases(steps: &mut [Step], fetches: &[Fetch], num_slots: usize) {
    let kept: HashSet<usize> = fetches.iter().map(|f| f.slot).collect();
    let mut last_use: Vec<Option<usize>> = vec![None; num_slots];
    for (i, step) in steps.iter().enumerate() {
        for &slot in step.inputs.iter().chain(&step.outputs) {
            last_use[slot] = Some(i);
        }
    }
    for (slot, last) in last_use.into_iter().enumerate() {
        if let Some(i) = last {
            if !kept.contains(&slot) {
                steps[i].release.push(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;

    fn chain() -> Result<Program> {
        ProgramBuilder::new()
            .feed("x", &[4], DType::F32)
            .op(OpKind::Exp, &["x"], "a")
            .op(OpKind::Scale { factor: 2.0 }, &["a"], "b")
            .op(OpKind::Tanh, &["b"], "c")
            .op(OpKind::Sum, &["c"], "s")
            .fetch("s")
            .build()
    }

    #[test]
    fn fuses_elementwise_chains() -> Result<()> {
        let plan = CompiledPlan::compile(&chain()?, &CompileStrategy::default())?;
        assert_eq!(plan.kernel_names(), vec!["map", "sum"]);
        assert_eq!(plan.fused_stages(), 2);

        let unfused = CompiledPlan::compile(&chain()?, &CompileStrategy::default().with_fuse_elementwise(false))?;
        assert_eq!(unfused.kernel_names(), vec!["map", "map", "map", "sum"]);
        assert_eq!(unfused.fused_stages(), 0);
        Ok(())
    }

    #[test]
    fn fetched_intermediates_are_not_fused_over() -> Result<()> {
        let program = ProgramBuilder::new()
            .feed("x", &[4], DType::F32)
            .op(OpKind::Exp, &["x"], "a")
            .op(OpKind::Tanh, &["a"], "b")
            .fetch("a")
            .fetch("b")
            .build()?;
        let plan = CompiledPlan::compile(&program, &CompileStrategy::default())?;
        assert_eq!(plan.num_steps(), 2);

        let x = HostTensor::from_vec(vec![0.0f32, 1.0, -1.0, 0.5], &[4])?;
        let out = plan.execute(&[x])?;
        assert_eq!(out[0].to_vec_f32()[0], 1.0);
        assert!((out[1].to_vec_f32()[1] - 1.0f32.exp().tanh()).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn narrowing_casts_round() -> Result<()> {
        let program = ProgramBuilder::new()
            .feed("x", &[3], DType::F32)
            .op(OpKind::Cast { dtype: DType::F16 }, &["x"], "half")
            .op(OpKind::Cast { dtype: DType::F32 }, &["half"], "back")
            .op(OpKind::Scale { factor: 1.0 }, &["back"], "y")
            .fetch("y")
            .build()?;
        let plan = CompiledPlan::compile(&program, &CompileStrategy::default())?;
        assert_eq!(plan.kernel_names(), vec!["round", "map"]);

        // 1 + 2^-12 is below half precision
        let x = HostTensor::from_vec(vec![1.0f32 + 2.0f32.powi(-12), 0.1, 3.0], &[3])?;
        let y = plan.execute(&[x])?[0].to_vec_f32();
        assert_eq!(y[0], 1.0);
        assert_eq!(y[1], 0.099975586);
        assert_eq!(y[2], 3.0);

        let half_plan = CompiledPlan::compile(&program, &CompileStrategy::default().with_precision(Precision::F16))?;
        assert_eq!(half_plan.kernel_names(), vec!["map"]);
        Ok(())
    }

    #[test]
    fn releases_dead_slots() -> Result<()> {
        let program = ProgramBuilder::new()
            .feed("x", &[3, 2], DType::F32)
            .op_multi(OpKind::Split { at: 1 }, &["x"], &["head", "tail"])
            .op(OpKind::Sum, &["head"], "s")
            .fetch("s")
            .build()?;
        let plan = CompiledPlan::compile(&program, &CompileStrategy::default())?;
        assert_eq!(plan.steps[0].release.len(), 2);
        assert_eq!(plan.steps[1].release, vec![1]);

        let x = HostTensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2])?;
        assert_eq!(plan.execute(&[x])?[0].to_vec_f32(), vec![3.0]);
        Ok(())
    }
}
