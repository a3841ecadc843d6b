use gradix_core::{
    buffer::Buffer,
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use gradix_tensor::OpKind;
use std::{
    collections::{hash_map::DefaultHasher, HashMap, HashSet},
    hash::{Hash, Hasher},
};

// ────────────────────────────────────────────────────────────────────────────
//  Values
// ────────────────────────────────────────────────────────────────────────────

/// Named input supplied by the caller at run time.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feed {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

/// Named value baked into the program.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constant {
    pub name: String,
    pub shape: Vec<usize>,
    pub buffer: Buffer,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    pub op: OpKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Shape and dtype of a program value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueInfo {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

// ────────────────────────────────────────────────────────────────────────────
//  Program
// ────────────────────────────────────────────────────────────────────────────

/// A flattened, graph-free op sequence over named values.
///
/// Instructions are in execution order and every value is defined exactly
/// once, by a feed, a constant or one instruction output.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    feeds: Vec<Feed>,
    constants: Vec<Constant>,
    instructions: Vec<Instruction>,
    fetches: Vec<String>,
}

impl Program {
    pub(crate) fn new(
        feeds: Vec<Feed>,
        constants: Vec<Constant>,
        instructions: Vec<Instruction>,
        fetches: Vec<String>,
    ) -> Result<Self> {
        let program = Self {
            feeds,
            constants,
            instructions,
            fetches,
        };
        program.infer()?;
        Ok(program)
    }

    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn fetches(&self) -> &[String] {
        &self.fetches
    }

    pub fn feed_index(&self, name: &str) -> Option<usize> {
        self.feeds.iter().position(|f| f.name == name)
    }

    /// Stable hash of the whole program, constants included.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        format!("{:?}", self).hash(&mut hasher);
        hasher.finish()
    }

    /// Shapes and dtypes of every value, checking that each instruction is
    /// well formed and every name is defined once before use.
    pub fn infer(&self) -> Result<HashMap<String, ValueInfo>> {
        let mut values: HashMap<String, ValueInfo> = HashMap::new();
        let define = |values: &mut HashMap<String, ValueInfo>, name: &str, info: ValueInfo| {
            if values.insert(name.to_string(), info).is_some() {
                return Err(Error::InvalidGraph(format!("value `{}` is defined twice", name)));
            }
            Ok(())
        };

        for feed in &self.feeds {
            define(
                &mut values,
                &feed.name,
                ValueInfo {
                    shape: feed.shape.clone(),
                    dtype: feed.dtype,
                },
            )?;
        }
        for constant in &self.constants {
            if Layout::compute_size(&constant.shape) != constant.buffer.len() {
                return Err(Error::IncompatibleShape(format!(
                    "constant `{}` has {} elements but shape {:?}",
                    constant.name,
                    constant.buffer.len(),
                    constant.shape
                )));
            }
            define(
                &mut values,
                &constant.name,
                ValueInfo {
                    shape: constant.shape.clone(),
                    dtype: constant.buffer.dtype(),
                },
            )?;
        }

        for inst in &self.instructions {
            let inputs = inst
                .inputs
                .iter()
                .map(|name| {
                    values
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::Argument(format!("`{}` reads undefined value `{}`", inst.op, name)))
                })
                .collect::<Result<Vec<_>>>()?;
            let outputs = infer_op(&inst.op, &inputs)?;
            if outputs.len() != inst.outputs.len() {
                return Err(Error::InvalidGraph(format!(
                    "`{}` produces {} values but names {}",
                    inst.op,
                    outputs.len(),
                    inst.outputs.len()
                )));
            }
            for (name, info) in inst.outputs.iter().zip(outputs) {
                define(&mut values, name, info)?;
            }
        }

        for fetch in &self.fetches {
            if !values.contains_key(fetch) {
                return Err(Error::Argument(format!("fetch `{}` is not defined", fetch)));
            }
        }

        Ok(values)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize program to JSON: {}", e)))
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let program: Self = serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Failed to deserialize program from JSON: {}", e)))?;
        program.infer()?;
        Ok(program)
    }

    #[cfg(feature = "serde")]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::SerializationError(format!("Failed to serialize program: {}", e)))
    }

    #[cfg(feature = "serde")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (program, _): (Self, usize) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| Error::DeserializationError(format!("Failed to deserialize program: {}", e)))?;
        program.infer()?;
        Ok(program)
    }
}

fn arity(op: &OpKind, inputs: &[ValueInfo], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(Error::InvalidGraph(format!(
            "`{}` takes {} inputs, got {}",
            op,
            expected,
            inputs.len()
        )));
    }
    Ok(())
}

/// Output shapes and dtypes of `op` applied to `inputs`.
pub(crate) fn infer_op(op: &OpKind, inputs: &[ValueInfo]) -> Result<Vec<ValueInfo>> {
    let same = |shape: Vec<usize>| -> Result<Vec<ValueInfo>> {
        Ok(vec![ValueInfo {
            shape,
            dtype: inputs[0].dtype,
        }])
    };

    match op {
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
            arity(op, inputs, 2)?;
            if inputs[0].dtype != inputs[1].dtype {
                return Err(Error::DTypeMismatch {
                    expected: inputs[0].dtype,
                    got: inputs[1].dtype,
                });
            }
            same(Layout::broadcast_shape(&inputs[0].shape, &inputs[1].shape)?)
        },
        op if op.is_elementwise_unary() => {
            arity(op, inputs, 1)?;
            same(inputs[0].shape.clone())
        },
        OpKind::Sum | OpKind::Mean => {
            arity(op, inputs, 1)?;
            same(vec![])
        },
        OpKind::SumToShape { shape } => {
            arity(op, inputs, 1)?;
            if !Layout::from_shape(shape).can_broadcast_to(&inputs[0].shape) {
                return Err(Error::IncompatibleShape(format!(
                    "cannot sum {:?} down to {:?}",
                    inputs[0].shape, shape
                )));
            }
            same(shape.clone())
        },
        OpKind::BroadcastTo { shape } => {
            arity(op, inputs, 1)?;
            if !Layout::from_shape(&inputs[0].shape).can_broadcast_to(shape) {
                return Err(Error::IncompatibleShape(format!(
                    "cannot broadcast {:?} to {:?}",
                    inputs[0].shape, shape
                )));
            }
            same(shape.clone())
        },
        OpKind::Reshape { shape } => {
            arity(op, inputs, 1)?;
            let mut layout = Layout::from_shape(&inputs[0].shape);
            layout.view(shape)?;
            same(shape.clone())
        },
        OpKind::Transpose => {
            arity(op, inputs, 1)?;
            match inputs[0].shape[..] {
                [rows, cols] => same(vec![cols, rows]),
                _ => Err(Error::DimensionMismatch {
                    expected: vec![0, 0],
                    got: inputs[0].shape.clone(),
                }),
            }
        },
        OpKind::MatMul => {
            arity(op, inputs, 2)?;
            match (&inputs[0].shape[..], &inputs[1].shape[..]) {
                (&[m, k], &[k2, n]) if k == k2 && inputs[0].dtype == inputs[1].dtype => same(vec![m, n]),
                _ => Err(Error::IncompatibleShape(format!(
                    "cannot multiply {:?} by {:?}",
                    inputs[0].shape, inputs[1].shape
                ))),
            }
        },
        OpKind::Split { at } => {
            arity(op, inputs, 1)?;
            let rows = inputs[0].shape.first().copied().unwrap_or(0);
            if *at == 0 || *at >= rows {
                return Err(Error::Argument(format!(
                    "split point {} must lie strictly inside dim 0 of size {}",
                    at, rows
                )));
            }
            let mut head = inputs[0].shape.clone();
            head[0] = *at;
            let mut tail = inputs[0].shape.clone();
            tail[0] = rows - at;
            Ok(vec![
                ValueInfo {
                    shape: head,
                    dtype: inputs[0].dtype,
                },
                ValueInfo {
                    shape: tail,
                    dtype: inputs[0].dtype,
                },
            ])
        },
        OpKind::Concat => {
            let first = inputs
                .first()
                .ok_or_else(|| Error::InvalidGraph("`concat` takes at least one input".into()))?;
            if first.shape.is_empty() {
                return Err(Error::DimensionOutOfBounds { dim: 0, ndim: 0 });
            }
            let mut rows = 0;
            for input in inputs {
                if input.shape.is_empty() || input.shape[1..] != first.shape[1..] || input.dtype != first.dtype {
                    return Err(Error::DimensionMismatch {
                        expected: first.shape.clone(),
                        got: input.shape.clone(),
                    });
                }
                rows += input.shape[0];
            }
            let mut shape = first.shape.clone();
            shape[0] = rows;
            same(shape)
        },
        OpKind::Cast { dtype } => {
            arity(op, inputs, 1)?;
            Ok(vec![ValueInfo {
                shape: inputs[0].shape.clone(),
                dtype: *dtype,
            }])
        },
        OpKind::Custom(name) => Err(Error::Unsupported(format!(
            "custom op `{}` cannot be part of a program",
            name
        ))),
        // elementwise unary ops are matched by the guard above
        _ => Err(Error::Unsupported(format!("op `{}` cannot be part of a program", op))),
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Builder
// ────────────────────────────────────────────────────────────────────────────

/// Assembles a [`Program`] by name.
///
/// ```ignore
/// let program = ProgramBuilder::new()
///     .feed("x", &[4], DType::F32)
///     .op(OpKind::Exp, &["x"], "y")
///     .op(OpKind::Sum, &["y"], "total")
///     .fetch("total")
///     .build()?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    feeds: Vec<Feed>,
    constants: Vec<Constant>,
    instructions: Vec<Instruction>,
    fetches: Vec<String>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(mut self, name: &str, shape: &[usize], dtype: DType) -> Self {
        self.feeds.push(Feed {
            name: name.to_string(),
            shape: shape.to_vec(),
            dtype,
        });
        self
    }

    pub fn constant(mut self, name: &str, shape: &[usize], buffer: Buffer) -> Self {
        self.constants.push(Constant {
            name: name.to_string(),
            shape: shape.to_vec(),
            buffer,
        });
        self
    }

    pub fn op(self, op: OpKind, inputs: &[&str], output: &str) -> Self {
        self.op_multi(op, inputs, &[output])
    }

    pub fn op_multi(mut self, op: OpKind, inputs: &[&str], outputs: &[&str]) -> Self {
        self.instructions.push(Instruction {
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn fetch(mut self, name: &str) -> Self {
        self.fetches.push(name.to_string());
        self
    }

    pub fn build(self) -> Result<Program> {
        let mut seen = HashSet::new();
        if let Some(dup) = self.fetches.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(Error::Argument(format!("fetch `{}` listed twice", dup)));
        }
        Program::new(self.feeds, self.constants, self.instructions, self.fetches)
    }
}
