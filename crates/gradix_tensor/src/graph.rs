use crate::{Context, Tensor, TensorId};
use gradix_core::{
    dtype::DType,
    error::{Error, Result},
};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

// ────────────────────────────────────────────────────────────────────────────
//  Node
// ────────────────────────────────────────────────────────────────────────────

/// Position of a node in its context's graph. Ids grow with creation order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Operator tag recorded on each node, with the attributes needed to replay it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Exp,
    Log,
    Sqrt,
    Square,
    Relu,
    LeakyRelu { alpha: f64 },
    Sigmoid,
    Tanh,
    Scale { factor: f64 },
    AddScalar { value: f64 },
    Sum,
    Mean,
    SumToShape { shape: Vec<usize> },
    BroadcastTo { shape: Vec<usize> },
    Reshape { shape: Vec<usize> },
    Transpose,
    MatMul,
    Split { at: usize },
    Concat,
    Cast { dtype: DType },
    Custom(String),
}

impl OpKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Neg => "neg",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sqrt => "sqrt",
            Self::Square => "square",
            Self::Relu => "relu",
            Self::LeakyRelu { .. } => "leaky_relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Scale { .. } => "scale",
            Self::AddScalar { .. } => "add_scalar",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::SumToShape { .. } => "sum_to_shape",
            Self::BroadcastTo { .. } => "broadcast_to",
            Self::Reshape { .. } => "reshape",
            Self::Transpose => "transpose",
            Self::MatMul => "matmul",
            Self::Split { .. } => "split",
            Self::Concat => "concat",
            Self::Cast { .. } => "cast",
            Self::Custom(name) => name,
        }
    }

    /// Single-input, single-output ops that map each element independently.
    pub fn is_elementwise_unary(&self) -> bool {
        matches!(
            self,
            Self::Neg
                | Self::Exp
                | Self::Log
                | Self::Sqrt
                | Self::Square
                | Self::Relu
                | Self::LeakyRelu { .. }
                | Self::Sigmoid
                | Self::Tanh
                | Self::Scale { .. }
                | Self::AddScalar { .. }
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local gradient function of a node.
///
/// Called with the node's inputs, its outputs and one upstream gradient per
/// output (`None` when nothing flowed into that output). Returns one entry
/// per input, positionally aligned; `None` means no contribution.
pub type GradFn =
    Arc<dyn Fn(&Context, &[Tensor], &[Tensor], &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> + Send + Sync>;

/// Boxes a closure as a [`GradFn`].
pub fn grad_fn<F>(f: F) -> GradFn
where
    F: Fn(&Context, &[Tensor], &[Tensor], &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) op: OpKind,
    pub(crate) inputs: Vec<Tensor>,
    pub(crate) outputs: Vec<Tensor>,
    pub(crate) grad_fn: Option<GradFn>,
    pub(crate) released: bool,
}

/// Read-only view of a recorded node.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub id: NodeId,
    pub op: OpKind,
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    pub has_grad_fn: bool,
    pub released: bool,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            op: node.op.clone(),
            inputs: node.inputs.clone(),
            outputs: node.outputs.clone(),
            has_grad_fn: node.grad_fn.is_some(),
            released: node.released,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Graph
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct Graph {
    nodes: Vec<Node>,
    producers: HashMap<TensorId, NodeId>,
    consumed: HashSet<TensorId>,
}

impl Graph {
    pub(crate) fn add_node(
        &mut self,
        op: OpKind,
        inputs: Vec<Tensor>,
        outputs: Vec<Tensor>,
        grad_fn: Option<GradFn>,
    ) -> Result<NodeId> {
        if inputs.is_empty() {
            return Err(Error::InvalidGraph(format!("`{}` recorded without inputs", op)));
        }
        if outputs.is_empty() {
            return Err(Error::InvalidGraph(format!("`{}` recorded without outputs", op)));
        }

        let mut output_ids = HashSet::with_capacity(outputs.len());
        for output in &outputs {
            if !output_ids.insert(output.id()) {
                return Err(Error::InvalidGraph(format!(
                    "`{}` lists output {} twice",
                    op,
                    output.label()
                )));
            }
            if let Some(producer) = self.producers.get(&output.id()) {
                return Err(Error::InvalidGraph(format!(
                    "output {} of `{}` is already produced by node {}",
                    output.label(),
                    op,
                    producer.0
                )));
            }
        }
        if let Some(input) = inputs.iter().find(|t| output_ids.contains(&t.id())) {
            return Err(Error::InvalidGraph(format!(
                "`{}` consumes its own output {}",
                op,
                input.label()
            )));
        }
        // only a tensor some node already consumed can close a cycle
        let reused = output_ids.iter().any(|id| self.consumed.contains(id));
        if let Some(output) = reused.then(|| self.find_ancestor(&inputs, &output_ids)).flatten() {
            return Err(Error::InvalidGraph(format!(
                "recording `{}` would create a cycle through {}",
                op, output
            )));
        }

        let id = NodeId(self.nodes.len());
        for output in &outputs {
            self.producers.insert(output.id(), id);
        }
        self.consumed.extend(inputs.iter().map(|t| t.id()));
        self.nodes.push(Node {
            id,
            op,
            inputs,
            outputs,
            grad_fn,
            released: false,
        });

        Ok(id)
    }

    /// Walks producers back from `inputs` and returns the first tensor in
    /// `targets` found among their ancestors.
    fn find_ancestor(&self, inputs: &[Tensor], targets: &HashSet<TensorId>) -> Option<TensorId> {
        let mut visited = HashSet::new();
        let mut stack: Vec<&Tensor> = inputs.iter().collect();

        while let Some(tensor) = stack.pop() {
            if !visited.insert(tensor.id()) {
                continue;
            }
            if targets.contains(&tensor.id()) {
                return Some(tensor.id());
            }
            if let Some(&nid) = self.producers.get(&tensor.id()) {
                stack.extend(self.nodes[nid.0].inputs.iter());
            }
        }

        None
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn producer(&self, tid: TensorId) -> Option<NodeId> {
        self.producers.get(&tid).copied()
    }

    /// Drops the grad functions of `ids`; a later traversal through them
    /// fails with `GraphConsumed`.
    pub(crate) fn release(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.grad_fn = None;
                node.released = true;
            }
        }
    }
}
