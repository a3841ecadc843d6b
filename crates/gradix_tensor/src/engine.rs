use crate::{
    graph::{GradFn, Graph, NodeId, OpKind},
    AccumulationOrder, Context, Tensor, TensorId,
};
use gradix_core::error::{Error, Result};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

// ────────────────────────────────────────────────────────────────────────────
//  Requests
// ────────────────────────────────────────────────────────────────────────────

/// Result entry for one requested input.
///
/// `NoGradient` marks an input the outputs do not depend on. It is never
/// the same thing as a zero-valued gradient.
#[derive(Clone, Debug)]
pub enum Gradient {
    Value(Tensor),
    NoGradient,
}

impl Gradient {
    pub fn tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Value(t) => Some(t),
            Self::NoGradient => None,
        }
    }

    pub fn into_tensor(self) -> Option<Tensor> {
        match self {
            Self::Value(t) => Some(t),
            Self::NoGradient => None,
        }
    }

    pub fn is_no_gradient(&self) -> bool {
        matches!(self, Self::NoGradient)
    }
}

#[derive(Clone, Debug, Default)]
pub struct GradOptions {
    /// One seed per output; `None` entries (or no list at all) seed ones.
    pub grad_outputs: Option<Vec<Option<Tensor>>>,
    /// Tensors gradients must not flow through.
    pub no_grad_vars: Vec<Tensor>,
    /// Keep the visited nodes usable for another pass. Defaults to
    /// `create_graph`.
    pub retain_graph: Option<bool>,
    /// Record the backward computation so its results can be
    /// differentiated again.
    pub create_graph: bool,
    /// Return `Gradient::NoGradient` for unreachable inputs instead of
    /// failing with `UnusedInput`.
    pub allow_unused: bool,
}

impl GradOptions {
    pub fn grad_outputs(mut self, grad_outputs: Vec<Option<Tensor>>) -> Self {
        self.grad_outputs = Some(grad_outputs);
        self
    }

    pub fn no_grad_vars(mut self, no_grad_vars: Vec<Tensor>) -> Self {
        self.no_grad_vars = no_grad_vars;
        self
    }

    pub fn retain_graph(mut self, retain_graph: bool) -> Self {
        self.retain_graph = Some(retain_graph);
        self
    }

    pub fn create_graph(mut self, create_graph: bool) -> Self {
        self.create_graph = create_graph;
        self
    }

    pub fn allow_unused(mut self, allow_unused: bool) -> Self {
        self.allow_unused = allow_unused;
        self
    }
}

/// `d(outputs) / d(inputs)` request handed to [`Context::grad`].
#[derive(Clone, Debug)]
pub struct GradRequest {
    pub outputs: Vec<Tensor>,
    pub inputs: Vec<Tensor>,
    pub options: GradOptions,
}

impl GradRequest {
    pub fn new(outputs: Vec<Tensor>, inputs: Vec<Tensor>) -> Self {
        Self {
            outputs,
            inputs,
            options: GradOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GradOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct BackwardOptions {
    pub retain_graph: bool,
    /// Gradient of the root; ones when absent.
    pub seed: Option<Tensor>,
}

impl BackwardOptions {
    pub fn retain_graph(mut self, retain_graph: bool) -> Self {
        self.retain_graph = retain_graph;
        self
    }

    pub fn seed(mut self, seed: Tensor) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Computes the gradients of `outputs` with respect to `inputs` in the
/// context the outputs belong to.
pub fn grad(outputs: &[&Tensor], inputs: &[&Tensor], options: GradOptions) -> Result<Vec<Gradient>> {
    let first = outputs
        .first()
        .ok_or_else(|| Error::Argument("`outputs` must contain at least one tensor".into()))?;
    let ctx = first.context()?;
    let request = GradRequest {
        outputs: outputs.iter().map(|&t| t.clone()).collect(),
        inputs: inputs.iter().map(|&t| t.clone()).collect(),
        options,
    };
    ctx.grad(&request)
}

// ────────────────────────────────────────────────────────────────────────────
//  Accumulation
// ────────────────────────────────────────────────────────────────────────────

/// Origin of one gradient contribution. Seeds order before every node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Source {
    Seed(usize),
    Node(NodeId),
}

struct GradBuffer {
    order: AccumulationOrder,
    slots: HashMap<TensorId, Vec<(Source, Tensor)>>,
}

impl GradBuffer {
    fn new(order: AccumulationOrder) -> Self {
        Self {
            order,
            slots: HashMap::new(),
        }
    }

    fn push(&mut self, id: TensorId, source: Source, grad: Tensor) -> Result<()> {
        let slot = self.slots.entry(id).or_default();
        match self.order {
            AccumulationOrder::Insertion => {
                let next = match slot.pop() {
                    Some((_, acc)) => acc.add(&grad)?,
                    None => grad,
                };
                slot.push((source, next));
            },
            AccumulationOrder::Sorted => slot.push((source, grad)),
        }
        Ok(())
    }

    /// Collapses every contribution to `id` into one tensor.
    fn resolve(&mut self, id: TensorId) -> Result<Option<Tensor>> {
        let slot = match self.slots.get_mut(&id) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        if slot.len() > 1 {
            slot.sort_by_key(|(source, _)| *source);
            let mut parts = std::mem::take(slot).into_iter();
            if let Some((source, mut acc)) = parts.next() {
                for (_, grad) in parts {
                    acc = acc.add(&grad)?;
                }
                slot.push((source, acc));
            }
        }
        Ok(slot.first().map(|(_, t)| t.clone()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Planning
// ────────────────────────────────────────────────────────────────────────────

struct Step {
    op: OpKind,
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
    grad_fn: GradFn,
    /// Per input slot: does gradient flow into it.
    flowing: Vec<bool>,
    /// Per input slot: producer, when that producer is part of the plan.
    producers: Vec<Option<NodeId>>,
}

struct Plan {
    steps: BTreeMap<NodeId, Step>,
    pending: HashMap<NodeId, usize>,
    reached: HashSet<TensorId>,
}

struct Flow<'a> {
    terminators: &'a HashSet<TensorId>,
}

impl Flow<'_> {
    fn passes(&self, tensor: &Tensor) -> bool {
        !tensor.stop_gradient() && !self.terminators.contains(&tensor.id())
    }
}

/// Selects the nodes that carry gradient from the seeded outputs to at
/// least one target, and checks each of them can run.
fn build_plan(graph: &Graph, seeded: &[&Tensor], targets: &HashSet<TensorId>, flow: &Flow<'_>) -> Result<Plan> {
    // every tensor gradient can reach, and the nodes producing them
    let mut visited = HashSet::new();
    let mut reachable = HashSet::new();
    let mut stack: Vec<Tensor> = seeded.iter().map(|&t| t.clone()).collect();
    while let Some(tensor) = stack.pop() {
        if !visited.insert(tensor.id()) {
            continue;
        }
        if let Some(nid) = graph.producer(tensor.id()) {
            if reachable.insert(nid) {
                if let Some(node) = graph.node(nid) {
                    stack.extend(node.inputs.iter().filter(|t| flow.passes(t)).cloned());
                }
            }
        }
    }

    let mut consumers: HashMap<TensorId, Vec<NodeId>> = HashMap::new();
    for &nid in &reachable {
        if let Some(node) = graph.node(nid) {
            for input in node.inputs.iter().filter(|t| flow.passes(t)) {
                consumers.entry(input.id()).or_default().push(nid);
            }
        }
    }

    // keep the nodes downstream of a reached target
    let reached: HashSet<TensorId> = targets.iter().copied().filter(|id| visited.contains(id)).collect();
    let mut useful = HashSet::new();
    let mut queue: Vec<TensorId> = reached.iter().copied().collect();
    let mut seen: HashSet<TensorId> = queue.iter().copied().collect();
    while let Some(tid) = queue.pop() {
        for &nid in consumers.get(&tid).into_iter().flatten() {
            if useful.insert(nid) {
                if let Some(node) = graph.node(nid) {
                    for output in &node.outputs {
                        if seen.insert(output.id()) {
                            queue.push(output.id());
                        }
                    }
                }
            }
        }
    }

    let mut ordered: Vec<NodeId> = useful.iter().copied().collect();
    ordered.sort();

    let mut steps = BTreeMap::new();
    let mut pending: HashMap<NodeId, usize> = ordered.iter().map(|&nid| (nid, 0)).collect();
    for nid in ordered {
        let node = graph.node(nid).ok_or_else(|| Error::Internal {
            message: format!("node {} vanished during planning", nid.index()),
        })?;
        if node.released {
            return Err(Error::GraphConsumed {
                op: node.op.name().to_string(),
            });
        }
        let grad_fn = node.grad_fn.clone().ok_or_else(|| Error::NoGradientDefined {
            op: node.op.name().to_string(),
        })?;

        let flowing: Vec<bool> = node.inputs.iter().map(|t| flow.passes(t)).collect();
        let producers: Vec<Option<NodeId>> = node
            .inputs
            .iter()
            .zip(&flowing)
            .map(|(t, &flows)| {
                graph
                    .producer(t.id())
                    .filter(|p| flows && useful.contains(p))
            })
            .collect();
        for producer in producers.iter().flatten() {
            if let Some(count) = pending.get_mut(producer) {
                *count += 1;
            }
        }

        steps.insert(
            nid,
            Step {
                op: node.op.clone(),
                inputs: node.inputs.clone(),
                outputs: node.outputs.clone(),
                grad_fn,
                flowing,
                producers,
            },
        );
    }

    Ok(Plan {
        steps,
        pending,
        reached,
    })
}

// ────────────────────────────────────────────────────────────────────────────
//  Traversal
// ────────────────────────────────────────────────────────────────────────────

struct Run<'a> {
    outputs: &'a [Tensor],
    seeds: Vec<Option<Tensor>>,
    targets: &'a [Tensor],
    terminators: HashSet<TensorId>,
    create_graph: bool,
    retain_graph: bool,
    allow_unused: bool,
}

impl Context {
    /// Computes the gradients described by `request`.
    ///
    /// Arguments are validated, unreachable inputs reported and every node
    /// on the path checked before any gradient function runs. Nodes are
    /// released only once the whole request succeeded, and no stored
    /// gradient is touched.
    pub fn grad(&self, request: &GradRequest) -> Result<Vec<Gradient>> {
        let GradRequest {
            outputs,
            inputs,
            options,
        } = request;

        if outputs.is_empty() {
            return Err(Error::Argument("`outputs` must contain at least one tensor".into()));
        }
        if inputs.is_empty() {
            return Err(Error::Argument("`inputs` must contain at least one tensor".into()));
        }
        let all = outputs
            .iter()
            .chain(inputs)
            .chain(&options.no_grad_vars)
            .chain(options.grad_outputs.iter().flatten().flatten());
        for tensor in all {
            if !tensor.belongs_to(self) {
                return Err(Error::Argument(format!(
                    "tensor {} belongs to another context",
                    tensor.label()
                )));
            }
        }

        let seeds = match &options.grad_outputs {
            Some(grad_outputs) => {
                if grad_outputs.len() != outputs.len() {
                    return Err(Error::Argument(format!(
                        "`grad_outputs` has {} entries but there are {} outputs",
                        grad_outputs.len(),
                        outputs.len()
                    )));
                }
                for (index, (output, seed)) in outputs.iter().zip(grad_outputs).enumerate() {
                    if let Some(seed) = seed {
                        if seed.shape() != output.shape() || seed.dtype() != output.dtype() {
                            return Err(Error::Argument(format!(
                                "grad_outputs[{}] is {:?} {:?} but output {} is {:?} {:?}",
                                index,
                                seed.dtype(),
                                seed.shape(),
                                output.label(),
                                output.dtype(),
                                output.shape()
                            )));
                        }
                    }
                }
                grad_outputs.clone()
            },
            None => vec![None; outputs.len()],
        };

        let create_graph = options.create_graph;
        let retain_graph = options.retain_graph.unwrap_or(create_graph);
        let span = tracing::info_span!(
            "backward",
            outputs = outputs.len(),
            inputs = inputs.len(),
            create_graph,
            retain_graph,
            order = self.accumulation_order().as_str()
        );
        let _enter = span.enter();
        tracing::debug!(no_grad_vars = options.no_grad_vars.len(), "grad request");

        let grads = self.run(Run {
            outputs,
            seeds,
            targets: inputs,
            terminators: options.no_grad_vars.iter().map(|t| t.id()).collect(),
            create_graph,
            retain_graph,
            allow_unused: options.allow_unused,
        })?;

        Ok(grads
            .into_iter()
            .map(|g| match g {
                Some(t) => Gradient::Value(t),
                None => Gradient::NoGradient,
            })
            .collect())
    }

    fn run(&self, run: Run<'_>) -> Result<Vec<Option<Tensor>>> {
        let flow = Flow {
            terminators: &run.terminators,
        };
        let target_ids: HashSet<TensorId> = run.targets.iter().map(|t| t.id()).collect();
        let seeded: Vec<(usize, &Tensor)> = run
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, t)| flow.passes(t))
            .collect();

        let mut plan = {
            let graph = self.graph()?;
            let roots: Vec<&Tensor> = seeded.iter().map(|&(_, t)| t).collect();
            build_plan(&graph, &roots, &target_ids, &flow)?
        };

        if !run.allow_unused {
            if let Some((index, unused)) = run
                .targets
                .iter()
                .enumerate()
                .find(|(_, t)| !plan.reached.contains(&t.id()))
            {
                return Err(Error::UnusedInput {
                    index,
                    tensor: unused.label(),
                });
            }
        }

        let _mode = self.grad_mode(run.create_graph);
        let mut buffer = GradBuffer::new(self.accumulation_order());
        for &(index, output) in &seeded {
            let seed = match &run.seeds[index] {
                Some(seed) => seed.clone(),
                None => {
                    let ones = self.ones_like(output)?;
                    ones.set_stop_gradient(!run.create_graph);
                    ones
                },
            };
            buffer.push(output.id(), Source::Seed(index), seed)?;
        }

        let mut ready: BinaryHeap<NodeId> = plan
            .pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&nid, _)| nid)
            .collect();
        let mut visited = Vec::with_capacity(plan.steps.len());

        while let Some(nid) = ready.pop() {
            let step = plan.steps.remove(&nid).ok_or_else(|| Error::Internal {
                message: format!("node {} scheduled twice", nid.index()),
            })?;
            visited.push(nid);

            let upstream = step
                .outputs
                .iter()
                .map(|o| buffer.resolve(o.id()))
                .collect::<Result<Vec<_>>>()?;

            if upstream.iter().any(Option::is_some) {
                tracing::trace!(node = nid.index(), op = step.op.name(), "visit");
                let grads = (step.grad_fn)(self, &step.inputs, &step.outputs, &upstream)?;
                if grads.len() != step.inputs.len() {
                    return Err(Error::Internal {
                        message: format!(
                            "grad function of `{}` returned {} gradients for {} inputs",
                            step.op,
                            grads.len(),
                            step.inputs.len()
                        ),
                    });
                }

                for (slot, grad) in grads.into_iter().enumerate() {
                    let input = &step.inputs[slot];
                    let needed = target_ids.contains(&input.id()) || step.producers[slot].is_some();
                    match grad {
                        Some(grad) if step.flowing[slot] && needed => {
                            if grad.shape() != input.shape() {
                                return Err(Error::DimensionMismatch {
                                    expected: input.shape().to_vec(),
                                    got: grad.shape().to_vec(),
                                });
                            }
                            if grad.dtype() != input.dtype() {
                                return Err(Error::DTypeMismatch {
                                    expected: input.dtype(),
                                    got: grad.dtype(),
                                });
                            }
                            buffer.push(input.id(), Source::Node(nid), grad)?;
                        },
                        _ => {},
                    }
                }
            }

            for producer in step.producers.iter().flatten() {
                if let Some(count) = plan.pending.get_mut(producer) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(*producer);
                    }
                }
            }
        }

        if !plan.steps.is_empty() {
            return Err(Error::Internal {
                message: format!("{} nodes were never scheduled", plan.steps.len()),
            });
        }

        let mut results = Vec::with_capacity(run.targets.len());
        for target in run.targets {
            if !plan.reached.contains(&target.id()) {
                results.push(None);
                continue;
            }
            let grad = match buffer.resolve(target.id())? {
                Some(grad) => grad,
                None => {
                    let zeros = self.zeros_like(target)?;
                    zeros.set_stop_gradient(!run.create_graph);
                    zeros
                },
            };
            results.push(Some(if run.create_graph { grad } else { grad.detach()? }));
        }

        if !run.retain_graph {
            self.graph()?.release(visited);
        }

        Ok(results)
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Stored gradients
// ────────────────────────────────────────────────────────────────────────────

impl Tensor {
    /// Accumulates `d(self)/d(leaf)` into the stored gradient of every leaf
    /// that requires one, seeding with ones.
    pub fn backward(&self) -> Result<()> {
        self.backward_with(BackwardOptions::default())
    }

    pub fn backward_with(&self, options: BackwardOptions) -> Result<()> {
        let ctx = self.context()?;
        if self.stop_gradient() {
            tracing::warn!(tensor = %self.label(), "backward from a tensor that does not require grad");
            return Ok(());
        }
        if let Some(seed) = &options.seed {
            if !seed.belongs_to(&ctx) || seed.shape() != self.shape() || seed.dtype() != self.dtype() {
                return Err(Error::Argument(format!(
                    "backward seed must be a {:?} {:?} tensor of the same context",
                    self.dtype(),
                    self.shape()
                )));
            }
        }

        let span = tracing::info_span!("backward", root = %self.label(), retain_graph = options.retain_graph);
        let _enter = span.enter();

        let leaves = {
            let graph = ctx.graph()?;
            leaves_of(&graph, self)
        };
        let outputs = [self.clone()];
        let grads = ctx.run(Run {
            outputs: &outputs,
            seeds: vec![options.seed],
            targets: &leaves,
            terminators: HashSet::new(),
            create_graph: false,
            retain_graph: options.retain_graph,
            allow_unused: true,
        })?;

        // every sum is computed before any stored gradient changes
        let _guard = ctx.no_grad();
        let mut staged = Vec::with_capacity(leaves.len());
        for (leaf, grad) in leaves.iter().zip(grads) {
            if let Some(grad) = grad {
                staged.push((leaf, leaf.summed_grad(&grad)?));
            }
        }
        for (leaf, sum) in staged {
            leaf.store_grad(sum)?;
        }
        tracing::debug!(leaves = leaves.len(), "stored gradients updated");

        Ok(())
    }
}

/// Leaves requiring grad that `root` depends on, in discovery order.
fn leaves_of(graph: &Graph, root: &Tensor) -> Vec<Tensor> {
    let mut leaves = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(tensor) = stack.pop() {
        if tensor.stop_gradient() || !visited.insert(tensor.id()) {
            continue;
        }
        match graph.producer(tensor.id()).and_then(|nid| graph.node(nid)) {
            Some(node) => stack.extend(node.inputs.iter().rev().cloned()),
            None => leaves.push(tensor),
        }
    }
    leaves
}
