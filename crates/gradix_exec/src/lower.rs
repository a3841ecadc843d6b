use crate::program::{Constant, Feed, Instruction, Program};
use gradix_core::error::{Error, Result};
use gradix_tensor::{Context, NodeId, NodeInfo, OpKind, Tensor, TensorId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Flattens the recorded forward computation of `fetches` into a
/// [`Program`].
///
/// Walks producers back from `fetches` and stops at `feeds`; every other
/// leaf it reaches is baked in as a constant. The graph must have been
/// recorded by a context with tracing on (see
/// [`ContextConfig::with_trace`](gradix_tensor::ContextConfig::with_trace)),
/// otherwise ops over constants leave no nodes behind and their results
/// become constants themselves.
///
/// Values are named after their tensors: the tensor name when it is set
/// and unique, the tensor id otherwise. An id already taken by a user name
/// gets a numeric suffix.
pub fn lower(ctx: &Context, feeds: &[&Tensor], fetches: &[&Tensor]) -> Result<Program> {
    if fetches.is_empty() {
        return Err(Error::Argument("nothing to fetch".into()));
    }
    for tensor in feeds.iter().chain(fetches) {
        if tensor.context()?.id() != ctx.id() {
            return Err(Error::Argument(format!(
                "tensor {} belongs to another context",
                tensor.label()
            )));
        }
    }

    let span = tracing::debug_span!("lower", feeds = feeds.len(), fetches = fetches.len());
    let _enter = span.enter();

    let feed_ids: HashSet<TensorId> = feeds.iter().map(|t| t.id()).collect();
    if feed_ids.len() != feeds.len() {
        return Err(Error::Argument("a tensor is fed twice".into()));
    }

    let mut nodes: BTreeMap<NodeId, NodeInfo> = BTreeMap::new();
    let mut leaves: Vec<Tensor> = Vec::new();
    let mut seen: HashSet<TensorId> = HashSet::new();
    let mut stack: Vec<Tensor> = fetches.iter().map(|&t| t.clone()).collect();

    while let Some(tensor) = stack.pop() {
        if !seen.insert(tensor.id()) || feed_ids.contains(&tensor.id()) {
            continue;
        }
        match ctx.producer_of(&tensor)? {
            Some(nid) => {
                if nodes.contains_key(&nid) {
                    continue;
                }
                let node = ctx.node(nid)?;
                if let OpKind::Custom(name) = &node.op {
                    return Err(Error::Unsupported(format!(
                        "custom op `{}` cannot be lowered",
                        name
                    )));
                }
                stack.extend(node.inputs.iter().cloned());
                nodes.insert(nid, node);
            },
            None => leaves.push(tensor),
        }
    }

    let mut names = Names::default();
    for feed in feeds {
        names.claim(feed);
    }
    leaves.sort_by_key(|t| t.id());
    for leaf in &leaves {
        names.claim(leaf);
    }
    for node in nodes.values() {
        for output in &node.outputs {
            names.claim(output);
        }
    }

    let feeds = feeds
        .iter()
        .map(|t| Feed {
            name: names.of(t),
            shape: t.shape().to_vec(),
            dtype: t.dtype(),
        })
        .collect();
    let constants = leaves
        .iter()
        .map(|t| Constant {
            name: names.of(t),
            shape: t.shape().to_vec(),
            buffer: t.buffer().clone(),
        })
        .collect();
    let instructions: Vec<Instruction> = nodes
        .values()
        .map(|node| Instruction {
            op: node.op.clone(),
            inputs: node.inputs.iter().map(|t| names.of(t)).collect(),
            outputs: node.outputs.iter().map(|t| names.of(t)).collect(),
        })
        .collect();
    let fetches = fetches.iter().map(|t| names.of(t)).collect();

    tracing::debug!(
        instructions = instructions.len(),
        constants = leaves.len(),
        "lowered"
    );
    Program::new(feeds, constants, instructions, fetches)
}

#[derive(Default)]
struct Names {
    by_id: HashMap<TensorId, String>,
    taken: HashSet<String>,
}

impl Names {
    fn claim(&mut self, tensor: &Tensor) {
        if self.by_id.contains_key(&tensor.id()) {
            return;
        }
        let name = match tensor.name() {
            Some(name) if !self.taken.contains(&name) => name,
            _ => {
                // a user name may already hold this id's spelling
                let base = tensor.id().to_string();
                let mut name = base.clone();
                let mut k = 1;
                while self.taken.contains(&name) {
                    name = format!("{}_{}", base, k);
                    k += 1;
                }
                name
            },
        };
        self.taken.insert(name.clone());
        self.by_id.insert(tensor.id(), name);
    }

    fn of(&self, tensor: &Tensor) -> String {
        self.by_id
            .get(&tensor.id())
            .cloned()
            .unwrap_or_else(|| tensor.id().to_string())
    }
}
