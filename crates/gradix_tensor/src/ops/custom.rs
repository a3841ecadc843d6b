use crate::{graph::GradFn, ops::apply_in, ops::common_context, Context, OpKind, Tensor};
use gradix_core::{
    buffer::Buffer,
    error::{Error, Result},
    layout::Layout,
};

impl Context {
    /// Runs a user-defined operator and records it like a built-in one.
    ///
    /// `forward` sees detached inputs and runs with recording suspended;
    /// its results become the node's outputs. Without a `grad_fn`, any
    /// backward pass that needs this node fails with `NoGradientDefined`.
    pub fn custom_op<F>(&self, name: &str, inputs: &[&Tensor], forward: F, grad_fn: Option<GradFn>) -> Result<Vec<Tensor>>
    where
        F: FnOnce(&[Tensor]) -> Result<Vec<Tensor>>,
    {
        let ctx = common_context(inputs)?;
        if ctx.id() != self.id() {
            return Err(Error::InvalidGraph(format!(
                "inputs of custom op `{}` belong to another context",
                name
            )));
        }

        let results = {
            let _guard = self.no_grad();
            let detached = inputs.iter().map(|t| t.detach()).collect::<Result<Vec<_>>>()?;
            forward(&detached)?
        };
        if results.is_empty() {
            return Err(Error::InvalidGraph(format!("custom op `{}` returned no outputs", name)));
        }

        let outputs: Vec<(Layout, Buffer)> = results
            .iter()
            .map(|t| (t.layout().clone(), t.buffer().clone()))
            .collect();
        apply_in(self, OpKind::Custom(name.to_string()), inputs, outputs, grad_fn)
    }
}
