//! CallResource: invoke a named resource with its own parameter scope.

use sitemap_types::{Result, SitemapError};

use crate::context::{InvokeContext, Scope};
use crate::environment::Environment;
use crate::nodes::{invoke_sequence, NodeOutcome, ResourceId};
use crate::variables::{resolve_parameters, ParameterResolvers, VariableResolver};

#[derive(Debug)]
pub enum CallTarget {
    /// Resolved when the tree was built.
    Static(ResourceId),
    /// Resolved by name on every invocation.
    Dynamic(VariableResolver),
}

#[derive(Debug)]
pub struct CallResourceNode {
    pub target: CallTarget,
    pub parameters: ParameterResolvers,
}

impl CallResourceNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let processor = ctx.processor();
        let resource = match &self.target {
            CallTarget::Static(id) => processor.resource(*id),
            CallTarget::Dynamic(name) => {
                let name = name.resolve(ctx.scopes(), env)?;
                processor.resource_by_name(&name).ok_or_else(|| {
                    SitemapError::processing("call", format!("no resource named '{name}'"))
                })?
            }
        };

        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;
        tracing::debug!(resource = %resource.name, "Calling resource");

        ctx.push_scope(Scope::new(
            None,
            parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        let result = invoke_sequence(&resource.children, env, ctx);
        ctx.pop_scope();
        result
    }
}
