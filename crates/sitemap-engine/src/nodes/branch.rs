//! Match and Select: the branching nodes.

use sitemap_types::Result;

use crate::component::{Matcher, Resolved, Selector};
use crate::context::{InvokeContext, Scope};
use crate::environment::Environment;
use crate::nodes::{invoke_sequence, NodeOutcome, ProcessingNode};
use crate::variables::{resolve_parameters, ParameterResolvers, VariableResolver};

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MatchNode {
    /// Anchor for `{#name:var}` lookups from descendants.
    pub name: Option<String>,
    pub pattern: VariableResolver,
    pub matcher: Resolved<dyn Matcher>,
    pub parameters: ParameterResolvers,
    pub children: Vec<ProcessingNode>,
}

impl MatchNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let pattern = self.pattern.resolve(ctx.scopes(), env)?;
        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;

        let Some(bindings) = self.matcher.component.matches(&pattern, env, &parameters)? else {
            return Ok(NodeOutcome::NotHandled);
        };
        tracing::debug!(matcher = %self.matcher.name, pattern = %pattern, "Matched");

        ctx.push_scope(Scope::new(self.name.clone(), bindings));
        let result = invoke_sequence(&self.children, env, ctx);
        ctx.pop_scope();
        result
    }
}

// ---------------------------------------------------------------------------
// Select
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SelectCase {
    pub test: VariableResolver,
    pub children: Vec<ProcessingNode>,
}

#[derive(Debug)]
pub struct SelectNode {
    pub selector: Resolved<dyn Selector>,
    pub parameters: ParameterResolvers,
    pub cases: Vec<SelectCase>,
    pub otherwise: Option<Vec<ProcessingNode>>,
}

impl SelectNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;
        let selector = &self.selector.component;
        let switch = match selector.as_switch() {
            Some(s) => Some((s, s.switch_context(env, &parameters)?)),
            None => None,
        };

        for case in &self.cases {
            let test = case.test.resolve(ctx.scopes(), env)?;
            let selected = match &switch {
                Some((s, switch_ctx)) => s.select_in(&test, switch_ctx),
                None => selector.select(&test, env, &parameters)?,
            };
            if selected {
                tracing::debug!(selector = %self.selector.name, test = %test, "Selected");
                return invoke_sequence(&case.children, env, ctx);
            }
        }

        match &self.otherwise {
            Some(children) => invoke_sequence(children, env, ctx),
            None => Ok(NodeOutcome::NotHandled),
        }
    }
}
