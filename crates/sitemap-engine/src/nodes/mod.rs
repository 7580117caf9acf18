//! The compiled, immutable tree: one closed enum over every node kind.

pub mod aggregate;
pub mod branch;
pub mod mount;
pub mod pipeline;
pub mod redirect;
pub mod resource;
pub mod stage;

use std::collections::BTreeMap;

use sitemap_types::Result;

use crate::context::InvokeContext;
use crate::environment::Environment;

pub use aggregate::{AggregateNode, AggregatePart};
pub use branch::{MatchNode, SelectCase, SelectNode};
pub use mount::MountNode;
pub use pipeline::{ErrorHandlerKind, HandleErrorsNode, PipelineNode};
pub use redirect::RedirectNode;
pub use resource::{CallResourceNode, CallTarget};
pub use stage::{GenerateNode, SerializeNode, TransformNode};

/// Reserved label carried by every producer (Generate, Aggregate).
pub const FIRST_POSITION: &str = "first-position";
/// Reserved label carried by every Serialize node.
pub const LAST_POSITION: &str = "last-position";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of invoking a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Nothing matched; an enclosing sequence tries the next sibling.
    NotHandled,
    Handled,
    /// Control jumped to a view subtree; the declared continuation was
    /// abandoned.
    Diverted { view: String, handled: bool },
}

impl NodeOutcome {
    pub fn from_handled(handled: bool) -> Self {
        if handled {
            NodeOutcome::Handled
        } else {
            NodeOutcome::NotHandled
        }
    }

    pub fn is_handled(&self) -> bool {
        match self {
            NodeOutcome::NotHandled => false,
            NodeOutcome::Handled => true,
            NodeOutcome::Diverted { handled, .. } => *handled,
        }
    }

    /// `true` when an enclosing sequence must stop after this outcome.
    pub fn ends_sequence(&self) -> bool {
        !matches!(self, NodeOutcome::NotHandled)
    }
}

// ---------------------------------------------------------------------------
// Views and resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) usize);

/// Requested view name → view subtree reachable from a node.
pub type ViewMap = BTreeMap<String, ViewId>;

/// A named alternate continuation.
#[derive(Debug)]
pub struct View {
    pub name: String,
    pub children: Vec<ProcessingNode>,
}

/// A named sub-routine invoked by CallResource nodes.
#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub children: Vec<ProcessingNode>,
}

// ---------------------------------------------------------------------------
// ProcessingNode
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ProcessingNode {
    Match(MatchNode),
    Select(SelectNode),
    Generate(GenerateNode),
    Transform(TransformNode),
    Serialize(SerializeNode),
    Pipeline(PipelineNode),
    Aggregate(AggregateNode),
    Mount(MountNode),
    CallResource(CallResourceNode),
    RedirectToUri(RedirectNode),
    HandleErrors(HandleErrorsNode),
}

impl ProcessingNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        match self {
            ProcessingNode::Match(n) => n.invoke(env, ctx),
            ProcessingNode::Select(n) => n.invoke(env, ctx),
            ProcessingNode::Generate(n) => n.invoke(env, ctx),
            ProcessingNode::Transform(n) => n.invoke(env, ctx),
            ProcessingNode::Serialize(n) => n.invoke(env, ctx),
            ProcessingNode::Pipeline(n) => n.invoke(env, ctx),
            ProcessingNode::Aggregate(n) => n.invoke(env, ctx),
            ProcessingNode::Mount(n) => n.invoke(env, ctx),
            ProcessingNode::CallResource(n) => n.invoke(env, ctx),
            ProcessingNode::RedirectToUri(n) => n.invoke(env, ctx),
            ProcessingNode::HandleErrors(n) => n.invoke(env, ctx),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ProcessingNode::Match(_) => "match",
            ProcessingNode::Select(_) => "select",
            ProcessingNode::Generate(_) => "generate",
            ProcessingNode::Transform(_) => "transform",
            ProcessingNode::Serialize(_) => "serialize",
            ProcessingNode::Pipeline(_) => "pipeline",
            ProcessingNode::Aggregate(_) => "aggregate",
            ProcessingNode::Mount(_) => "mount",
            ProcessingNode::CallResource(_) => "call",
            ProcessingNode::RedirectToUri(_) => "redirect",
            ProcessingNode::HandleErrors(_) => "handle-errors",
        }
    }

    /// The view subtree this node diverts to when `view` is requested.
    pub fn view_node(&self, view: &str) -> Option<ViewId> {
        let views = match self {
            ProcessingNode::Generate(n) => &n.views,
            ProcessingNode::Transform(n) => &n.views,
            ProcessingNode::Serialize(n) => &n.views,
            ProcessingNode::Aggregate(n) => &n.views,
            _ => return None,
        };
        views.get(view).copied()
    }

    /// `true` when some attribute of this node is resolved per request.
    pub fn has_parameters(&self) -> bool {
        match self {
            ProcessingNode::Match(n) => n.pattern.has_parameters(),
            ProcessingNode::Generate(n) => n.source.as_ref().is_some_and(|s| s.has_parameters()),
            ProcessingNode::Transform(n) => n.source.as_ref().is_some_and(|s| s.has_parameters()),
            ProcessingNode::Serialize(n) => n.source.as_ref().is_some_and(|s| s.has_parameters()),
            ProcessingNode::Aggregate(n) => n.parts.iter().any(|p| p.src.has_parameters()),
            ProcessingNode::Mount(n) => n.src.has_parameters() || n.uri_prefix.has_parameters(),
            ProcessingNode::CallResource(n) => matches!(n.target, CallTarget::Dynamic(_)),
            ProcessingNode::RedirectToUri(n) => n.uri.has_parameters(),
            ProcessingNode::Select(_)
            | ProcessingNode::Pipeline(_)
            | ProcessingNode::HandleErrors(_) => false,
        }
    }
}

/// Invoke `nodes` in order until one ends the sequence.
pub fn invoke_sequence(
    nodes: &[ProcessingNode],
    env: &mut dyn Environment,
    ctx: &mut InvokeContext<'_>,
) -> Result<NodeOutcome> {
    for node in nodes {
        let outcome = node.invoke(env, ctx)?;
        if outcome.ends_sequence() {
            return Ok(outcome);
        }
    }
    Ok(NodeOutcome::NotHandled)
}

/// Jump to the view subtree for the requested view, if `views` reaches one
/// and this context has not diverted to it yet.
pub(crate) fn divert(
    views: &ViewMap,
    env: &mut dyn Environment,
    ctx: &mut InvokeContext<'_>,
) -> Result<Option<NodeOutcome>> {
    let Some(requested) = env.requested_view() else {
        return Ok(None);
    };
    let Some(&id) = views.get(requested) else {
        return Ok(None);
    };
    let name = requested.to_string();
    if !ctx.take_view(&name) {
        return Ok(None);
    }

    tracing::info!(view = %name, uri = %env.uri(), "Diverting to view");
    let processor = ctx.processor();
    let view = processor.view(id);
    let outcome = invoke_sequence(&view.children, env, ctx)?;
    Ok(Some(NodeOutcome::Diverted {
        view: name,
        handled: outcome.is_handled(),
    }))
}
