//! Pipeline nodes (sequence + error boundary) and their error handlers.

use sitemap_types::{Result, SitemapError};

use crate::context::InvokeContext;
use crate::environment::Environment;
use crate::error_handling;
use crate::nodes::{invoke_sequence, NodeOutcome, ProcessingNode};
use crate::pipeline::PipelineKind;
use crate::variables::{resolve_parameters, ParameterResolvers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorHandlerKind {
    /// Handles `ResourceNotFound`.
    NotFound,
    /// Handles everything else, and not-found errors without a dedicated
    /// handler.
    ServerError,
}

impl ErrorHandlerKind {
    pub fn status(self) -> u16 {
        match self {
            ErrorHandlerKind::NotFound => 404,
            ErrorHandlerKind::ServerError => 500,
        }
    }
}

#[derive(Debug)]
pub struct HandleErrorsNode {
    pub kind: ErrorHandlerKind,
    pub children: Vec<ProcessingNode>,
}

impl HandleErrorsNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        env.set_status(self.kind.status());
        invoke_sequence(&self.children, env, ctx)
    }
}

#[derive(Debug)]
pub struct PipelineNode {
    pub kind: PipelineKind,
    pub internal_only: bool,
    pub parameters: ParameterResolvers,
    pub children: Vec<ProcessingNode>,
    pub not_found_handler: Option<HandleErrorsNode>,
    pub error_handler: Option<HandleErrorsNode>,
}

impl PipelineNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        if self.internal_only && env.is_external() {
            return Ok(NodeOutcome::NotHandled);
        }

        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;
        ctx.announce_pipeline(self.kind, parameters.clone());
        env.object_model_mut()
            .set_active_pipeline(self.kind, parameters);

        let had_pipeline = ctx.pipeline().is_some();
        match invoke_sequence(&self.children, env, ctx) {
            Ok(outcome) => {
                if !outcome.ends_sequence() && !had_pipeline {
                    // Stages added by a sequence nobody completed must not
                    // leak into the next pipeline.
                    ctx.set_pipeline(None);
                }
                Ok(outcome)
            }
            Err(error) => self.recover(error, env, ctx),
        }
    }

    fn recover(
        &self,
        error: SitemapError,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        if error.is_connection_reset() {
            return Err(error);
        }
        if !env.is_external() && !env.is_internal_redirect() {
            tracing::debug!(uri = %env.uri(), error = %error, "Internal request, propagating error");
            return Err(error);
        }

        let handler = if error.is_resource_not_found() {
            self.not_found_handler.as_ref().or(self.error_handler.as_ref())
        } else {
            self.error_handler.as_ref()
        };
        match handler {
            Some(handler) => error_handling::dispatch(handler, error, env, ctx),
            None => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::component::default_registry;
    use crate::environment::RequestEnvironment;
    use crate::nodes::{RedirectNode, SerializeNode, ViewMap};
    use crate::processor::TreeProcessor;
    use crate::redirector::ForwardRedirector;
    use crate::variables::VariableResolver;

    fn redirect(uri: &str) -> ProcessingNode {
        ProcessingNode::RedirectToUri(RedirectNode {
            uri: VariableResolver::literal(uri),
            global: false,
            permanent: false,
            create_session: false,
        })
    }

    /// A Serialize with no producer: fails at request time with a
    /// processing error.
    fn broken() -> ProcessingNode {
        ProcessingNode::Serialize(SerializeNode {
            serializer: default_registry().serializer(None).unwrap(),
            source: None,
            parameters: BTreeMap::new(),
            mime_type: None,
            status_code: None,
            views: ViewMap::new(),
            link_translator: None,
            link_gatherer: None,
        })
    }

    fn pipeline(children: Vec<ProcessingNode>, with_handler: bool) -> PipelineNode {
        PipelineNode {
            kind: PipelineKind::Caching,
            internal_only: false,
            parameters: BTreeMap::new(),
            children,
            not_found_handler: None,
            error_handler: with_handler.then(|| HandleErrorsNode {
                kind: ErrorHandlerKind::ServerError,
                children: vec![redirect("error.html")],
            }),
        }
    }

    #[test]
    fn internal_only_pipeline_ignores_external_requests() {
        let proc = TreeProcessor::from_json("{}", ".").unwrap();
        let mut ctx = InvokeContext::new(&proc, &proc, false, Arc::new(ForwardRedirector));
        let mut node = pipeline(vec![redirect("x")], false);
        node.internal_only = true;

        let mut env = RequestEnvironment::new("a");
        assert_eq!(node.invoke(&mut env, &mut ctx).unwrap(), NodeOutcome::NotHandled);
        assert!(env.object_model().active_pipeline().is_none());

        let mut internal = RequestEnvironment::new("a").internal(false);
        assert_eq!(node.invoke(&mut internal, &mut ctx).unwrap(), NodeOutcome::Handled);
    }

    #[test]
    fn pipeline_announces_type() {
        let proc = TreeProcessor::from_json("{}", ".").unwrap();
        let mut ctx = InvokeContext::new(&proc, &proc, false, Arc::new(ForwardRedirector));
        let mut node = pipeline(vec![], false);
        node.kind = PipelineKind::NonCaching;
        let mut env = RequestEnvironment::new("a");
        assert_eq!(node.invoke(&mut env, &mut ctx).unwrap(), NodeOutcome::NotHandled);
        assert_eq!(
            env.object_model().active_pipeline().map(|p| p.kind),
            Some(PipelineKind::NonCaching)
        );
        assert_eq!(ctx.pipeline_kind(), PipelineKind::NonCaching);
    }

    #[test]
    fn errors_are_handled_for_external_requests() {
        let proc = TreeProcessor::from_json("{}", ".").unwrap();
        let mut ctx = InvokeContext::new(&proc, &proc, false, Arc::new(ForwardRedirector));
        let node = pipeline(vec![broken()], true);
        let mut env = RequestEnvironment::new("a");
        assert_eq!(node.invoke(&mut env, &mut ctx).unwrap(), NodeOutcome::Handled);
        assert_eq!(env.redirects()[0].uri, "error.html");
        assert!(env.object_model().notifying().is_some());
    }

    #[test]
    fn pure_internal_requests_propagate_errors() {
        let proc = TreeProcessor::from_json("{}", ".").unwrap();
        let mut ctx = InvokeContext::new(&proc, &proc, false, Arc::new(ForwardRedirector));
        let node = pipeline(vec![broken()], true);

        let mut env = RequestEnvironment::new("a").internal(false);
        assert!(node.invoke(&mut env, &mut ctx).is_err());
        assert!(env.object_model().notifying().is_none());

        let mut redirected = RequestEnvironment::new("a").internal(true);
        assert!(node.invoke(&mut redirected, &mut ctx).unwrap().is_handled());
    }

    #[test]
    fn unhandled_error_without_handler_is_rethrown() {
        let proc = TreeProcessor::from_json("{}", ".").unwrap();
        let mut ctx = InvokeContext::new(&proc, &proc, false, Arc::new(ForwardRedirector));
        let node = pipeline(vec![broken()], false);
        let mut env = RequestEnvironment::new("a");
        assert!(matches!(
            node.invoke(&mut env, &mut ctx),
            Err(SitemapError::PipelineState(_))
        ));
    }

    #[test]
    fn handle_errors_sets_status() {
        let proc = TreeProcessor::from_json("{}", ".").unwrap();
        let mut ctx = InvokeContext::new(&proc, &proc, false, Arc::new(ForwardRedirector));
        let node = HandleErrorsNode {
            kind: ErrorHandlerKind::NotFound,
            children: vec![],
        };
        let mut env = RequestEnvironment::new("a");
        assert_eq!(node.invoke(&mut env, &mut ctx).unwrap(), NodeOutcome::NotHandled);
        assert_eq!(env.status(), Some(404));
    }
}
