//! Error handling coordinator: builds the request's single error record and
//! dispatches to a handler subtree.

use std::sync::Arc;

use sitemap_types::{Notifying, Result, SitemapError};

use crate::context::InvokeContext;
use crate::environment::Environment;
use crate::nodes::{HandleErrorsNode, NodeOutcome};

/// Builds the error record handed to error handlers.
pub trait NotifyingBuilder: Send + Sync {
    /// `source` is the full path of the request that failed.
    fn build(&self, source: &str, error: &SitemapError) -> Notifying;
}

/// Describes the error and records the failing request path as
/// `request-uri`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNotifyingBuilder;

impl NotifyingBuilder for DefaultNotifyingBuilder {
    fn build(&self, source: &str, error: &SitemapError) -> Notifying {
        Notifying::from_error(error).with_extra("request-uri", source)
    }
}

/// Run `handler` for `error`.
///
/// The first boundary to see an error for this request resets the response
/// and stores the record; nested boundaries reuse it. A failing handler's
/// own error is returned; a handler that does not handle the request
/// returns the original error.
pub fn dispatch(
    handler: &HandleErrorsNode,
    error: SitemapError,
    env: &mut dyn Environment,
    ctx: &mut InvokeContext<'_>,
) -> Result<NodeOutcome> {
    if env.object_model().notifying().is_none() {
        if !env.try_reset_response() {
            tracing::warn!(uri = %env.uri(), "Response already committed, error output may be mixed");
        }
        let source = format!("{}{}", env.prefix(), env.uri());
        let record = ctx.processor().notifying_builder().build(&source, &error);
        env.object_model_mut().set_notifying(Arc::new(record));
    }

    tracing::info!(
        uri = %env.uri(),
        handler = ?handler.kind,
        error = %error,
        "Dispatching to error handler"
    );

    let mut handler_ctx = ctx.for_error_handler();
    match handler.invoke(env, &mut handler_ctx) {
        Err(handler_error) => {
            tracing::error!(
                error = %handler_error,
                original = %error,
                "Error handler failed"
            );
            Err(handler_error)
        }
        Ok(outcome) if outcome.is_handled() => {
            if ctx.is_build_only() {
                ctx.set_pipeline(handler_ctx.take_pipeline());
            }
            Ok(NodeOutcome::Handled)
        }
        Ok(_) => Err(error),
    }
}
