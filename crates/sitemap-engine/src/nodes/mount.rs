//! Mount: delegate the request to a separately compiled tree.

use std::sync::Arc;

use sitemap_types::{Result, SitemapError};

use crate::context::InvokeContext;
use crate::environment::Environment;
use crate::nodes::NodeOutcome;
use crate::variables::VariableResolver;

#[derive(Debug)]
pub struct MountNode {
    pub src: VariableResolver,
    pub uri_prefix: VariableResolver,
    pub check_reload: bool,
    /// Report "not handled" instead of failing when the sub-tree does not
    /// handle the request.
    pub pass_through: bool,
}

/// `uri` with `prefix` removed, and the prefix to record for the mount level.
fn split_prefix(uri: &str, prefix: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix(prefix)?;
    let mut level = prefix.to_string();
    if !level.is_empty() && !level.ends_with('/') {
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        level.push('/');
    }
    Some((level, rest.trim_start_matches('/').to_string()))
}

impl MountNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let processor = ctx.processor();
        let mut source = self.src.resolve(ctx.scopes(), env)?;
        let prefix = self.uri_prefix.resolve(ctx.scopes(), env)?;
        if source.ends_with('/') {
            source.push_str(&processor.settings().root_descriptor);
        }
        let source = processor
            .settings()
            .resolve_path(&source)
            .to_string_lossy()
            .into_owned();

        let child = processor.mounts().get_or_compile(&source, &prefix, || {
            processor
                .factory()
                .create_child(&source, self.check_reload, &prefix)
        })?;

        let saved_prefix = env.prefix().to_string();
        let saved_uri = env.uri().to_string();
        let (level, uri) = match split_prefix(&saved_uri, &prefix) {
            Some(split) => split,
            None => {
                tracing::debug!(uri = %saved_uri, prefix = %prefix, "URI outside mount prefix");
                (String::new(), saved_uri.clone())
            }
        };
        tracing::debug!(source = %source, uri = %uri, "Entering mounted sitemap");

        env.set_context(format!("{saved_prefix}{level}"), uri);
        let result = child.invoke_nested(
            env,
            ctx.root(),
            ctx.is_build_only(),
            Arc::clone(ctx.redirector()),
        );
        env.set_context(saved_prefix.clone(), saved_uri.clone());

        let (outcome, pipeline) = result?;
        if outcome.is_handled() {
            if ctx.is_build_only() {
                ctx.set_pipeline(pipeline);
            }
            return Ok(NodeOutcome::Handled);
        }
        if self.pass_through {
            Ok(NodeOutcome::NotHandled)
        } else {
            Err(SitemapError::not_found(format!("{saved_prefix}{saved_uri}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prefix_variants() {
        assert_eq!(
            split_prefix("docs/page.html", "docs/"),
            Some(("docs/".into(), "page.html".into()))
        );
        assert_eq!(
            split_prefix("docs/page.html", "docs"),
            Some(("docs/".into(), "page.html".into()))
        );
        assert_eq!(split_prefix("docsx/page.html", "docs"), None);
        assert_eq!(split_prefix("a.html", ""), Some(("".into(), "a.html".into())));
        assert_eq!(split_prefix("other/a.html", "docs/"), None);
    }
}
