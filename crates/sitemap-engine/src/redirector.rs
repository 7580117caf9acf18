//! Redirect strategies used by Redirect nodes.

use sitemap_types::Result;

use crate::environment::{Environment, Redirect, RedirectKind};

pub trait Redirector: Send + Sync {
    /// Redirect within the current mount level.
    fn redirect(&self, env: &mut dyn Environment, create_session: bool, uri: &str) -> Result<()>;

    /// Redirect relative to the outermost tree, ignoring mount prefixes.
    fn global_redirect(
        &self,
        env: &mut dyn Environment,
        create_session: bool,
        uri: &str,
    ) -> Result<()>;

    fn permanent_redirect(
        &self,
        env: &mut dyn Environment,
        create_session: bool,
        uri: &str,
    ) -> Result<()>;
}

/// Hands every redirect to the environment, prefixing relative targets
/// with the current mount prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardRedirector;

fn is_absolute(uri: &str) -> bool {
    uri.starts_with('/') || uri.contains("://") || uri.starts_with("cocoon:")
}

fn scoped(env: &dyn Environment, uri: &str) -> String {
    if is_absolute(uri) {
        uri.to_string()
    } else {
        format!("{}{}", env.prefix(), uri)
    }
}

impl Redirector for ForwardRedirector {
    fn redirect(&self, env: &mut dyn Environment, create_session: bool, uri: &str) -> Result<()> {
        let uri = scoped(env, uri);
        tracing::info!(uri = %uri, "Redirecting");
        env.redirect(Redirect {
            uri,
            kind: RedirectKind::Ordinary,
            create_session,
        })
    }

    fn global_redirect(
        &self,
        env: &mut dyn Environment,
        create_session: bool,
        uri: &str,
    ) -> Result<()> {
        tracing::info!(uri = %uri, "Redirecting (global)");
        env.redirect(Redirect {
            uri: uri.to_string(),
            kind: RedirectKind::Global,
            create_session,
        })
    }

    fn permanent_redirect(
        &self,
        env: &mut dyn Environment,
        create_session: bool,
        uri: &str,
    ) -> Result<()> {
        let uri = scoped(env, uri);
        tracing::info!(uri = %uri, "Redirecting (permanent)");
        env.redirect(Redirect {
            uri,
            kind: RedirectKind::Permanent,
            create_session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;

    fn mounted_env() -> RequestEnvironment {
        let mut env = RequestEnvironment::new("docs/page.html");
        env.set_context("docs/".into(), "page.html".into());
        env
    }

    #[test]
    fn ordinary_redirect_stays_in_mount() {
        let mut env = mounted_env();
        ForwardRedirector.redirect(&mut env, false, "other.html").unwrap();
        let r = &env.redirects()[0];
        assert_eq!(r.uri, "docs/other.html");
        assert_eq!(r.kind, RedirectKind::Ordinary);
        assert_eq!(env.status(), Some(302));
    }

    #[test]
    fn global_redirect_ignores_prefix() {
        let mut env = mounted_env();
        ForwardRedirector
            .global_redirect(&mut env, true, "index.html")
            .unwrap();
        let r = &env.redirects()[0];
        assert_eq!(r.uri, "index.html");
        assert!(r.create_session);
    }

    #[test]
    fn permanent_redirect_status() {
        let mut env = mounted_env();
        ForwardRedirector
            .permanent_redirect(&mut env, false, "http://example.org/x")
            .unwrap();
        assert_eq!(env.redirects()[0].uri, "http://example.org/x");
        assert_eq!(env.status(), Some(301));
    }
}
