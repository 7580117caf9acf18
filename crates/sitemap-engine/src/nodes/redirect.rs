//! RedirectToURI.

use sitemap_types::Result;

use crate::context::InvokeContext;
use crate::environment::Environment;
use crate::nodes::NodeOutcome;
use crate::variables::VariableResolver;

#[derive(Debug)]
pub struct RedirectNode {
    pub uri: VariableResolver,
    pub global: bool,
    pub permanent: bool,
    pub create_session: bool,
}

impl RedirectNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let uri = self.uri.resolve(ctx.scopes(), env)?;
        let redirector = ctx.redirector();
        if self.global {
            redirector.global_redirect(env, self.create_session, &uri)?;
        } else if self.permanent {
            redirector.permanent_redirect(env, self.create_session, &uri)?;
        } else {
            redirector.redirect(env, self.create_session, &uri)?;
        }
        Ok(NodeOutcome::Handled)
    }
}
