//! Generate, Transform and Serialize: the nodes that append pipeline stages.

use sitemap_types::{Parameters, Result};

use crate::component::{Generator, Resolved, Serializer, Transformer};
use crate::context::{InvokeContext, Scope};
use crate::environment::Environment;
use crate::nodes::{divert, NodeOutcome, ViewMap};
use crate::pipeline::Stage;
use crate::variables::{resolve_parameters, ParameterResolvers, VariableResolver};

fn resolve_source(
    source: Option<&VariableResolver>,
    scopes: &[Scope],
    env: &dyn Environment,
) -> Result<Option<String>> {
    source.map(|s| s.resolve(scopes, env)).transpose()
}

#[derive(Debug)]
pub struct GenerateNode {
    pub generator: Resolved<dyn Generator>,
    pub source: Option<VariableResolver>,
    pub parameters: ParameterResolvers,
    pub views: ViewMap,
}

impl GenerateNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let source = resolve_source(self.source.as_ref(), ctx.scopes(), env)?;
        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;

        let pipeline = ctx.pipeline_mut();
        pipeline.set_generator(Stage::new(self.generator.clone(), source, parameters))?;
        pipeline.mark_branch_point();

        Ok(divert(&self.views, env, ctx)?.unwrap_or(NodeOutcome::NotHandled))
    }
}

#[derive(Debug)]
pub struct TransformNode {
    pub transformer: Resolved<dyn Transformer>,
    pub source: Option<VariableResolver>,
    pub parameters: ParameterResolvers,
    pub views: ViewMap,
}

impl TransformNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let source = resolve_source(self.source.as_ref(), ctx.scopes(), env)?;
        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;

        let pipeline = ctx.pipeline_mut();
        pipeline.add_transformer(Stage::new(self.transformer.clone(), source, parameters))?;
        pipeline.mark_branch_point();

        Ok(divert(&self.views, env, ctx)?.unwrap_or(NodeOutcome::NotHandled))
    }
}

#[derive(Debug)]
pub struct SerializeNode {
    pub serializer: Resolved<dyn Serializer>,
    pub source: Option<VariableResolver>,
    pub parameters: ParameterResolvers,
    /// Overrides the serializer's own MIME type.
    pub mime_type: Option<String>,
    pub status_code: Option<u16>,
    pub views: ViewMap,
    pub link_translator: Option<Resolved<dyn Transformer>>,
    pub link_gatherer: Option<Resolved<dyn Transformer>>,
}

impl SerializeNode {
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        // The view replaces the output stage, so it is checked first.
        if let Some(outcome) = divert(&self.views, env, ctx)? {
            return Ok(outcome);
        }

        let source = resolve_source(self.source.as_ref(), ctx.scopes(), env)?;
        let parameters = resolve_parameters(&self.parameters, ctx.scopes(), env)?;
        let mime_type = self
            .mime_type
            .as_deref()
            .unwrap_or_else(|| self.serializer.component.mime_type())
            .to_string();
        let translate = env.object_model().link_translation().is_some();
        let gather = env.object_model().is_gathering_links();

        let pipeline = ctx.pipeline_mut();
        if translate {
            if let Some(t) = &self.link_translator {
                pipeline.add_transformer(Stage::new(t.clone(), None, Parameters::new()))?;
            }
        }
        if gather {
            if let Some(g) = &self.link_gatherer {
                pipeline.add_transformer(Stage::new(g.clone(), None, Parameters::new()))?;
            }
        }
        pipeline.set_serializer(
            Stage::new(self.serializer.clone(), source, parameters),
            &mime_type,
        )?;
        pipeline.mark_branch_point();

        if let Some(status) = self.status_code {
            env.set_status(status);
        }

        if ctx.is_build_only() {
            return Ok(NodeOutcome::Handled);
        }

        let sources = ctx.source_resolver();
        let handled = match ctx.pipeline() {
            Some(pipeline) => pipeline.process(env, &sources)?,
            None => false,
        };
        Ok(NodeOutcome::from_handled(handled))
    }
}
