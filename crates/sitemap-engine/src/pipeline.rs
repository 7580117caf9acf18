//! The processing pipeline assembled by stage nodes: one producer, any
//! number of filters and one output stage, plus the cache key / validity
//! protocol exposed to callers.

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};
use sitemap_types::{Parameters, Result, SitemapError, Validity};

use crate::component::{
    Generator, Resolved, Serializer, SourceResolver, StageContext, StageInfo, Transformer,
};
use crate::environment::Environment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    #[default]
    Caching,
    NonCaching,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Caching => f.write_str("caching"),
            PipelineKind::NonCaching => f.write_str("noncaching"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One configured stage: a resolved component plus its source and parameters.
pub struct Stage<C: ?Sized> {
    pub resolved: Resolved<C>,
    pub source: Option<String>,
    pub parameters: Parameters,
}

impl<C: ?Sized> Stage<C> {
    pub fn new(resolved: Resolved<C>, source: Option<String>, parameters: Parameters) -> Self {
        Self {
            resolved,
            source,
            parameters,
        }
    }

    pub fn component(&self) -> &C {
        &self.resolved.component
    }

    fn info<'a>(&'a self, sources: &'a dyn SourceResolver) -> StageInfo<'a> {
        StageInfo {
            source: self.source.as_deref(),
            parameters: &self.parameters,
            sources,
        }
    }
}

impl<C: ?Sized> Clone for Stage<C> {
    fn clone(&self) -> Self {
        Self {
            resolved: self.resolved.clone(),
            source: self.source.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for Stage<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("type", &self.resolved.name)
            .field("source", &self.source)
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    Producer,
    Filter,
    Output,
}

/// Read-only view of one stage, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub role: StageRole,
    pub component: String,
    pub source: Option<String>,
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            StageRole::Producer => "gen",
            StageRole::Filter => "xform",
            StageRole::Output => "ser",
        };
        match &self.source {
            Some(src) => write!(f, "{role}({src})"),
            None => write!(f, "{role}({})", self.component),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingPipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct CacheIdentity {
    key: Option<String>,
    validity: Option<Validity>,
}

#[derive(Debug, Clone)]
pub struct ProcessingPipeline {
    kind: PipelineKind,
    parameters: Parameters,
    generator: Option<Stage<dyn Generator>>,
    transformers: Vec<Stage<dyn Transformer>>,
    serializer: Option<Stage<dyn Serializer>>,
    mime_type: Option<String>,
    branch_points: Vec<usize>,
    prepared: Option<CacheIdentity>,
}

impl ProcessingPipeline {
    pub fn new(kind: PipelineKind, parameters: Parameters) -> Self {
        Self {
            kind,
            parameters,
            generator: None,
            transformers: Vec::new(),
            serializer: None,
            mime_type: None,
            branch_points: Vec::new(),
            prepared: None,
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn set_generator(&mut self, stage: Stage<dyn Generator>) -> Result<()> {
        if self.generator.is_some() {
            return Err(SitemapError::PipelineState(format!(
                "producer already set, cannot add '{}'",
                stage.resolved.name
            )));
        }
        self.generator = Some(stage);
        self.prepared = None;
        Ok(())
    }

    pub fn add_transformer(&mut self, stage: Stage<dyn Transformer>) -> Result<()> {
        self.check_accepts_stage(&stage.resolved.name)?;
        self.transformers.push(stage);
        self.prepared = None;
        Ok(())
    }

    pub fn set_serializer(&mut self, stage: Stage<dyn Serializer>, mime_type: &str) -> Result<()> {
        self.check_accepts_stage(&stage.resolved.name)?;
        self.serializer = Some(stage);
        self.mime_type = Some(mime_type.to_string());
        self.prepared = None;
        Ok(())
    }

    fn check_accepts_stage(&self, name: &str) -> Result<()> {
        if self.generator.is_none() {
            return Err(SitemapError::PipelineState(format!(
                "'{name}' added before any producer stage"
            )));
        }
        if self.serializer.is_some() {
            return Err(SitemapError::PipelineState(format!(
                "'{name}' added after the output stage"
            )));
        }
        Ok(())
    }

    /// Record that the stages assembled so far form a stable prefix.
    pub fn mark_branch_point(&mut self) {
        let count = self.stage_count();
        if self.branch_points.last() != Some(&count) {
            self.branch_points.push(count);
        }
    }

    /// Stage counts at every recorded branch point, in order.
    pub fn branch_points(&self) -> &[usize] {
        &self.branch_points
    }

    pub fn has_producer(&self) -> bool {
        self.generator.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.generator.is_some() && self.serializer.is_some()
    }

    pub fn stage_count(&self) -> usize {
        usize::from(self.generator.is_some())
            + self.transformers.len()
            + usize::from(self.serializer.is_some())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn stages(&self) -> Vec<StageSummary> {
        let mut out = Vec::with_capacity(self.stage_count());
        if let Some(g) = &self.generator {
            out.push(summary(StageRole::Producer, g));
        }
        out.extend(self.transformers.iter().map(|t| summary(StageRole::Filter, t)));
        if let Some(s) = &self.serializer {
            out.push(summary(StageRole::Output, s));
        }
        out
    }

    fn complete_stages(&self) -> Result<(&Stage<dyn Generator>, &Stage<dyn Serializer>)> {
        match (&self.generator, &self.serializer) {
            (Some(g), Some(s)) => Ok((g, s)),
            (None, _) => Err(SitemapError::PipelineState(
                "pipeline has no producer stage".into(),
            )),
            (_, None) => Err(SitemapError::PipelineState(
                "pipeline has no output stage".into(),
            )),
        }
    }

    // ---- cache protocol ----

    /// Compute the cache key and validity of the complete pipeline.
    pub fn prepare(&mut self, sources: &dyn SourceResolver) -> Result<()> {
        let (generator, serializer) = self.complete_stages()?;
        let identity = match self.kind {
            PipelineKind::NonCaching => CacheIdentity {
                key: None,
                validity: None,
            },
            PipelineKind::Caching => {
                let mut parts = Vec::with_capacity(self.stage_count());
                let mut validities = Vec::with_capacity(self.stage_count());

                parts.push(key_part(
                    "gen",
                    generator,
                    generator.component().key(&generator.info(sources)),
                ));
                validities.push(generator.component().validity(&generator.info(sources)));
                for stage in &self.transformers {
                    parts.push(key_part("xform", stage, stage.component().key(&stage.info(sources))));
                    validities.push(stage.component().validity(&stage.info(sources)));
                }
                let ser_key = serializer
                    .component()
                    .key(&serializer.info(sources))
                    .map(|k| format!("{k};{}", self.mime_type.as_deref().unwrap_or_default()));
                parts.push(key_part("ser", serializer, ser_key));
                validities.push(serializer.component().validity(&serializer.info(sources)));

                let key: Option<Vec<String>> = parts.into_iter().collect();
                CacheIdentity {
                    key: key.map(|k| k.join("/")),
                    validity: Validity::aggregate(validities),
                }
            }
        };
        tracing::debug!(
            kind = %self.kind,
            key = ?identity.key,
            cacheable = identity.validity.is_some(),
            "Pipeline prepared"
        );
        self.prepared = Some(identity);
        Ok(())
    }

    fn identity(&self) -> Result<&CacheIdentity> {
        self.complete_stages()?;
        self.prepared
            .as_ref()
            .ok_or_else(|| SitemapError::PipelineState("pipeline was not prepared".into()))
    }

    /// `None` means "not cacheable".
    pub fn cache_key(&self) -> Result<Option<String>> {
        Ok(self.identity()?.key.clone())
    }

    /// `None` means "not cacheable".
    pub fn validity(&self) -> Result<Option<Validity>> {
        Ok(self.identity()?.validity.clone())
    }

    // ---- execution ----

    /// Run every stage, writing the serialized result to `out`.
    pub fn execute(
        &self,
        env: &mut dyn Environment,
        sources: &dyn SourceResolver,
        out: &mut dyn Write,
    ) -> Result<()> {
        let (generator, serializer) = self.complete_stages()?;

        let mut content = generator.component().generate(&mut StageContext {
            env: &mut *env,
            source: generator.source.as_deref(),
            parameters: &generator.parameters,
            sources,
        })?;
        for stage in &self.transformers {
            content = stage.component().transform(
                content,
                &mut StageContext {
                    env: &mut *env,
                    source: stage.source.as_deref(),
                    parameters: &stage.parameters,
                    sources,
                },
            )?;
        }
        serializer.component().serialize(
            &content,
            &mut StageContext {
                env: &mut *env,
                source: serializer.source.as_deref(),
                parameters: &serializer.parameters,
                sources,
            },
            out,
        )
    }

    /// Execute and send the result to the environment's output.
    ///
    /// Output is buffered so a failing stage never leaves partial content in
    /// the response.
    pub fn process(&self, env: &mut dyn Environment, sources: &dyn SourceResolver) -> Result<bool> {
        let mut buffer = Vec::new();
        self.execute(env, sources, &mut buffer)?;
        if let Some(mime) = &self.mime_type {
            env.set_content_type(mime);
        }
        env.output().write_all(&buffer)?;
        Ok(true)
    }
}

fn summary<C: ?Sized>(role: StageRole, stage: &Stage<C>) -> StageSummary {
    StageSummary {
        role,
        component: stage.resolved.name.clone(),
        source: stage.source.clone(),
    }
}

fn key_part<C: ?Sized>(role: &str, stage: &Stage<C>, key: Option<String>) -> Option<String> {
    let key = key?;
    let mut part = format!("{role}:{}({key})", stage.resolved.name);
    if !stage.parameters.is_empty() {
        part.push('?');
        part.push_str(&stage.parameters.key_fragment());
    }
    Some(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::component::Resolved;
    use crate::components::sources::FileSourceResolver;
    use crate::components::stages::TextSerializer;
    use crate::environment::RequestEnvironment;

    struct Fixed(&'static str);

    impl Generator for Fixed {
        fn generate(&self, _ctx: &mut StageContext<'_>) -> Result<String> {
            Ok(self.0.to_string())
        }
        fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
            Some(self.0.to_string())
        }
        fn validity(&self, _info: &StageInfo<'_>) -> Option<Validity> {
            Some(Validity::Token(self.0.to_string()))
        }
    }

    struct Upper;

    impl Transformer for Upper {
        fn transform(&self, input: String, _ctx: &mut StageContext<'_>) -> Result<String> {
            Ok(input.to_uppercase())
        }
    }

    struct Failing;

    impl Transformer for Failing {
        fn transform(&self, _input: String, _ctx: &mut StageContext<'_>) -> Result<String> {
            Err(SitemapError::processing("failing", "boom"))
        }
    }

    fn gen(text: &'static str) -> Stage<dyn Generator> {
        Stage::new(
            Resolved {
                name: "fixed".into(),
                component: Arc::new(Fixed(text)) as Arc<dyn Generator>,
            },
            Some(text.into()),
            Parameters::new(),
        )
    }

    fn xform(t: impl Transformer + 'static) -> Stage<dyn Transformer> {
        Stage::new(
            Resolved {
                name: "upper".into(),
                component: Arc::new(t) as Arc<dyn Transformer>,
            },
            None,
            Parameters::new(),
        )
    }

    fn ser() -> Stage<dyn Serializer> {
        Stage::new(
            Resolved {
                name: "text".into(),
                component: Arc::new(TextSerializer::new("text/plain")) as Arc<dyn Serializer>,
            },
            None,
            Parameters::new(),
        )
    }

    #[test]
    fn stages_must_follow_order() {
        let mut p = ProcessingPipeline::new(PipelineKind::Caching, Parameters::new());
        assert!(matches!(p.add_transformer(xform(Upper)), Err(SitemapError::PipelineState(_))));
        assert!(p.set_serializer(ser(), "text/plain").is_err());
        p.set_generator(gen("a")).unwrap();
        assert!(p.set_generator(gen("b")).is_err());
        p.set_serializer(ser(), "text/plain").unwrap();
        assert!(p.add_transformer(xform(Upper)).is_err());
    }

    #[test]
    fn incomplete_pipeline_cannot_execute_or_report_key() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FileSourceResolver::new(dir.path());
        let mut p = ProcessingPipeline::new(PipelineKind::Caching, Parameters::new());
        p.set_generator(gen("a")).unwrap();
        assert!(p.cache_key().is_err());
        assert!(p.validity().is_err());
        assert!(p.prepare(&sources).is_err());
        let mut env = RequestEnvironment::new("x");
        assert!(p.process(&mut env, &sources).is_err());
    }

    #[test]
    fn caching_pipeline_key_and_validity() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FileSourceResolver::new(dir.path());
        let mut p = ProcessingPipeline::new(PipelineKind::Caching, Parameters::new());
        p.set_generator(gen("hello")).unwrap();
        p.set_serializer(ser(), "text/plain").unwrap();

        assert!(p.cache_key().is_err(), "key requires prepare()");
        p.prepare(&sources).unwrap();
        assert_eq!(
            p.cache_key().unwrap().as_deref(),
            Some("gen:fixed(hello)/ser:text(;text/plain)")
        );
        assert_eq!(
            p.validity().unwrap(),
            Some(Validity::Aggregated(vec![
                Validity::Token("hello".into()),
                Validity::Token("text/plain".into()),
            ]))
        );
    }

    #[test]
    fn uncacheable_stage_makes_pipeline_uncacheable() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FileSourceResolver::new(dir.path());
        let mut p = ProcessingPipeline::new(PipelineKind::Caching, Parameters::new());
        p.set_generator(gen("hello")).unwrap();
        p.add_transformer(xform(Upper)).unwrap();
        p.set_serializer(ser(), "text/plain").unwrap();
        p.prepare(&sources).unwrap();
        assert_eq!(p.cache_key().unwrap(), None);
        assert_eq!(p.validity().unwrap(), None);
    }

    #[test]
    fn noncaching_pipeline_reports_none() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FileSourceResolver::new(dir.path());
        let mut p = ProcessingPipeline::new(PipelineKind::NonCaching, Parameters::new());
        p.set_generator(gen("hello")).unwrap();
        p.set_serializer(ser(), "text/plain").unwrap();
        p.prepare(&sources).unwrap();
        assert_eq!(p.cache_key().unwrap(), None);
        assert_eq!(p.validity().unwrap(), None);
    }

    #[test]
    fn process_runs_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FileSourceResolver::new(dir.path());
        let mut p = ProcessingPipeline::new(PipelineKind::Caching, Parameters::new());
        p.set_generator(gen("hello")).unwrap();
        p.mark_branch_point();
        p.add_transformer(xform(Upper)).unwrap();
        p.mark_branch_point();
        p.set_serializer(ser(), "text/plain").unwrap();
        p.mark_branch_point();
        p.mark_branch_point();

        let mut env = RequestEnvironment::new("x");
        assert!(p.process(&mut env, &sources).unwrap());
        assert_eq!(env.body_string(), "HELLO");
        assert_eq!(env.content_type(), Some("text/plain"));
        assert_eq!(p.branch_points(), &[1, 2, 3]);
        let names: Vec<String> = p.stages().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["gen(hello)", "xform(upper)", "ser(text)"]);
    }

    #[test]
    fn failing_stage_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sources = FileSourceResolver::new(dir.path());
        let mut p = ProcessingPipeline::new(PipelineKind::Caching, Parameters::new());
        p.set_generator(gen("hello")).unwrap();
        p.add_transformer(xform(Failing)).unwrap();
        p.set_serializer(ser(), "text/plain").unwrap();
        let mut env = RequestEnvironment::new("x");
        assert!(p.process(&mut env, &sources).is_err());
        assert!(env.body().is_empty());
    }

    #[test]
    fn pipeline_kind_serde() {
        assert_eq!(serde_json::to_string(&PipelineKind::NonCaching).unwrap(), "\"noncaching\"");
        let k: PipelineKind = serde_json::from_str("\"caching\"").unwrap();
        assert_eq!(k, PipelineKind::Caching);
    }
}
