//! The compiled tree processor and the sub-request source built on it.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sitemap_types::{Result, SitemapError, Validity};

use crate::builder::TreeBuilder;
use crate::component::{ComponentRegistry, SourceResolver};
use crate::components::sources::FileSourceResolver;
use crate::config::SitemapConfig;
use crate::context::InvokeContext;
use crate::environment::{Environment, RequestEnvironment};
use crate::error_handling::NotifyingBuilder;
use crate::mount::{SubProcessorFactory, SubProcessorRegistry};
use crate::nodes::{invoke_sequence, NodeOutcome, ProcessingNode, Resource, ResourceId, View, ViewId};
use crate::pipeline::ProcessingPipeline;
use crate::redirector::Redirector;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Filesystem settings of one compiled tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Directory relative sources and mount descriptors resolve against.
    pub base_dir: PathBuf,
    /// Default for Mount nodes that do not declare `check_reload`.
    pub check_reload: bool,
    /// Appended to a mount source ending in `/`.
    pub root_descriptor: String,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            check_reload: false,
            root_descriptor: "sitemap.json".to_string(),
        }
    }
}

impl ProcessorSettings {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn resolve_path(&self, source: &str) -> PathBuf {
        FileSourceResolver::new(self.base_dir.clone()).path_for(source)
    }
}

// ---------------------------------------------------------------------------
// TreeProcessor
// ---------------------------------------------------------------------------

/// An immutable compiled tree. Shared between concurrent requests; all
/// per-request state lives in [`InvokeContext`] and the [`Environment`].
pub struct TreeProcessor {
    pub(crate) nodes: Vec<ProcessingNode>,
    pub(crate) resources: Vec<Resource>,
    pub(crate) resource_index: HashMap<String, ResourceId>,
    pub(crate) views: Vec<View>,
    pub(crate) settings: ProcessorSettings,
    pub(crate) components: Arc<ComponentRegistry>,
    pub(crate) files: FileSourceResolver,
    pub(crate) mounts: SubProcessorRegistry,
    pub(crate) factory: Arc<dyn SubProcessorFactory>,
    pub(crate) notifying_builder: Arc<dyn NotifyingBuilder>,
    pub(crate) redirector: Arc<dyn Redirector>,
    pub(crate) source: String,
}

impl fmt::Debug for TreeProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeProcessor")
            .field("source", &self.source)
            .field("nodes", &self.nodes.len())
            .field("resources", &self.resources.len())
            .field("views", &self.views.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl TreeProcessor {
    /// Compile a JSON descriptor with the default component registry.
    pub fn from_json(json: &str, base_dir: impl AsRef<Path>) -> Result<Self> {
        let config = SitemapConfig::from_json(json)?;
        TreeBuilder::default().with_base_dir(base_dir).build(&config)
    }

    /// Compile a descriptor file, rooted at its directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = SitemapConfig::from_file(path)?;
        TreeBuilder::default()
            .with_base_dir(path.parent().unwrap_or_else(|| Path::new(".")))
            .with_source(path.display().to_string())
            .build(&config)
    }

    /// Handle one top-level request. Returns `true` if some node handled it.
    pub fn process(&self, env: &mut dyn Environment) -> Result<bool> {
        tracing::debug!(uri = %env.uri(), source = %self.source, "Processing request");
        let mut ctx = InvokeContext::new(self, self, false, Arc::clone(&self.redirector));
        let outcome = invoke_sequence(&self.nodes, env, &mut ctx)?;
        tracing::debug!(uri = %env.uri(), outcome = ?outcome, "Request finished");
        Ok(outcome.is_handled())
    }

    /// Assemble the pipeline for a request without executing it.
    pub fn build_pipeline(&self, env: &mut dyn Environment) -> Result<Option<ProcessingPipeline>> {
        let (outcome, pipeline) =
            self.invoke_nested(env, self, true, Arc::clone(&self.redirector))?;
        Ok(if outcome.is_handled() { pipeline } else { None })
    }

    /// Invoke this tree under a fresh context, as a mounted or sub-request
    /// tree of `root`.
    pub fn invoke_nested(
        &self,
        env: &mut dyn Environment,
        root: &TreeProcessor,
        build_only: bool,
        redirector: Arc<dyn Redirector>,
    ) -> Result<(NodeOutcome, Option<ProcessingPipeline>)> {
        let mut ctx = InvokeContext::new(self, root, build_only, redirector);
        let outcome = invoke_sequence(&self.nodes, env, &mut ctx)?;
        Ok((outcome, ctx.take_pipeline()))
    }

    pub fn view(&self, id: ViewId) -> &View {
        &self.views[id.0]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn resource_by_name(&self, name: &str) -> Option<&Resource> {
        self.resource_index.get(name).map(|id| self.resource(*id))
    }

    pub fn nodes(&self) -> &[ProcessingNode] {
        &self.nodes
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn files(&self) -> &FileSourceResolver {
        &self.files
    }

    pub fn mounts(&self) -> &SubProcessorRegistry {
        &self.mounts
    }

    pub fn factory(&self) -> &dyn SubProcessorFactory {
        self.factory.as_ref()
    }

    pub fn notifying_builder(&self) -> &dyn NotifyingBuilder {
        self.notifying_builder.as_ref()
    }

    pub fn redirector(&self) -> &Arc<dyn Redirector> {
        &self.redirector
    }

    /// Where the descriptor was loaded from, if known.
    pub fn source(&self) -> &str {
        &self.source
    }
}

// ---------------------------------------------------------------------------
// Source resolution
// ---------------------------------------------------------------------------

/// Resolves `cocoon:/` sources against the current tree, `cocoon://`
/// sources against the root tree, and everything else as files.
pub struct SitemapSourceResolver<'a> {
    current: &'a TreeProcessor,
    root: &'a TreeProcessor,
}

impl<'a> SitemapSourceResolver<'a> {
    pub fn new(current: &'a TreeProcessor, root: &'a TreeProcessor) -> Self {
        Self { current, root }
    }

    fn sitemap_target<'u>(&self, uri: &'u str) -> Option<(&'a TreeProcessor, &'u str)> {
        if let Some(path) = uri.strip_prefix("cocoon://") {
            Some((self.root, path))
        } else {
            uri.strip_prefix("cocoon:/")
                .map(|path| (self.current, path.trim_start_matches('/')))
        }
    }
}

impl SourceResolver for SitemapSourceResolver<'_> {
    fn read(&self, uri: &str, env: &mut dyn Environment) -> Result<String> {
        match self.sitemap_target(uri) {
            Some((tree, path)) => {
                let mut source =
                    SitemapSource::new(tree, env.internal_request(path)).with_root(self.root);
                source.content()
            }
            None => self.current.files().read(uri, env),
        }
    }

    fn validity(&self, uri: &str) -> Option<Validity> {
        match self.sitemap_target(uri) {
            Some((tree, path)) => {
                let env = RequestEnvironment::new(path).internal(false);
                let mut source = SitemapSource::new(tree, Box::new(env)).with_root(self.root);
                match source.validity() {
                    Ok(validity) => validity,
                    Err(e) => {
                        tracing::debug!(uri = %uri, error = %e, "Sub-request validity unavailable");
                        None
                    }
                }
            }
            None => self.current.files().validity(uri),
        }
    }
}

// ---------------------------------------------------------------------------
// SitemapSource
// ---------------------------------------------------------------------------

/// The output of a sub-request, exposed as a cacheable resource.
///
/// `prepare` assembles the pipeline in build-only mode; `cache_key` and
/// `validity` report on it; `process` executes it.
pub struct SitemapSource<'p> {
    processor: &'p TreeProcessor,
    root: &'p TreeProcessor,
    env: Box<dyn Environment>,
    pipeline: Option<ProcessingPipeline>,
}

impl<'p> SitemapSource<'p> {
    pub fn new(processor: &'p TreeProcessor, env: Box<dyn Environment>) -> Self {
        Self {
            processor,
            root: processor,
            env,
            pipeline: None,
        }
    }

    pub fn with_root(mut self, root: &'p TreeProcessor) -> Self {
        self.root = root;
        self
    }

    pub fn prepare(&mut self) -> Result<()> {
        let uri = self.env.uri().to_string();
        let (outcome, pipeline) = self.processor.invoke_nested(
            self.env.as_mut(),
            self.root,
            true,
            Arc::clone(&self.processor.redirector),
        )?;
        if !outcome.is_handled() {
            return Err(SitemapError::not_found(uri));
        }
        let mut pipeline = pipeline.ok_or_else(|| {
            SitemapError::PipelineState(format!("sub-request '{uri}' produced no pipeline"))
        })?;
        pipeline.prepare(&SitemapSourceResolver::new(self.processor, self.root))?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn prepared(&mut self) -> Result<&ProcessingPipeline> {
        if self.pipeline.is_none() {
            self.prepare()?;
        }
        self.pipeline
            .as_ref()
            .ok_or_else(|| SitemapError::PipelineState("sub-request was not prepared".into()))
    }

    pub fn cache_key(&mut self) -> Result<Option<String>> {
        self.prepared()?.cache_key()
    }

    pub fn validity(&mut self) -> Result<Option<Validity>> {
        self.prepared()?.validity()
    }

    /// Execute the assembled pipeline into `out`.
    pub fn process(&mut self, out: &mut dyn Write) -> Result<bool> {
        self.prepared()?;
        let Self {
            processor,
            root,
            env,
            pipeline,
        } = self;
        let Some(pipeline) = pipeline.as_ref() else {
            return Ok(false);
        };
        let sources = SitemapSourceResolver::new(*processor, *root);
        pipeline.execute(env.as_mut(), &sources, out)?;
        Ok(true)
    }

    pub fn content(&mut self) -> Result<String> {
        let mut buffer = Vec::new();
        self.process(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| SitemapError::processing("sitemap-source", e.to_string()))
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.pipeline.as_ref().and_then(|p| p.mime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    const SITEMAP: &str = r#"{
        "pipelines": [{ "children": [
            { "node": "match", "pattern": "page.xml", "children": [
                { "node": "generate", "src": "page.xml" },
                { "node": "serialize", "type": "xml" }
            ]},
            { "node": "match", "pattern": "wrapped.html", "children": [
                { "node": "generate", "src": "cocoon:/page.xml" },
                { "node": "serialize" }
            ]}
        ]}]
    }"#;

    #[test]
    fn settings_resolve_relative_to_base() {
        let settings = ProcessorSettings::new("/srv/site");
        assert_eq!(settings.resolve_path("sub/sitemap.json"), PathBuf::from("/srv/site/sub/sitemap.json"));
        assert_eq!(settings.resolve_path("file:/abs/x.json"), PathBuf::from("/abs/x.json"));
        assert_eq!(settings.root_descriptor, "sitemap.json");
    }

    #[test]
    fn process_reports_handled() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "page.xml", "<page/>");
        let proc = TreeProcessor::from_json(SITEMAP, dir.path()).unwrap();

        let mut env = RequestEnvironment::new("page.xml");
        assert!(proc.process(&mut env).unwrap());
        assert_eq!(env.body_string(), "<page/>");
        assert_eq!(env.content_type(), Some("text/xml"));

        let mut env = RequestEnvironment::new("nothing");
        assert!(!proc.process(&mut env).unwrap());
        assert!(env.body().is_empty());
    }

    #[test]
    fn build_pipeline_does_not_execute() {
        let dir = tempfile::tempdir().unwrap();
        let proc = TreeProcessor::from_json(SITEMAP, dir.path()).unwrap();
        let mut env = RequestEnvironment::new("page.xml");
        let pipeline = proc.build_pipeline(&mut env).unwrap().unwrap();
        assert!(pipeline.is_complete());
        assert!(env.body().is_empty());

        let mut env = RequestEnvironment::new("nothing");
        assert!(proc.build_pipeline(&mut env).unwrap().is_none());
    }

    #[test]
    fn cocoon_source_runs_sub_request() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "page.xml", "<page/>");
        let proc = TreeProcessor::from_json(SITEMAP, dir.path()).unwrap();

        let mut env = RequestEnvironment::new("wrapped.html");
        assert!(proc.process(&mut env).unwrap());
        assert_eq!(env.body_string(), "<page/>");
        assert_eq!(env.content_type(), Some("text/html"));
    }

    #[test]
    fn sitemap_source_exposes_cache_protocol() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "page.xml", "<page/>");
        let proc = TreeProcessor::from_json(SITEMAP, dir.path()).unwrap();

        let env = RequestEnvironment::new("page.xml").internal(false);
        let mut source = SitemapSource::new(&proc, Box::new(env));
        source.prepare().unwrap();
        let key = source.cache_key().unwrap().unwrap();
        assert!(key.starts_with("gen:file(page.xml)"), "{key}");
        assert!(source.validity().unwrap().is_some());
        assert_eq!(source.mime_type(), Some("text/xml"));
        assert_eq!(source.content().unwrap(), "<page/>");

        let resolver = SitemapSourceResolver::new(&proc, &proc);
        assert!(resolver.validity("cocoon:/page.xml").is_some());
        assert!(resolver.validity("cocoon:/missing").is_none());
    }

    #[test]
    fn sitemap_source_unhandled_is_not_found() {
        let proc = TreeProcessor::from_json(SITEMAP, ".").unwrap();
        let env = RequestEnvironment::new("missing").internal(false);
        let mut source = SitemapSource::new(&proc, Box::new(env));
        assert!(source.prepare().unwrap_err().is_resource_not_found());
    }
}
