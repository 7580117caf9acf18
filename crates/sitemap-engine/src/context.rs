//! Per-request interpreter state threaded through every node invocation.

use std::collections::HashSet;
use std::sync::Arc;

use sitemap_types::Parameters;

use crate::component::Bindings;
use crate::pipeline::{PipelineKind, ProcessingPipeline};
use crate::processor::{SitemapSourceResolver, TreeProcessor};
use crate::redirector::Redirector;

/// One level of the variable scope stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Set when the pushing Match node declares a name, for `{#name:var}`.
    pub name: Option<String>,
    pub vars: Bindings,
}

impl Scope {
    pub fn new(name: Option<String>, vars: Bindings) -> Self {
        Self { name, vars }
    }
}

/// Mutable state of one invocation of a tree.
///
/// A fresh context is created per top-level request, per error-handler
/// dispatch and per nested (mount or sub-request) invocation. It is never
/// shared between requests.
pub struct InvokeContext<'a> {
    processor: &'a TreeProcessor,
    root: &'a TreeProcessor,
    pipeline: Option<ProcessingPipeline>,
    scopes: Vec<Scope>,
    redirector: Arc<dyn Redirector>,
    build_only: bool,
    pipeline_kind: PipelineKind,
    pipeline_parameters: Parameters,
    views_taken: HashSet<String>,
}

impl<'a> InvokeContext<'a> {
    pub fn new(
        processor: &'a TreeProcessor,
        root: &'a TreeProcessor,
        build_only: bool,
        redirector: Arc<dyn Redirector>,
    ) -> Self {
        Self {
            processor,
            root,
            pipeline: None,
            scopes: Vec::new(),
            redirector,
            build_only,
            pipeline_kind: PipelineKind::default(),
            pipeline_parameters: Parameters::new(),
            views_taken: HashSet::new(),
        }
    }

    /// A fresh context on the same tree for an error handler, keeping the
    /// caller's mode, redirector and announced pipeline type.
    pub fn for_error_handler(&self) -> InvokeContext<'a> {
        let mut ctx = InvokeContext::new(
            self.processor,
            self.root,
            self.build_only,
            Arc::clone(&self.redirector),
        );
        ctx.pipeline_kind = self.pipeline_kind;
        ctx.pipeline_parameters = self.pipeline_parameters.clone();
        ctx
    }

    /// The tree whose nodes are being invoked.
    pub fn processor(&self) -> &'a TreeProcessor {
        self.processor
    }

    /// The outermost tree, target of `cocoon://` sources.
    pub fn root(&self) -> &'a TreeProcessor {
        self.root
    }

    pub fn is_build_only(&self) -> bool {
        self.build_only
    }

    pub fn redirector(&self) -> &Arc<dyn Redirector> {
        &self.redirector
    }

    pub fn source_resolver(&self) -> SitemapSourceResolver<'a> {
        SitemapSourceResolver::new(self.processor, self.root)
    }

    // ---- scopes ----

    /// Scopes from outermost to innermost.
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn push_scope(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    // ---- pipeline ----

    /// Record the type and parameters of the innermost Pipeline node.
    pub fn announce_pipeline(&mut self, kind: PipelineKind, parameters: Parameters) {
        self.pipeline_kind = kind;
        self.pipeline_parameters = parameters;
    }

    pub fn pipeline_kind(&self) -> PipelineKind {
        self.pipeline_kind
    }

    pub fn pipeline(&self) -> Option<&ProcessingPipeline> {
        self.pipeline.as_ref()
    }

    /// The pipeline under construction, created with the announced type on
    /// first use.
    pub fn pipeline_mut(&mut self) -> &mut ProcessingPipeline {
        let kind = self.pipeline_kind;
        let parameters = &self.pipeline_parameters;
        self.pipeline
            .get_or_insert_with(|| ProcessingPipeline::new(kind, parameters.clone()))
    }

    pub fn take_pipeline(&mut self) -> Option<ProcessingPipeline> {
        self.pipeline.take()
    }

    pub fn set_pipeline(&mut self, pipeline: Option<ProcessingPipeline>) {
        self.pipeline = pipeline;
    }

    // ---- views ----

    /// Claim the diversion to `view`. Returns `false` if this context
    /// already diverted to it.
    pub fn take_view(&mut self, view: &str) -> bool {
        self.views_taken.insert(view.to_string())
    }
}
