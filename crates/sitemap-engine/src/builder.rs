//! Compiles a [`SitemapConfig`] into an immutable [`TreeProcessor`].
//!
//! Component types, static call targets and view tables are resolved here,
//! once, so request-time lookups by name remain only where a value is
//! parameterized.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use sitemap_types::{Result, SitemapError};

use crate::component::{default_registry, ComponentRegistry, Resolved, Role, Transformer};
use crate::components::links::{LinkGatherer, LinkTranslator};
use crate::components::sources::FileSourceResolver;
use crate::config::{
    ErrorHandlerType, NodeConfig, PartConfig, PipelineConfig, SitemapConfig, ViewConfig,
    ViewPosition,
};
use crate::error_handling::{DefaultNotifyingBuilder, NotifyingBuilder};
use crate::mount::{FileProcessorFactory, SubProcessorFactory, SubProcessorRegistry};
use crate::nodes::{
    AggregateNode, AggregatePart, CallResourceNode, CallTarget, ErrorHandlerKind, GenerateNode,
    HandleErrorsNode, MatchNode, MountNode, PipelineNode, ProcessingNode, RedirectNode, Resource,
    ResourceId, SelectCase, SelectNode, SerializeNode, TransformNode, View, ViewId, ViewMap,
    FIRST_POSITION, LAST_POSITION,
};
use crate::processor::{ProcessorSettings, TreeProcessor};
use crate::redirector::{ForwardRedirector, Redirector};
use crate::validation::{validate_or_raise, Severity};
use crate::variables::{compile_parameters, ParameterResolvers, VariableResolver};

/// Re-tag any error raised while compiling `location` as a configuration
/// error at that location.
fn at(location: &str) -> impl Fn(SitemapError) -> SitemapError + '_ {
    move |e| match e {
        SitemapError::ConfigurationError { message, .. } => {
            SitemapError::configuration(location, message)
        }
        other => SitemapError::configuration(location, other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// TreeBuilder
// ---------------------------------------------------------------------------

/// Collaborators and settings shared by a tree and every tree mounted
/// beneath it.
#[derive(Clone)]
pub struct TreeBuilder {
    components: Arc<ComponentRegistry>,
    settings: ProcessorSettings,
    notifying_builder: Arc<dyn NotifyingBuilder>,
    redirector: Arc<dyn Redirector>,
    factory: Option<Arc<dyn SubProcessorFactory>>,
    source: String,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new(Arc::new(default_registry()))
    }
}

impl TreeBuilder {
    pub fn new(components: Arc<ComponentRegistry>) -> Self {
        Self {
            components,
            settings: ProcessorSettings::default(),
            notifying_builder: Arc::new(DefaultNotifyingBuilder),
            redirector: Arc::new(ForwardRedirector),
            factory: None,
            source: String::new(),
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl AsRef<Path>) -> Self {
        self.settings.base_dir = base_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_check_reload(mut self, check_reload: bool) -> Self {
        self.settings.check_reload = check_reload;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_notifying_builder(mut self, builder: Arc<dyn NotifyingBuilder>) -> Self {
        self.notifying_builder = builder;
        self
    }

    pub fn with_redirector(mut self, redirector: Arc<dyn Redirector>) -> Self {
        self.redirector = redirector;
        self
    }

    /// Replace the factory mounted trees are compiled with.
    pub fn with_factory(mut self, factory: Arc<dyn SubProcessorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate `config` and compile it.
    pub fn build(&self, config: &SitemapConfig) -> Result<TreeProcessor> {
        let diagnostics = validate_or_raise(config)?;
        for d in diagnostics.iter().filter(|d| d.severity == Severity::Warning) {
            tracing::warn!(
                rule = %d.rule,
                location = d.location.as_deref().unwrap_or("-"),
                "{}",
                d.message
            );
        }

        let resource_index: HashMap<String, ResourceId> = config
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), ResourceId(i)))
            .collect();
        let compiler = Compiler {
            components: &self.components,
            settings: &self.settings,
            views: &config.views,
            resource_index: &resource_index,
        };

        let mut views = Vec::with_capacity(config.views.len());
        for (i, v) in config.views.iter().enumerate() {
            views.push(View {
                name: v.name.clone(),
                children: compiler.sequence(&v.children, &format!("views[{i}]"))?,
            });
        }
        let mut resources = Vec::with_capacity(config.resources.len());
        for (i, r) in config.resources.iter().enumerate() {
            resources.push(Resource {
                name: r.name.clone(),
                children: compiler.sequence(&r.children, &format!("resources[{i}]"))?,
            });
        }
        let mut nodes = Vec::with_capacity(config.pipelines.len());
        for (i, p) in config.pipelines.iter().enumerate() {
            let node = compiler.pipeline(p, &format!("pipelines[{i}]"))?;
            nodes.push(ProcessingNode::Pipeline(node));
        }

        let factory = self
            .factory
            .clone()
            .unwrap_or_else(|| Arc::new(FileProcessorFactory::new(self.clone())));

        tracing::info!(
            source = %self.source,
            pipelines = nodes.len(),
            resources = resources.len(),
            views = views.len(),
            "Sitemap compiled"
        );

        Ok(TreeProcessor {
            nodes,
            resources,
            resource_index,
            views,
            files: FileSourceResolver::new(self.settings.base_dir.clone()),
            settings: self.settings.clone(),
            components: Arc::clone(&self.components),
            mounts: SubProcessorRegistry::new(),
            factory,
            notifying_builder: Arc::clone(&self.notifying_builder),
            redirector: Arc::clone(&self.redirector),
            source: self.source.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

struct Compiler<'c> {
    components: &'c ComponentRegistry,
    settings: &'c ProcessorSettings,
    views: &'c [ViewConfig],
    resource_index: &'c HashMap<String, ResourceId>,
}

impl Compiler<'_> {
    fn sequence(&self, nodes: &[NodeConfig], path: &str) -> Result<Vec<ProcessingNode>> {
        nodes
            .iter()
            .enumerate()
            .map(|(i, n)| self.node(n, &format!("{path}.children[{i}]")))
            .collect()
    }

    fn resolver(&self, value: &str, path: &str) -> Result<VariableResolver> {
        VariableResolver::compile(value, self.components).map_err(at(path))
    }

    fn optional_resolver(&self, value: Option<&str>, path: &str) -> Result<Option<VariableResolver>> {
        value.map(|v| self.resolver(v, path)).transpose()
    }

    fn parameters(&self, raw: &BTreeMap<String, String>, path: &str) -> Result<ParameterResolvers> {
        compile_parameters(raw, self.components).map_err(at(path))
    }

    /// Views reachable from a node carrying `labels` plus the reserved
    /// position label, if any.
    fn view_map(&self, labels: &[String], position: Option<&str>) -> ViewMap {
        let mut map = ViewMap::new();
        for (i, view) in self.views.iter().enumerate() {
            let target = match (&view.from_label, view.from_position) {
                (Some(label), _) => label.as_str(),
                (None, Some(ViewPosition::First)) => FIRST_POSITION,
                (None, Some(ViewPosition::Last)) => LAST_POSITION,
                (None, None) => continue,
            };
            if labels.iter().any(|l| l == target) || position == Some(target) {
                map.insert(view.name.clone(), ViewId(i));
            }
        }
        map
    }

    fn link_stage(&self, name: &str, path: &str) -> Result<Option<Resolved<dyn Transformer>>> {
        if !self.components.has(Role::Transformer, name) {
            return Ok(None);
        }
        self.components.transformer(Some(name)).map(Some).map_err(at(path))
    }

    fn node(&self, node: &NodeConfig, path: &str) -> Result<ProcessingNode> {
        Ok(match node {
            NodeConfig::Match {
                name,
                kind,
                pattern,
                parameters,
                children,
            } => {
                let matcher = self.components.matcher(kind.as_deref()).map_err(at(path))?;
                let pattern = self.resolver(pattern, path)?;
                if let Some(value) = pattern.static_value() {
                    matcher.component.check_pattern(&value).map_err(at(path))?;
                }
                ProcessingNode::Match(MatchNode {
                    name: name.clone(),
                    pattern,
                    matcher,
                    parameters: self.parameters(parameters, path)?,
                    children: self.sequence(children, &format!("{path}[0]"))?,
                })
            }
            NodeConfig::Select {
                kind,
                parameters,
                when,
                otherwise,
            } => {
                let mut cases = Vec::with_capacity(when.len());
                for (j, w) in when.iter().enumerate() {
                    cases.push(SelectCase {
                        test: self.resolver(&w.test, path)?,
                        children: self.sequence(&w.children, &format!("{path}[{j}]"))?,
                    });
                }
                let otherwise = match otherwise {
                    Some(o) => Some(self.sequence(o, &format!("{path}[{}]", when.len()))?),
                    None => None,
                };
                ProcessingNode::Select(SelectNode {
                    selector: self.components.selector(kind.as_deref()).map_err(at(path))?,
                    parameters: self.parameters(parameters, path)?,
                    cases,
                    otherwise,
                })
            }
            NodeConfig::Generate {
                kind,
                src,
                parameters,
                labels,
            } => ProcessingNode::Generate(GenerateNode {
                generator: self.components.generator(kind.as_deref()).map_err(at(path))?,
                source: self.optional_resolver(src.as_deref(), path)?,
                parameters: self.parameters(parameters, path)?,
                views: self.view_map(labels, Some(FIRST_POSITION)),
            }),
            NodeConfig::Transform {
                kind,
                src,
                parameters,
                labels,
            } => ProcessingNode::Transform(TransformNode {
                transformer: self.components.transformer(kind.as_deref()).map_err(at(path))?,
                source: self.optional_resolver(src.as_deref(), path)?,
                parameters: self.parameters(parameters, path)?,
                views: self.view_map(labels, None),
            }),
            NodeConfig::Serialize {
                kind,
                src,
                parameters,
                labels,
                mime_type,
                status_code,
            } => ProcessingNode::Serialize(SerializeNode {
                serializer: self.components.serializer(kind.as_deref()).map_err(at(path))?,
                source: self.optional_resolver(src.as_deref(), path)?,
                parameters: self.parameters(parameters, path)?,
                mime_type: mime_type.clone(),
                status_code: *status_code,
                views: self.view_map(labels, Some(LAST_POSITION)),
                link_translator: self.link_stage(LinkTranslator::TYPE, path)?,
                link_gatherer: self.link_stage(LinkGatherer::TYPE, path)?,
            }),
            NodeConfig::Aggregate {
                element,
                ns,
                labels,
                parts,
            } => {
                let parts = parts
                    .iter()
                    .enumerate()
                    .map(|(j, p)| self.part(p, &format!("{path}.parts[{j}]")))
                    .collect::<Result<Vec<_>>>()?;
                ProcessingNode::Aggregate(AggregateNode {
                    element: element.clone(),
                    ns: ns.clone(),
                    parts,
                    views: self.view_map(labels, Some(FIRST_POSITION)),
                })
            }
            NodeConfig::Mount {
                src,
                uri_prefix,
                check_reload,
                pass_through,
            } => ProcessingNode::Mount(MountNode {
                src: self.resolver(src, path)?,
                uri_prefix: self.resolver(uri_prefix, path)?,
                check_reload: check_reload.unwrap_or(self.settings.check_reload),
                pass_through: *pass_through,
            }),
            NodeConfig::Call {
                resource,
                parameters,
            } => {
                let name = self.resolver(resource, path)?;
                let target = match name.static_value() {
                    Some(value) => {
                        let id = self.resource_index.get(&value).copied().ok_or_else(|| {
                            SitemapError::configuration(path, format!("unknown resource '{value}'"))
                        })?;
                        CallTarget::Static(id)
                    }
                    None => CallTarget::Dynamic(name),
                };
                ProcessingNode::CallResource(CallResourceNode {
                    target,
                    parameters: self.parameters(parameters, path)?,
                })
            }
            NodeConfig::Redirect {
                uri,
                global,
                permanent,
                create_session,
            } => ProcessingNode::RedirectToUri(RedirectNode {
                uri: self.resolver(uri, path)?,
                global: *global,
                permanent: *permanent,
                create_session: *create_session,
            }),
            NodeConfig::Pipeline(p) => ProcessingNode::Pipeline(self.pipeline(p, path)?),
        })
    }

    fn part(&self, part: &PartConfig, path: &str) -> Result<AggregatePart> {
        Ok(AggregatePart {
            src: self.resolver(&part.src, path)?,
            element: part.element.clone(),
            ns: part.ns.clone(),
            strip_root: part.strip_root,
            labels: part.labels.iter().cloned().collect::<BTreeSet<_>>(),
            views: self.view_map(&part.labels, None),
        })
    }

    fn pipeline(&self, config: &PipelineConfig, path: &str) -> Result<PipelineNode> {
        let mut not_found_handler = None;
        let mut error_handler = None;
        for (j, h) in config.handle_errors.iter().enumerate() {
            let handler_path = format!("{path}.handle_errors[{j}]");
            let kind = match h.kind {
                Some(ErrorHandlerType::NotFound) => ErrorHandlerKind::NotFound,
                Some(ErrorHandlerType::ServerError) | None => ErrorHandlerKind::ServerError,
            };
            let node = HandleErrorsNode {
                kind,
                children: self.sequence(&h.children, &handler_path)?,
            };
            match kind {
                ErrorHandlerKind::NotFound => not_found_handler = Some(node),
                ErrorHandlerKind::ServerError => error_handler = Some(node),
            }
        }

        Ok(PipelineNode {
            kind: config.kind,
            internal_only: config.internal_only,
            parameters: self.parameters(&config.parameters, path)?,
            children: self.sequence(&config.children, path)?,
            not_found_handler,
            error_handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(json: &str) -> Result<TreeProcessor> {
        TreeBuilder::default().build(&SitemapConfig::from_json(json)?)
    }

    #[test]
    fn compiles_pipelines_views_and_resources() {
        let proc = build(
            r#"{
                "views": [
                    { "name": "content", "from_label": "content", "children": [{ "node": "serialize", "type": "xml" }] },
                    { "name": "pretty", "from_position": "last", "children": [{ "node": "serialize", "type": "text" }] }
                ],
                "resources": [{ "name": "page", "children": [{ "node": "serialize" }] }],
                "pipelines": [{ "children": [
                    { "node": "match", "pattern": "*.html", "children": [
                        { "node": "generate", "src": "{1}.xml", "labels": ["content"] },
                        { "node": "call", "resource": "page" }
                    ]}
                ]}]
            }"#,
        )
        .unwrap();
        assert_eq!(proc.nodes().len(), 1);
        assert!(proc.resource_by_name("page").is_some());
        assert!(proc.resource_by_name("missing").is_none());

        let ProcessingNode::Pipeline(pipeline) = &proc.nodes()[0] else {
            panic!("expected pipeline");
        };
        let ProcessingNode::Match(m) = &pipeline.children[0] else {
            panic!("expected match");
        };
        let generate = &m.children[0];
        assert_eq!(generate.view_node("content"), Some(ViewId(0)));
        assert_eq!(generate.view_node("pretty"), None);
        assert!(generate.has_parameters());
        assert!(matches!(
            &m.children[1],
            ProcessingNode::CallResource(CallResourceNode {
                target: CallTarget::Static(ResourceId(0)),
                ..
            })
        ));

        let page = proc.resource_by_name("page").unwrap();
        assert_eq!(page.children[0].view_node("pretty"), Some(ViewId(1)));
    }

    #[test]
    fn dynamic_call_target_is_kept_for_request_time() {
        let proc = build(
            r#"{ "resources": [{ "name": "a", "children": [] }],
                 "pipelines": [{ "children": [
                    { "node": "match", "pattern": "*", "children": [{ "node": "call", "resource": "{1}" }] }
                 ]}]}"#,
        )
        .unwrap();
        let ProcessingNode::Pipeline(p) = &proc.nodes()[0] else {
            panic!("expected pipeline");
        };
        let ProcessingNode::Match(m) = &p.children[0] else {
            panic!("expected match");
        };
        assert!(m.children[0].has_parameters());
    }

    #[test]
    fn unknown_component_type_is_configuration_error() {
        let err = build(
            r#"{ "pipelines": [{ "children": [
                { "node": "generate", "type": "nope", "src": "a" },
                { "node": "serialize" }
            ]}]}"#,
        )
        .unwrap_err();
        match err {
            SitemapError::ConfigurationError { location, message } => {
                assert_eq!(location, "pipelines[0].children[0]");
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_static_pattern_fails_at_build_time() {
        let err = build(
            r#"{ "pipelines": [{ "children": [
                { "node": "match", "type": "regexp", "pattern": "(unclosed", "children": [] }
            ]}]}"#,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unknown_input_module_fails_at_build_time() {
        let err = build(
            r#"{ "pipelines": [{ "children": [
                { "node": "redirect", "uri": "{nosuch:key}" }
            ]}]}"#,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn typed_and_lone_generic_handlers_are_mapped() {
        let proc = build(
            r#"{ "pipelines": [
                { "children": [{ "node": "redirect", "uri": "a" }],
                  "handle_errors": [{ "type": "404" }, { "type": "500" }] },
                { "children": [{ "node": "redirect", "uri": "b" }],
                  "handle_errors": [{}] }
            ]}"#,
        )
        .unwrap();
        let ProcessingNode::Pipeline(typed) = &proc.nodes()[0] else {
            panic!("expected pipeline");
        };
        assert!(typed.not_found_handler.is_some());
        assert!(typed.error_handler.is_some());
        let ProcessingNode::Pipeline(generic) = &proc.nodes()[1] else {
            panic!("expected pipeline");
        };
        assert!(generic.not_found_handler.is_none());
        assert_eq!(generic.error_handler.as_ref().map(|h| h.kind), Some(ErrorHandlerKind::ServerError));
    }

    #[test]
    fn mount_inherits_check_reload_default() {
        let config = SitemapConfig::from_json(
            r#"{ "pipelines": [{ "children": [{ "node": "mount", "src": "sub/", "uri_prefix": "sub" }] }] }"#,
        )
        .unwrap();
        let proc = TreeBuilder::default().with_check_reload(true).build(&config).unwrap();
        let ProcessingNode::Pipeline(p) = &proc.nodes()[0] else {
            panic!("expected pipeline");
        };
        let ProcessingNode::Mount(m) = &p.children[0] else {
            panic!("expected mount");
        };
        assert!(m.check_reload);
        assert!(proc.mounts().is_empty());
    }
}
