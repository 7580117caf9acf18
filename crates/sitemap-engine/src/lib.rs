//! Sitemap tree interpreter: routing, pipeline assembly, views, mounts and
//! error recovery.
//!
//! A JSON descriptor is validated and compiled by [`TreeBuilder`] into an
//! immutable [`TreeProcessor`]. Each request walks the tree with its own
//! [`InvokeContext`], assembling a [`ProcessingPipeline`] (producer, filters,
//! output) that is either executed or handed back as a cacheable resource.

pub mod builder;
pub mod component;
pub mod components;
pub mod config;
pub mod context;
pub mod environment;
pub mod error_handling;
pub mod mount;
pub mod nodes;
pub mod pipeline;
pub mod processor;
pub mod redirector;
pub mod validation;
pub mod variables;

pub use builder::TreeBuilder;
pub use component::{
    default_registry, Bindings, ComponentRegistry, Generator, InputModule, Matcher, Resolved,
    Role, Selector, Serializer, SourceResolver, StageContext, StageInfo, SwitchContext,
    SwitchSelector, Transformer,
};
pub use config::{NodeConfig, PipelineConfig, SitemapConfig, ViewConfig, ViewPosition};
pub use context::{InvokeContext, Scope};
pub use environment::{Environment, ObjectModel, Redirect, RedirectKind, RequestEnvironment};
pub use error_handling::{DefaultNotifyingBuilder, NotifyingBuilder};
pub use mount::{FileProcessorFactory, SubProcessorFactory, SubProcessorRegistry};
pub use nodes::{NodeOutcome, ProcessingNode};
pub use pipeline::{PipelineKind, ProcessingPipeline, StageRole, StageSummary};
pub use processor::{ProcessorSettings, SitemapSource, SitemapSourceResolver, TreeProcessor};
pub use redirector::{ForwardRedirector, Redirector};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
pub use variables::{expand_variables, VariableResolver};
