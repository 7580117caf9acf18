//! The request abstraction consumed by the engine, plus an in-memory
//! implementation used by the CLI, sub-requests and tests.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;

use sitemap_types::{Notifying, Parameters, Result};

use crate::pipeline::PipelineKind;

// ---------------------------------------------------------------------------
// Redirect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Scoped to the current mount level.
    Ordinary,
    /// Escapes every mount level.
    Global,
    /// Like `Ordinary`, with permanent status semantics.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub uri: String,
    pub kind: RedirectKind,
    pub create_session: bool,
}

impl Redirect {
    pub fn status(&self) -> u16 {
        match self.kind {
            RedirectKind::Permanent => 301,
            RedirectKind::Ordinary | RedirectKind::Global => 302,
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectModel: request-scoped shared state
// ---------------------------------------------------------------------------

/// Pipeline type and parameters announced by the innermost Pipeline node.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePipeline {
    pub kind: PipelineKind,
    pub parameters: Parameters,
}

/// Request-scoped state shared by every node and component taking part in
/// one request.
#[derive(Debug, Clone, Default)]
pub struct ObjectModel {
    attributes: HashMap<String, serde_json::Value>,
    notifying: Option<Arc<Notifying>>,
    active_pipeline: Option<ActivePipeline>,
    link_translation: Option<BTreeMap<String, String>>,
    gathered_links: Option<Vec<String>>,
}

impl ObjectModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<serde_json::Value> {
        self.attributes.remove(key)
    }

    /// The error record of the current request chain, if one was built.
    pub fn notifying(&self) -> Option<&Arc<Notifying>> {
        self.notifying.as_ref()
    }

    pub fn set_notifying(&mut self, record: Arc<Notifying>) {
        self.notifying = Some(record);
    }

    pub fn active_pipeline(&self) -> Option<&ActivePipeline> {
        self.active_pipeline.as_ref()
    }

    pub fn set_active_pipeline(&mut self, kind: PipelineKind, parameters: Parameters) {
        self.active_pipeline = Some(ActivePipeline { kind, parameters });
    }

    /// Link-translation marker: links found in the output are rewritten
    /// through this map before serialization.
    pub fn link_translation(&self) -> Option<&BTreeMap<String, String>> {
        self.link_translation.as_ref()
    }

    pub fn enable_link_translation(&mut self, map: BTreeMap<String, String>) {
        self.link_translation = Some(map);
    }

    /// Link-gathering marker: links found in the output are collected here.
    pub fn gathered_links(&self) -> Option<&[String]> {
        self.gathered_links.as_deref()
    }

    pub fn is_gathering_links(&self) -> bool {
        self.gathered_links.is_some()
    }

    pub fn enable_link_gathering(&mut self) {
        self.gathered_links.get_or_insert_with(Vec::new);
    }

    pub fn push_gathered_link(&mut self, link: impl Into<String>) {
        if let Some(links) = self.gathered_links.as_mut() {
            links.push(link.into());
        }
    }
}

// ---------------------------------------------------------------------------
// Environment trait
// ---------------------------------------------------------------------------

/// The request as seen by the tree interpreter.
pub trait Environment {
    /// Request URI relative to the current mount prefix.
    fn uri(&self) -> &str;

    /// Prefix stripped by the enclosing mounts.
    fn prefix(&self) -> &str;

    /// Replace the ambient prefix and URI. Callers restore the previous
    /// values themselves.
    fn set_context(&mut self, prefix: String, uri: String);

    fn requested_view(&self) -> Option<&str>;

    /// `true` for requests initiated from outside the engine.
    fn is_external(&self) -> bool;

    /// `true` for the head of an internal redirect chain.
    fn is_internal_redirect(&self) -> bool;

    fn parameter(&self, name: &str) -> Option<&str>;

    fn object_model(&self) -> &ObjectModel;

    fn object_model_mut(&mut self) -> &mut ObjectModel;

    /// Discard any output that was not committed yet. Returns `false` when
    /// the response was already committed.
    fn try_reset_response(&mut self) -> bool;

    fn set_status(&mut self, status: u16);

    fn set_content_type(&mut self, mime_type: &str);

    fn redirect(&mut self, redirect: Redirect) -> Result<()>;

    fn output(&mut self) -> &mut dyn Write;

    /// Create an internal (non-external) sub-request for `uri`.
    fn internal_request(&self, uri: &str) -> Box<dyn Environment>;
}

// ---------------------------------------------------------------------------
// RequestEnvironment: in-memory implementation
// ---------------------------------------------------------------------------

/// Buffered, in-memory request. Output is kept until read back with
/// [`body`](RequestEnvironment::body), so a reset is always possible unless
/// [`commit`](RequestEnvironment::commit) was called.
#[derive(Debug, Clone)]
pub struct RequestEnvironment {
    uri: String,
    prefix: String,
    view: Option<String>,
    parameters: HashMap<String, String>,
    external: bool,
    internal_redirect: bool,
    object_model: ObjectModel,
    status: Option<u16>,
    content_type: Option<String>,
    redirects: Vec<Redirect>,
    body: Vec<u8>,
    committed: bool,
    resets: usize,
}

impl RequestEnvironment {
    /// Create an external request for `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            prefix: String::new(),
            view: None,
            parameters: HashMap::new(),
            external: true,
            internal_redirect: false,
            object_model: ObjectModel::new(),
            status: None,
            content_type: None,
            redirects: Vec::new(),
            body: Vec::new(),
            committed: false,
            resets: 0,
        }
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Mark the request as internal; `internal_redirect` keeps it eligible
    /// for local error handling.
    pub fn internal(mut self, internal_redirect: bool) -> Self {
        self.external = false;
        self.internal_redirect = internal_redirect;
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn redirects(&self) -> &[Redirect] {
        &self.redirects
    }

    /// Number of successful response resets.
    pub fn reset_count(&self) -> usize {
        self.resets
    }

    /// Mark everything written so far as sent to the client.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Environment for RequestEnvironment {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn set_context(&mut self, prefix: String, uri: String) {
        self.prefix = prefix;
        self.uri = uri;
    }

    fn requested_view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    fn is_external(&self) -> bool {
        self.external
    }

    fn is_internal_redirect(&self) -> bool {
        self.internal_redirect
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    fn object_model(&self) -> &ObjectModel {
        &self.object_model
    }

    fn object_model_mut(&mut self) -> &mut ObjectModel {
        &mut self.object_model
    }

    fn try_reset_response(&mut self) -> bool {
        if self.committed {
            return false;
        }
        self.body.clear();
        self.content_type = None;
        self.status = None;
        self.resets += 1;
        true
    }

    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn set_content_type(&mut self, mime_type: &str) {
        self.content_type = Some(mime_type.to_string());
    }

    fn redirect(&mut self, redirect: Redirect) -> Result<()> {
        self.status = Some(redirect.status());
        self.redirects.push(redirect);
        Ok(())
    }

    fn output(&mut self) -> &mut dyn Write {
        &mut self.body
    }

    fn internal_request(&self, uri: &str) -> Box<dyn Environment> {
        let mut sub = RequestEnvironment::new(uri).internal(false);
        sub.parameters = self.parameters.clone();
        Box::new(sub)
    }
}
