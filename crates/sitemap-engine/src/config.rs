//! Declarative sitemap descriptor, deserialized from JSON.
//!
//! ```json
//! {
//!   "views": [{ "name": "content", "from_label": "content", "children": [...] }],
//!   "resources": [{ "name": "page", "children": [...] }],
//!   "pipelines": [{
//!     "type": "caching",
//!     "children": [
//!       { "node": "match", "pattern": "hello.html", "children": [
//!         { "node": "generate", "src": "welcome.xml" },
//!         { "node": "transform", "src": "page.tpl" },
//!         { "node": "serialize", "type": "html" }
//!       ]}
//!     ],
//!     "handle_errors": [{ "type": "404", "children": [...] }]
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sitemap_types::{Result, SitemapError};

use crate::pipeline::PipelineKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitemapConfig {
    #[serde(default)]
    pub views: Vec<ViewConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

impl SitemapConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SitemapError::configuration("descriptor", e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SitemapError::configuration(path.display().to_string(), e.to_string())
        })?;
        serde_json::from_str(&text)
            .map_err(|e| SitemapError::configuration(path.display().to_string(), e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPosition {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    pub name: String,
    #[serde(default)]
    pub from_label: Option<String>,
    #[serde(default)]
    pub from_position: Option<ViewPosition>,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(rename = "type", default)]
    pub kind: PipelineKind,
    #[serde(default)]
    pub internal_only: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
    #[serde(default)]
    pub handle_errors: Vec<HandleErrorsConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorHandlerType {
    #[serde(rename = "404")]
    NotFound,
    #[serde(rename = "500")]
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleErrorsConfig {
    /// `None` declares the generic handler.
    #[serde(rename = "type", default)]
    pub kind: Option<ErrorHandlerType>,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenConfig {
    pub test: String,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartConfig {
    pub src: String,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub ns: Option<String>,
    #[serde(default)]
    pub strip_root: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One node of the tree, tagged by `"node"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeConfig {
    Match {
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "type", default)]
        kind: Option<String>,
        pattern: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<NodeConfig>,
    },
    Select {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        when: Vec<WhenConfig>,
        #[serde(default)]
        otherwise: Option<Vec<NodeConfig>>,
    },
    Generate {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        src: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        labels: Vec<String>,
    },
    Transform {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        src: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        labels: Vec<String>,
    },
    Serialize {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        src: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        labels: Vec<String>,
        #[serde(default)]
        mime_type: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
    },
    Aggregate {
        element: String,
        #[serde(default)]
        ns: Option<String>,
        #[serde(default)]
        labels: Vec<String>,
        #[serde(default)]
        parts: Vec<PartConfig>,
    },
    Mount {
        src: String,
        #[serde(default)]
        uri_prefix: String,
        #[serde(default)]
        check_reload: Option<bool>,
        #[serde(default)]
        pass_through: bool,
    },
    Call {
        resource: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    Redirect {
        uri: String,
        #[serde(default)]
        global: bool,
        #[serde(default)]
        permanent: bool,
        #[serde(default)]
        create_session: bool,
    },
    Pipeline(PipelineConfig),
}

impl NodeConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeConfig::Match { .. } => "match",
            NodeConfig::Select { .. } => "select",
            NodeConfig::Generate { .. } => "generate",
            NodeConfig::Transform { .. } => "transform",
            NodeConfig::Serialize { .. } => "serialize",
            NodeConfig::Aggregate { .. } => "aggregate",
            NodeConfig::Mount { .. } => "mount",
            NodeConfig::Call { .. } => "call",
            NodeConfig::Redirect { .. } => "redirect",
            NodeConfig::Pipeline(_) => "pipeline",
        }
    }

    /// Labels declared on the node itself.
    pub fn labels(&self) -> &[String] {
        match self {
            NodeConfig::Generate { labels, .. }
            | NodeConfig::Transform { labels, .. }
            | NodeConfig::Serialize { labels, .. }
            | NodeConfig::Aggregate { labels, .. } => labels,
            _ => &[],
        }
    }

    /// Nested node sequences, in declaration order.
    pub fn child_sequences(&self) -> Vec<&[NodeConfig]> {
        match self {
            NodeConfig::Match { children, .. } => vec![children.as_slice()],
            NodeConfig::Select {
                when, otherwise, ..
            } => {
                let mut out: Vec<&[NodeConfig]> = when.iter().map(|w| w.children.as_slice()).collect();
                if let Some(o) = otherwise {
                    out.push(o.as_slice());
                }
                out
            }
            NodeConfig::Pipeline(p) => {
                let mut out = vec![p.children.as_slice()];
                out.extend(p.handle_errors.iter().map(|h| h.children.as_slice()));
                out
            }
            _ => Vec::new(),
        }
    }
}
