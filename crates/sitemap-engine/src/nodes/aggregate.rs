//! Aggregate: a producer stage wrapping the output of several parts in one
//! root element.

use std::collections::BTreeSet;
use std::sync::Arc;

use sitemap_types::{Parameters, Result, Validity};

use crate::component::{Generator, Resolved, StageContext, StageInfo};
use crate::components::stages::escape_xml;
use crate::context::InvokeContext;
use crate::environment::Environment;
use crate::nodes::{divert, NodeOutcome, ViewMap};
use crate::pipeline::Stage;
use crate::variables::VariableResolver;

#[derive(Debug)]
pub struct AggregatePart {
    pub src: VariableResolver,
    /// Element wrapping this part's content, if any.
    pub element: Option<String>,
    pub ns: Option<String>,
    /// Drop the outermost element of the part's content.
    pub strip_root: bool,
    pub labels: BTreeSet<String>,
    pub views: ViewMap,
}

#[derive(Debug)]
pub struct AggregateNode {
    pub element: String,
    pub ns: Option<String>,
    pub parts: Vec<AggregatePart>,
    pub views: ViewMap,
}

impl AggregateNode {
    /// Parts are filtered by comparing their labels with the requested view
    /// name, so a part only diverts to a view whose name equals its label.
    pub fn invoke(
        &self,
        env: &mut dyn Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<NodeOutcome> {
        let labelled: Vec<&AggregatePart> = match env.requested_view() {
            Some(view) => self.parts.iter().filter(|p| p.labels.contains(view)).collect(),
            None => Vec::new(),
        };
        let filtered = !labelled.is_empty();
        let rendered: Vec<&AggregatePart> = if filtered {
            labelled
        } else {
            self.parts.iter().collect()
        };

        let mut parts = Vec::with_capacity(rendered.len());
        for part in &rendered {
            parts.push(ResolvedPart {
                src: part.src.resolve(ctx.scopes(), env)?,
                element: part.element.clone(),
                ns: part.ns.clone(),
                strip_root: part.strip_root,
            });
        }
        let aggregator = ContentAggregator {
            element: self.element.clone(),
            ns: self.ns.clone(),
            parts,
        };

        let pipeline = ctx.pipeline_mut();
        pipeline.set_generator(Stage::new(
            Resolved {
                name: "aggregate".to_string(),
                component: Arc::new(aggregator) as Arc<dyn Generator>,
            },
            None,
            Parameters::new(),
        ))?;
        pipeline.mark_branch_point();

        // Part labels take precedence over the aggregate's own view table.
        if filtered {
            for part in &rendered {
                if let Some(outcome) = divert(&part.views, env, ctx)? {
                    return Ok(outcome);
                }
            }
        }
        Ok(divert(&self.views, env, ctx)?.unwrap_or(NodeOutcome::NotHandled))
    }
}

// ---------------------------------------------------------------------------
// ContentAggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ResolvedPart {
    src: String,
    element: Option<String>,
    ns: Option<String>,
    strip_root: bool,
}

/// Generator built per invocation from the parts selected for the request.
#[derive(Debug)]
struct ContentAggregator {
    element: String,
    ns: Option<String>,
    parts: Vec<ResolvedPart>,
}

fn open_tag(element: &str, ns: Option<&str>) -> String {
    match ns {
        Some(ns) => format!("<{element} xmlns=\"{}\">", escape_xml(ns)),
        None => format!("<{element}>"),
    }
}

fn strip_declaration(content: &str) -> &str {
    let trimmed = content.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

/// Content of the outermost element, or the input unchanged if it does not
/// look like a single element.
fn strip_root(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with('<') {
        return trimmed;
    }
    let Some(open_end) = trimmed.find('>') else {
        return trimmed;
    };
    if trimmed[..open_end].ends_with('/') {
        return "";
    }
    match trimmed.rfind("</") {
        Some(close) if close > open_end => &trimmed[open_end + 1..close],
        _ => trimmed,
    }
}

impl Generator for ContentAggregator {
    fn generate(&self, ctx: &mut StageContext<'_>) -> Result<String> {
        let mut out = open_tag(&self.element, self.ns.as_deref());
        for part in &self.parts {
            let content = ctx.sources.read(&part.src, &mut *ctx.env)?;
            let mut body = strip_declaration(&content);
            if part.strip_root {
                body = strip_root(body);
            }
            match &part.element {
                Some(element) => {
                    out.push_str(&open_tag(element, part.ns.as_deref()));
                    out.push_str(body);
                    out.push_str(&format!("</{element}>"));
                }
                None => out.push_str(body),
            }
        }
        out.push_str(&format!("</{}>", self.element));
        Ok(out)
    }

    fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
        let parts: Vec<String> = self
            .parts
            .iter()
            .map(|p| match &p.element {
                Some(e) => format!("{e}={}", p.src),
                None => p.src.clone(),
            })
            .collect();
        Some(format!("{}[{}]", self.element, parts.join(";")))
    }

    fn validity(&self, info: &StageInfo<'_>) -> Option<Validity> {
        Validity::aggregate(self.parts.iter().map(|p| info.sources.validity(&p.src)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;
    use crate::nodes::ViewId;
    use crate::processor::TreeProcessor;
    use crate::redirector::ForwardRedirector;

    const VIEWS: &str = r#"{ "views": [
        { "name": "nav", "from_label": "nav", "children": [{ "node": "serialize", "type": "xml" }] },
        { "name": "outline", "from_label": "outline", "children": [{ "node": "serialize", "type": "text" }] }
    ]}"#;

    fn part(src: &str, labels: &[&str], views: ViewMap) -> AggregatePart {
        AggregatePart {
            src: VariableResolver::literal(src),
            element: None,
            ns: None,
            strip_root: false,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            views,
        }
    }

    #[test]
    fn part_views_are_consulted_before_the_aggregate_views() {
        let proc = TreeProcessor::from_json(VIEWS, ".").unwrap();
        let node = AggregateNode {
            element: "page".into(),
            ns: None,
            parts: vec![
                part("a.xml", &["nav"], ViewMap::from([("nav".to_string(), ViewId(1))])),
                part("b.xml", &[], ViewMap::new()),
            ],
            views: ViewMap::from([("nav".to_string(), ViewId(0))]),
        };

        let mut ctx = InvokeContext::new(&proc, &proc, true, Arc::new(ForwardRedirector));
        let mut env = RequestEnvironment::new("x").with_view("nav");
        let outcome = node.invoke(&mut env, &mut ctx).unwrap();
        assert_eq!(
            outcome,
            NodeOutcome::Diverted {
                view: "nav".into(),
                handled: true
            }
        );
        let stages: Vec<String> = ctx
            .pipeline()
            .unwrap()
            .stages()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(stages, vec!["gen(aggregate)", "ser(text)"]);
    }

    #[test]
    fn unfiltered_request_uses_the_aggregate_views() {
        let proc = TreeProcessor::from_json(VIEWS, ".").unwrap();
        let node = AggregateNode {
            element: "page".into(),
            ns: None,
            parts: vec![part("a.xml", &["nav"], ViewMap::from([("nav".to_string(), ViewId(1))]))],
            views: ViewMap::from([("outline".to_string(), ViewId(0))]),
        };

        let mut ctx = InvokeContext::new(&proc, &proc, true, Arc::new(ForwardRedirector));
        let mut env = RequestEnvironment::new("x").with_view("outline");
        node.invoke(&mut env, &mut ctx).unwrap();
        let stages: Vec<String> = ctx
            .pipeline()
            .unwrap()
            .stages()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(stages, vec!["gen(aggregate)", "ser(xml)"]);
    }

    #[test]
    fn strip_declaration_and_root() {
        let doc = "<?xml version=\"1.0\"?>\n<page><p>hi</p></page>";
        let body = strip_declaration(doc);
        assert_eq!(body, "<page><p>hi</p></page>");
        assert_eq!(strip_root(body), "<p>hi</p>");
        assert_eq!(strip_root("<empty/>"), "");
        assert_eq!(strip_root("plain text"), "plain text");
    }

    #[test]
    fn open_tag_with_namespace() {
        assert_eq!(open_tag("doc", None), "<doc>");
        assert_eq!(open_tag("doc", Some("urn:x")), "<doc xmlns=\"urn:x\">");
    }
}
