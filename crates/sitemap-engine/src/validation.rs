//! Sitemap validation: lint rules and diagnostics.
//!
//! Provides built-in rules that check the structure of a [`SitemapConfig`]
//! before it is compiled. Call [`validate`] for advisory diagnostics or
//! [`validate_or_raise`] to fail on the first `Error`-severity issue.

use std::collections::{HashMap, HashSet};

use sitemap_types::{Result, SitemapError};

use crate::config::{HandleErrorsConfig, NodeConfig, PipelineConfig, SitemapConfig};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// Path of the offending element, e.g. `pipelines[0].children[2]`.
    pub location: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Tree walking
// ---------------------------------------------------------------------------

/// Every top-level node sequence with its location.
fn root_sequences(config: &SitemapConfig) -> Vec<(String, &[NodeConfig])> {
    let mut out = Vec::new();
    for (i, v) in config.views.iter().enumerate() {
        out.push((format!("views[{i}]"), v.children.as_slice()));
    }
    for (i, r) in config.resources.iter().enumerate() {
        out.push((format!("resources[{i}]"), r.children.as_slice()));
    }
    for (i, p) in config.pipelines.iter().enumerate() {
        out.push((format!("pipelines[{i}]"), p.children.as_slice()));
        for (j, h) in p.handle_errors.iter().enumerate() {
            out.push((
                format!("pipelines[{i}].handle_errors[{j}]"),
                h.children.as_slice(),
            ));
        }
    }
    out
}

/// Visit every node, depth first, in declaration order.
fn walk<'c>(seq: &'c [NodeConfig], path: &str, f: &mut dyn FnMut(&'c NodeConfig, &str)) {
    for (i, node) in seq.iter().enumerate() {
        let here = format!("{path}.children[{i}]");
        f(node, &here);
        for (j, child) in node.child_sequences().into_iter().enumerate() {
            walk(child, &format!("{here}[{j}]"), f);
        }
    }
}

fn walk_all<'c>(config: &'c SitemapConfig, f: &mut dyn FnMut(&'c NodeConfig, &str)) {
    for (path, seq) in root_sequences(config) {
        walk(seq, &path, f);
    }
}

fn is_static(value: &str) -> bool {
    !value.contains('{')
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct ErrorHandlersRule;

impl ErrorHandlersRule {
    fn check(&self, pipeline: &PipelineConfig, location: &str, out: &mut Vec<Diagnostic>) {
        let mut counts: HashMap<Option<crate::config::ErrorHandlerType>, usize> = HashMap::new();
        for h in &pipeline.handle_errors {
            *counts.entry(h.kind).or_default() += 1;
        }
        for (kind, count) in &counts {
            if *count > 1 {
                let label = match kind {
                    None => "generic".to_string(),
                    Some(k) => serde_json::to_value(k)
                        .ok()
                        .and_then(|v| v.as_str().map(String::from))
                        .unwrap_or_default(),
                };
                out.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("Pipeline declares {count} {label} error handlers; at most one is allowed"),
                    location: Some(location.to_string()),
                    fix: Some("Merge the duplicate handle_errors entries".into()),
                });
            }
        }
        let generic = counts.contains_key(&None);
        if generic && counts.len() > 1 {
            out.push(Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "Pipeline mixes a generic error handler with typed (404/500) handlers".into(),
                location: Some(location.to_string()),
                fix: Some("Give the generic handler type \"500\"".into()),
            });
        }
    }
}

impl LintRule for ErrorHandlersRule {
    fn name(&self) -> &str {
        "error_handlers"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (i, p) in config.pipelines.iter().enumerate() {
            self.check(p, &format!("pipelines[{i}]"), &mut out);
        }
        walk_all(config, &mut |node, path| {
            if let NodeConfig::Pipeline(p) = node {
                self.check(p, path, &mut out);
            }
        });
        out
    }
}

/// The states a sequence may be in at some point, as a bit set over the
/// paths that reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StageStates(u8);

impl StageStates {
    /// No path reaches this point.
    const NONE: Self = Self(0);
    const EMPTY: Self = Self(0b0001);
    const PRODUCING: Self = Self(0b0010);
    const COMPLETE: Self = Self(0b0100);
    /// Assembled elsewhere: a resource call or a view body.
    const UNKNOWN: Self = Self(0b1000);

    fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    fn may_be(self, state: Self) -> bool {
        self.0 & state.0 != 0
    }

    /// Every path reaching this point is in `state`.
    fn is(self, state: Self) -> bool {
        self == state
    }
}

struct StageOrderRule;

impl StageOrderRule {
    fn error(&self, path: &str, message: String, out: &mut Vec<Diagnostic>) {
        out.push(Diagnostic {
            rule: self.name().into(),
            severity: Severity::Error,
            message,
            location: Some(path.to_string()),
            fix: None,
        });
    }

    /// Track the pipeline states through `seq`, returning the states at its end.
    fn sequence(
        &self,
        seq: &[NodeConfig],
        path: &str,
        mut states: StageStates,
        out: &mut Vec<Diagnostic>,
    ) -> StageStates {
        for (i, node) in seq.iter().enumerate() {
            let here = format!("{path}.children[{i}]");
            states = match node {
                NodeConfig::Generate { .. } | NodeConfig::Aggregate { .. } => {
                    if states.is(StageStates::PRODUCING) {
                        self.error(
                            &here,
                            format!("{} adds a second producer stage", node.kind_name()),
                            out,
                        );
                    }
                    StageStates::PRODUCING
                }
                NodeConfig::Transform { .. } => {
                    if states.is(StageStates::EMPTY) {
                        self.error(&here, "transform has no producer stage before it".into(), out);
                    }
                    states
                }
                NodeConfig::Serialize { .. } => {
                    if states.is(StageStates::EMPTY) {
                        self.error(&here, "serialize has no producer stage before it".into(), out);
                    }
                    StageStates::COMPLETE
                }
                NodeConfig::Match { children, .. } => {
                    let end = self.sequence(children, &format!("{here}[0]"), states, out);
                    merge(states, [end])
                }
                NodeConfig::Select {
                    when, otherwise, ..
                } => {
                    let mut ends = Vec::new();
                    for (j, w) in when.iter().enumerate() {
                        ends.push(self.sequence(&w.children, &format!("{here}[{j}]"), states, out));
                    }
                    if let Some(o) = otherwise {
                        ends.push(self.sequence(o, &format!("{here}[{}]", when.len()), states, out));
                    }
                    // Without an otherwise branch the request may fall through.
                    let before = if otherwise.is_some() {
                        StageStates::NONE
                    } else {
                        states
                    };
                    merge(before, ends)
                }
                NodeConfig::Pipeline(p) => {
                    let end = self.sequence(&p.children, &format!("{here}[0]"), states, out);
                    self.handlers(&p.handle_errors, &here, out);
                    merge(states, [end])
                }
                NodeConfig::Call { .. } => StageStates::UNKNOWN,
                NodeConfig::Mount { .. } | NodeConfig::Redirect { .. } => states,
            };
        }
        states
    }

    /// Error handlers assemble a fresh pipeline of their own.
    fn handlers(&self, handlers: &[HandleErrorsConfig], path: &str, out: &mut Vec<Diagnostic>) {
        for (j, h) in handlers.iter().enumerate() {
            let path = format!("{path}.handle_errors[{j}]");
            let end = self.sequence(&h.children, &path, StageStates::EMPTY, out);
            if end.may_be(StageStates::PRODUCING) {
                self.error(
                    &path,
                    "error handler's producer stage is never followed by an output stage".into(),
                    out,
                );
            }
        }
    }
}

/// States after a branching node whose branches ended in `ends`. A branch
/// that completed handled the request, so the sequence only continues from
/// the branches that did not, or from `before` when no branch was taken.
fn merge(before: StageStates, ends: impl IntoIterator<Item = StageStates>) -> StageStates {
    ends.into_iter()
        .fold(before, |acc, end| acc.union(end.without(StageStates::COMPLETE)))
}

impl LintRule for StageOrderRule {
    fn name(&self) -> &str {
        "stage_order"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (i, p) in config.pipelines.iter().enumerate() {
            let path = format!("pipelines[{i}]");
            let end = self.sequence(&p.children, &path, StageStates::EMPTY, &mut out);
            if end.may_be(StageStates::PRODUCING) {
                self.error(
                    &path,
                    "a producer stage is never followed by an output stage".into(),
                    &mut out,
                );
            }
            self.handlers(&p.handle_errors, &path, &mut out);
        }
        // Views and resources continue a pipeline started elsewhere.
        for (i, v) in config.views.iter().enumerate() {
            self.sequence(&v.children, &format!("views[{i}]"), StageStates::UNKNOWN, &mut out);
        }
        for (i, r) in config.resources.iter().enumerate() {
            self.sequence(&r.children, &format!("resources[{i}]"), StageStates::UNKNOWN, &mut out);
        }
        out
    }
}

struct UnreachableAfterOutputRule;

impl LintRule for UnreachableAfterOutputRule {
    fn name(&self) -> &str {
        "unreachable_after_output"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let mut check = |seq: &[NodeConfig], path: &str| {
            if let Some(pos) = seq
                .iter()
                .position(|n| matches!(n, NodeConfig::Serialize { .. } | NodeConfig::Redirect { .. }))
            {
                if pos + 1 < seq.len() {
                    out.push(Diagnostic {
                        rule: "unreachable_after_output".into(),
                        severity: Severity::Warning,
                        message: format!(
                            "{} node(s) after a {} are never invoked",
                            seq.len() - pos - 1,
                            seq[pos].kind_name()
                        ),
                        location: Some(format!("{path}.children[{}]", pos + 1)),
                        fix: Some("Remove the trailing nodes".into()),
                    });
                }
            }
        };
        let mut sequences: Vec<(String, &[NodeConfig])> = root_sequences(config);
        walk_all(config, &mut |node, path| {
            for (j, child) in node.child_sequences().into_iter().enumerate() {
                sequences.push((format!("{path}[{j}]"), child));
            }
        });
        for (path, seq) in sequences {
            check(seq, &path);
        }
        out
    }
}

struct ResourceExistsRule;

impl LintRule for ResourceExistsRule {
    fn name(&self) -> &str {
        "resource_exists"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for (i, r) in config.resources.iter().enumerate() {
            if !seen.insert(r.name.as_str()) {
                out.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("Resource '{}' is declared more than once", r.name),
                    location: Some(format!("resources[{i}]")),
                    fix: None,
                });
            }
        }
        walk_all(config, &mut |node, path| {
            if let NodeConfig::Call { resource, .. } = node {
                if is_static(resource) && !seen.contains(resource.as_str()) {
                    out.push(Diagnostic {
                        rule: "resource_exists".into(),
                        severity: Severity::Error,
                        message: format!("Call targets unknown resource '{resource}'"),
                        location: Some(path.to_string()),
                        fix: Some(format!("Declare a resource named '{resource}'")),
                    });
                }
            }
        });
        out
    }
}

struct ViewExistsRule;

impl LintRule for ViewExistsRule {
    fn name(&self) -> &str {
        "view_exists"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        let targeted: HashSet<&str> = config
            .views
            .iter()
            .filter_map(|v| v.from_label.as_deref())
            .collect();
        let mut out = Vec::new();
        walk_all(config, &mut |node, path| {
            for label in node.labels() {
                if !targeted.contains(label.as_str()) {
                    out.push(Diagnostic {
                        rule: "view_exists".into(),
                        severity: Severity::Info,
                        message: format!("Label '{label}' is not the source of any view"),
                        location: Some(path.to_string()),
                        fix: None,
                    });
                }
            }
        });
        out
    }
}

struct ViewSourceRule;

impl LintRule for ViewSourceRule {
    fn name(&self) -> &str {
        "view_source"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let mut names = HashSet::new();
        for (i, v) in config.views.iter().enumerate() {
            let location = Some(format!("views[{i}]"));
            if !names.insert(v.name.as_str()) {
                out.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("View '{}' is declared more than once", v.name),
                    location: location.clone(),
                    fix: None,
                });
            }
            match (&v.from_label, &v.from_position) {
                (Some(_), Some(_)) => out.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("View '{}' declares both from_label and from_position", v.name),
                    location,
                    fix: Some("Keep only one of from_label / from_position".into()),
                }),
                (None, None) => out.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("View '{}' declares neither from_label nor from_position", v.name),
                    location,
                    fix: Some("Add from_label or from_position".into()),
                }),
                _ => {}
            }
        }
        out
    }
}

struct EmptyPipelinesRule;

impl LintRule for EmptyPipelinesRule {
    fn name(&self) -> &str {
        "empty_pipelines"
    }

    fn apply(&self, config: &SitemapConfig) -> Vec<Diagnostic> {
        config
            .pipelines
            .iter()
            .enumerate()
            .filter(|(_, p)| p.children.is_empty())
            .map(|(i, _)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: "Pipeline has no children and never handles a request".into(),
                location: Some(format!("pipelines[{i}]")),
                fix: None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(config: &SitemapConfig) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(ErrorHandlersRule),
        Box::new(StageOrderRule),
        Box::new(UnreachableAfterOutputRule),
        Box::new(ResourceExistsRule),
        Box::new(ViewExistsRule),
        Box::new(ViewSourceRule),
        Box::new(EmptyPipelinesRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(config));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(config: &SitemapConfig) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(config);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if let Some(first) = errors.first() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(SitemapError::configuration(
            first.location.clone().unwrap_or_else(|| "sitemap".into()),
            messages.join("; "),
        ));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
