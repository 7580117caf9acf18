//! Parameterized strings: `{...}` expressions compiled once at build time and
//! evaluated against the scope stack at request time.
//!
//! Supported forms:
//! - `{name}`, `{1}`: innermost scope
//! - `{../name}`: one scope up per `../`
//! - `{#scope:name}`: the scope pushed by the Match node named `scope`
//! - `{module:key}`: an input module; `key` may contain nested expressions
//! - `\{` / `\}`: literal braces

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use winnow::combinator::{alt, delimited, eof, preceded, repeat, terminated};
use winnow::token::{any, none_of, take_while};
use winnow::{ModalResult, Parser};

use sitemap_types::{Parameters, Result, SitemapError};

use crate::component::{ComponentRegistry, InputModule};
use crate::context::Scope;
use crate::environment::Environment;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Text(String),
    Relative { up: usize, name: String },
    Anchored { scope: String, name: String },
    Module { module: String, key: Vec<Expr> },
}

fn escaped(input: &mut &str) -> ModalResult<char> {
    preceded('\\', any).parse_next(input)
}

/// Top-level literal text. A stray `}` is kept verbatim.
fn text(input: &mut &str) -> ModalResult<Expr> {
    repeat(1.., alt((escaped, none_of(['{', '\\']))))
        .map(Expr::Text)
        .parse_next(input)
}

/// Literal text inside a module key, terminated by `}`.
fn key_text(input: &mut &str) -> ModalResult<Expr> {
    repeat(1.., alt((escaped, none_of(['{', '}', '\\']))))
        .map(Expr::Text)
        .parse_next(input)
}

fn anchored(input: &mut &str) -> ModalResult<Expr> {
    preceded(
        '#',
        (
            take_while(1.., |c: char| c != ':' && c != '}'),
            ':',
            take_while(1.., |c: char| c != '{' && c != '}'),
        ),
    )
    .map(|(scope, _, name): (&str, char, &str)| Expr::Anchored {
        scope: scope.to_string(),
        name: name.to_string(),
    })
    .parse_next(input)
}

fn module(input: &mut &str) -> ModalResult<Expr> {
    (
        terminated(
            take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            ':',
        ),
        repeat(0.., alt((expression, key_text))),
    )
        .map(|(module, key): (&str, Vec<Expr>)| Expr::Module {
            module: module.to_string(),
            key,
        })
        .parse_next(input)
}

fn relative(input: &mut &str) -> ModalResult<Expr> {
    (
        repeat(0.., "../").map(|()| ()).take(),
        take_while(1.., |c: char| c != '{' && c != '}'),
    )
        .map(|(ups, name): (&str, &str)| Expr::Relative {
            up: ups.len() / 3,
            name: name.to_string(),
        })
        .parse_next(input)
}

fn expression(input: &mut &str) -> ModalResult<Expr> {
    delimited('{', alt((anchored, module, relative)), '}').parse_next(input)
}

fn template(input: &mut &str) -> ModalResult<Vec<Expr>> {
    terminated(repeat(0.., alt((expression, text))), eof).parse_next(input)
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Segment {
    Text(String),
    Relative { up: usize, name: String },
    Anchored { scope: String, name: String },
    Module {
        name: String,
        module: Arc<dyn InputModule>,
        key: Vec<Segment>,
    },
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Text(t) => write!(f, "Text({t:?})"),
            Segment::Relative { up, name } => write!(f, "Relative({up}, {name:?})"),
            Segment::Anchored { scope, name } => write!(f, "Anchored({scope:?}, {name:?})"),
            Segment::Module { name, key, .. } => write!(f, "Module({name:?}, {key:?})"),
        }
    }
}

fn compile(exprs: Vec<Expr>, registry: &ComponentRegistry) -> Result<Vec<Segment>> {
    exprs
        .into_iter()
        .map(|expr| {
            Ok(match expr {
                Expr::Text(t) => Segment::Text(t),
                Expr::Relative { up, name } => Segment::Relative { up, name },
                Expr::Anchored { scope, name } => Segment::Anchored { scope, name },
                Expr::Module { module, key } => {
                    let resolved = registry.input_module(&module)?;
                    Segment::Module {
                        name: module,
                        module: resolved.component,
                        key: compile(key, registry)?,
                    }
                }
            })
        })
        .collect()
}

/// A compiled parameterized string.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    source: String,
    segments: Vec<Segment>,
}

impl VariableResolver {
    /// Parse `expression` and bind its input modules through `registry`.
    pub fn compile(expression: &str, registry: &ComponentRegistry) -> Result<Self> {
        let mut input = expression;
        let exprs = template.parse_next(&mut input).map_err(|e| {
            SitemapError::configuration(
                format!("expression '{expression}'"),
                format!("malformed variable expression: {e}"),
            )
        })?;
        Ok(Self {
            source: expression.to_string(),
            segments: compile(exprs, registry)?,
        })
    }

    /// A resolver for a string with no expressions at all.
    pub fn literal(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            segments: vec![Segment::Text(value.clone())],
            source: value,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `true` when the value depends on the request.
    pub fn has_parameters(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, Segment::Text(_)))
    }

    /// The value, when it does not depend on the request.
    pub fn static_value(&self) -> Option<String> {
        if self.has_parameters() {
            return None;
        }
        Some(
            self.segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Text(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect(),
        )
    }

    pub fn resolve(&self, scopes: &[Scope], env: &dyn Environment) -> Result<String> {
        let mut out = String::new();
        resolve_into(&self.segments, scopes, env, &mut out)?;
        Ok(out)
    }
}

impl fmt::Display for VariableResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn lookup(scope: &Scope, name: &str) -> String {
    match scope.vars.get(name) {
        Some(v) => v.clone(),
        None => {
            tracing::debug!(variable = %name, "Variable not bound, using empty string");
            String::new()
        }
    }
}

fn resolve_into(
    segments: &[Segment],
    scopes: &[Scope],
    env: &dyn Environment,
    out: &mut String,
) -> Result<()> {
    for segment in segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Relative { up, name } => {
                if scopes.is_empty() && *up == 0 {
                    tracing::debug!(variable = %name, "No scope available, using empty string");
                    continue;
                }
                let index = scopes.len().checked_sub(up + 1).ok_or_else(|| {
                    SitemapError::Pattern(format!(
                        "'{}' goes above the outermost scope ({} levels available)",
                        name,
                        scopes.len()
                    ))
                })?;
                out.push_str(&lookup(&scopes[index], name));
            }
            Segment::Anchored { scope, name } => {
                let found = scopes
                    .iter()
                    .rev()
                    .find(|s| s.name.as_deref() == Some(scope.as_str()))
                    .ok_or_else(|| SitemapError::Pattern(format!("unknown scope '#{scope}'")))?;
                out.push_str(&lookup(found, name));
            }
            Segment::Module { name, module, key } => {
                let mut resolved_key = String::new();
                resolve_into(key, scopes, env, &mut resolved_key)?;
                match module.attribute(&resolved_key, env)? {
                    Some(value) => out.push_str(&value),
                    None => {
                        tracing::debug!(module = %name, key = %resolved_key, "Input module returned nothing");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameter maps
// ---------------------------------------------------------------------------

/// Declared node parameters, compiled.
pub type ParameterResolvers = BTreeMap<String, VariableResolver>;

pub fn compile_parameters(
    raw: &BTreeMap<String, String>,
    registry: &ComponentRegistry,
) -> Result<ParameterResolvers> {
    raw.iter()
        .map(|(k, v)| Ok((k.clone(), VariableResolver::compile(v, registry)?)))
        .collect()
}

pub fn resolve_parameters(
    resolvers: &ParameterResolvers,
    scopes: &[Scope],
    env: &dyn Environment,
) -> Result<Parameters> {
    resolvers
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.resolve(scopes, env)?)))
        .collect()
}

/// Expand `${variable}` patterns in a string.
///
/// Replaces each occurrence of `${key}` with the corresponding value from `vars`.
/// Variables that do not appear in `vars` are left as-is.
pub fn expand_variables(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}
