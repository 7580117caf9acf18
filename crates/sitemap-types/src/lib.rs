//! Shared types, errors, parameters and error records for the sitemap engine.
//!
//! This crate provides the foundational types used across the other sitemap crates:
//! - `SitemapError`: unified error taxonomy
//! - `Parameters`: ordered name/value pairs handed to components
//! - `Validity`: combinable freshness token for cached pipeline output
//! - `Notifying`: the structured description of an in-flight error

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};

/// Unified error type for all sitemap subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SitemapError {
    // === Request-time errors ===
    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("Component '{component}' failed: {message}")]
    ProcessingFailure { component: String, message: String },

    #[error("Connection reset by peer")]
    ConnectionReset,

    #[error("Invalid pipeline state: {0}")]
    PipelineState(String),

    #[error("Variable expression error: {0}")]
    Pattern(String),

    // === Build-time errors ===
    #[error("Configuration error at {location}: {message}")]
    ConfigurationError { location: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`SitemapError`], recorded in [`Notifying`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Processing,
    ConnectionReset,
    Configuration,
}

impl SitemapError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        SitemapError::ResourceNotFound {
            resource: resource.into(),
        }
    }

    pub fn processing(component: impl Into<String>, message: impl Into<String>) -> Self {
        SitemapError::ProcessingFailure {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn configuration(location: impl Into<String>, message: impl Into<String>) -> Self {
        SitemapError::ConfigurationError {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the one condition no error boundary may catch.
    pub fn is_connection_reset(&self) -> bool {
        match self {
            SitemapError::ConnectionReset => true,
            SitemapError::Io(e) => is_peer_gone(e.kind()),
            _ => false,
        }
    }

    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, SitemapError::ResourceNotFound { .. })
    }

    /// Returns `true` if the error was detected while building a tree.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SitemapError::ConfigurationError { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SitemapError::ResourceNotFound { .. } => ErrorKind::NotFound,
            e if e.is_connection_reset() => ErrorKind::ConnectionReset,
            SitemapError::ConfigurationError { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Processing,
        }
    }

    /// Maps the error to the HTTP status an error page should carry.
    pub fn http_status(&self) -> u16 {
        match self {
            SitemapError::ResourceNotFound { .. } => 404,
            _ => 500,
        }
    }
}

/// The client went away while output was being written.
fn is_peer_gone(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

impl From<io::Error> for SitemapError {
    fn from(e: io::Error) -> Self {
        if is_peer_gone(e.kind()) {
            SitemapError::ConnectionReset
        } else {
            SitemapError::Io(e)
        }
    }
}

/// A convenience alias for `Result<T, SitemapError>`.
pub type Result<T> = std::result::Result<T, SitemapError>;

// ---------------------------------------------------------------------------
// Parameters: ordered name/value pairs
// ---------------------------------------------------------------------------

/// Resolved parameters handed to a component.
///
/// Backed by a `BTreeMap` so iteration order, and therefore every cache key
/// derived from it, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters {
    values: BTreeMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Convenience accessor that falls back to `default` when `name` is absent.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as `a=1&b=2`, the form used inside pipeline cache keys.
    pub fn key_fragment(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl FromIterator<(String, String)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for Parameters {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

// ---------------------------------------------------------------------------
// Validity: freshness token for cacheable output
// ---------------------------------------------------------------------------

/// Opaque freshness token of a stage or of a whole pipeline.
///
/// A pipeline's validity is the `Aggregated` list of its stages' tokens. Two
/// tokens are compared with [`Validity::is_valid`] to decide whether stored
/// output can be reused without re-execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Last-modified time in milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Arbitrary content tag (e.g. a hash or version string).
    Token(String),
    /// Ordered combination of per-stage tokens.
    Aggregated(Vec<Validity>),
}

impl Validity {
    /// Combine per-stage tokens. Any missing token makes the whole
    /// combination `None` ("not cacheable").
    pub fn aggregate<I>(parts: I) -> Option<Validity>
    where
        I: IntoIterator<Item = Option<Validity>>,
    {
        let parts: Option<Vec<Validity>> = parts.into_iter().collect();
        parts.map(Validity::Aggregated)
    }

    /// Returns `true` if output stored under `stored` is still fresh
    /// with respect to `self`.
    pub fn is_valid(&self, stored: &Validity) -> bool {
        match (self, stored) {
            (Validity::Aggregated(current), Validity::Aggregated(previous)) => {
                current.len() == previous.len()
                    && current.iter().zip(previous).all(|(c, p)| c.is_valid(p))
            }
            (current, previous) => current == previous,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifying: structured description of an in-flight error
// ---------------------------------------------------------------------------

/// The single error record built for one originating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notifying {
    pub id: uuid::Uuid,
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
    /// Display form of the triggering error.
    pub source: String,
    pub status: u16,
    pub extra: BTreeMap<String, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Notifying {
    /// Create a record describing `error`.
    pub fn from_error(error: &SitemapError) -> Self {
        let title = match error.kind() {
            ErrorKind::NotFound => "Resource Not Found",
            ErrorKind::ConnectionReset => "Connection Reset",
            ErrorKind::Configuration => "Configuration Error",
            ErrorKind::Processing => "Processing Error",
        };
        let message = match error {
            SitemapError::ResourceNotFound { resource } => resource.clone(),
            SitemapError::ProcessingFailure { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let mut extra = BTreeMap::new();
        if let SitemapError::ProcessingFailure { component, .. } = error {
            extra.insert("component".to_string(), component.clone());
        }
        Self {
            id: uuid::Uuid::new_v4(),
            kind: error.kind(),
            title: title.to_string(),
            message,
            source: error.to_string(),
            status: error.http_status(),
            extra,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = SitemapError::not_found("docs/missing.html");
        assert_eq!(err.to_string(), "Resource not found: docs/missing.html");
    }

    #[test]
    fn error_display_processing_failure() {
        let err = SitemapError::processing("xslt", "stylesheet does not compile");
        assert_eq!(
            err.to_string(),
            "Component 'xslt' failed: stylesheet does not compile"
        );
    }

    #[test]
    fn error_display_configuration() {
        let err = SitemapError::configuration("pipelines[0]", "duplicate handler");
        assert_eq!(
            err.to_string(),
            "Configuration error at pipelines[0]: duplicate handler"
        );
    }

    #[test]
    fn error_display_connection_reset() {
        assert_eq!(
            SitemapError::ConnectionReset.to_string(),
            "Connection reset by peer"
        );
    }

    // --- classification ---

    #[test]
    fn classification_helpers() {
        assert!(SitemapError::ConnectionReset.is_connection_reset());
        assert!(!SitemapError::Other("x".into()).is_connection_reset());
        assert!(SitemapError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_connection_reset());
        assert!(SitemapError::not_found("a").is_resource_not_found());
        assert!(SitemapError::configuration("a", "b").is_configuration());
        assert!(!SitemapError::processing("a", "b").is_configuration());
    }

    #[test]
    fn io_errors_from_a_vanished_peer_become_connection_reset() {
        let err: SitemapError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(matches!(err, SitemapError::ConnectionReset));
        let err: SitemapError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, SitemapError::ConnectionReset));
        let err: SitemapError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(matches!(err, SitemapError::Io(_)));
        assert!(!err.is_connection_reset());
    }

    #[test]
    fn kind_maps_every_family() {
        assert_eq!(SitemapError::not_found("a").kind(), ErrorKind::NotFound);
        assert_eq!(SitemapError::ConnectionReset.kind(), ErrorKind::ConnectionReset);
        assert_eq!(
            SitemapError::configuration("a", "b").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(SitemapError::processing("a", "b").kind(), ErrorKind::Processing);
        assert_eq!(
            SitemapError::PipelineState("no output".into()).kind(),
            ErrorKind::Processing
        );
    }

    #[test]
    fn http_status_not_found_404_else_500() {
        assert_eq!(SitemapError::not_found("a").http_status(), 404);
        assert_eq!(SitemapError::processing("a", "b").http_status(), 500);
        assert_eq!(SitemapError::Other("x".into()).http_status(), 500);
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SitemapError = io_err.into();
        assert!(matches!(err, SitemapError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SitemapError = json_err.into();
        assert!(matches!(err, SitemapError::Json(_)));
    }

    // --- Parameters ---

    #[test]
    fn parameters_key_fragment_is_sorted() {
        let mut params = Parameters::new();
        params.insert("zeta", "1");
        params.insert("alpha", "2");
        assert_eq!(params.key_fragment(), "alpha=2&zeta=1");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn parameters_get_or_falls_back() {
        let mut params = Parameters::new();
        params.insert("mode", "full");
        assert_eq!(params.get_or("mode", "brief"), "full");
        assert_eq!(params.get_or("missing", "brief"), "brief");
        assert!(params.get("missing").is_none());
    }

    // --- Validity ---

    #[test]
    fn aggregate_requires_every_part() {
        let all = Validity::aggregate(vec![
            Some(Validity::Timestamp(10)),
            Some(Validity::Token("v1".into())),
        ]);
        assert_eq!(
            all,
            Some(Validity::Aggregated(vec![
                Validity::Timestamp(10),
                Validity::Token("v1".into()),
            ]))
        );

        let partial = Validity::aggregate(vec![Some(Validity::Timestamp(10)), None]);
        assert!(partial.is_none());
    }

    #[test]
    fn validity_comparison() {
        let stored = Validity::Aggregated(vec![Validity::Timestamp(1), Validity::Token("a".into())]);
        let same = stored.clone();
        let changed = Validity::Aggregated(vec![Validity::Timestamp(2), Validity::Token("a".into())]);
        let shorter = Validity::Aggregated(vec![Validity::Timestamp(1)]);

        assert!(same.is_valid(&stored));
        assert!(!changed.is_valid(&stored));
        assert!(!shorter.is_valid(&stored));
    }

    // --- Notifying ---

    #[test]
    fn notifying_from_not_found() {
        let record = Notifying::from_error(&SitemapError::not_found("index.html"));
        assert_eq!(record.kind, ErrorKind::NotFound);
        assert_eq!(record.title, "Resource Not Found");
        assert_eq!(record.message, "index.html");
        assert_eq!(record.status, 404);
    }

    #[test]
    fn notifying_records_component() {
        let record = Notifying::from_error(&SitemapError::processing("xslt", "boom"))
            .with_extra("request-uri", "page.html");
        assert_eq!(record.message, "boom");
        assert_eq!(record.extra("component"), Some("xslt"));
        assert_eq!(record.extra("request-uri"), Some("page.html"));
        assert_eq!(record.status, 500);
    }

    #[test]
    fn error_kind_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::NotFound).unwrap(),
            "\"not_found\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ConnectionReset).unwrap(),
            "\"connection_reset\""
        );
    }
}
