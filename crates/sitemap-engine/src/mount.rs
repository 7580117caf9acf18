//! Memoized compilation of mounted sub-trees.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use sitemap_types::{Result, SitemapError};

use crate::builder::TreeBuilder;
use crate::config::SitemapConfig;
use crate::processor::TreeProcessor;

/// Compiles the tree behind a mount source.
pub trait SubProcessorFactory: Send + Sync {
    fn create_child(&self, source: &str, check_reload: bool, prefix: &str) -> Result<TreeProcessor>;
}

/// Reads a JSON descriptor from disk and builds it with the parent's
/// builder, rooted at the descriptor's directory.
pub struct FileProcessorFactory {
    builder: TreeBuilder,
}

impl FileProcessorFactory {
    pub fn new(builder: TreeBuilder) -> Self {
        Self { builder }
    }
}

impl SubProcessorFactory for FileProcessorFactory {
    fn create_child(&self, source: &str, check_reload: bool, prefix: &str) -> Result<TreeProcessor> {
        let path = Path::new(source);
        let config = SitemapConfig::from_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        tracing::info!(source = %source, prefix = %prefix, "Compiling mounted sitemap");
        self.builder
            .clone()
            .with_base_dir(base_dir)
            .with_check_reload(check_reload)
            .with_source(source)
            .build(&config)
    }
}

/// A compiled sub-tree and the prefix it was first mounted under.
#[derive(Clone)]
pub struct MountedProcessor {
    pub processor: Arc<TreeProcessor>,
    pub prefix: String,
}

/// Sub-trees keyed by source. Lookups take a read lock only; first-time
/// compilation is serialized so a source is never compiled twice.
#[derive(Default)]
pub struct SubProcessorRegistry {
    entries: RwLock<HashMap<String, MountedProcessor>>,
    compile: Mutex<()>,
}

impl SubProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<MountedProcessor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    pub fn get_or_compile<F>(&self, source: &str, prefix: &str, compile: F) -> Result<Arc<TreeProcessor>>
    where
        F: FnOnce() -> Result<TreeProcessor>,
    {
        if let Some(entry) = self.get(source) {
            return Ok(entry.processor);
        }

        let _guard = self.compile.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = self.get(source) {
            return Ok(entry.processor);
        }

        let processor = Arc::new(compile().map_err(|e| match e {
            SitemapError::ConfigurationError { .. } => e,
            other => SitemapError::configuration(source, other.to_string()),
        })?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                source.to_string(),
                MountedProcessor {
                    processor: Arc::clone(&processor),
                    prefix: prefix.to_string(),
                },
            );
        Ok(processor)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn empty_tree() -> Result<TreeProcessor> {
        TreeProcessor::from_json("{}", ".")
    }

    #[test]
    fn compiles_once_per_source() {
        let registry = SubProcessorRegistry::new();
        let calls = AtomicUsize::new(0);
        let compile = || {
            calls.fetch_add(1, Ordering::SeqCst);
            empty_tree()
        };
        let a = registry.get_or_compile("sub/sitemap.json", "sub/", compile).unwrap();
        let b = registry
            .get_or_compile("sub/sitemap.json", "sub/", || {
                calls.fetch_add(1, Ordering::SeqCst);
                empty_tree()
            })
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get("sub/sitemap.json").unwrap().prefix, "sub/");
    }

    #[test]
    fn concurrent_first_use_compiles_once() {
        let registry = SubProcessorRegistry::new();
        let calls = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    registry
                        .get_or_compile("x.json", "", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            empty_tree()
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_compilation_is_not_cached() {
        let registry = SubProcessorRegistry::new();
        let err = registry
            .get_or_compile("bad.json", "", || Err(SitemapError::Other("boom".into())))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(registry.is_empty());
    }
}
