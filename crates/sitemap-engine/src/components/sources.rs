//! File-backed source resolution.

use std::path::{Path, PathBuf};

use sitemap_types::{Result, SitemapError, Validity};

use crate::component::SourceResolver;
use crate::environment::Environment;

/// Resolves `file:` and scheme-less URIs relative to a base directory.
#[derive(Debug, Clone)]
pub struct FileSourceResolver {
    base_dir: PathBuf,
}

impl FileSourceResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, uri: &str) -> PathBuf {
        let relative = uri.strip_prefix("file:").unwrap_or(uri);
        let relative = relative.strip_prefix("//").unwrap_or(relative);
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl SourceResolver for FileSourceResolver {
    fn read(&self, uri: &str, _env: &mut dyn Environment) -> Result<String> {
        let path = self.path_for(uri);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SitemapError::not_found(uri))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn validity(&self, uri: &str) -> Option<Validity> {
        let modified = std::fs::metadata(self.path_for(uri)).ok()?.modified().ok()?;
        let modified: chrono::DateTime<chrono::Utc> = modified.into();
        Some(Validity::Timestamp(modified.timestamp_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;

    #[test]
    fn reads_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("welcome.xml"), "<page/>").unwrap();
        let resolver = FileSourceResolver::new(dir.path());
        let mut env = RequestEnvironment::new("x");

        assert_eq!(resolver.read("welcome.xml", &mut env).unwrap(), "<page/>");
        assert_eq!(resolver.read("file:welcome.xml", &mut env).unwrap(), "<page/>");
        assert!(matches!(
            resolver.validity("welcome.xml"),
            Some(Validity::Timestamp(_))
        ));
    }

    #[test]
    fn missing_file_is_resource_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileSourceResolver::new(dir.path());
        let mut env = RequestEnvironment::new("x");
        let err = resolver.read("missing.xml", &mut env).unwrap_err();
        assert!(err.is_resource_not_found());
        assert!(resolver.validity("missing.xml").is_none());
    }
}
