//! Input modules backing `{module:key}` expressions.

use sitemap_types::Result;

use crate::component::InputModule;
use crate::environment::Environment;

/// `{request-param:name}`
pub struct RequestParameterModule;

impl InputModule for RequestParameterModule {
    fn attribute(&self, key: &str, env: &dyn Environment) -> Result<Option<String>> {
        Ok(env.parameter(key).map(String::from))
    }
}

/// `{request-attr:name}` reads object-model attributes. Non-string JSON
/// values are rendered in their JSON form.
pub struct RequestAttributeModule;

impl InputModule for RequestAttributeModule {
    fn attribute(&self, key: &str, env: &dyn Environment) -> Result<Option<String>> {
        Ok(env.object_model().attribute(key).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }
}

/// `{request-uri:uri}`, `{request-uri:prefix}` and `{request-uri:full}`.
pub struct RequestUriModule;

impl InputModule for RequestUriModule {
    fn attribute(&self, key: &str, env: &dyn Environment) -> Result<Option<String>> {
        Ok(match key {
            "uri" => Some(env.uri().to_string()),
            "prefix" => Some(env.prefix().to_string()),
            "full" => Some(format!("{}{}", env.prefix(), env.uri())),
            _ => None,
        })
    }
}
