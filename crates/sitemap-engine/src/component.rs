//! Component traits consumed by the tree, and the registry that resolves a
//! declared type name to a component instance.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use sitemap_types::{Parameters, Result, SitemapError, Validity};

use crate::environment::Environment;

/// Variables produced by a successful match.
pub type Bindings = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Branching components
// ---------------------------------------------------------------------------

pub trait Matcher: Send + Sync {
    /// Reject a malformed static pattern at build time.
    fn check_pattern(&self, _pattern: &str) -> Result<()> {
        Ok(())
    }

    /// `Some(bindings)` on success (possibly empty), `None` for no match.
    fn matches(
        &self,
        pattern: &str,
        env: &dyn Environment,
        parameters: &Parameters,
    ) -> Result<Option<Bindings>>;
}

pub trait Selector: Send + Sync {
    fn select(&self, expression: &str, env: &dyn Environment, parameters: &Parameters)
        -> Result<bool>;

    /// Switch-style selectors expose a shared evaluation context.
    fn as_switch(&self) -> Option<&dyn SwitchSelector> {
        None
    }
}

/// Value a switch selector computes once per Select invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchContext(pub Option<String>);

/// A selector whose tests all compare against one value computed up front.
///
/// `select_in(expr, &switch_context(env, params)?)` must equal
/// `select(expr, env, params)` for every expression.
pub trait SwitchSelector: Send + Sync {
    fn switch_context(&self, env: &dyn Environment, parameters: &Parameters)
        -> Result<SwitchContext>;

    fn select_in(&self, expression: &str, context: &SwitchContext) -> bool;
}

// ---------------------------------------------------------------------------
// Stage components
// ---------------------------------------------------------------------------

/// Everything a stage sees while it runs.
pub struct StageContext<'a> {
    pub env: &'a mut dyn Environment,
    pub source: Option<&'a str>,
    pub parameters: &'a Parameters,
    pub sources: &'a dyn SourceResolver,
}

/// Configuration of a stage, as seen when computing its cache identity.
pub struct StageInfo<'a> {
    pub source: Option<&'a str>,
    pub parameters: &'a Parameters,
    pub sources: &'a dyn SourceResolver,
}

pub trait Generator: Send + Sync {
    fn generate(&self, ctx: &mut StageContext<'_>) -> Result<String>;

    /// Cache key contribution. `None` makes the pipeline uncacheable.
    fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
        None
    }

    fn validity(&self, _info: &StageInfo<'_>) -> Option<Validity> {
        None
    }
}

pub trait Transformer: Send + Sync {
    fn transform(&self, input: String, ctx: &mut StageContext<'_>) -> Result<String>;

    fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
        None
    }

    fn validity(&self, _info: &StageInfo<'_>) -> Option<Validity> {
        None
    }
}

pub trait Serializer: Send + Sync {
    /// Default MIME type, used unless the Serialize node overrides it.
    fn mime_type(&self) -> &str;

    fn serialize(&self, input: &str, ctx: &mut StageContext<'_>, out: &mut dyn Write)
        -> Result<()>;

    fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
        Some(String::new())
    }

    fn validity(&self, _info: &StageInfo<'_>) -> Option<Validity> {
        Some(Validity::Token(self.mime_type().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Sources and input modules
// ---------------------------------------------------------------------------

/// Loads the content behind a source URI.
pub trait SourceResolver {
    fn read(&self, uri: &str, env: &mut dyn Environment) -> Result<String>;

    fn validity(&self, uri: &str) -> Option<Validity>;
}

/// Supplies `{module:key}` values to the variable resolver.
pub trait InputModule: Send + Sync {
    fn attribute(&self, key: &str, env: &dyn Environment) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Matcher,
    Selector,
    Generator,
    Transformer,
    Serializer,
    InputModule,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Matcher => "matcher",
            Role::Selector => "selector",
            Role::Generator => "generator",
            Role::Transformer => "transformer",
            Role::Serializer => "serializer",
            Role::InputModule => "input module",
        };
        f.write_str(name)
    }
}

/// A component resolved from a declared (or defaulted) type name.
pub struct Resolved<T: ?Sized> {
    pub name: String,
    pub component: Arc<T>,
}

impl<T: ?Sized> Clone for Resolved<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            component: Arc::clone(&self.component),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Resolved<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved").field("name", &self.name).finish()
    }
}

pub struct ComponentRegistry {
    matchers: HashMap<String, Arc<dyn Matcher>>,
    selectors: HashMap<String, Arc<dyn Selector>>,
    generators: HashMap<String, Arc<dyn Generator>>,
    transformers: HashMap<String, Arc<dyn Transformer>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
    input_modules: HashMap<String, Arc<dyn InputModule>>,
    defaults: HashMap<Role, String>,
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    defaults: &HashMap<Role, String>,
    role: Role,
    name: Option<&str>,
) -> Result<Resolved<T>> {
    let name = match name {
        Some(n) => n.to_string(),
        None => defaults.get(&role).cloned().ok_or_else(|| {
            SitemapError::configuration(role.to_string(), format!("No default {role} declared"))
        })?,
    };
    let component = map.get(&name).cloned().ok_or_else(|| {
        SitemapError::configuration(role.to_string(), format!("Unknown {role} type '{name}'"))
    })?;
    Ok(Resolved { name, component })
}

impl ComponentRegistry {
    pub fn new() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(Role::Matcher, "wildcard".to_string());
        defaults.insert(Role::Selector, "request-parameter".to_string());
        defaults.insert(Role::Generator, "file".to_string());
        defaults.insert(Role::Transformer, "template".to_string());
        defaults.insert(Role::Serializer, "html".to_string());

        Self {
            matchers: HashMap::new(),
            selectors: HashMap::new(),
            generators: HashMap::new(),
            transformers: HashMap::new(),
            serializers: HashMap::new(),
            input_modules: HashMap::new(),
            defaults,
        }
    }

    pub fn register_matcher(&mut self, name: impl Into<String>, matcher: impl Matcher + 'static) {
        self.matchers.insert(name.into(), Arc::new(matcher));
    }

    pub fn register_selector(&mut self, name: impl Into<String>, selector: impl Selector + 'static) {
        self.selectors.insert(name.into(), Arc::new(selector));
    }

    pub fn register_generator(
        &mut self,
        name: impl Into<String>,
        generator: impl Generator + 'static,
    ) {
        self.generators.insert(name.into(), Arc::new(generator));
    }

    pub fn register_transformer(
        &mut self,
        name: impl Into<String>,
        transformer: impl Transformer + 'static,
    ) {
        self.transformers.insert(name.into(), Arc::new(transformer));
    }

    pub fn register_serializer(
        &mut self,
        name: impl Into<String>,
        serializer: impl Serializer + 'static,
    ) {
        self.serializers.insert(name.into(), Arc::new(serializer));
    }

    pub fn register_input_module(
        &mut self,
        name: impl Into<String>,
        module: impl InputModule + 'static,
    ) {
        self.input_modules.insert(name.into(), Arc::new(module));
    }

    /// Change the type used when a node omits its `type` attribute.
    pub fn set_default(&mut self, role: Role, name: impl Into<String>) {
        self.defaults.insert(role, name.into());
    }

    pub fn matcher(&self, name: Option<&str>) -> Result<Resolved<dyn Matcher>> {
        lookup(&self.matchers, &self.defaults, Role::Matcher, name)
    }

    pub fn selector(&self, name: Option<&str>) -> Result<Resolved<dyn Selector>> {
        lookup(&self.selectors, &self.defaults, Role::Selector, name)
    }

    pub fn generator(&self, name: Option<&str>) -> Result<Resolved<dyn Generator>> {
        lookup(&self.generators, &self.defaults, Role::Generator, name)
    }

    pub fn transformer(&self, name: Option<&str>) -> Result<Resolved<dyn Transformer>> {
        lookup(&self.transformers, &self.defaults, Role::Transformer, name)
    }

    pub fn serializer(&self, name: Option<&str>) -> Result<Resolved<dyn Serializer>> {
        lookup(&self.serializers, &self.defaults, Role::Serializer, name)
    }

    pub fn input_module(&self, name: &str) -> Result<Resolved<dyn InputModule>> {
        lookup(&self.input_modules, &self.defaults, Role::InputModule, Some(name))
    }

    pub fn has(&self, role: Role, name: &str) -> bool {
        match role {
            Role::Matcher => self.matchers.contains_key(name),
            Role::Selector => self.selectors.contains_key(name),
            Role::Generator => self.generators.contains_key(name),
            Role::Transformer => self.transformers.contains_key(name),
            Role::Serializer => self.serializers.contains_key(name),
            Role::InputModule => self.input_modules.contains_key(name),
        }
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

pub fn default_registry() -> ComponentRegistry {
    use crate::components::{
        links::{LinkGatherer, LinkTranslator},
        matchers::{RegexpUriMatcher, WildcardUriMatcher},
        modules::{RequestAttributeModule, RequestParameterModule, RequestUriModule},
        selectors::{ParameterSelector, RequestParameterSelector},
        stages::{FileGenerator, NotifyingGenerator, TemplateTransformer, TextSerializer},
    };

    let mut reg = ComponentRegistry::new();
    reg.register_matcher("wildcard", WildcardUriMatcher::default());
    reg.register_matcher("regexp", RegexpUriMatcher::default());
    reg.register_selector("request-parameter", RequestParameterSelector);
    reg.register_selector("parameter", ParameterSelector);
    reg.register_generator("file", FileGenerator);
    reg.register_generator("notifying", NotifyingGenerator);
    reg.register_transformer("template", TemplateTransformer);
    reg.register_transformer(LinkTranslator::TYPE, LinkTranslator);
    reg.register_transformer(LinkGatherer::TYPE, LinkGatherer);
    reg.register_serializer("html", TextSerializer::new("text/html"));
    reg.register_serializer("xml", TextSerializer::new("text/xml"));
    reg.register_serializer("text", TextSerializer::new("text/plain"));
    reg.register_input_module("request-param", RequestParameterModule);
    reg.register_input_module("request-attr", RequestAttributeModule);
    reg.register_input_module("request-uri", RequestUriModule);
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_builtins() {
        let reg = default_registry();
        assert!(reg.has(Role::Matcher, "wildcard"));
        assert!(reg.has(Role::Matcher, "regexp"));
        assert!(reg.has(Role::Selector, "request-parameter"));
        assert!(reg.has(Role::Selector, "parameter"));
        assert!(reg.has(Role::Generator, "file"));
        assert!(reg.has(Role::Generator, "notifying"));
        assert!(reg.has(Role::Transformer, "template"));
        assert!(reg.has(Role::Transformer, "link-translator"));
        assert!(reg.has(Role::Transformer, "link-gatherer"));
        assert!(reg.has(Role::Serializer, "html"));
        assert!(reg.has(Role::InputModule, "request-param"));
    }

    #[test]
    fn omitted_type_resolves_to_default() {
        let reg = default_registry();
        let matcher = reg.matcher(None).unwrap();
        assert_eq!(matcher.name, "wildcard");
        let serializer = reg.serializer(None).unwrap();
        assert_eq!(serializer.name, "html");
        assert_eq!(serializer.component.mime_type(), "text/html");
    }

    #[test]
    fn set_default_changes_resolution() {
        let mut reg = default_registry();
        reg.set_default(Role::Serializer, "xml");
        assert_eq!(reg.serializer(None).unwrap().name, "xml");
    }

    #[test]
    fn unknown_type_is_configuration_error() {
        let reg = default_registry();
        let err = reg.generator(Some("nonexistent")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Unknown generator type 'nonexistent'"));
    }

    #[test]
    fn missing_default_is_configuration_error() {
        let reg = ComponentRegistry::new();
        // Defaults are declared, but nothing is registered under them.
        let err = reg.matcher(None).unwrap_err();
        assert!(err.is_configuration());
    }
}
