//! Built-in generators, transformers and serializers.

use std::collections::HashMap;
use std::io::Write;

use sitemap_types::{Result, SitemapError, Validity};

use crate::component::{Generator, Serializer, StageContext, StageInfo, Transformer};
use crate::variables::expand_variables;

pub(crate) fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn require_source<'a>(component: &str, source: Option<&'a str>) -> Result<&'a str> {
    source.ok_or_else(|| SitemapError::processing(component, "a 'src' is required"))
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Emits the content of its `src`.
pub struct FileGenerator;

impl Generator for FileGenerator {
    fn generate(&self, ctx: &mut StageContext<'_>) -> Result<String> {
        let source = require_source("file", ctx.source)?;
        ctx.sources.read(source, &mut *ctx.env)
    }

    fn key(&self, info: &StageInfo<'_>) -> Option<String> {
        info.source.map(String::from)
    }

    fn validity(&self, info: &StageInfo<'_>) -> Option<Validity> {
        info.sources.validity(info.source?)
    }
}

/// Renders the request's error record as XML. Never cacheable.
pub struct NotifyingGenerator;

impl Generator for NotifyingGenerator {
    fn generate(&self, ctx: &mut StageContext<'_>) -> Result<String> {
        let record = ctx
            .env
            .object_model()
            .notifying()
            .cloned()
            .ok_or_else(|| SitemapError::processing("notifying", "no error record for this request"))?;

        let kind = serde_json::to_value(record.kind)?;
        let mut xml = format!(
            "<notify type=\"{}\" id=\"{}\" status=\"{}\">",
            escape_xml(kind.as_str().unwrap_or_default()),
            record.id,
            record.status
        );
        xml.push_str(&format!("<title>{}</title>", escape_xml(&record.title)));
        xml.push_str(&format!("<message>{}</message>", escape_xml(&record.message)));
        xml.push_str(&format!("<source>{}</source>", escape_xml(&record.source)));
        for (name, value) in &record.extra {
            xml.push_str(&format!(
                "<extra name=\"{}\">{}</extra>",
                escape_xml(name),
                escape_xml(value)
            ));
        }
        xml.push_str("</notify>");
        Ok(xml)
    }
}

// ---------------------------------------------------------------------------
// Transformers
// ---------------------------------------------------------------------------

/// Substitutes `${content}` and `${<parameter>}` into the template at `src`.
pub struct TemplateTransformer;

impl Transformer for TemplateTransformer {
    fn transform(&self, input: String, ctx: &mut StageContext<'_>) -> Result<String> {
        let source = require_source("template", ctx.source)?;
        let template = ctx.sources.read(source, &mut *ctx.env)?;
        let mut vars: HashMap<String, String> = ctx
            .parameters
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        vars.insert("content".to_string(), input);
        Ok(expand_variables(&template, &vars))
    }

    fn key(&self, info: &StageInfo<'_>) -> Option<String> {
        let source = info.source?;
        if info.parameters.is_empty() {
            Some(source.to_string())
        } else {
            Some(format!("{source}?{}", info.parameters.key_fragment()))
        }
    }

    fn validity(&self, info: &StageInfo<'_>) -> Option<Validity> {
        info.sources.validity(info.source?)
    }
}

// ---------------------------------------------------------------------------
// Serializers
// ---------------------------------------------------------------------------

/// Writes the content unchanged; only the MIME type differs per registration.
pub struct TextSerializer {
    mime_type: String,
}

impl TextSerializer {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
        }
    }
}

impl Serializer for TextSerializer {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn serialize(&self, input: &str, _ctx: &mut StageContext<'_>, out: &mut dyn Write) -> Result<()> {
        out.write_all(input.as_bytes())?;
        Ok(())
    }
}
