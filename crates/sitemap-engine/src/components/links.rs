//! Link-processing transformers inserted by Serialize nodes when the
//! request carries link-translation or link-gathering markers.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use sitemap_types::{Result, Validity};

use crate::component::{StageContext, StageInfo, Transformer};

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\b(href|src)="([^"]*)""#).unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Rewrites `href`/`src` values through the request's translation map.
pub struct LinkTranslator;

impl LinkTranslator {
    pub const TYPE: &'static str = "link-translator";
}

impl Transformer for LinkTranslator {
    fn transform(&self, input: String, ctx: &mut StageContext<'_>) -> Result<String> {
        let Some(map) = ctx.env.object_model().link_translation() else {
            return Ok(input);
        };
        let rewritten = link_pattern().replace_all(&input, |caps: &Captures<'_>| {
            let target = map.get(&caps[2]).map(String::as_str).unwrap_or(&caps[2]);
            format!("{}=\"{}\"", &caps[1], target)
        });
        Ok(rewritten.into_owned())
    }

    fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
        Some(String::new())
    }
}

/// Records every `href`/`src` value in the request's gathered-links list.
pub struct LinkGatherer;

impl LinkGatherer {
    pub const TYPE: &'static str = "link-gatherer";
}

impl Transformer for LinkGatherer {
    fn transform(&self, input: String, ctx: &mut StageContext<'_>) -> Result<String> {
        let links: Vec<String> = link_pattern()
            .captures_iter(&input)
            .map(|caps| caps[2].to_string())
            .collect();
        let om = ctx.env.object_model_mut();
        for link in links {
            om.push_gathered_link(link);
        }
        Ok(input)
    }

    fn key(&self, _info: &StageInfo<'_>) -> Option<String> {
        Some(String::new())
    }

    fn validity(&self, _info: &StageInfo<'_>) -> Option<Validity> {
        Some(Validity::Token(Self::TYPE.to_string()))
    }
}
