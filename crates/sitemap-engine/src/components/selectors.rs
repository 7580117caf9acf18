//! Switch-style selectors: the tested value is computed once per Select.

use sitemap_types::{Parameters, Result};

use crate::component::{Selector, SwitchContext, SwitchSelector};
use crate::environment::Environment;

/// Compares the request parameter named by the `parameter-name` parameter.
pub struct RequestParameterSelector;

impl SwitchSelector for RequestParameterSelector {
    fn switch_context(&self, env: &dyn Environment, parameters: &Parameters) -> Result<SwitchContext> {
        let value = parameters
            .get("parameter-name")
            .and_then(|name| env.parameter(name))
            .map(String::from);
        Ok(SwitchContext(value))
    }

    fn select_in(&self, expression: &str, context: &SwitchContext) -> bool {
        context.0.as_deref() == Some(expression)
    }
}

impl Selector for RequestParameterSelector {
    fn select(&self, expression: &str, env: &dyn Environment, parameters: &Parameters) -> Result<bool> {
        let context = self.switch_context(env, parameters)?;
        Ok(self.select_in(expression, &context))
    }

    fn as_switch(&self) -> Option<&dyn SwitchSelector> {
        Some(self)
    }
}

/// Compares the `parameter-selector-test` parameter, usually bound to a
/// sitemap variable.
pub struct ParameterSelector;

impl SwitchSelector for ParameterSelector {
    fn switch_context(&self, _env: &dyn Environment, parameters: &Parameters) -> Result<SwitchContext> {
        Ok(SwitchContext(
            parameters.get("parameter-selector-test").map(String::from),
        ))
    }

    fn select_in(&self, expression: &str, context: &SwitchContext) -> bool {
        context.0.as_deref() == Some(expression)
    }
}

impl Selector for ParameterSelector {
    fn select(&self, expression: &str, env: &dyn Environment, parameters: &Parameters) -> Result<bool> {
        let context = self.switch_context(env, parameters)?;
        Ok(self.select_in(expression, &context))
    }

    fn as_switch(&self) -> Option<&dyn SwitchSelector> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RequestEnvironment;

    #[test]
    fn request_parameter_selector_reads_named_parameter() {
        let env = RequestEnvironment::new("a").with_parameter("format", "pdf");
        let mut params = Parameters::new();
        params.insert("parameter-name", "format");

        let sel = RequestParameterSelector;
        assert!(sel.select("pdf", &env, &params).unwrap());
        assert!(!sel.select("html", &env, &params).unwrap());
    }

    #[test]
    fn switch_evaluation_agrees_with_plain_select() {
        let env = RequestEnvironment::new("a").with_parameter("format", "pdf");
        let mut params = Parameters::new();
        params.insert("parameter-name", "format");

        let sel = RequestParameterSelector;
        let switch = sel.as_switch().unwrap();
        let ctx = switch.switch_context(&env, &params).unwrap();
        for expr in ["pdf", "html", ""] {
            assert_eq!(
                switch.select_in(expr, &ctx),
                sel.select(expr, &env, &params).unwrap()
            );
        }
    }

    #[test]
    fn parameter_selector_without_test_value_never_selects() {
        let env = RequestEnvironment::new("a");
        let sel = ParameterSelector;
        assert!(!sel.select("x", &env, &Parameters::new()).unwrap());
    }
}
