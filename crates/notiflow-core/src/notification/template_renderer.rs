//! Pure, stateless template rendering. No I/O, no escaping: every literal
//! `{{key}}` placeholder (no spaces inside the braces) is replaced with its
//! variable's value; anything unreferenced or missing passes through
//! untouched.

use super::model::TemplateVariables;

pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Replace every `{{key}}` occurrence in `content` with `variables[key]`.
    /// A placeholder with no matching variable is left in the output as-is.
    pub fn render(content: &str, variables: &TemplateVariables) -> String {
        let mut output = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("{{") {
            let (before, after_open) = rest.split_at(start);
            output.push_str(before);
            let after_open = &after_open[2..];

            match after_open.find("}}") {
                Some(end) => {
                    let key = &after_open[..end];
                    if !key.is_empty() && !key.chars().any(char::is_whitespace) {
                        match variables.get(key) {
                            Some(value) => output.push_str(value),
                            None => {
                                output.push_str("{{");
                                output.push_str(key);
                                output.push_str("}}");
                            }
                        }
                        rest = &after_open[end + 2..];
                    } else {
                        output.push_str("{{");
                        rest = after_open;
                    }
                }
                None => {
                    output.push_str("{{");
                    rest = after_open;
                }
            }
        }

        output.push_str(rest);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_single_placeholder() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Ada".to_string());
        assert_eq!(TemplateRenderer::render("Hello {{name}}!", &vars), "Hello Ada!");
    }

    #[test]
    fn test_missing_variable_passes_through() {
        let vars = HashMap::new();
        assert_eq!(TemplateRenderer::render("Hello {{name}}!", &vars), "Hello {{name}}!");
    }

    #[test]
    fn test_unreferenced_variable_is_ignored() {
        let mut vars = HashMap::new();
        vars.insert("unused".to_string(), "x".to_string());
        assert_eq!(TemplateRenderer::render("no placeholders here", &vars), "no placeholders here");
    }

    #[test]
    fn test_placeholder_with_internal_space_not_treated_as_key() {
        let mut vars = HashMap::new();
        vars.insert("na me".to_string(), "Ada".to_string());
        assert_eq!(TemplateRenderer::render("Hi {{na me}}", &vars), "Hi {{na me}}");
    }

    #[test]
    fn test_multiple_placeholders() {
        let mut vars = HashMap::new();
        vars.insert("first".to_string(), "Grace".to_string());
        vars.insert("last".to_string(), "Hopper".to_string());
        assert_eq!(
            TemplateRenderer::render("{{first}} {{last}}", &vars),
            "Grace Hopper"
        );
    }

    #[test]
    fn test_no_escaping_of_value_content() {
        let mut vars = HashMap::new();
        vars.insert("html".to_string(), "<b>bold</b>".to_string());
        assert_eq!(
            TemplateRenderer::render("value: {{html}}", &vars),
            "value: <b>bold</b>"
        );
    }
}
