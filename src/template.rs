use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Matches `{{ name }}` tokens. Dots allow nested-path lookups.
fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid regex"))
}

/// Collect the variable names referenced by a template, deduplicated, in
/// first-appearance order.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut variables: Vec<String> = Vec::new();
    for captures in variable_pattern().captures_iter(template) {
        let name = captures[1].to_string();
        if !variables.contains(&name) {
            variables.push(name);
        }
    }
    variables
}

/// Walk a dotted path through nested objects. Unknown keys, null leaves, and
/// non-object intermediates all resolve to the empty string — rendering is
/// best-effort and must never fail.
fn resolve_value(context: &Value, path: &str) -> String {
    let mut current = context;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => current = value,
                None => return String::new(),
            },
            _ => return String::new(),
        }
    }

    match current {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{...}}` occurrence with the string form of the resolved
/// context value.
pub fn render_template(template: &str, context: &Value) -> String {
    variable_pattern()
        .replace_all(template, |captures: &regex::Captures| {
            resolve_value(context, &captures[1])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_variables_in_first_appearance_order() {
        let variables = extract_variables("{{name}} is {{age}} and {{ name }} again");
        assert_eq!(variables, vec!["name", "age"]);
    }

    #[test]
    fn test_extract_variables_trims_whitespace_and_allows_dots() {
        let variables = extract_variables("{{  character.name }} / {{tag_1}}");
        assert_eq!(variables, vec!["character.name", "tag_1"]);
    }

    #[test]
    fn test_extract_variables_ignores_malformed_tokens() {
        assert!(extract_variables("{{ not valid }} {single} plain").is_empty());
    }

    #[test]
    fn test_render_unknown_variable_is_empty() {
        let rendered = render_template("{{known}} {{unknown}}", &json!({"known": "value"}));
        assert_eq!(rendered, "value ");
    }

    #[test]
    fn test_render_null_is_empty() {
        let rendered = render_template("[{{field}}]", &json!({"field": null}));
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn test_render_nested_path() {
        let context = json!({"character": {"name": "山田太郎"}});
        assert_eq!(render_template("{{character.name}}", &context), "山田太郎");
    }

    #[test]
    fn test_render_path_through_non_object_is_empty() {
        let context = json!({"character": "flat"});
        assert_eq!(render_template("{{character.name}}", &context), "");
    }

    #[test]
    fn test_render_numbers_and_bools() {
        let context = json!({"count": 3, "flag": true});
        assert_eq!(render_template("{{count}}/{{flag}}", &context), "3/true");
    }

    #[test]
    fn test_render_leaves_non_token_text_untouched() {
        let context = json!({"name": "A"});
        assert_eq!(render_template("plain {text} {{name}}", &context), "plain {text} A");
    }
}
