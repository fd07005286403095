use serde_json::{Map, Value};

use crate::models::{Character, PromptTemplate};
use crate::template::render_template;

/// Flat string map a character exposes to template rendering.
pub type PromptContext = Map<String, Value>;

fn join_tags(tags: &[String]) -> String {
    tags.join(", ")
}

/// Derive the render context for a character: its descriptive fields plus a
/// fixed-format one-line summary.
pub fn build_prompt_context(character: &Character) -> PromptContext {
    let mut context = PromptContext::new();
    context.insert("name".into(), Value::String(character.name.clone()));
    context.insert("appearance".into(), Value::String(character.appearance.clone()));
    context.insert("personality".into(), Value::String(character.personality.clone()));
    context.insert("background".into(), Value::String(character.background.clone()));
    context.insert("tags".into(), Value::String(join_tags(&character.tags)));
    context.insert(
        "summary".into(),
        Value::String(format!(
            "{}: {}. 性格: {}. 背景: {}.",
            character.name, character.appearance, character.personality, character.background
        )),
    );
    context
}

/// Render a template against a character. Caller-supplied context entries win
/// on key collision.
pub fn generate_prompt(
    character: &Character,
    template: &PromptTemplate,
    extra_context: &PromptContext,
) -> String {
    let mut context = build_prompt_context(character);
    for (key, value) in extra_context {
        context.insert(key.clone(), value.clone());
    }
    render_template(&template.template, &Value::Object(context))
}
