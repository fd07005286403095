pub mod gemini;
pub mod imagen;

use crate::error::AppError;

pub(crate) const GENERATIVE_LANGUAGE_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta";

/// Resolve the Gemini API key: explicit argument first, `GEMINI_API_KEY` env
/// as fallback.
pub(crate) fn resolve_api_key(api_key: Option<&str>) -> Result<String, AppError> {
    if let Some(key) = api_key {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(AppError::Auth("Gemini API key is not set".into())),
    }
}
