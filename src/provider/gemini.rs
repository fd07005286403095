use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ts_rs::TS;

use crate::error::AppError;
use crate::models::Character;

use super::{resolve_api_key, GENERATIVE_LANGUAGE_BASE_URL};

const GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

// ============================================================================
// Request / response types
// ============================================================================

/// Image-generation platform a prompt is optimized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum TargetPlatform {
    StableDiffusion,
    Dalle,
    Midjourney,
    General,
}

impl TargetPlatform {
    fn instruction(&self) -> &'static str {
        match self {
            TargetPlatform::StableDiffusion => {
                "Stable Diffusion用に最適化（タグ形式、具体的な描写、品質タグを含む）"
            }
            TargetPlatform::Dalle => "DALL-E用に最適化（自然な英語文、詳細な描写）",
            TargetPlatform::Midjourney => {
                "Midjourney用に最適化（--ar等のパラメータ推奨、芸術的な表現）"
            }
            TargetPlatform::General => "一般的な画像生成AI用に最適化（明確で具体的な英語表現）",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TargetPlatform::StableDiffusion => "stable-diffusion",
            TargetPlatform::Dalle => "dalle",
            TargetPlatform::Midjourney => "midjourney",
            TargetPlatform::General => "general",
        }
    }
}

/// Relationship kind for suggested companion characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Friend,
    Rival,
    Family,
    Mentor,
}

impl Relation {
    fn label(&self) -> &'static str {
        match self {
            Relation::Friend => "親友",
            Relation::Rival => "ライバル",
            Relation::Family => "家族",
            Relation::Mentor => "メンター（師匠）",
        }
    }
}

/// Character fields produced by generation — everything but id, version, and
/// timestamps, which the caller assigns when inserting into the store.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedCharacter {
    pub name: String,
    pub appearance: String,
    pub personality: String,
    pub background: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

// ============================================================================
// GeminiClient
// ============================================================================

/// HTTP client for the Gemini text endpoints: character auto-completion,
/// prompt optimization, consistency checking, and related-character
/// suggestions.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
}

impl GeminiClient {
    /// Create a client. Fails with an auth error when no API key is given and
    /// `GEMINI_API_KEY` is unset.
    pub fn new(api_key: Option<&str>) -> Result<Self, AppError> {
        let api_key = resolve_api_key(api_key)?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {e}")))?;

        Ok(Self { http, api_key })
    }

    /// POST a prompt to `generateContent` and return the concatenated text of
    /// the first candidate.
    async fn generate_content(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!(
            "{}/models/{}:generateContent",
            GENERATIVE_LANGUAGE_BASE_URL, GEMINI_MODEL
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(translate_api_error(status.as_u16(), &detail));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Api(e.to_string()))?;
        extract_text(&data)
    }

    /// Expand a short description (e.g. "元気な女子高生") into full character
    /// fields.
    pub async fn generate_character(&self, prompt: &str) -> Result<GeneratedCharacter, AppError> {
        let system_prompt = format!(
            "以下のキャラクター設定から、詳細なキャラクター情報を生成してください。\n\n\
             入力: {prompt}\n\n\
             以下のJSON形式で出力してください：\n\
             {{\n\
             \x20 \"name\": \"キャラクター名\",\n\
             \x20 \"appearance\": \"外見の詳細（髪型、目の色、身長、服装など）\",\n\
             \x20 \"personality\": \"性格・口調の詳細\",\n\
             \x20 \"background\": \"背景・設定\",\n\
             \x20 \"tags\": [\"タグ1\", \"タグ2\", \"タグ3\"]\n\
             }}\n\n\
             JSONのみを出力してください。説明文は不要です。"
        );

        let text = self.generate_content(&system_prompt).await?;
        parse_json_response(&text)
    }

    /// Turn a character into an English image prompt tuned for the given
    /// platform.
    pub async fn optimize_prompt(
        &self,
        character: &Character,
        target: TargetPlatform,
    ) -> Result<String, AppError> {
        let system_prompt = format!(
            "以下のキャラクター設定を{}してください。\n\n\
             キャラクター情報:\n\
             - 名前: {}\n\
             - 外見: {}\n\
             - 性格: {}\n\
             - 背景: {}\n\
             - タグ: {}\n\n\
             {}で画像生成する際に最適な英語プロンプトを生成してください。\n\
             プロンプトのみを出力し、説明文は不要です。",
            target.instruction(),
            character.name,
            character.appearance,
            character.personality,
            character.background,
            character.tags.join(", "),
            target.name(),
        );

        let text = self.generate_content(&system_prompt).await?;
        Ok(text.trim().to_string())
    }

    /// Check a character's fields for contradictions.
    pub async fn check_consistency(
        &self,
        character: &Character,
    ) -> Result<ConsistencyReport, AppError> {
        let system_prompt = format!(
            "以下のキャラクター設定に矛盾や不自然な点がないかチェックしてください。\n\n\
             キャラクター情報:\n{}\n\n\
             以下のJSON形式で出力してください：\n\
             {{\n\
             \x20 \"isConsistent\": true/false,\n\
             \x20 \"issues\": [\"問題点1\", \"問題点2\"],\n\
             \x20 \"suggestions\": [\"改善提案1\", \"改善提案2\"]\n\
             }}\n\n\
             問題がない場合は、issuesとsuggestionsを空配列にしてください。\n\
             JSONのみを出力してください。説明文は不要です。",
            serde_json::to_string_pretty(character)?,
        );

        let text = self.generate_content(&system_prompt).await?;
        parse_json_response(&text)
    }

    /// Propose a companion character standing in the given relation to the
    /// base character.
    pub async fn suggest_related_character(
        &self,
        base: &Character,
        relation: Relation,
    ) -> Result<GeneratedCharacter, AppError> {
        let label = relation.label();
        let system_prompt = format!(
            "以下のキャラクターの{label}となるキャラクターを生成してください。\n\n\
             基準キャラクター:\n\
             - 名前: {}\n\
             - 外見: {}\n\
             - 性格: {}\n\
             - 背景: {}\n\
             - タグ: {}\n\n\
             {label}として適切なキャラクターを、以下のJSON形式で出力してください：\n\
             {{\n\
             \x20 \"name\": \"キャラクター名\",\n\
             \x20 \"appearance\": \"外見の詳細\",\n\
             \x20 \"personality\": \"性格・口調\",\n\
             \x20 \"background\": \"背景・設定（{}との関係性を含む）\",\n\
             \x20 \"tags\": [\"タグ1\", \"タグ2\", \"タグ3\"]\n\
             }}\n\n\
             JSONのみを出力してください。説明文は不要です。",
            base.name,
            base.appearance,
            base.personality,
            base.background,
            base.tags.join(", "),
            base.name,
        );

        let text = self.generate_content(&system_prompt).await?;
        parse_json_response(&text)
    }
}

// ============================================================================
// Response handling
// ============================================================================

/// Concatenate the text parts of the first candidate.
fn extract_text(data: &Value) -> Result<String, AppError> {
    let parts = data
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Api("Gemini response contained no candidates".into()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        return Err(AppError::Api("Gemini response contained no text".into()));
    }
    Ok(text)
}

/// Parse a model response as JSON, stripping ```json fences the model likes
/// to wrap payloads in.
fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T, AppError> {
    let cleaned = text.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim())
        .map_err(|e| AppError::Api(format!("Failed to parse JSON response: {e}")))
}

/// Map known failure causes to user-facing messages; pass the rest through
/// generically.
fn translate_api_error(status: u16, detail: &str) -> AppError {
    match status {
        401 | 403 => AppError::Auth(format!("Gemini APIキーが無効です: {detail}")),
        429 => AppError::Api("Gemini APIのレート制限に達しました。しばらく待ってから再試行してください。".into()),
        _ if detail.contains("SAFETY") || detail.to_lowercase().contains("safety") => {
            AppError::Api("安全性フィルターにより生成がブロックされました。".into())
        }
        _ => AppError::Api(format!("Gemini API error: {status} - {detail}")),
    }
}
