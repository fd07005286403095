use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ts_rs::TS;

use crate::error::AppError;

use super::{resolve_api_key, GENERATIVE_LANGUAGE_BASE_URL};

const IMAGEN_MODEL: &str = "imagen-3.0-generate-001";

/// Estimated cost per generated image in USD. Imagen has no free tier.
const COST_PER_IMAGE_USD: f64 = 0.04;

// ============================================================================
// Options & result types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    BlockFew,
    BlockSome,
    BlockMost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationOptions {
    pub aspect_ratio: AspectRatio,
    pub number_of_images: u32,
    pub safety_level: SafetyLevel,
}

impl Default for ImageGenerationOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Square,
            number_of_images: 1,
            safety_level: SafetyLevel::BlockSome,
        }
    }
}

/// Generated images as data URIs, plus the estimated cost in USD.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationResult {
    pub images: Vec<String>,
    pub cost: f64,
}

// ============================================================================
// Generation
// ============================================================================

/// Generate character images from a prompt. Billed per image — there is no
/// free tier for Imagen.
pub async fn generate_character_image(
    prompt: &str,
    options: ImageGenerationOptions,
    api_key: Option<&str>,
) -> Result<ImageGenerationResult, AppError> {
    let body = json!({
        "instances": [{ "prompt": prompt }],
        "parameters": {
            "sampleCount": options.number_of_images,
            "aspectRatio": options.aspect_ratio,
            "safetySetting": options.safety_level,
            "personGeneration": "allow_adult",
        }
    });

    let data = predict(IMAGEN_MODEL, api_key, &body).await?;
    Ok(ImageGenerationResult {
        images: extract_images(&data),
        cost: options.number_of_images as f64 * COST_PER_IMAGE_USD,
    })
}

/// Generate `count` square variations of a prompt, optionally seeded with a
/// base image (data URI) for image-to-image and a model override.
pub async fn generate_image_variations(
    prompt: &str,
    count: u32,
    api_key: Option<&str>,
    model: Option<&str>,
    base_image: Option<&str>,
) -> Result<ImageGenerationResult, AppError> {
    if !(1..=8).contains(&count) {
        return Err(AppError::Validation(
            "生成する画像の数は1〜8の範囲で指定してください".into(),
        ));
    }

    let mut instance = json!({ "prompt": prompt });
    if let Some(base_image) = base_image {
        instance["image"] = json!({ "bytesBase64Encoded": strip_data_uri(base_image) });
    }

    let body = json!({
        "instances": [instance],
        "parameters": {
            "sampleCount": count,
            "aspectRatio": AspectRatio::Square,
            "safetySetting": SafetyLevel::BlockSome,
            "personGeneration": "allow_adult",
        }
    });

    let data = predict(model.unwrap_or(IMAGEN_MODEL), api_key, &body).await?;
    Ok(ImageGenerationResult {
        images: extract_images(&data),
        cost: count as f64 * COST_PER_IMAGE_USD,
    })
}

/// POST to the model's `:predict` endpoint and return the raw response.
async fn predict(model: &str, api_key: Option<&str>, body: &Value) -> Result<Value, AppError> {
    let key = resolve_api_key(api_key)?;
    let endpoint = format!("{}/models/{}:predict", GENERATIVE_LANGUAGE_BASE_URL, model);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| AppError::Internal(format!("HTTP client error: {e}")))?;

    let response = client
        .post(&endpoint)
        .header("x-goog-api-key", key)
        .json(body)
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

    response.json().await.map_err(|e| AppError::Api(e.to_string()))
}

/// Collect `predictions[].bytesBase64Encoded` as data URIs.
fn extract_images(data: &Value) -> Vec<String> {
    let Some(predictions) = data.get("predictions").and_then(Value::as_array) else {
        return Vec::new();
    };

    predictions
        .iter()
        .filter_map(|prediction| {
            let bytes = prediction.get("bytesBase64Encoded").and_then(Value::as_str)?;
            let mime = prediction
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            Some(format!("data:{};base64,{}", mime, bytes))
        })
        .collect()
}

/// Strip a `data:*;base64,` prefix so raw base64 reaches the API.
fn strip_data_uri(image: &str) -> &str {
    image
        .split_once("base64,")
        .map(|(_, bytes)| bytes)
        .unwrap_or(image)
}

fn translate_api_error(status: u16, detail: &str) -> AppError {
    if status == 403 || detail.contains("billing") {
        return AppError::Api("GCP Billingが有効化されていません。画像生成機能は課金必須です。".into());
    }
    if detail.to_lowercase().contains("safety") {
        return AppError::Api("安全性フィルターにより画像生成がブロックされました。".into());
    }
    AppError::Api(format!("Imagen API error: {status} - {detail}"))
}
