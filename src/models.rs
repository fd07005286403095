use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Character
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub name: String,
    pub appearance: String,
    pub personality: String,
    pub background: String,
    pub tags: Vec<String>,
    /// Data URI of the card thumbnail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub version: u32,
    /// Newest last, capped at 10 entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_history: Option<Vec<CharacterVersion>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    /// Copy of the character without its own history, for version entries.
    pub fn snapshot(&self) -> CharacterSnapshot {
        CharacterSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            appearance: self.appearance.clone(),
            personality: self.personality.clone(),
            background: self.background.clone(),
            tags: self.tags.clone(),
            thumbnail: self.thumbnail.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A `Character` minus its `version_history`, so snapshots never nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSnapshot {
    pub id: String,
    pub name: String,
    pub appearance: String,
    pub personality: String,
    pub background: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CharacterSnapshot {
    /// Rebuild a live character from this snapshot, re-attaching the given
    /// history. The snapshot itself is an owned copy, so the result shares no
    /// state with whatever character it was taken from.
    pub fn into_character(self, version_history: Option<Vec<CharacterVersion>>) -> Character {
        Character {
            id: self.id,
            name: self.name,
            appearance: self.appearance,
            personality: self.personality,
            background: self.background,
            tags: self.tags,
            thumbnail: self.thumbnail,
            version: self.version,
            version_history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CharacterVersion {
    pub version: u32,
    pub character: CharacterSnapshot,
    pub changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<String>,
}

/// Partial update applied over an existing character. `None` fields are left
/// untouched. A provided `version` only wins when it exceeds the automatic
/// increment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCharacterInput {
    pub name: Option<String>,
    pub appearance: Option<String>,
    pub personality: Option<String>,
    pub background: Option<String>,
    pub tags: Option<Vec<String>>,
    pub thumbnail: Option<String>,
    pub version: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Prompt templates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    Image,
    Text,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub category: TemplateCategory,
    /// Template body containing `{{variable}}` placeholders.
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub variables: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateInput {
    pub name: Option<String>,
    pub category: Option<TemplateCategory>,
    pub template: Option<String>,
    pub description: Option<String>,
    pub variables: Option<Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CardSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    /// Id of the template preselected in generation dialogs. Not validated
    /// against the template list.
    pub default_template: String,
    pub grid_columns: u32,
    pub card_size: CardSize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            default_template: String::new(),
            grid_columns: 3,
            card_size: CardSize::Medium,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsInput {
    pub gemini_api_key: Option<String>,
    pub default_template: Option<String>,
    pub grid_columns: Option<u32>,
    pub card_size: Option<CardSize>,
}

// ============================================================================
// Persisted state
// ============================================================================

/// The exact shape written to and read from the durable key-value slot.
/// Derived views (filtered lists, tag aggregates) are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub characters: Vec<Character>,
    pub templates: Vec<PromptTemplate>,
    pub settings: AppSettings,
    #[serde(default)]
    pub selected_character_id: Option<String>,
    #[serde(default)]
    pub selected_tags: Vec<String>,
    #[serde(default)]
    pub search_query: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_character() -> Character {
        Character {
            id: "char_001".into(),
            name: "テストキャラ".into(),
            appearance: "黒髪".into(),
            personality: "明るい".into(),
            background: "テスト背景".into(),
            tags: vec!["テスト".into()],
            thumbnail: None,
            version: 1,
            version_history: None,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_snapshot_drops_history() {
        let mut character = sample_character();
        character.version_history = Some(vec![CharacterVersion {
            version: 1,
            character: character.snapshot(),
            changed_at: Utc::now(),
            change_description: None,
        }]);

        let snapshot = character.snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("versionHistory").is_none());
        assert_eq!(snapshot.name, character.name);
    }

    #[test]
    fn test_snapshot_is_an_independent_copy() {
        let mut character = sample_character();
        let snapshot = character.snapshot();
        character.name = "書き換え後".into();
        assert_eq!(snapshot.name, "テストキャラ");
    }

    #[test]
    fn test_character_serializes_camel_case_iso_timestamps() {
        let character = sample_character();
        let json = serde_json::to_value(&character).unwrap();
        assert_eq!(json["createdAt"], "2025-01-01T00:00:00Z");
        assert!(json.get("created_at").is_none());
        // absent optional fields are omitted entirely
        assert!(json.get("thumbnail").is_none());
    }

    #[test]
    fn test_persisted_state_defaults_for_missing_fields() {
        let state: PersistedState =
            serde_json::from_str(r#"{"characters":[],"templates":[],"settings":{"defaultTemplate":"","gridColumns":3,"cardSize":"medium"}}"#)
                .unwrap();
        assert_eq!(state.selected_character_id, None);
        assert!(state.selected_tags.is_empty());
        assert_eq!(state.search_query, "");
    }

    #[test]
    fn test_settings_default() {
        let settings = AppSettings::default();
        assert_eq!(settings.grid_columns, 3);
        assert_eq!(settings.card_size, CardSize::Medium);
        assert!(settings.gemini_api_key.is_none());
        assert_eq!(settings.default_template, "");
    }
}
