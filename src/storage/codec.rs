use crate::error::AppError;
use crate::models::PersistedState;

use super::{kv_delete, kv_get, kv_set, DbPool};

/// Serialize the state and write it under `key`, overwriting any prior value.
/// Persistence is best-effort: failures are logged, never propagated.
pub fn save_state(pool: &DbPool, key: &str, state: &PersistedState) {
    if let Err(e) = try_save_state(pool, key, state) {
        tracing::error!(key, error = %e, "Failed to save state");
    }
}

fn try_save_state(pool: &DbPool, key: &str, state: &PersistedState) -> Result<(), AppError> {
    let serialized = serde_json::to_string(state)?;
    kv_set(pool, key, &serialized)
}

/// Read and deserialize the state stored under `key`. Returns None when the
/// key is absent or the stored blob fails to parse (logged, not thrown).
/// Timestamps come back as proper `DateTime<Utc>` values, including the ones
/// nested inside version-history snapshots and templates.
pub fn load_state(pool: &DbPool, key: &str) -> Option<PersistedState> {
    let raw = match kv_get(pool, key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::error!(key, error = %e, "Failed to load state");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::error!(key, error = %e, "Failed to parse persisted state");
            None
        }
    }
}

/// Remove the key. Idempotent — clearing an absent key is not an error.
pub fn clear_state(pool: &DbPool, key: &str) {
    if let Err(e) = kv_delete(pool, key) {
        tracing::error!(key, error = %e, "Failed to clear state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AppSettings, CardSize, Character, CharacterVersion, PromptTemplate, TemplateCategory,
    };
    use crate::storage::{init_test_db, kv_set};
    use chrono::{TimeZone, Utc};

    fn sample_state() -> PersistedState {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let character = Character {
            id: "char_001".into(),
            name: "テストキャラ".into(),
            appearance: "黒髪".into(),
            personality: "明るい".into(),
            background: "テスト背景".into(),
            tags: vec!["テスト".into()],
            thumbnail: None,
            version: 2,
            version_history: None,
            created_at: created,
            updated_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
        };
        let snapshot_entry = CharacterVersion {
            version: 1,
            character: character.snapshot(),
            changed_at: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            change_description: Some("初期版".into()),
        };
        let mut character = character;
        character.version_history = Some(vec![snapshot_entry]);

        PersistedState {
            characters: vec![character],
            templates: vec![PromptTemplate {
                id: "tpl_001".into(),
                name: "テンプレ".into(),
                category: TemplateCategory::Image,
                template: "{{name}}".into(),
                description: None,
                variables: vec!["name".into()],
                created_at: created,
                updated_at: Some(created),
            }],
            settings: AppSettings {
                gemini_api_key: Some("sk-xxx".into()),
                default_template: "tpl_001".into(),
                grid_columns: 3,
                card_size: CardSize::Medium,
            },
            selected_character_id: Some("char_001".into()),
            selected_tags: vec!["テスト".into()],
            search_query: "キャラ".into(),
        }
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let pool = init_test_db().unwrap();
        let state = sample_state();

        save_state(&pool, "slot", &state);
        let loaded = load_state(&pool, "slot").expect("state should load");

        assert_eq!(loaded, state);
        // nested timestamps are revived to the same instants
        let history = loaded.characters[0].version_history.as_ref().unwrap();
        assert_eq!(
            history[0].changed_at,
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            history[0].character.created_at,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_load_absent_key_is_none() {
        let pool = init_test_db().unwrap();
        assert!(load_state(&pool, "missing").is_none());
    }

    #[test]
    fn test_load_garbage_is_none() {
        let pool = init_test_db().unwrap();
        kv_set(&pool, "slot", "{not valid json").unwrap();
        assert!(load_state(&pool, "slot").is_none());
    }

    #[test]
    fn test_load_defaults_missing_selection_fields() {
        let pool = init_test_db().unwrap();
        kv_set(
            &pool,
            "slot",
            r#"{"characters":[],"templates":[],"settings":{"defaultTemplate":"","gridColumns":3,"cardSize":"small"}}"#,
        )
        .unwrap();

        let loaded = load_state(&pool, "slot").unwrap();
        assert_eq!(loaded.selected_character_id, None);
        assert!(loaded.selected_tags.is_empty());
        assert_eq!(loaded.search_query, "");
        assert_eq!(loaded.settings.card_size, CardSize::Small);
    }

    #[test]
    fn test_save_overwrites_prior_value() {
        let pool = init_test_db().unwrap();
        let mut state = sample_state();
        save_state(&pool, "slot", &state);

        state.search_query = "上書き".into();
        save_state(&pool, "slot", &state);

        assert_eq!(load_state(&pool, "slot").unwrap().search_query, "上書き");
    }

    #[test]
    fn test_clear_state_is_idempotent() {
        let pool = init_test_db().unwrap();
        save_state(&pool, "slot", &sample_state());

        clear_state(&pool, "slot");
        assert!(load_state(&pool, "slot").is_none());

        // second clear on an absent key is fine
        clear_state(&pool, "slot");
    }
}
