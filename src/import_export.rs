use chrono::Utc;
use serde_json::Value;

use crate::error::AppError;
use crate::models::Character;

// ============================================================================
// Import
// ============================================================================

fn is_non_empty_string(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|text| !text.trim().is_empty())
}

/// A payload is importable only when it is an array and every record carries
/// a non-empty string id and name, a numeric version, and an array of tags.
/// One bad record invalidates the whole batch.
pub fn validate_characters_payload(payload: &Value) -> bool {
    let Some(records) = payload.as_array() else {
        return false;
    };

    records.iter().all(|record| {
        is_non_empty_string(record.get("id"))
            && is_non_empty_string(record.get("name"))
            && record.get("version").is_some_and(Value::is_number)
            && record.get("tags").is_some_and(Value::is_array)
    })
}

/// Parse an exported character array, reviving timestamps (nested version
/// history included). Records without timestamps get the import time.
pub fn parse_characters_from_json(json: &str) -> Result<Vec<Character>, AppError> {
    let raw: Value = serde_json::from_str(json)?;
    if !validate_characters_payload(&raw) {
        return Err(AppError::Validation("Invalid character payload".into()));
    }

    let records = raw.as_array().cloned().unwrap_or_default();
    records.into_iter().map(revive_character).collect()
}

fn revive_character(mut record: Value) -> Result<Character, AppError> {
    let now = Value::String(Utc::now().to_rfc3339());
    let Some(fields) = record.as_object_mut() else {
        return Err(AppError::Validation("Invalid character payload".into()));
    };

    fields.entry("createdAt").or_insert_with(|| now.clone());
    fields.entry("updatedAt").or_insert(now);

    Ok(serde_json::from_value(record)?)
}

// ============================================================================
// Export
// ============================================================================

/// Pretty-printed JSON array with ISO-8601 timestamps.
pub fn export_characters_to_json(characters: &[Character]) -> Result<String, AppError> {
    Ok(serde_json::to_string_pretty(characters)?)
}

fn escape_csv(value: &str) -> String {
    if value.contains('"') || value.contains(',') || value.contains('\n') || value.contains('|') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// CSV with header `id,name,appearance,personality,background,tags`. Tags are
/// pipe-joined; fields containing a comma, quote, pipe, or newline are quoted
/// with internal quotes doubled.
pub fn export_characters_to_csv(characters: &[Character]) -> String {
    let header = ["id", "name", "appearance", "personality", "background", "tags"];
    let mut lines = vec![header.join(",")];

    for character in characters {
        let tags = character.tags.join("|");
        let columns = [
            character.id.as_str(),
            character.name.as_str(),
            character.appearance.as_str(),
            character.personality.as_str(),
            character.background.as_str(),
            tags.as_str(),
        ];
        lines.push(
            columns
                .iter()
                .map(|column| escape_csv(column))
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    let mut csv = lines.join("\n");
    csv.push('\n');
    csv
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_character() -> Character {
        Character {
            id: "char_001".into(),
            name: "リナ".into(),
            appearance: "銀髪".into(),
            personality: "物静か".into(),
            background: "王立図書館の司書".into(),
            tags: vec!["司書".into(), "異世界".into()],
            thumbnail: None,
            version: 1,
            version_history: None,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_records() {
        let payload = json!([
            {"id": "char_001", "name": "リナ", "version": 1, "tags": []},
            {"id": "char_002", "name": "ケン", "version": 3, "tags": ["主人公"]},
        ]);
        assert!(validate_characters_payload(&payload));
    }

    #[test]
    fn test_validate_rejects_whole_batch_on_one_bad_record() {
        let payload = json!([
            {"id": "char_001", "name": "リナ", "version": 1, "tags": []},
            {"id": "", "name": "無名", "version": 1, "tags": []},
        ]);
        assert!(!validate_characters_payload(&payload));
    }

    #[test]
    fn test_validate_rejects_non_array_and_bad_types() {
        assert!(!validate_characters_payload(&json!({"id": "x"})));
        assert!(!validate_characters_payload(&json!([
            {"id": "char_001", "name": "リナ", "version": "1", "tags": []}
        ])));
        assert!(!validate_characters_payload(&json!([
            {"id": "char_001", "name": "リナ", "version": 1, "tags": "司書"}
        ])));
    }

    #[test]
    fn test_parse_revives_timestamps() {
        let json = r#"[{
            "id": "char_001", "name": "リナ", "version": 2, "tags": ["司書"],
            "appearance": "銀髪", "personality": "物静か", "background": "司書",
            "createdAt": "2025-01-01T00:00:00Z", "updatedAt": "2025-02-01T00:00:00Z"
        }]"#;

        let characters = parse_characters_from_json(json).unwrap();
        assert_eq!(characters.len(), 1);
        assert_eq!(
            characters[0].created_at,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(characters[0].version, 2);
    }

    #[test]
    fn test_parse_defaults_missing_timestamps_to_now() {
        let before = Utc::now();
        let json = r#"[{
            "id": "char_001", "name": "リナ", "version": 1, "tags": [],
            "appearance": "", "personality": "", "background": ""
        }]"#;

        let characters = parse_characters_from_json(json).unwrap();
        assert!(characters[0].created_at >= before);
        assert!(characters[0].updated_at >= before);
    }

    #[test]
    fn test_parse_rejects_invalid_payload() {
        let result = parse_characters_from_json(r#"[{"id": "char_001"}]"#);
        assert!(matches!(result, Err(AppError::Validation(_))));

        let result = parse_characters_from_json("not json");
        assert!(matches!(result, Err(AppError::Serde(_))));
    }

    #[test]
    fn test_export_json_round_trips() {
        let exported = export_characters_to_json(&[sample_character()]).unwrap();
        assert!(exported.contains("2025-01-01T00:00:00Z"));

        let reimported = parse_characters_from_json(&exported).unwrap();
        assert_eq!(reimported, vec![sample_character()]);
    }

    #[test]
    fn test_export_csv_quotes_joined_tags() {
        let csv = export_characters_to_csv(&[sample_character()]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("id,name,appearance,personality,background,tags"));
        assert_eq!(
            lines.next(),
            Some("char_001,リナ,銀髪,物静か,王立図書館の司書,\"司書|異世界\"")
        );
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn test_export_csv_escapes_quotes_and_commas() {
        let mut character = sample_character();
        character.name = "リナ, \"本の虫\"".into();
        character.tags = vec!["静か".into()];

        let csv = export_characters_to_csv(&[character]);
        assert!(csv.contains("\"リナ, \"\"本の虫\"\"\""));
        // single plain tag stays unquoted
        assert!(csv.contains(",静か\n"));
    }
}
