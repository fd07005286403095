use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::import_export;
use crate::models::{
    Character, CharacterVersion, PersistedState, PromptTemplate, UpdateCharacterInput,
    UpdateSettingsInput, UpdateTemplateInput,
};

/// Version snapshots retained per character. Oldest entries are evicted first.
const MAX_VERSION_HISTORY: usize = 10;

/// Handle returned by [`CharacterStore::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&PersistedState) + Send + Sync>;

/// In-memory source of truth for the application's working set: characters,
/// prompt templates, selection/filter state, and settings.
///
/// All mutations are synchronous and atomic; entry points are serialized
/// behind a single mutex. The store performs no storage or network I/O —
/// persistence hangs off the subscription mechanism (see `storage::persist`).
/// Instantiate one per application session and inject it where needed.
pub struct CharacterStore {
    state: Mutex<PersistedState>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl Default for CharacterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PersistedState::default()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn generate_id(prefix: &str) -> String {
        format!("{}_{}", prefix, uuid::Uuid::new_v4())
    }

    // ------------------------------------------------------------------
    // State access & subscriptions
    // ------------------------------------------------------------------

    /// Clone of the current state. This is exactly the persistable subset —
    /// derived views are computed per call, never stored.
    pub fn state(&self) -> PersistedState {
        self.state.lock().unwrap().clone()
    }

    /// Replace the whole state at once, e.g. from a persisted snapshot.
    /// Notifies subscribers like any other change.
    pub fn hydrate(&self, state: PersistedState) {
        let snapshot = {
            let mut current = self.state.lock().unwrap();
            *current = state;
            current.clone()
        };
        self.notify(&snapshot);
    }

    /// Register a listener invoked with a state snapshot after every change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&PersistedState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false when the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn notify(&self, snapshot: &PersistedState) {
        // Clone the handles out so listeners can mutate the store or manage
        // subscriptions without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn mutate<F: FnOnce(&mut PersistedState)>(&self, f: F) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            f(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
    }

    // ------------------------------------------------------------------
    // Characters
    // ------------------------------------------------------------------

    /// Append a character as-is. The caller supplies id, version, and
    /// timestamps. Colliding ids are not rejected; see DESIGN.md.
    pub fn add_character(&self, character: Character) {
        self.mutate(|state| state.characters.push(character));
    }

    /// Merge a partial update over the matching character, bumping its
    /// version. An explicitly provided version wins only when it is higher
    /// than the automatic increment. Unknown ids are a no-op.
    pub fn update_character(&self, id: &str, updates: UpdateCharacterInput) {
        self.mutate(|state| {
            let Some(character) = state.characters.iter_mut().find(|c| c.id == id) else {
                return;
            };

            character.version = match updates.version {
                Some(proposed) if proposed > character.version => proposed,
                _ => character.version + 1,
            };
            if let Some(name) = updates.name {
                character.name = name;
            }
            if let Some(appearance) = updates.appearance {
                character.appearance = appearance;
            }
            if let Some(personality) = updates.personality {
                character.personality = personality;
            }
            if let Some(background) = updates.background {
                character.background = background;
            }
            if let Some(tags) = updates.tags {
                character.tags = tags;
            }
            if let Some(thumbnail) = updates.thumbnail {
                character.thumbnail = Some(thumbnail);
            }
            character.updated_at = updates.updated_at.unwrap_or_else(Utc::now);
        });
    }

    /// Delete the matching character, clearing the selection if it pointed at
    /// the removed id.
    pub fn remove_character(&self, id: &str) {
        self.mutate(|state| {
            state.characters.retain(|character| character.id != id);
            if state.selected_character_id.as_deref() == Some(id) {
                state.selected_character_id = None;
            }
        });
    }

    /// Clone a character under a fresh id with a marked name, reset version,
    /// fresh timestamps, and an empty history. Unknown ids are a no-op.
    pub fn duplicate_character(&self, id: &str) {
        self.mutate(|state| {
            let Some(original) = state.characters.iter().find(|c| c.id == id) else {
                return;
            };

            let now = Utc::now();
            let mut duplicate = original.clone();
            duplicate.id = Self::generate_id("char");
            duplicate.name = format!("{} Copy", original.name);
            duplicate.created_at = now;
            duplicate.updated_at = now;
            duplicate.version = 1;
            duplicate.version_history = Some(Vec::new());
            state.characters.push(duplicate);
        });
    }

    // ------------------------------------------------------------------
    // Version history
    // ------------------------------------------------------------------

    /// Append a snapshot of the character's current fields (minus its own
    /// history) to its version history. The history is capped: beyond 10
    /// retained snapshots the oldest entries are dropped.
    pub fn save_version(&self, character_id: &str, description: Option<&str>) {
        self.mutate(|state| {
            let Some(character) = state.characters.iter_mut().find(|c| c.id == character_id)
            else {
                return;
            };

            let entry = CharacterVersion {
                version: character.version,
                character: character.snapshot(),
                changed_at: Utc::now(),
                change_description: description.map(String::from),
            };

            let history = character.version_history.get_or_insert_with(Vec::new);
            history.push(entry);
            if history.len() > MAX_VERSION_HISTORY {
                let excess = history.len() - MAX_VERSION_HISTORY;
                history.drain(..excess);
            }
        });
    }

    /// Overwrite the live character with the snapshot recorded for `version`,
    /// keeping its history and stamping `updated_at` to now. Restoring never
    /// records a new history entry by itself — callers wanting one must call
    /// [`save_version`](Self::save_version) separately. Unknown ids or
    /// versions are a no-op.
    pub fn restore_version(&self, character_id: &str, version: u32) {
        self.mutate(|state| {
            let Some(character) = state.characters.iter_mut().find(|c| c.id == character_id)
            else {
                return;
            };

            let Some(entry) = character
                .version_history
                .as_ref()
                .and_then(|history| history.iter().find(|entry| entry.version == version))
                .cloned()
            else {
                return;
            };

            let history = character.version_history.take();
            *character = entry.character.into_character(history);
            character.version = entry.version;
            character.updated_at = Utc::now();
        });
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub fn add_template(&self, template: PromptTemplate) {
        self.mutate(|state| state.templates.push(template));
    }

    /// Merge a partial update over the matching template, stamping
    /// `updated_at` like `update_character` does. Unknown ids are a no-op.
    pub fn update_template(&self, id: &str, updates: UpdateTemplateInput) {
        self.mutate(|state| {
            let Some(template) = state.templates.iter_mut().find(|t| t.id == id) else {
                return;
            };

            if let Some(name) = updates.name {
                template.name = name;
            }
            if let Some(category) = updates.category {
                template.category = category;
            }
            if let Some(body) = updates.template {
                template.template = body;
            }
            if let Some(description) = updates.description {
                template.description = Some(description);
            }
            if let Some(variables) = updates.variables {
                template.variables = variables;
            }
            template.updated_at = Some(updates.updated_at.unwrap_or_else(Utc::now));
        });
    }

    pub fn remove_template(&self, id: &str) {
        self.mutate(|state| state.templates.retain(|template| template.id != id));
    }

    // ------------------------------------------------------------------
    // Settings & selection
    // ------------------------------------------------------------------

    /// Shallow-merge the provided fields into the settings.
    pub fn update_settings(&self, updates: UpdateSettingsInput) {
        self.mutate(|state| {
            if let Some(key) = updates.gemini_api_key {
                state.settings.gemini_api_key = Some(key);
            }
            if let Some(template) = updates.default_template {
                state.settings.default_template = template;
            }
            if let Some(columns) = updates.grid_columns {
                state.settings.grid_columns = columns;
            }
            if let Some(size) = updates.card_size {
                state.settings.card_size = size;
            }
        });
    }

    pub fn set_selected_character(&self, id: Option<String>) {
        self.mutate(|state| state.selected_character_id = id);
    }

    pub fn set_selected_tags(&self, tags: Vec<String>) {
        self.mutate(|state| state.selected_tags = tags);
    }

    pub fn set_search_query(&self, query: String) {
        self.mutate(|state| state.search_query = query);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Characters matching the current search query (case-insensitive
    /// substring over name/appearance/personality/background, OR across
    /// fields) and the selected tags (every selected tag must be present).
    /// Recomputed on every call.
    pub fn filtered_characters(&self) -> Vec<Character> {
        let state = self.state.lock().unwrap();
        let query = state.search_query.trim().to_lowercase();

        state
            .characters
            .iter()
            .filter(|character| {
                let matches_query = query.is_empty()
                    || [
                        &character.name,
                        &character.appearance,
                        &character.personality,
                        &character.background,
                    ]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&query));

                let matches_tags = state.selected_tags.is_empty()
                    || state
                        .selected_tags
                        .iter()
                        .all(|tag| character.tags.contains(tag));

                matches_query && matches_tags
            })
            .cloned()
            .collect()
    }

    /// Unique tags across all characters, lexicographically sorted.
    pub fn all_tags(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let tags: std::collections::BTreeSet<String> = state
            .characters
            .iter()
            .flat_map(|character| character.tags.iter().cloned())
            .collect();
        tags.into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Import / export
    // ------------------------------------------------------------------

    /// Serialize all characters, or only the ones matching `ids` when the
    /// slice is non-empty.
    pub fn export_characters(&self, ids: &[String]) -> String {
        let state = self.state.lock().unwrap();
        let target: Vec<&Character> = if ids.is_empty() {
            state.characters.iter().collect()
        } else {
            state
                .characters
                .iter()
                .filter(|character| ids.contains(&character.id))
                .collect()
        };

        serde_json::to_string(&target).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to export characters");
            "[]".into()
        })
    }

    /// Parse and append an exported character batch. A malformed payload is
    /// logged and leaves the store unchanged — there is no partial import.
    pub fn import_characters(&self, json: &str) {
        match import_export::parse_characters_from_json(json) {
            Ok(characters) => {
                self.mutate(|state| state.characters.extend(characters));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to import characters");
            }
        }
    }

    /// Return to the empty initial state: no characters, no templates,
    /// default settings.
    pub fn reset(&self) {
        self.mutate(|state| *state = PersistedState::default());
    }
}
