use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Link {
    pub(crate) text: String,
    pub(crate) url: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) target: String,
    pub(crate) title: String,
    pub(crate) rel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Status {
    pub(crate) code: i64,
    pub(crate) message: String,
    pub(crate) description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoryState {
    pub(crate) text: String,
    pub(crate) html: String,
    pub(crate) source_html: String,
    pub(crate) links: Vec<Link>,
    pub(crate) mouseover_links: Vec<Link>,
    pub(crate) status: Status,
    pub(crate) undo_available: bool,
    pub(crate) redo_available: bool,
    pub(crate) error: String,
    pub(crate) passage: Value,
}

impl Default for StoryState {
    fn default() -> Self {
        Self {
            text: String::new(),
            html: String::new(),
            source_html: String::new(),
            links: Vec::new(),
            mouseover_links: Vec::new(),
            status: Status::default(),
            undo_available: false,
            redo_available: false,
            error: String::new(),
            passage: Value::Object(Map::new()),
        }
    }
}

/// One pushed field (or field group) of [`StoryState`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub(crate) enum StateUpdate {
    #[serde(rename = "html", alias = "async-main-html")]
    Html(String),
    #[serde(rename = "text", alias = "async-main-text")]
    Text(String),
    #[serde(rename = "source", alias = "async-main-source")]
    Source(String),
    #[serde(rename = "links", alias = "async-main-links")]
    Links(Vec<Link>),
    #[serde(
        rename = "mouseoverLinks",
        alias = "mouseover-links",
        alias = "async-main-mouseover-links"
    )]
    MouseoverLinks(Vec<Link>),
    #[serde(rename = "status", alias = "async-main-status")]
    Status(Status),
    #[serde(rename = "undo", alias = "async-main-undo")]
    Undo(bool),
    #[serde(rename = "redo", alias = "async-main-redo")]
    Redo(bool),
    #[serde(rename = "error", alias = "async-main-error")]
    Error(String),
    #[serde(rename = "passage", alias = "async-main-passage")]
    Passage(Value),
}

impl StateUpdate {
    pub(crate) fn field(&self) -> &'static str {
        match self {
            Self::Html(_) => "html",
            Self::Text(_) => "text",
            Self::Source(_) => "source",
            Self::Links(_) => "links",
            Self::MouseoverLinks(_) => "mouseoverLinks",
            Self::Status(_) => "status",
            Self::Undo(_) => "undo",
            Self::Redo(_) => "redo",
            Self::Error(_) => "error",
            Self::Passage(_) => "passage",
        }
    }
}

/// Latest story state pushed by the presenter.
///
/// Writes come from the inbound sync loop (and the reset path); every read
/// goes through a lock so a field is observed either before or after an
/// update, never in between.
pub(crate) struct StateStore {
    state: RwLock<StoryState>,
}

impl StateStore {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(StoryState::default()),
        }
    }

    pub(crate) async fn apply_update(&self, update: StateUpdate) {
        let mut state = self.state.write().await;
        match update {
            StateUpdate::Html(html) => state.html = html,
            StateUpdate::Text(text) => state.text = text,
            StateUpdate::Source(source) => state.source_html = source,
            StateUpdate::Links(links) => state.links = links,
            StateUpdate::MouseoverLinks(links) => state.mouseover_links = links,
            StateUpdate::Status(status) => state.status = status,
            StateUpdate::Undo(available) => state.undo_available = available,
            StateUpdate::Redo(available) => state.redo_available = available,
            StateUpdate::Error(error) => state.error = error,
            StateUpdate::Passage(passage) => state.passage = passage,
        }
    }

    pub(crate) async fn snapshot(&self) -> StoryState {
        self.state.read().await.clone()
    }

    /// Reads a field group under a single lock acquisition.
    pub(crate) async fn read<T>(&self, f: impl FnOnce(&StoryState) -> T) -> T {
        let state = self.state.read().await;
        f(&state)
    }

    pub(crate) async fn reset(&self) {
        *self.state.write().await = StoryState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(text: &str) -> Link {
        Link {
            text: text.to_string(),
            url: format!("#{text}"),
            ..Link::default()
        }
    }

    #[tokio::test]
    async fn fresh_store_holds_defaults() {
        let store = StateStore::new();
        let snapshot = store.snapshot().await;

        assert_eq!(snapshot, StoryState::default());
        assert_eq!(snapshot.status, Status::default());
        assert_eq!(snapshot.passage, json!({}));
        assert!(!snapshot.undo_available);
    }

    #[tokio::test]
    async fn sequential_pushes_keep_latest_value_per_field() {
        let store = StateStore::new();
        store.apply_update(StateUpdate::Text("first".into())).await;
        store.apply_update(StateUpdate::Html("<p>first</p>".into())).await;
        store.apply_update(StateUpdate::Text("second".into())).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.text, "second");
        assert_eq!(snapshot.html, "<p>first</p>");
    }

    #[tokio::test]
    async fn snapshot_is_independent_of_later_updates() {
        let store = StateStore::new();
        store.apply_update(StateUpdate::Links(vec![link("north")])).await;

        let before = store.snapshot().await;
        store
            .apply_update(StateUpdate::Links(vec![link("south"), link("east")]))
            .await;

        assert_eq!(before.links, vec![link("north")]);
        assert_eq!(store.read(|state| state.links.len()).await, 2);
    }

    #[tokio::test]
    async fn every_update_targets_its_own_field() {
        let store = StateStore::new();
        let status = Status {
            code: 200,
            message: "OK".into(),
            description: "Server started".into(),
        };
        store.apply_update(StateUpdate::Source("<tw-passage>".into())).await;
        store.apply_update(StateUpdate::MouseoverLinks(vec![link("hover")])).await;
        store.apply_update(StateUpdate::Status(status.clone())).await;
        store.apply_update(StateUpdate::Undo(true)).await;
        store.apply_update(StateUpdate::Redo(true)).await;
        store.apply_update(StateUpdate::Error("boom".into())).await;
        store
            .apply_update(StateUpdate::Passage(json!({ "name": "Start" })))
            .await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.source_html, "<tw-passage>");
        assert_eq!(snapshot.mouseover_links, vec![link("hover")]);
        assert_eq!(snapshot.status, status);
        assert!(snapshot.undo_available && snapshot.redo_available);
        assert_eq!(snapshot.error, "boom");
        assert_eq!(snapshot.passage["name"], "Start");
        assert!(snapshot.text.is_empty());
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let store = StateStore::new();
        store.apply_update(StateUpdate::Text("Welcome".into())).await;
        store.apply_update(StateUpdate::Undo(true)).await;

        store.reset().await;

        assert_eq!(store.snapshot().await, StoryState::default());
    }

    #[test]
    fn updates_decode_from_frames_and_legacy_channels() {
        let update: StateUpdate =
            serde_json::from_value(json!({ "type": "text", "payload": "Welcome" }))
                .expect("decode text frame");
        assert_eq!(update, StateUpdate::Text("Welcome".into()));

        let update: StateUpdate =
            serde_json::from_value(json!({ "type": "async-main-undo", "payload": true }))
                .expect("decode legacy undo frame");
        assert_eq!(update, StateUpdate::Undo(true));

        let update: StateUpdate = serde_json::from_value(json!({
            "type": "mouseover-links",
            "payload": [{ "text": "Look", "url": "#look", "type": "internal" }]
        }))
        .expect("decode mouseover links");
        let StateUpdate::MouseoverLinks(links) = update else {
            panic!("expected mouseover links");
        };
        assert_eq!(links[0].kind, "internal");
        assert_eq!(links[0].rel, "");
    }

    #[test]
    fn mistyped_payload_is_rejected() {
        let decoded = serde_json::from_value::<StateUpdate>(json!({
            "type": "undo",
            "payload": "yes"
        }));
        assert!(decoded.is_err());
    }
}
