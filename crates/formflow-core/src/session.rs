//! Submission Session
//!
//! Per-visitor, per-form state namespaced by a `{prefix}{slug}_` key
//! prefix, so two forms in the same browser session never collide. The
//! backing store is the visitor's browser session; writes must be flushed
//! before any redirect so the redirect target observes them.

use crate::form::SubmittedData;
use std::collections::HashMap;
use std::sync::Arc;

/// Visitor-session key-value backing store. Implementations wrap whatever
/// cookie/session machinery the host application uses; the engine only
/// needs string slots plus an explicit flush point.
pub trait SessionStore: Send + Sync {
    /// Stable id for this visitor session (feeds nonce derivation)
    fn id(&self) -> String;
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
    /// Commit pending writes. Must be called before emitting a redirect;
    /// a client following the redirect immediately may otherwise observe
    /// stale state.
    fn flush(&self);
}

/// In-memory store for tests and single-process embedding
pub struct MemorySessionStore {
    id: String,
    map: dashmap::DashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            map: dashmap::DashMap::new(),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn set(&self, key: &str, value: String) {
        self.map.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.map.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }

    fn flush(&self) {}
}

// Slot names under the per-form prefix.
const KEY_AUTH: &str = "auth";
const KEY_DATA: &str = "data";
const KEY_ERRORS: &str = "errors";
const KEY_TOKEN: &str = "token";
const KEY_SENT: &str = "sent";
const KEY_BACK: &str = "back";

/// Typed view over one form's slice of the visitor session
pub struct SubmissionSession {
    store: Arc<dyn SessionStore>,
    prefix: String,
}

impl SubmissionSession {
    pub fn new(store: Arc<dyn SessionStore>, global_prefix: &str, slug: &str) -> Self {
        Self {
            store,
            prefix: format!("{global_prefix}{slug}_"),
        }
    }

    pub fn session_id(&self) -> String {
        self.store.id()
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn get_bool(&self, name: &str) -> bool {
        self.store.get(&self.key(name)).as_deref() == Some("1")
    }

    fn set_bool(&self, name: &str, value: bool) {
        if value {
            self.store.set(&self.key(name), "1".to_string());
        } else {
            self.store.remove(&self.key(name));
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_bool(KEY_AUTH)
    }

    pub fn set_authenticated(&self, value: bool) {
        self.set_bool(KEY_AUTH, value);
    }

    /// Draft data shown when the visitor returns to the entry page
    pub fn draft(&self) -> SubmittedData {
        self.store
            .get(&self.key(KEY_DATA))
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn set_draft(&self, data: &SubmittedData) {
        if let Ok(raw) = serde_json::to_string(data) {
            self.store.set(&self.key(KEY_DATA), raw);
        }
    }

    pub fn clear_draft(&self) {
        self.store.remove(&self.key(KEY_DATA));
    }

    pub fn has_errors(&self) -> bool {
        self.store.get(&self.key(KEY_ERRORS)).is_some()
    }

    pub fn set_errors(&self, errors: &HashMap<String, Vec<String>>) {
        if let Ok(raw) = serde_json::to_string(errors) {
            self.store.set(&self.key(KEY_ERRORS), raw);
        }
    }

    /// Errors are surfaced exactly once: reading clears them.
    pub fn take_errors(&self) -> HashMap<String, Vec<String>> {
        let key = self.key(KEY_ERRORS);
        let errors = self
            .store
            .get(&key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        self.store.remove(&key);
        errors
    }

    pub fn token(&self) -> Option<String> {
        self.store.get(&self.key(KEY_TOKEN)).filter(|t| !t.is_empty())
    }

    pub fn set_token(&self, token: &str) {
        self.store.set(&self.key(KEY_TOKEN), token.to_string());
    }

    /// Invalidate the one-time token; the replay-prevention trigger
    pub fn clear_token(&self) {
        self.store.remove(&self.key(KEY_TOKEN));
    }

    /// Once set, the sent flag survives until the whole session slice is
    /// cleared. Sole defense against replay after token loss.
    pub fn is_sent(&self) -> bool {
        self.get_bool(KEY_SENT)
    }

    pub fn mark_sent(&self) {
        self.set_bool(KEY_SENT, true);
    }

    pub fn back_flag(&self) -> bool {
        self.get_bool(KEY_BACK)
    }

    pub fn set_back_flag(&self, value: bool) {
        self.set_bool(KEY_BACK, value);
    }

    /// Remove every key in this form's namespace
    pub fn clear(&self) {
        for key in self.store.keys() {
            if key.starts_with(&self.prefix) {
                self.store.remove(&key);
            }
        }
    }

    pub fn flush(&self) {
        self.store.flush();
    }
}

/// Remove every engine-owned key regardless of form (used on unbound pages)
pub fn clear_all_prefixed(store: &Arc<dyn SessionStore>, global_prefix: &str) {
    for key in store.keys() {
        if key.starts_with(global_prefix) {
            store.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FieldValue;

    fn session() -> (Arc<dyn SessionStore>, SubmissionSession) {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let session = SubmissionSession::new(store.clone(), "formflow_", "contact");
        (store, session)
    }

    #[test]
    fn test_prefix_isolation() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let a = SubmissionSession::new(store.clone(), "formflow_", "contact");
        let b = SubmissionSession::new(store.clone(), "formflow_", "survey");

        a.set_authenticated(true);
        assert!(a.is_authenticated());
        assert!(!b.is_authenticated());

        a.clear();
        b.set_token("tok");
        assert!(b.token().is_some());
    }

    #[test]
    fn test_errors_read_once() {
        let (_, session) = session();
        let mut errors = HashMap::new();
        errors.insert("email".to_string(), vec!["必須項目です".to_string()]);
        session.set_errors(&errors);

        assert!(session.has_errors());
        assert_eq!(session.take_errors()["email"].len(), 1);
        assert!(!session.has_errors());
        assert!(session.take_errors().is_empty());
    }

    #[test]
    fn test_draft_round_trip() {
        let (_, session) = session();
        let mut data = SubmittedData::new();
        data.insert("name".into(), FieldValue::text("山田"));
        session.set_draft(&data);

        let draft = session.draft();
        assert_eq!(draft["name"].as_text(), Some("山田"));
    }

    #[test]
    fn test_clear_removes_only_own_namespace() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        store.set("unrelated", "keep".to_string());
        let session = SubmissionSession::new(store.clone(), "formflow_", "contact");
        session.set_token("tok");
        session.mark_sent();

        session.clear();
        assert!(session.token().is_none());
        assert!(!session.is_sent());
        assert_eq!(store.get("unrelated").as_deref(), Some("keep"));
    }

    #[test]
    fn test_clear_all_prefixed() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        store.set("formflow_contact_auth", "1".to_string());
        store.set("formflow_survey_token", "t".to_string());
        store.set("other", "keep".to_string());

        clear_all_prefixed(&store, "formflow_");
        assert!(store.get("formflow_contact_auth").is_none());
        assert!(store.get("formflow_survey_token").is_none());
        assert_eq!(store.get("other").as_deref(), Some("keep"));
    }
}
