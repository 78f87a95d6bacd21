//! Extension Points
//!
//! Ordered callback registries replacing ambient event dispatch. Callbacks
//! run in registration order.

use crate::template::TagMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Mutates the outgoing tag map right before mail composition
pub type BeforeSendHook = Arc<dyn Fn(&mut TagMap) + Send + Sync>;

/// Post-processes one substituted template value: (tag name, value) → value
pub type MailTagFilter = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Registered extension callbacks
#[derive(Default)]
pub struct Hooks {
    before_send: RwLock<Vec<BeforeSendHook>>,
    mail_tag: RwLock<Vec<MailTagFilter>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_send<F>(&self, f: F)
    where
        F: Fn(&mut TagMap) + Send + Sync + 'static,
    {
        self.before_send.write().push(Arc::new(f));
    }

    pub fn on_mail_tag<F>(&self, f: F)
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.mail_tag.write().push(Arc::new(f));
    }

    /// Run every before-send hook against the tag map
    pub fn apply_before_send(&self, tags: &mut TagMap) {
        for hook in self.before_send.read().iter() {
            hook(tags);
        }
    }

    /// Run every tag filter over a substituted value; pass-through when none
    pub fn filter_tag(&self, tag: &str, value: &str) -> String {
        let filters = self.mail_tag.read();
        let mut out = value.to_string();
        for filter in filters.iter() {
            out = filter(tag, &out);
        }
        out
    }
}
