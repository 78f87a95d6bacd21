//! Form Data Model
//!
//! Immutable per-form configuration (pages, rules, mail templates, feature
//! flags) plus the values a visitor submits. Forms are authored elsewhere;
//! this crate only reads them, except for the mail sequence counter which
//! is bumped exactly once per successful send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Form definition
// =============================================================================

/// The three wizard pages bound to one logical form
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageBinding {
    pub entry: String,
    pub confirm: String,
    pub complete: String,
}

/// Auto-reply mail configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplyMail {
    /// Name of the submitted field holding the visitor's address
    pub to_field: String,
    pub subject: String,
    pub body: String,
    pub from_address: String,
    pub from_name: String,
    pub reply_to: Option<String>,
}

/// Admin notification mail configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub from_address: String,
    pub from_name: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
}

/// Per-form feature flags
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormFlags {
    /// Require a CAPTCHA score check on the entry page
    pub captcha: bool,
    /// Persist the submission record on send
    pub persist: bool,
    /// Fire the Slack webhook on send
    pub slack: bool,
    /// Fire the spreadsheet-append webhook on send
    pub sheet: bool,
    /// Skip the auto-reply channel entirely
    pub auto_reply_disabled: bool,
}

/// One logical form
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormDefinition {
    pub slug: String,
    pub title: String,
    pub pages: PageBinding,
    pub rules: Vec<FieldRule>,
    pub reply_mail: ReplyMail,
    pub admin_mail: AdminMail,
    pub flags: FormFlags,
    /// Monotonically increasing id stamped into each sent mail
    pub mail_sequence_id: u64,
    pub created_at: DateTime<Utc>,
}

impl FormDefinition {
    pub fn new(slug: &str, title: &str) -> Self {
        Self {
            slug: slug.to_string(),
            title: title.to_string(),
            pages: PageBinding::default(),
            rules: Vec::new(),
            reply_mail: ReplyMail::default(),
            admin_mail: AdminMail::default(),
            flags: FormFlags::default(),
            mail_sequence_id: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether every wizard page is bound
    pub fn pages_bound(&self) -> bool {
        !self.pages.entry.is_empty()
            && !self.pages.confirm.is_empty()
            && !self.pages.complete.is_empty()
    }
}

// =============================================================================
// Validation rules
// =============================================================================

/// One row of validation config for a single target field
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldRule {
    /// Submitted field name the rule applies to
    pub field: String,
    /// Active constraints; anything absent is a no-op
    pub constraints: Vec<Constraint>,
}

impl FieldRule {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            constraints: Vec::new(),
        }
    }

    pub fn constraint(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }
}

/// Closed set of field constraints
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Constraint {
    /// Value must be present and non-empty
    Required,
    /// Minimum character count (inclusive), scalars only
    MinLength(usize),
    /// Maximum character count (inclusive), scalars only
    MaxLength(usize),
    /// Character-class / format grammar
    Pattern(PatternClass),
    /// Value must equal one of the listed candidates
    MatchingChar(Vec<String>),
    /// Delegate the value to the anti-spam gateway
    SpamFilter,
    /// Attachment byte-size ceiling
    FileSize(u64),
    /// Attachment extension allow-list (resolved through MIME types)
    AllowedExtensions(Vec<String>),
}

/// Pattern classes a scalar value can be checked against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternClass {
    Tel,
    Email,
    Url,
    Numeric,
    Alpha,
    Alphanumeric,
    Katakana,
    Hiragana,
    Kana,
    Date,
}

// =============================================================================
// Submitted values
// =============================================================================

/// Uploaded-file descriptor; opaque to templates except its display name
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub storage_ref: String,
    pub preview_image: Option<String>,
}

/// One submitted field value
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Attachment(AttachmentRef),
}

impl FieldValue {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    /// Scalar projection; attachments are not scalars
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Attachment(_) => None,
        }
    }

    /// Name used when the value is substituted into a template
    pub fn display_name(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Attachment(a) => &a.original_name,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Attachment(a) => a.storage_ref.is_empty(),
        }
    }
}

/// Flat submitted payload keyed by field name
pub type SubmittedData = HashMap<String, FieldValue>;

// =============================================================================
// Send result
// =============================================================================

/// Per-attempt outcome of the two mail channels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub reply_sent: bool,
    pub admin_sent: bool,
    /// Auto-reply was disabled or had no recipient
    pub reply_skipped: bool,
}

impl SendResult {
    /// Overall success: admin mail plus the reply mail unless skipped
    pub fn both_sent(&self) -> bool {
        self.admin_sent && (self.reply_sent || self.reply_skipped)
    }
}

// =============================================================================
// Form store boundary
// =============================================================================

/// Read-side access to authored forms (the admin editor lives elsewhere)
pub trait FormStore: Send + Sync {
    /// Look up a form by slug
    fn form_by_slug(&self, slug: &str) -> Option<FormDefinition>;
    /// Look up the form bound to a page, if any
    fn form_for_page(&self, page_id: &str) -> Option<FormDefinition>;
    /// Bump and return the next mail sequence id
    fn increment_mail_sequence(&self, slug: &str) -> u64;
}

/// In-memory form store for tests and embedding
#[derive(Default)]
pub struct MemoryFormStore {
    forms: dashmap::DashMap<String, FormDefinition>,
}

impl MemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, form: FormDefinition) {
        self.forms.insert(form.slug.clone(), form);
    }
}

impl FormStore for MemoryFormStore {
    fn form_by_slug(&self, slug: &str) -> Option<FormDefinition> {
        self.forms.get(slug).map(|f| f.clone())
    }

    fn form_for_page(&self, page_id: &str) -> Option<FormDefinition> {
        self.forms.iter().find_map(|f| {
            let p = &f.pages;
            if p.entry == page_id || p.confirm == page_id || p.complete == page_id {
                Some(f.clone())
            } else {
                None
            }
        })
    }

    fn increment_mail_sequence(&self, slug: &str) -> u64 {
        match self.forms.get_mut(slug) {
            Some(mut f) => {
                f.mail_sequence_id += 1;
                f.mail_sequence_id
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_bound() {
        let mut form = FormDefinition::new("contact", "Contact");
        assert!(!form.pages_bound());

        form.pages = PageBinding {
            entry: "p1".into(),
            confirm: "p2".into(),
            complete: "p3".into(),
        };
        assert!(form.pages_bound());
    }

    #[test]
    fn test_both_sent_semantics() {
        let full = SendResult {
            reply_sent: true,
            admin_sent: true,
            reply_skipped: false,
        };
        assert!(full.both_sent());

        let skipped = SendResult {
            reply_sent: false,
            admin_sent: true,
            reply_skipped: true,
        };
        assert!(skipped.both_sent());

        let reply_failed = SendResult {
            reply_sent: false,
            admin_sent: true,
            reply_skipped: false,
        };
        assert!(!reply_failed.both_sent());
    }

    #[test]
    fn test_memory_store_page_lookup() {
        let store = MemoryFormStore::new();
        let mut form = FormDefinition::new("contact", "Contact");
        form.pages = PageBinding {
            entry: "entry-page".into(),
            confirm: "confirm-page".into(),
            complete: "complete-page".into(),
        };
        store.insert(form);

        assert!(store.form_for_page("confirm-page").is_some());
        assert!(store.form_for_page("unrelated").is_none());
    }

    #[test]
    fn test_mail_sequence_increment() {
        let store = MemoryFormStore::new();
        store.insert(FormDefinition::new("contact", "Contact"));

        assert_eq!(store.increment_mail_sequence("contact"), 1);
        assert_eq!(store.increment_mail_sequence("contact"), 2);
        assert_eq!(store.increment_mail_sequence("missing"), 0);
    }

    #[test]
    fn test_attachment_display_name() {
        let value = FieldValue::Attachment(AttachmentRef {
            original_name: "resume.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 1024,
            storage_ref: "uploads/abc123".into(),
            preview_image: None,
        });
        assert_eq!(value.display_name(), "resume.pdf");
        assert!(value.as_text().is_none());
    }
}
