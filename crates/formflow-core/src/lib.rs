//! Formflow Core - Multi-Step Form Submission Engine
//!
//! Session-backed entry → confirm → complete wizard with:
//! - Server-side validation (closed rule enum, Japanese message defaults)
//! - Anti-spam and anti-replay protection (nonce + referer + one-time token)
//! - Templated notification dispatch (auto-reply, admin mail, webhooks)
//! - Optional persistence of submitted data
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      FORM FLOW ENGINE                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  Request ──► FlowController ──► Validator ──► AntiSpamGateway   │
//! │                   │                                             │
//! │                   ▼                                             │
//! │           SubmissionSession ◄──── one-time token / sent flag    │
//! │                   │                                             │
//! │                   ▼                                             │
//! │          NotificationDispatcher                                 │
//! │           │         │        │                                  │
//! │           ▼         ▼        ▼                                  │
//! │      Reply Mail  Admin Mail  Webhooks (Slack / Sheet)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod antispam;
pub mod auth;
pub mod config;
pub mod error;
pub mod flow;
pub mod form;
pub mod hooks;
pub mod notify;
pub mod session;
pub mod template;
pub mod validate;

pub use config::{EngineConfig, SiteInfo};
pub use error::{FlowError, Result};
pub use flow::{FlowOutcome, FlowRequest, FormFlowController, Intent, PageRole};
pub use form::{
    AttachmentRef, Constraint, FieldRule, FieldValue, FormDefinition, FormStore, PatternClass,
    SendResult,
};
pub use session::{MemorySessionStore, SessionStore, SubmissionSession};
pub use template::{RequestMeta, TagMap, TemplateEngine};
