//! Notification Dispatch
//!
//! Composes and sends the two mail channels, persists the submission
//! record, and fans out to best-effort webhooks. Mail channels run
//! sequentially: the admin mail reports the auto-reply outcome, so it must
//! come second. Webhook failures are logged and swallowed; they never fail
//! the dispatch or block the response past a bounded timeout.

use crate::config::SiteInfo;
use crate::form::{FieldValue, FormDefinition, SendResult, SubmittedData};
use crate::hooks::Hooks;
use crate::template::{self, tags, RequestMeta, TagMap, TemplateEngine};
use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Collaborator boundaries
// =============================================================================

/// One outgoing mail
#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
    /// Resolved storage paths handed to the transport
    pub attachments: Vec<String>,
}

/// Mail transport boundary; `false` means the channel failed
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> bool;
}

/// Persistence boundary for submitted records
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Save one ordered submission record
    async fn save(&self, slug: &str, record: &[(String, String)]) -> bool;
}

/// Attachment storage boundary
pub trait FileStore: Send + Sync {
    /// Resolve a storage ref to a transport-usable path
    fn resolve_path(&self, storage_ref: &str) -> Option<String>;
    /// Drop the temporary classification of an uploaded file. Called only
    /// after the full dispatch so in-request retries still see the file.
    fn clear_temporary(&self, storage_ref: &str);
}

/// File store for deployments without uploads
pub struct NullFileStore;

impl FileStore for NullFileStore {
    fn resolve_path(&self, storage_ref: &str) -> Option<String> {
        Some(storage_ref.to_string())
    }

    fn clear_temporary(&self, _storage_ref: &str) {}
}

/// Webhook endpoints; absent URL disables the channel
#[derive(Clone, Debug, Default)]
pub struct WebhookTargets {
    pub slack_url: Option<String>,
    pub sheet_url: Option<String>,
    /// Secret signing the sheet-append payload
    pub sheet_secret: Option<String>,
    /// Per-channel hard timeout in seconds
    pub timeout_secs: u64,
}

impl WebhookTargets {
    pub fn new() -> Self {
        Self {
            timeout_secs: 10,
            ..Self::default()
        }
    }

    pub fn slack(mut self, url: &str) -> Self {
        self.slack_url = Some(url.to_string());
        self
    }

    pub fn sheet(mut self, url: &str, secret: &str) -> Self {
        self.sheet_url = Some(url.to_string());
        self.sheet_secret = Some(secret.to_string());
        self
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

const STATUS_SENT: &str = "成功";
const STATUS_FAILED: &str = "失敗";
const STATUS_SKIPPED: &str = "未送信";

/// Composes and delivers all notification channels for one submission
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    store: Option<Arc<dyn SubmissionStore>>,
    files: Arc<dyn FileStore>,
    engine: TemplateEngine,
    hooks: Arc<Hooks>,
    site: SiteInfo,
    webhooks: WebhookTargets,
    client: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        store: Option<Arc<dyn SubmissionStore>>,
        files: Arc<dyn FileStore>,
        hooks: Arc<Hooks>,
        site: SiteInfo,
        webhooks: WebhookTargets,
    ) -> Self {
        Self {
            transport,
            store,
            files,
            engine: TemplateEngine::new(hooks.clone()),
            hooks,
            site,
            webhooks,
            client: reqwest::Client::new(),
        }
    }

    /// Run the full dispatch pipeline. Mail-channel outcomes are reported
    /// per channel in the result; webhook and persistence outcomes are not.
    pub async fn dispatch(
        &self,
        form: &FormDefinition,
        data: &SubmittedData,
        meta: &RequestMeta,
        mail_id: u64,
    ) -> SendResult {
        // 1. Shared tag map: defaults, sequence id, every submitted field.
        let mut base_tags = template::default_tags(&self.site);
        base_tags.insert(tags::MAIL_ID.to_string(), mail_id.to_string());
        for (field, value) in data {
            base_tags.insert(field.clone(), value.display_name().to_string());
        }

        // 2. Attachment normalization: names stay in the tag map, resolved
        //    paths go to the transport.
        let mut attachment_refs = Vec::new();
        let mut attachment_paths = Vec::new();
        for value in data.values() {
            if let FieldValue::Attachment(a) = value {
                attachment_refs.push(a.storage_ref.clone());
                if let Some(path) = self.files.resolve_path(&a.storage_ref) {
                    attachment_paths.push(path);
                }
            }
        }

        // 3. Auto-reply channel.
        let reply_to = data
            .get(&form.reply_mail.to_field)
            .and_then(|v| v.as_text())
            .unwrap_or("");
        let reply_skipped = form.flags.auto_reply_disabled || reply_to.is_empty();
        let reply_sent = if reply_skipped {
            false
        } else {
            let mut reply_tags = base_tags.clone();
            self.hooks.apply_before_send(&mut reply_tags);
            let message = MailMessage {
                to: reply_to.to_string(),
                subject: self.engine.render(&form.reply_mail.subject, &reply_tags),
                body: self.engine.render(&form.reply_mail.body, &reply_tags),
                headers: reply_headers(form),
                attachments: Vec::new(),
            };
            let ok = self.transport.send(&message).await;
            if !ok {
                tracing::warn!(form = %form.slug, "auto-reply mail failed");
            }
            ok
        };

        // 4. Admin channel, always attempted. Its tag map reports the
        //    auto-reply outcome.
        let reply_status = if reply_skipped {
            STATUS_SKIPPED
        } else if reply_sent {
            STATUS_SENT
        } else {
            STATUS_FAILED
        };
        let mut admin_tags = base_tags.clone();
        admin_tags.extend(template::meta_tags(meta));
        admin_tags.insert(tags::AUTO_REPLY_STATUS.to_string(), reply_status.to_string());
        self.hooks.apply_before_send(&mut admin_tags);

        let admin_subject = self.engine.render(&form.admin_mail.subject, &admin_tags);
        let admin_message = MailMessage {
            to: form.admin_mail.to.clone(),
            subject: admin_subject.clone(),
            body: self.engine.render(&form.admin_mail.body, &admin_tags),
            headers: admin_headers(form),
            attachments: attachment_paths,
        };
        let admin_sent = self.transport.send(&admin_message).await;
        if !admin_sent {
            tracing::warn!(form = %form.slug, "admin mail failed");
        }

        let result = SendResult {
            reply_sent,
            admin_sent,
            reply_skipped,
        };

        // 5-6. Persistence record and webhook fan-out, regardless of the
        //      mail outcome.
        let record = build_record(
            form,
            data,
            &admin_subject,
            reply_status,
            if admin_sent { STATUS_SENT } else { STATUS_FAILED },
        );

        if form.flags.persist {
            if let Some(store) = &self.store {
                if !store.save(&form.slug, &record).await {
                    tracing::warn!(form = %form.slug, "submission persistence failed");
                }
            }
        }

        self.fire_webhooks(form, &record).await;

        // 7. Attachments stay retryable until the full dispatch is done.
        for storage_ref in &attachment_refs {
            self.files.clear_temporary(storage_ref);
        }

        result
    }

    /// Fire enabled webhook channels concurrently. Best-effort: failures
    /// are logged, never surfaced.
    async fn fire_webhooks(&self, form: &FormDefinition, record: &[(String, String)]) {
        let slack = async {
            if form.flags.slack {
                if let Some(url) = &self.webhooks.slack_url {
                    self.post_slack(url, form, record).await;
                }
            }
        };
        let sheet = async {
            if form.flags.sheet {
                if let Some(url) = &self.webhooks.sheet_url {
                    self.post_sheet(url, form, record).await;
                }
            }
        };
        tokio::join!(slack, sheet);
    }

    async fn post_slack(&self, url: &str, form: &FormDefinition, record: &[(String, String)]) {
        let summary: Vec<String> = record
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        let payload = json!({
            "text": format!("{}\n{}", form.title, summary.join("\n")),
        });

        let request = self
            .client
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(self.webhooks.timeout_secs));
        match tokio::time::timeout(
            Duration::from_secs(self.webhooks.timeout_secs),
            request.send(),
        )
        .await
        {
            Ok(Ok(resp)) if resp.status().is_success() => {
                tracing::info!(form = %form.slug, "Slack webhook delivered");
            }
            Ok(Ok(resp)) => {
                tracing::warn!(form = %form.slug, status = %resp.status(), "Slack webhook rejected");
            }
            Ok(Err(e)) => {
                tracing::warn!(form = %form.slug, "Slack webhook failed: {}", e);
            }
            Err(_) => {
                tracing::warn!(form = %form.slug, "Slack webhook timed out");
            }
        }
    }

    async fn post_sheet(&self, url: &str, form: &FormDefinition, record: &[(String, String)]) {
        let row: Vec<&str> = record.iter().map(|(_, v)| v.as_str()).collect();
        let payload = json!({ "form": form.slug, "row": row });
        let body = payload.to_string();
        let signature = sign(
            self.webhooks.sheet_secret.as_deref().unwrap_or(""),
            &body,
        );

        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Formflow-Signature", signature)
            .body(body)
            .timeout(Duration::from_secs(self.webhooks.timeout_secs));
        match tokio::time::timeout(
            Duration::from_secs(self.webhooks.timeout_secs),
            request.send(),
        )
        .await
        {
            Ok(Ok(resp)) if resp.status().is_success() => {
                tracing::info!(form = %form.slug, "sheet webhook delivered");
            }
            Ok(Ok(resp)) => {
                tracing::warn!(form = %form.slug, status = %resp.status(), "sheet webhook rejected");
            }
            Ok(Err(e)) => {
                tracing::warn!(form = %form.slug, "sheet webhook failed: {}", e);
            }
            Err(_) => {
                tracing::warn!(form = %form.slug, "sheet webhook timed out");
            }
        }
    }
}

fn sign(secret: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(payload.as_bytes());
    format!("sha256={}", hex::encode(hasher.finalize()))
}

fn reply_headers(form: &FormDefinition) -> Vec<(String, String)> {
    let mut headers = vec![(
        "From".to_string(),
        format!("{} <{}>", form.reply_mail.from_name, form.reply_mail.from_address),
    )];
    if let Some(reply_to) = &form.reply_mail.reply_to {
        headers.push(("Reply-To".to_string(), reply_to.clone()));
    }
    headers
}

fn admin_headers(form: &FormDefinition) -> Vec<(String, String)> {
    let mut headers = vec![(
        "From".to_string(),
        format!("{} <{}>", form.admin_mail.from_name, form.admin_mail.from_address),
    )];
    if let Some(cc) = &form.admin_mail.cc {
        headers.push(("Cc".to_string(), cc.clone()));
    }
    if let Some(bcc) = &form.admin_mail.bcc {
        headers.push(("Bcc".to_string(), bcc.clone()));
    }
    headers
}

/// Ordered submission record: mail title, recipient, both channel
/// outcomes (admin right after auto-reply), then fields in rule order
/// followed by any unruled extras.
fn build_record(
    form: &FormDefinition,
    data: &SubmittedData,
    mail_title: &str,
    reply_status: &str,
    admin_status: &str,
) -> Vec<(String, String)> {
    let mut record = vec![
        ("mail_title".to_string(), mail_title.to_string()),
        ("mail_to".to_string(), form.admin_mail.to.clone()),
        (tags::AUTO_REPLY_STATUS.to_string(), reply_status.to_string()),
        (tags::ADMIN_SEND_STATUS.to_string(), admin_status.to_string()),
    ];

    for rule in &form.rules {
        if let Some(value) = data.get(&rule.field) {
            record.push((rule.field.clone(), value.display_name().to_string()));
        }
    }

    let mut extras: Vec<&String> = data
        .keys()
        .filter(|k| !form.rules.iter().any(|r| &r.field == *k))
        .collect();
    extras.sort();
    for field in extras {
        if let Some(value) = data.get(field) {
            record.push((field.clone(), value.display_name().to_string()));
        }
    }

    record
}
