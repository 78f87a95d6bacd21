//! Form Flow Controller
//!
//! The page-flow state machine. Every request against a bound page lands
//! here; the controller loads the per-form session, determines the page
//! role, executes the transition, and returns a `FlowOutcome` for the HTTP
//! layer to realize. Redirect outcomes are always emitted after a session
//! flush. Collaborator failures never propagate: they are converted to
//! outcomes at the call site.

use crate::antispam::CaptchaVerifier;
use crate::auth::{
    action_for, generate_token, DualAuth, BACK_FIELD, CAPTCHA_FIELD, CONFIRM_FIELD, NONCE_FIELD,
    SEND_FIELD, TOKEN_FIELD,
};
use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::form::{FormDefinition, FormStore, SubmittedData};
use crate::notify::NotificationDispatcher;
use crate::session::{clear_all_prefixed, SessionStore, SubmissionSession};
use crate::template::RequestMeta;
use crate::validate::Validator;
use std::collections::HashMap;
use std::sync::Arc;

/// Wizard step a bound page plays
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageRole {
    Entry,
    Confirm,
    Complete,
}

/// Request intent, derived from the posted button fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    ConfirmClicked,
    BackClicked,
    SendClicked,
    PlainLoad,
}

/// One incoming request against a page
#[derive(Clone, Debug, Default)]
pub struct FlowRequest {
    /// Identity of the page being served
    pub page_id: String,
    /// Posted payload; `None` for a plain load
    pub post: Option<SubmittedData>,
    /// Raw HTTP referer
    pub referer: Option<String>,
    pub meta: RequestMeta,
}

impl FlowRequest {
    pub fn intent(&self) -> Intent {
        let Some(post) = &self.post else {
            return Intent::PlainLoad;
        };
        if post.contains_key(BACK_FIELD) {
            Intent::BackClicked
        } else if post.contains_key(SEND_FIELD) {
            Intent::SendClicked
        } else if post.contains_key(CONFIRM_FIELD) {
            Intent::ConfirmClicked
        } else {
            Intent::PlainLoad
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.post.as_ref()?.get(name)?.as_text()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.field(NONCE_FIELD)
    }

    pub fn token(&self) -> Option<&str> {
        self.field(TOKEN_FIELD)
    }

    pub fn captcha_token(&self) -> Option<&str> {
        self.field(CAPTCHA_FIELD)
    }

    /// Posted payload minus the engine's control fields
    pub fn form_data(&self) -> Option<SubmittedData> {
        const CONTROL: [&str; 6] = [
            NONCE_FIELD,
            TOKEN_FIELD,
            CAPTCHA_FIELD,
            CONFIRM_FIELD,
            BACK_FIELD,
            SEND_FIELD,
        ];
        self.post.as_ref().map(|post| {
            post.iter()
                .filter(|(k, _)| !CONTROL.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }
}

/// What the HTTP layer should do with the current request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Page is not part of any form; serve it as ordinary content
    NotBound,
    /// Render the page for its role
    Render(PageRole),
    /// Redirect to the named wizard page. 307 preserves the method.
    Redirect { page: PageRole, status: u16 },
}

/// Orchestrates page transitions, authentication, replay prevention, and
/// notification dispatch
pub struct FormFlowController {
    forms: Arc<dyn FormStore>,
    validator: Validator,
    dispatcher: NotificationDispatcher,
    auth: DualAuth,
    captcha: Option<CaptchaVerifier>,
    config: EngineConfig,
}

impl FormFlowController {
    pub fn new(
        forms: Arc<dyn FormStore>,
        validator: Validator,
        dispatcher: NotificationDispatcher,
        auth: DualAuth,
        captcha: Option<CaptchaVerifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            forms,
            validator,
            dispatcher,
            auth,
            captcha,
            config,
        }
    }

    /// Session view for the page-rendering layer (draft redisplay, errors)
    pub fn session(&self, store: Arc<dyn SessionStore>, slug: &str) -> SubmissionSession {
        SubmissionSession::new(store, &self.config.session_prefix, slug)
    }

    /// Nonce for the given wizard step, for the hidden-field emitters
    pub fn nonce_for(&self, slug: &str, role: PageRole, session_id: &str) -> String {
        self.auth
            .nonce()
            .create(&action_for(slug, step_name(role)), session_id)
    }

    /// Platform CSRF token for the REST surface
    pub fn csrf_token(&self, session_id: &str) -> String {
        self.auth.nonce().create("formflow_rest", session_id)
    }

    /// Verify a REST-surface CSRF token
    pub fn verify_csrf(&self, token: &str, session_id: &str) -> bool {
        self.auth.nonce().verify(token, "formflow_rest", session_id)
    }

    /// Validate a flat payload outside the page flow (REST `/validate`)
    pub async fn validate_payload(
        &self,
        slug: &str,
        data: &SubmittedData,
        meta: &RequestMeta,
    ) -> Result<HashMap<String, Vec<String>>> {
        let form = self
            .forms
            .form_by_slug(slug)
            .ok_or_else(|| FlowError::FormNotFound(slug.to_string()))?;
        Ok(self
            .validator
            .validate_all(data, &form.rules, meta.remote_addr)
            .await)
    }

    /// Main entry point: run the state machine for one request
    pub async fn handle(&self, store: Arc<dyn SessionStore>, req: &FlowRequest) -> FlowOutcome {
        let Some(form) = self.forms.form_for_page(&req.page_id) else {
            // Ordinary content: any engine state in the session is stale.
            clear_all_prefixed(&store, &self.config.session_prefix);
            return FlowOutcome::NotBound;
        };
        if !form.pages_bound() {
            tracing::warn!(form = %form.slug, "form pages not fully bound");
            clear_all_prefixed(&store, &self.config.session_prefix);
            return FlowOutcome::NotBound;
        }

        let session = self.session(store, &form.slug);
        let role = if form.pages.entry == req.page_id {
            PageRole::Entry
        } else if form.pages.confirm == req.page_id {
            PageRole::Confirm
        } else {
            PageRole::Complete
        };

        tracing::debug!(form = %form.slug, ?role, intent = ?req.intent(), "flow transition");
        match role {
            PageRole::Entry => self.handle_entry(&form, &session, req).await,
            PageRole::Confirm => self.handle_confirm(&form, &session, req).await,
            PageRole::Complete => self.handle_complete(&session, req),
        }
    }

    async fn handle_entry(
        &self,
        form: &FormDefinition,
        session: &SubmissionSession,
        req: &FlowRequest,
    ) -> FlowOutcome {
        match req.intent() {
            Intent::BackClicked if session.back_flag() => {
                session.set_authenticated(false);
                redirect(session, PageRole::Entry, 303)
            }
            Intent::SendClicked => {
                // Direct resubmission from entry (async/AJAX path).
                self.send_pipeline(form, session, req, PageRole::Entry).await
            }
            Intent::ConfirmClicked => self.handle_confirm_click(form, session, req).await,
            _ => {
                // Fresh visit.
                if session.back_flag() {
                    session.set_back_flag(false);
                    FlowOutcome::Render(PageRole::Entry)
                } else {
                    session.set_authenticated(false);
                    // Draft shown after a failed confirm must survive.
                    if !session.has_errors() {
                        session.clear_draft();
                    }
                    FlowOutcome::Render(PageRole::Entry)
                }
            }
        }
    }

    async fn handle_confirm_click(
        &self,
        form: &FormDefinition,
        session: &SubmissionSession,
        req: &FlowRequest,
    ) -> FlowOutcome {
        let action = action_for(&form.slug, "entry");
        if !self.auth.verify(
            req.nonce(),
            &action,
            &session.session_id(),
            req.referer.as_deref(),
            &form.pages.entry,
        ) {
            // Almost always a stale-page resubmit: redisplay silently.
            session.set_authenticated(false);
            return FlowOutcome::Render(PageRole::Entry);
        }

        let data = req.form_data().unwrap_or_default();
        let mut errors = self
            .validator
            .validate_all(&data, &form.rules, req.meta.remote_addr)
            .await;

        if form.flags.captcha && !self.captcha_passes(req).await {
            errors
                .entry("captcha".to_string())
                .or_default()
                .push(self.validator.messages().captcha_failed.clone());
        }

        if !errors.is_empty() {
            session.set_draft(&data);
            session.set_errors(&errors);
            return redirect(session, PageRole::Entry, 303);
        }

        session.set_draft(&data);
        session.set_authenticated(true);
        if session.token().is_none() {
            session.set_token(&generate_token());
        }
        redirect(session, PageRole::Confirm, 307)
    }

    /// CAPTCHA is a required gate on the entry page: an unavailable
    /// verifier or a network failure rejects.
    async fn captcha_passes(&self, req: &FlowRequest) -> bool {
        match &self.captcha {
            Some(verifier) => {
                verifier
                    .verify(req.captcha_token().unwrap_or(""), req.meta.remote_addr)
                    .await
            }
            None => {
                tracing::warn!("CAPTCHA required but no verifier configured");
                false
            }
        }
    }

    async fn handle_confirm(
        &self,
        form: &FormDefinition,
        session: &SubmissionSession,
        req: &FlowRequest,
    ) -> FlowOutcome {
        if req.post.is_some() && req.intent() == Intent::BackClicked {
            session.set_back_flag(true);
            session.set_authenticated(false);
            if let Some(data) = req.form_data() {
                if !data.is_empty() {
                    session.set_draft(&data);
                }
            }
            return redirect(session, PageRole::Entry, 307);
        }

        match &req.post {
            None => {
                if session.is_authenticated() {
                    // Idempotent reload.
                    FlowOutcome::Render(PageRole::Confirm)
                } else {
                    redirect(session, PageRole::Entry, 303)
                }
            }
            Some(_) if session.is_authenticated() => {
                if req.intent() == Intent::SendClicked {
                    session.set_authenticated(true);
                    if let Some(data) = req.form_data() {
                        if !data.is_empty() {
                            session.set_draft(&data);
                        }
                    }
                    self.send_pipeline(form, session, req, PageRole::Confirm).await
                } else {
                    FlowOutcome::Render(PageRole::Confirm)
                }
            }
            Some(_) => {
                // Session expired or a parallel-tab flow arriving cold.
                // Accept either the confirm page's nonce/referer pair or
                // the entry page's, and the one-time token must match.
                let sid = session.session_id();
                let dual_ok = self.auth.verify(
                    req.nonce(),
                    &action_for(&form.slug, "confirm"),
                    &sid,
                    req.referer.as_deref(),
                    &form.pages.confirm,
                ) || self.auth.verify(
                    req.nonce(),
                    &action_for(&form.slug, "entry"),
                    &sid,
                    req.referer.as_deref(),
                    &form.pages.entry,
                );
                let token_ok = token_matches(session, req);

                if !(dual_ok && token_ok) {
                    if let Some(data) = req.form_data() {
                        if !data.is_empty() {
                            session.set_draft(&data);
                        }
                    }
                    session.set_back_flag(true);
                    session.set_authenticated(false);
                    return redirect(session, PageRole::Entry, 303);
                }

                session.set_authenticated(true);
                if req.intent() == Intent::SendClicked {
                    self.send_pipeline(form, session, req, PageRole::Confirm).await
                } else {
                    FlowOutcome::Render(PageRole::Confirm)
                }
            }
        }
    }

    fn handle_complete(&self, session: &SubmissionSession, req: &FlowRequest) -> FlowOutcome {
        if req.post.is_some() {
            // Never leave a POST at this URL in browser history.
            return redirect(session, PageRole::Complete, 303);
        }
        if session.is_authenticated() {
            session.clear();
            session.flush();
            FlowOutcome::Render(PageRole::Complete)
        } else {
            redirect(session, PageRole::Entry, 303)
        }
    }

    /// Shared send pipeline, reached from entry direct-send and confirm
    /// send paths.
    async fn send_pipeline(
        &self,
        form: &FormDefinition,
        session: &SubmissionSession,
        req: &FlowRequest,
        calling: PageRole,
    ) -> FlowOutcome {
        let sid = session.session_id();

        // 1. Dual authentication against the calling page. A confirm-page
        //    send may still carry the entry page's pair (the nonce was
        //    issued on entry but the flow finalizes from confirm), so both
        //    pairs are acceptable there.
        let entry_pair = self.auth.verify(
            req.nonce(),
            &action_for(&form.slug, "entry"),
            &sid,
            req.referer.as_deref(),
            &form.pages.entry,
        );
        let dual_ok = match calling {
            PageRole::Entry => entry_pair,
            _ => {
                entry_pair
                    || self.auth.verify(
                        req.nonce(),
                        &action_for(&form.slug, "confirm"),
                        &sid,
                        req.referer.as_deref(),
                        &form.pages.confirm,
                    )
            }
        };
        if !dual_ok {
            session.set_authenticated(false);
            return redirect(session, PageRole::Entry, 303);
        }

        // 2. One-time token. A mismatch after a successful send is the
        //    expected signature of a duplicate: report success without
        //    resending. A mismatch before any send is a forgery: deny.
        if !token_matches(session, req) {
            if session.is_sent() {
                tracing::info!(form = %form.slug, "duplicate send short-circuited");
                session.set_authenticated(true);
                return redirect(session, PageRole::Complete, 307);
            }
            session.set_authenticated(false);
            return redirect(session, PageRole::Entry, 303);
        }

        // 3. Fall back to the session draft when no inline data came in.
        let data = match req.form_data().filter(|d| !d.is_empty()) {
            Some(data) => data,
            None => session.draft(),
        };

        // 4-5. Full re-validation; entry-stage validation is not trusted.
        let errors = self
            .validator
            .validate_all(&data, &form.rules, req.meta.remote_addr)
            .await;
        if !errors.is_empty() {
            session.set_draft(&data);
            session.set_errors(&errors);
            return redirect(session, PageRole::Entry, 303);
        }

        // 6-7. Stamp the next sequence id and dispatch.
        let mail_id = form.mail_sequence_id + 1;
        let result = self
            .dispatcher
            .dispatch(form, &data, &req.meta, mail_id)
            .await;

        if result.both_sent() {
            // 8. Token invalidation is the replay-prevention trigger.
            session.clear_token();
            session.mark_sent();
            self.forms.increment_mail_sequence(&form.slug);
            session.set_authenticated(true);
            tracing::info!(form = %form.slug, mail_id, "submission dispatched");
            redirect(session, PageRole::Complete, 307)
        } else {
            // 9. Generic retry message; transport detail stays in the log.
            session.set_authenticated(false);
            let mut errors = HashMap::new();
            errors.insert(
                "send".to_string(),
                vec![self.validator.messages().delivery_failed.clone()],
            );
            session.set_errors(&errors);
            session.set_draft(&data);
            redirect(session, PageRole::Entry, 303)
        }
    }
}

fn step_name(role: PageRole) -> &'static str {
    match role {
        PageRole::Entry => "entry",
        PageRole::Confirm => "confirm",
        PageRole::Complete => "complete",
    }
}

fn token_matches(session: &SubmissionSession, req: &FlowRequest) -> bool {
    match (req.token(), session.token()) {
        (Some(posted), Some(stored)) => !posted.is_empty() && posted == stored,
        _ => false,
    }
}

/// Flush-then-redirect, so the redirect target observes the writes
fn redirect(session: &SubmissionSession, page: PageRole, status: u16) -> FlowOutcome {
    session.flush();
    FlowOutcome::Redirect { page, status }
}
