//! Dual Authentication
//!
//! Anti-replay building blocks: a scoped time-windowed nonce, an HTTP
//! referer page-identity check, and the per-session one-time token. A
//! request is "dual authenticated" when both the nonce and the referer
//! check hold; failures redisplay silently since a stale page resubmit is
//! far more likely than an attack.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Posted field carrying the nonce
pub const NONCE_FIELD: &str = "formflow_nonce";
/// Posted field carrying the one-time token
pub const TOKEN_FIELD: &str = "formflow_token";
/// Posted field carrying the CAPTCHA response token
pub const CAPTCHA_FIELD: &str = "formflow_captcha_token";
/// Intent fields posted by the page buttons
pub const CONFIRM_FIELD: &str = "formflow_confirm";
pub const BACK_FIELD: &str = "formflow_back";
pub const SEND_FIELD: &str = "formflow_send";

/// Nonce tokens derived from secret + action + session id + hour window.
/// Verification accepts the current and previous window.
pub struct NonceService {
    secret: String,
    window_secs: u64,
}

impl NonceService {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            window_secs: 3600,
        }
    }

    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs;
        self
    }

    fn window(&self, offset: u64) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        (now / self.window_secs.max(1)).saturating_sub(offset)
    }

    fn digest(&self, action: &str, session_id: &str, window: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(action.as_bytes());
        hasher.update(session_id.as_bytes());
        hasher.update(window.to_be_bytes());
        let hash = hex::encode(hasher.finalize());
        hash[..16].to_string()
    }

    pub fn create(&self, action: &str, session_id: &str) -> String {
        self.digest(action, session_id, self.window(0))
    }

    pub fn verify(&self, nonce: &str, action: &str, session_id: &str) -> bool {
        !nonce.is_empty()
            && (nonce == self.digest(action, session_id, self.window(0))
                || nonce == self.digest(action, session_id, self.window(1)))
    }
}

/// Nonce action scoped to one form's wizard step
pub fn action_for(slug: &str, step: &str) -> String {
    format!("formflow_{step}_{slug}")
}

/// Maps a referer URL back to the page it identifies
pub trait PageResolver: Send + Sync {
    fn page_for_url(&self, url: &str) -> Option<String>;
}

/// Resolver backed by an explicit URL-path → page-id table
#[derive(Default)]
pub struct PathPageResolver {
    pages: dashmap::DashMap<String, String>,
}

impl PathPageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, path: &str, page_id: &str) {
        self.pages.insert(path.to_string(), page_id.to_string());
    }

    fn path_of(url: &str) -> &str {
        let without_scheme = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);
        let path_start = without_scheme.find('/').unwrap_or(without_scheme.len());
        let path = &without_scheme[path_start..];
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if path.is_empty() {
            "/"
        } else {
            path
        }
    }
}

impl PageResolver for PathPageResolver {
    fn page_for_url(&self, url: &str) -> Option<String> {
        self.pages.get(Self::path_of(url)).map(|p| p.clone())
    }
}

/// Nonce + referer verification bundle
pub struct DualAuth {
    nonce: NonceService,
    resolver: Arc<dyn PageResolver>,
}

impl DualAuth {
    pub fn new(nonce: NonceService, resolver: Arc<dyn PageResolver>) -> Self {
        Self { nonce, resolver }
    }

    pub fn nonce(&self) -> &NonceService {
        &self.nonce
    }

    /// Both checks must hold: the nonce for the scoped action, and the
    /// referer resolving to the expected page.
    pub fn verify(
        &self,
        nonce: Option<&str>,
        action: &str,
        session_id: &str,
        referer: Option<&str>,
        expected_page: &str,
    ) -> bool {
        let nonce_ok = nonce
            .map(|n| self.nonce.verify(n, action, session_id))
            .unwrap_or(false);
        let referer_ok = referer
            .and_then(|url| self.resolver.page_for_url(url))
            .map(|page| page == expected_page)
            .unwrap_or(false);
        nonce_ok && referer_ok
    }
}

/// Fresh one-time token: 32 random bytes, hex encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// =============================================================================
// Hidden-field emitters for page templates
// =============================================================================

/// Hidden input carrying the scoped nonce
pub fn nonce_field(nonce: &str) -> String {
    format!(r#"<input type="hidden" name="{NONCE_FIELD}" value="{nonce}">"#)
}

/// Hidden input carrying the one-time token
pub fn token_field(token: &str) -> String {
    format!(r#"<input type="hidden" name="{TOKEN_FIELD}" value="{token}">"#)
}

/// Empty hidden input the CAPTCHA client script fills in
pub fn captcha_field() -> String {
    format!(r#"<input type="hidden" name="{CAPTCHA_FIELD}" value="">"#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_round_trip() {
        let svc = NonceService::new("secret");
        let nonce = svc.create("formflow_confirm_contact", "sess1");
        assert!(svc.verify(&nonce, "formflow_confirm_contact", "sess1"));
    }

    #[test]
    fn test_nonce_scoping() {
        let svc = NonceService::new("secret");
        let nonce = svc.create("formflow_confirm_contact", "sess1");
        assert!(!svc.verify(&nonce, "formflow_send_contact", "sess1"));
        assert!(!svc.verify(&nonce, "formflow_confirm_contact", "sess2"));
        assert!(!svc.verify("", "formflow_confirm_contact", "sess1"));
    }

    #[test]
    fn test_token_is_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_resolver() {
        let resolver = PathPageResolver::new();
        resolver.bind("/contact/", "entry-page");

        assert_eq!(
            resolver.page_for_url("https://example.jp/contact/?draft=1"),
            Some("entry-page".to_string())
        );
        assert_eq!(resolver.page_for_url("https://example.jp/other/"), None);
    }

    #[test]
    fn test_dual_auth_requires_both() {
        let resolver = Arc::new(PathPageResolver::new());
        resolver.bind("/contact/", "entry-page");
        let auth = DualAuth::new(NonceService::new("secret"), resolver);

        let action = action_for("contact", "confirm");
        let nonce = auth.nonce().create(&action, "sess1");

        assert!(auth.verify(
            Some(&nonce),
            &action,
            "sess1",
            Some("https://example.jp/contact/"),
            "entry-page",
        ));
        // Missing referer
        assert!(!auth.verify(Some(&nonce), &action, "sess1", None, "entry-page"));
        // Referer resolves to a different page
        assert!(!auth.verify(
            Some(&nonce),
            &action,
            "sess1",
            Some("https://example.jp/contact/"),
            "confirm-page",
        ));
        // Missing nonce
        assert!(!auth.verify(
            None,
            &action,
            "sess1",
            Some("https://example.jp/contact/"),
            "entry-page",
        ));
    }

    #[test]
    fn test_hidden_field_emitters() {
        assert!(nonce_field("abc").contains(r#"name="formflow_nonce""#));
        assert!(token_field("t").contains(r#"value="t""#));
        assert!(captcha_field().contains(r#"value="""#));
    }
}
