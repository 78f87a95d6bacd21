//! Field Validation
//!
//! Pure per-field constraint evaluation. Every applicable constraint runs
//! (no short-circuit) so a field can report multiple simultaneous errors.
//! Pattern and length constraints skip empty or non-scalar values; only
//! `Required` fires on absence.

use crate::antispam::{AntiSpamGateway, SpamReason};
use crate::form::{Constraint, FieldRule, FieldValue, PatternClass, SubmittedData};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

// =============================================================================
// Error messages
// =============================================================================

/// Human-readable error strings, overridable per deployment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Messages {
    pub required: String,
    /// `{n}` is replaced with the configured length
    pub min_length: String,
    pub max_length: String,
    pub tel: String,
    pub email: String,
    pub url: String,
    pub numeric: String,
    pub alpha: String,
    pub alphanumeric: String,
    pub katakana: String,
    pub hiragana: String,
    pub kana: String,
    pub date: String,
    /// Deliberately generic so valid candidates are not leaked
    pub matching_char: String,
    pub spam_blocked: String,
    pub spam_missing_keyword: String,
    pub spam_banned_keyword: String,
    pub spam_too_many_links: String,
    pub spam_not_enough_japanese: String,
    /// `{n}` is replaced with the size limit in bytes
    pub file_size: String,
    pub extension: String,
    pub delivery_failed: String,
    pub captcha_failed: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            required: "必須項目です".into(),
            min_length: "{n}文字以上で入力してください".into(),
            max_length: "{n}文字以内で入力してください".into(),
            tel: "電話番号の形式で入力してください".into(),
            email: "メールアドレスの形式で入力してください".into(),
            url: "URLの形式で入力してください".into(),
            numeric: "数字で入力してください".into(),
            alpha: "半角英字で入力してください".into(),
            alphanumeric: "半角英数字で入力してください".into(),
            katakana: "カタカナで入力してください".into(),
            hiragana: "ひらがなで入力してください".into(),
            kana: "かなで入力してください".into(),
            date: "日付の形式で入力してください".into(),
            matching_char: "不正な値が含まれています".into(),
            spam_blocked: "送信できませんでした".into(),
            spam_missing_keyword: "必要なキーワードが含まれていません".into(),
            spam_banned_keyword: "禁止されたキーワードが含まれています".into(),
            spam_too_many_links: "リンクが多すぎます".into(),
            spam_not_enough_japanese: "日本語の内容が不足しています".into(),
            file_size: "ファイルサイズは{n}バイト以内にしてください".into(),
            extension: "許可されていないファイル形式です".into(),
            delivery_failed: "送信に失敗しました。時間をおいて再度お試しください".into(),
            captcha_failed: "認証に失敗しました。もう一度送信してください".into(),
        }
    }
}

impl Messages {
    fn spam(&self, reason: SpamReason) -> String {
        match reason {
            SpamReason::MissingKeyword => self.spam_missing_keyword.clone(),
            SpamReason::BannedKeyword => self.spam_banned_keyword.clone(),
            SpamReason::TooManyLinks => self.spam_too_many_links.clone(),
            SpamReason::NotEnoughJapanese => self.spam_not_enough_japanese.clone(),
        }
    }
}

// =============================================================================
// Pattern grammars
// =============================================================================

static TEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9+\-() ]+$").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+(\.[a-zA-Z0-9-]+)+$").unwrap());
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[\w!?/+\-_~;.,*&@#$%()'\[\]=:]+$").unwrap());
static NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").unwrap());
static ALPHA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z]+$").unwrap());
static ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").unwrap());
static KATAKANA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ァ-ヶーｦ-ﾟ 　]+$").unwrap());
static HIRAGANA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ぁ-んー 　]+$").unwrap());
static KANA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ぁ-んァ-ヶーｦ-ﾟ 　]+$").unwrap());

/// Eight accepted date formats: half/full-width digits crossed with
/// `-` `/` `.` and `年月日` separators, each allowing an optional
/// parenthesized weekday suffix such as `(月)` or `（月）`.
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    let weekday = r"([(（][月火水木金土日][)）])?";
    let half = r"[0-9]";
    let full = r"[０-９]";
    let formats = [
        format!(r"{half}{{4}}-{half}{{1,2}}-{half}{{1,2}}"),
        format!(r"{half}{{4}}/{half}{{1,2}}/{half}{{1,2}}"),
        format!(r"{half}{{4}}\.{half}{{1,2}}\.{half}{{1,2}}"),
        format!(r"{half}{{4}}年{half}{{1,2}}月{half}{{1,2}}日"),
        format!(r"{full}{{4}}－{full}{{1,2}}－{full}{{1,2}}"),
        format!(r"{full}{{4}}／{full}{{1,2}}／{full}{{1,2}}"),
        format!(r"{full}{{4}}．{full}{{1,2}}．{full}{{1,2}}"),
        format!(r"{full}{{4}}年{full}{{1,2}}月{full}{{1,2}}日"),
    ];
    let pattern = format!(r"^({}){}$", formats.join("|"), weekday);
    Regex::new(&pattern).unwrap()
});

fn pattern_regex(class: PatternClass) -> &'static Regex {
    match class {
        PatternClass::Tel => &TEL,
        PatternClass::Email => &EMAIL,
        PatternClass::Url => &URL,
        PatternClass::Numeric => &NUMERIC,
        PatternClass::Alpha => &ALPHA,
        PatternClass::Alphanumeric => &ALNUM,
        PatternClass::Katakana => &KATAKANA,
        PatternClass::Hiragana => &HIRAGANA,
        PatternClass::Kana => &KANA,
        PatternClass::Date => &DATE,
    }
}

/// MIME types accepted for a given extension name
fn mime_types_for(extension: &str) -> &'static [&'static str] {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "webp" => &["image/webp"],
        "pdf" => &["application/pdf"],
        "zip" => &["application/zip", "application/x-zip-compressed"],
        "txt" => &["text/plain"],
        "csv" => &["text/csv"],
        "doc" => &["application/msword"],
        "docx" => {
            &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"]
        }
        "xls" => &["application/vnd.ms-excel"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "mp4" => &["video/mp4"],
        "mov" => &["video/quicktime"],
        _ => &[],
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Evaluates submitted values against configured field rules
pub struct Validator {
    messages: Messages,
    gateway: Arc<dyn AntiSpamGateway>,
}

impl Validator {
    pub fn new(messages: Messages, gateway: Arc<dyn AntiSpamGateway>) -> Self {
        Self { messages, gateway }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Run every constraint of one rule. Returns ordered error messages;
    /// empty means valid.
    pub async fn validate_field(
        &self,
        value: Option<&FieldValue>,
        rule: &FieldRule,
        remote_ip: Option<IpAddr>,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        let empty = value.map(|v| v.is_empty()).unwrap_or(true);
        let scalar = value.and_then(|v| v.as_text());

        for constraint in &rule.constraints {
            match constraint {
                Constraint::Required => {
                    if empty {
                        errors.push(self.messages.required.clone());
                    }
                }
                Constraint::MinLength(min) => {
                    if let Some(s) = scalar.filter(|s| !s.is_empty()) {
                        if s.chars().count() < *min {
                            errors.push(
                                self.messages.min_length.replace("{n}", &min.to_string()),
                            );
                        }
                    }
                }
                Constraint::MaxLength(max) => {
                    if let Some(s) = scalar.filter(|s| !s.is_empty()) {
                        if s.chars().count() > *max {
                            errors.push(
                                self.messages.max_length.replace("{n}", &max.to_string()),
                            );
                        }
                    }
                }
                Constraint::Pattern(class) => {
                    if let Some(s) = scalar.filter(|s| !s.is_empty()) {
                        if !pattern_regex(*class).is_match(s) {
                            errors.push(self.pattern_message(*class));
                        }
                    }
                }
                Constraint::MatchingChar(candidates) => {
                    if let Some(s) = scalar.filter(|s| !s.is_empty()) {
                        if !candidates.iter().any(|c| c == s) {
                            errors.push(self.messages.matching_char.clone());
                        }
                    }
                }
                Constraint::SpamFilter => {
                    if let Some(s) = scalar.filter(|s| !s.is_empty()) {
                        errors.extend(self.spam_check(s, remote_ip).await);
                    }
                }
                Constraint::FileSize(limit) => {
                    if let Some(FieldValue::Attachment(a)) = value {
                        if a.size_bytes > *limit {
                            errors.push(
                                self.messages.file_size.replace("{n}", &limit.to_string()),
                            );
                        }
                    }
                }
                Constraint::AllowedExtensions(extensions) => {
                    if let Some(FieldValue::Attachment(a)) = value {
                        let allowed = extensions
                            .iter()
                            .any(|ext| mime_types_for(ext).contains(&a.mime_type.as_str()));
                        if !allowed {
                            errors.push(self.messages.extension.clone());
                        }
                    }
                }
            }
        }

        errors
    }

    /// Validate a full payload. Only fields with errors appear in the map.
    pub async fn validate_all(
        &self,
        data: &SubmittedData,
        rules: &[FieldRule],
        remote_ip: Option<IpAddr>,
    ) -> HashMap<String, Vec<String>> {
        let mut out = HashMap::new();
        for rule in rules {
            let errors = self
                .validate_field(data.get(&rule.field), rule, remote_ip)
                .await;
            if !errors.is_empty() {
                out.entry(rule.field.clone())
                    .or_insert_with(Vec::new)
                    .extend(errors);
            }
        }
        out
    }

    async fn spam_check(&self, text: &str, remote_ip: Option<IpAddr>) -> Vec<String> {
        // IP reputation first; fails closed with a generic message.
        if let Some(ip) = remote_ip {
            if !self.gateway.check_ip(ip) {
                return vec![self.messages.spam_blocked.clone()];
            }
        }

        let verdict = self.gateway.check(text).await;
        match verdict.reason {
            Some(reason) if !verdict.valid => vec![self.messages.spam(reason)],
            _ => Vec::new(),
        }
    }

    fn pattern_message(&self, class: PatternClass) -> String {
        match class {
            PatternClass::Tel => self.messages.tel.clone(),
            PatternClass::Email => self.messages.email.clone(),
            PatternClass::Url => self.messages.url.clone(),
            PatternClass::Numeric => self.messages.numeric.clone(),
            PatternClass::Alpha => self.messages.alpha.clone(),
            PatternClass::Alphanumeric => self.messages.alphanumeric.clone(),
            PatternClass::Katakana => self.messages.katakana.clone(),
            PatternClass::Hiragana => self.messages.hiragana.clone(),
            PatternClass::Kana => self.messages.kana.clone(),
            PatternClass::Date => self.messages.date.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antispam::{KeywordGateway, NoopGateway};
    use crate::form::AttachmentRef;

    fn validator() -> Validator {
        Validator::new(Messages::default(), Arc::new(NoopGateway))
    }

    #[tokio::test]
    async fn test_required_only_on_empty_value() {
        // required + min + tel on an empty value reports exactly the
        // required error: pattern/length checks skip empty values.
        let rule = FieldRule::new("tel")
            .constraint(Constraint::Required)
            .constraint(Constraint::MinLength(5))
            .constraint(Constraint::Pattern(PatternClass::Tel));

        let errors = validator()
            .validate_field(Some(&FieldValue::text("")), &rule, None)
            .await;
        assert_eq!(errors, vec!["必須項目です".to_string()]);

        let errors = validator().validate_field(None, &rule, None).await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_constraints_do_not_short_circuit() {
        let rule = FieldRule::new("code")
            .constraint(Constraint::MinLength(5))
            .constraint(Constraint::Pattern(PatternClass::Numeric));

        let errors = validator()
            .validate_field(Some(&FieldValue::text("ab")), &rule, None)
            .await;
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn test_length_boundaries_inclusive() {
        let rule = FieldRule::new("name")
            .constraint(Constraint::MinLength(3))
            .constraint(Constraint::MaxLength(5));

        let v = validator();
        assert!(v
            .validate_field(Some(&FieldValue::text("abc")), &rule, None)
            .await
            .is_empty());
        assert!(v
            .validate_field(Some(&FieldValue::text("abcde")), &rule, None)
            .await
            .is_empty());
        assert!(!v
            .validate_field(Some(&FieldValue::text("ab")), &rule, None)
            .await
            .is_empty());
        assert!(!v
            .validate_field(Some(&FieldValue::text("abcdef")), &rule, None)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_length_counts_chars_not_bytes() {
        let rule = FieldRule::new("name").constraint(Constraint::MaxLength(3));
        let errors = validator()
            .validate_field(Some(&FieldValue::text("あいう")), &rule, None)
            .await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_email_pattern() {
        let rule = FieldRule::new("email").constraint(Constraint::Pattern(PatternClass::Email));
        let v = validator();
        assert!(v
            .validate_field(Some(&FieldValue::text("a.b+c@example.co.jp")), &rule, None)
            .await
            .is_empty());
        assert!(!v
            .validate_field(Some(&FieldValue::text("not-an-address")), &rule, None)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_kana_patterns() {
        let v = validator();
        let katakana =
            FieldRule::new("kana").constraint(Constraint::Pattern(PatternClass::Katakana));
        assert!(v
            .validate_field(Some(&FieldValue::text("ヤマダ　タロウ")), &katakana, None)
            .await
            .is_empty());
        assert!(!v
            .validate_field(Some(&FieldValue::text("やまだ")), &katakana, None)
            .await
            .is_empty());

        let hiragana =
            FieldRule::new("kana").constraint(Constraint::Pattern(PatternClass::Hiragana));
        assert!(v
            .validate_field(Some(&FieldValue::text("やまだ たろう")), &hiragana, None)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_date_formats() {
        let rule = FieldRule::new("date").constraint(Constraint::Pattern(PatternClass::Date));
        let v = validator();
        for ok in [
            "2024-1-5",
            "2024/01/05",
            "2024.1.5",
            "2024年1月5日",
            "２０２４年１月５日",
            "2024-01-05(金)",
            "2024年1月5日（金）",
        ] {
            assert!(
                v.validate_field(Some(&FieldValue::text(ok)), &rule, None)
                    .await
                    .is_empty(),
                "expected valid: {ok}"
            );
        }
        for bad in ["1月5日", "2024 01 05", "someday"] {
            assert!(
                !v.validate_field(Some(&FieldValue::text(bad)), &rule, None)
                    .await
                    .is_empty(),
                "expected invalid: {bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_matching_char_generic_message() {
        let rule = FieldRule::new("plan").constraint(Constraint::MatchingChar(vec![
            "basic".into(),
            "premium".into(),
        ]));
        let v = validator();
        assert!(v
            .validate_field(Some(&FieldValue::text("basic")), &rule, None)
            .await
            .is_empty());

        let errors = v
            .validate_field(Some(&FieldValue::text("enterprise")), &rule, None)
            .await;
        assert_eq!(errors, vec!["不正な値が含まれています".to_string()]);
    }

    #[tokio::test]
    async fn test_spam_filter_reason_message() {
        let gateway = Arc::new(KeywordGateway::new().ban_keyword("casino"));
        let v = Validator::new(Messages::default(), gateway);
        let rule = FieldRule::new("message").constraint(Constraint::SpamFilter);

        let errors = v
            .validate_field(Some(&FieldValue::text("casino bonus")), &rule, None)
            .await;
        assert_eq!(errors, vec!["禁止されたキーワードが含まれています".to_string()]);
    }

    #[tokio::test]
    async fn test_spam_ip_block_fails_closed() {
        let gateway = KeywordGateway::new();
        let ip: std::net::IpAddr = "203.0.113.9".parse().unwrap();
        gateway.deny_ip(ip);
        let v = Validator::new(Messages::default(), Arc::new(gateway));
        let rule = FieldRule::new("message").constraint(Constraint::SpamFilter);

        let errors = v
            .validate_field(Some(&FieldValue::text("こんにちは")), &rule, Some(ip))
            .await;
        assert_eq!(errors, vec!["送信できませんでした".to_string()]);
    }

    #[tokio::test]
    async fn test_attachment_constraints() {
        let attachment = FieldValue::Attachment(AttachmentRef {
            original_name: "photo.png".into(),
            mime_type: "image/png".into(),
            size_bytes: 2048,
            storage_ref: "uploads/p1".into(),
            preview_image: None,
        });

        let rule = FieldRule::new("photo")
            .constraint(Constraint::FileSize(1024))
            .constraint(Constraint::AllowedExtensions(vec!["jpg".into()]));
        let errors = validator()
            .validate_field(Some(&attachment), &rule, None)
            .await;
        assert_eq!(errors.len(), 2);

        let rule = FieldRule::new("photo")
            .constraint(Constraint::FileSize(4096))
            .constraint(Constraint::AllowedExtensions(vec!["png".into()]));
        assert!(validator()
            .validate_field(Some(&attachment), &rule, None)
            .await
            .is_empty());

        // Attachment constraints are no-ops for scalar values.
        let rule = FieldRule::new("photo").constraint(Constraint::FileSize(1));
        assert!(validator()
            .validate_field(Some(&FieldValue::text("hello")), &rule, None)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_validate_all_keys_by_field() {
        let rules = vec![
            FieldRule::new("email")
                .constraint(Constraint::Required)
                .constraint(Constraint::Pattern(PatternClass::Email)),
            FieldRule::new("name").constraint(Constraint::Required),
        ];
        let mut data = SubmittedData::new();
        data.insert("email".into(), FieldValue::text(""));
        data.insert("name".into(), FieldValue::text("山田"));

        let errors = validator().validate_all(&data, &rules, None).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["email"], vec!["必須項目です".to_string()]);
    }
}
