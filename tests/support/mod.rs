//! Test support for distribution tests
//!
//! Recording doubles for the distributor's collaborators, and helpers to
//! pick apart the messages they captured.

#![allow(dead_code, clippy::unwrap_used)]

pub mod doubles;

pub use doubles::{FakeKeyring, HtmlFormatter, RecordingSender, Sent, TaggingDecorator};

use empath_notify::{EmailConfig, sender::SenderConfig};

/// A configuration that never shells out.
pub fn config() -> EmailConfig {
    EmailConfig {
        sender: SenderConfig::Log,
        email_from: "trac@example.com".to_string(),
        email_replyto: "noreply@example.com".to_string(),
        project_name: "Tracker".to_string(),
        project_url: "https://tracker.example.com".to_string(),
        ..EmailConfig::default()
    }
}

/// Every line except the ones that change from call to call.
pub fn without_volatile_headers(message: &str) -> String {
    message
        .split("\r\n")
        .filter(|line| !line.starts_with("Message-ID:") && !line.starts_with("Date:"))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// MIME types of the leaf parts, depth first.
pub fn leaf_types(message: &str) -> Vec<String> {
    fn walk(part: &mailparse::ParsedMail<'_>, out: &mut Vec<String>) {
        if part.subparts.is_empty() {
            out.push(part.ctype.mimetype.clone());
        } else {
            for sub in &part.subparts {
                walk(sub, out);
            }
        }
    }

    let parsed = mailparse::parse_mail(message.as_bytes()).unwrap();
    let mut out = Vec::new();
    walk(&parsed, &mut out);
    out
}

/// Decoded bodies of the leaf parts, depth first.
pub fn leaf_bodies(message: &str) -> Vec<String> {
    fn walk(part: &mailparse::ParsedMail<'_>, out: &mut Vec<String>) {
        if part.subparts.is_empty() {
            out.push(part.get_body().unwrap());
        } else {
            for sub in &part.subparts {
                walk(sub, out);
            }
        }
    }

    let parsed = mailparse::parse_mail(message.as_bytes()).unwrap();
    let mut out = Vec::new();
    walk(&parsed, &mut out);
    out
}

/// The first value of `name` in the top level headers.
pub fn header(message: &str, name: &str) -> Option<String> {
    use mailparse::MailHeaderMap;

    mailparse::parse_mail(message.as_bytes())
        .unwrap()
        .headers
        .get_first_value(name)
}
