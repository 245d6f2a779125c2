use std::fmt::Write;

use super::Formatter;
use crate::event::Event;

const STYLE: &str = "text/plain";

/// Renders any event as plain text: the summary, then one line per field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn styles(&self, _transport: &str, _realm: &str) -> Vec<String> {
        vec![STYLE.to_string()]
    }

    fn format(&self, _transport: &str, _realm: &str, _style: &str, event: &Event) -> String {
        let mut body = String::new();

        if !event.summary.is_empty() {
            let _ = writeln!(body, "{}\n", event.summary);
        }

        let _ = writeln!(body, "{} {} {}", event.realm, event.target, event.category);
        if let Some(author) = &event.author {
            let _ = writeln!(body, "by {author}");
        }

        if !event.attributes.is_empty() {
            body.push('\n');
            let width = event.attributes.keys().map(String::len).max().unwrap_or(0);
            for (name, value) in &event.attributes {
                let _ = writeln!(body, "{name:>width$}: {value}");
            }
        }

        body
    }

    fn alternative_style_for(&self, _transport: &str, _realm: &str, style: &str) -> Option<String> {
        (style != STYLE).then(|| STYLE.to_string())
    }
}
