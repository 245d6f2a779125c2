use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Something that happened and that subscribers should hear about.
///
/// Events are produced by the subscription system and only read here:
/// formatters render them, decorators derive headers from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The system the event comes from, e.g. `ticket` or `wiki`.
    pub realm: String,
    /// What happened, e.g. `created` or `changed`.
    pub category: String,
    /// What it happened to, e.g. a ticket number or page name.
    pub target: String,
    pub author: Option<String>,
    /// One line description, used for the subject.
    pub summary: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    #[must_use]
    pub fn new(
        realm: impl Into<String>,
        category: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            category: category.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}
