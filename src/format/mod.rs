//! Rendering events into message bodies.

mod text;

use std::{collections::BTreeMap, fmt, sync::Arc};

pub use text::TextFormatter;

use crate::{event::Event, internal};

/// Renders events as text in one or more styles.
pub trait Formatter: Send + Sync {
    /// The styles this formatter can produce for `transport` in `realm`.
    fn styles(&self, transport: &str, realm: &str) -> Vec<String>;

    /// Render `event` in `style`.
    fn format(&self, transport: &str, realm: &str, style: &str, event: &Event) -> String;

    /// A style to use in place of (or alongside) `style`, if this formatter
    /// has one.
    fn alternative_style_for(&self, transport: &str, realm: &str, style: &str) -> Option<String>;
}

/// The styles available for one transport and realm, and who renders them.
#[derive(Clone)]
pub struct FormatCatalog {
    transport: String,
    realm: String,
    styles: BTreeMap<String, Arc<dyn Formatter>>,
    /// Formatters that contributed at least one style, in registration order.
    formatters: Vec<Arc<dyn Formatter>>,
}

impl FormatCatalog {
    /// Ask every formatter which styles it supports.
    ///
    /// When two formatters advertise the same style, the one registered first
    /// keeps it.
    #[must_use]
    pub fn build(transport: &str, realm: &str, formatters: &[Arc<dyn Formatter>]) -> Self {
        let mut styles = BTreeMap::new();
        let mut contributing = Vec::new();

        for formatter in formatters {
            let mut contributed = false;
            for style in formatter.styles(transport, realm) {
                if !styles.contains_key(&style) {
                    styles.insert(style, Arc::clone(formatter));
                    contributed = true;
                }
            }
            if contributed {
                contributing.push(Arc::clone(formatter));
            }
        }

        let catalog = Self {
            transport: transport.to_string(),
            realm: realm.to_string(),
            styles,
            formatters: contributing,
        };

        if catalog.is_empty() {
            internal!(
                level = ERROR,
                "Unable to continue without formatters supporting '{}' of '{}'",
                transport,
                realm
            );
        } else {
            internal!(
                level = DEBUG,
                "Found formats capable of handling '{}' of '{}': {}",
                transport,
                realm,
                catalog.styles().collect::<Vec<_>>().join(", ")
            );
        }

        catalog
    }

    #[must_use]
    pub fn transport(&self) -> &str {
        &self.transport
    }

    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// The formatter rendering `style`.
    #[must_use]
    pub fn get(&self, style: &str) -> Option<&Arc<dyn Formatter>> {
        self.styles.get(style)
    }

    #[must_use]
    pub fn contains(&self, style: &str) -> bool {
        self.styles.contains_key(style)
    }

    pub fn styles(&self) -> impl Iterator<Item = &str> {
        self.styles.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    /// The first alternative to `style` offered by any formatter, provided
    /// this catalog can render it.
    #[must_use]
    pub fn alternative_for(&self, style: &str) -> Option<String> {
        self.formatters.iter().find_map(|formatter| {
            formatter
                .alternative_style_for(&self.transport, &self.realm, style)
                .filter(|alternative| !alternative.is_empty() && self.contains(alternative))
        })
    }
}

impl fmt::Debug for FormatCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatCatalog")
            .field("transport", &self.transport)
            .field("realm", &self.realm)
            .field("styles", &self.styles().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
