use std::{
    collections::{BTreeMap, BTreeSet, btree_map},
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};

/// A candidate recipient as handed over by the subscription system.
///
/// Either the session name or the address may be missing. A recipient
/// without an address is resolved through the configured resolvers, and
/// dropped if none of them know it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub name: Option<String>,
    /// `None` when it is unknown whether `name` is an authenticated session.
    pub authenticated: Option<bool>,
    pub address: Option<String>,
}

impl Recipient {
    /// A recipient known only by session name.
    #[must_use]
    pub fn session(name: impl Into<String>, authenticated: bool) -> Self {
        Self {
            name: Some(name.into()),
            authenticated: Some(authenticated),
            address: None,
        }
    }

    /// A recipient known only by address.
    #[must_use]
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            name: None,
            authenticated: None,
            address: Some(address.into()),
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// The session name, if there is a non-empty one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    /// The address, if there is a non-empty one.
    #[must_use]
    pub fn resolved_address(&self) -> Option<&str> {
        self.address.as_deref().filter(|address| !address.is_empty())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.unwrap_or(false)
    }
}

impl Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.authenticated {
            Some(true) => "authenticated",
            Some(false) => "not authenticated",
            None => "unknown",
        };

        match (self.name(), self.resolved_address()) {
            (Some(name), Some(address)) => write!(f, "{name} ({state}) <{address}>"),
            (Some(name), None) => write!(f, "{name} ({state})"),
            (None, Some(address)) => write!(f, "<{address}>"),
            (None, None) => f.write_str("<anonymous>"),
        }
    }
}

/// Recipients bucketed by the style they will receive.
///
/// Iteration is ordered by style, and by recipient within a style.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientGroups(BTreeMap<String, BTreeSet<Recipient>>);

impl RecipientGroups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `recipient` to the group for `style`.
    ///
    /// Returns `false` if it was already there.
    pub fn insert(&mut self, style: impl Into<String>, recipient: Recipient) -> bool {
        self.0.entry(style.into()).or_default().insert(recipient)
    }

    #[must_use]
    pub fn get(&self, style: &str) -> Option<&BTreeSet<Recipient>> {
        self.0.get(style)
    }

    /// Whether `recipient` is in any of the groups.
    #[must_use]
    pub fn contains(&self, recipient: &Recipient) -> bool {
        self.0.values().any(|group| group.contains(recipient))
    }

    /// Whether any group contains a recipient with this address.
    #[must_use]
    pub fn contains_address(&self, address: &str) -> bool {
        self.recipients()
            .any(|recipient| recipient.resolved_address() == Some(address))
    }

    pub fn styles(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BTreeSet<Recipient>> {
        self.0.iter()
    }

    /// Every recipient, across all styles.
    pub fn recipients(&self) -> impl Iterator<Item = &Recipient> {
        self.0.values().flatten()
    }

    /// Total number of recipients across all styles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

impl<'a> IntoIterator for &'a RecipientGroups {
    type Item = (&'a String, &'a BTreeSet<Recipient>);
    type IntoIter = btree_map::Iter<'a, String, BTreeSet<Recipient>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
