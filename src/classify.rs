//! Deciding who gets which message.

use std::fmt;

use crate::{
    config::RecipientFilter,
    crypto::{CryptoEngine, CryptoMode},
    distributor::TRANSPORT,
    format::FormatCatalog,
    internal,
    recipient::{Recipient, RecipientGroups},
    resolver::ResolverChain,
    session::SessionStore,
};

/// Recipients split by how their message is treated.
///
/// A recipient is in at most one of `plain` and `encrypt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub plain: RecipientGroups,
    pub encrypt: RecipientGroups,
    /// Keys of every encrypt recipient, in the order they were found.
    pub pubkey_ids: Vec<String>,
}

impl Classification {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.encrypt.is_empty()
    }
}

/// Picks a style, an address and a treatment for each recipient.
pub struct RecipientClassifier<'a> {
    catalog: &'a FormatCatalog,
    resolvers: &'a ResolverChain,
    filter: &'a RecipientFilter,
    default_format: &'a str,
    sessions: Option<&'a dyn SessionStore>,
    crypto_mode: CryptoMode,
    crypto: Option<&'a dyn CryptoEngine>,
}

impl<'a> RecipientClassifier<'a> {
    #[must_use]
    pub const fn new(
        catalog: &'a FormatCatalog,
        resolvers: &'a ResolverChain,
        filter: &'a RecipientFilter,
        default_format: &'a str,
    ) -> Self {
        Self {
            catalog,
            resolvers,
            filter,
            default_format,
            sessions: None,
            crypto_mode: CryptoMode::Off,
            crypto: None,
        }
    }

    /// Where stored format preferences are read from.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Option<&'a dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn with_crypto(
        mut self,
        mode: CryptoMode,
        crypto: Option<&'a dyn CryptoEngine>,
    ) -> Self {
        self.crypto_mode = mode;
        self.crypto = crypto;
        self
    }

    /// Classify every recipient. Recipients that cannot be served are
    /// logged and left out.
    pub async fn classify(&self, recipients: &[Recipient]) -> Classification {
        let mut classification = Classification::default();

        for recipient in recipients {
            self.classify_one(recipient, &mut classification).await;
        }

        classification
    }

    async fn classify_one(&self, recipient: &Recipient, classification: &mut Classification) {
        let Some(style) = self.style_for(recipient) else {
            return;
        };

        let Some(address) = self.address_for(recipient) else {
            internal!(
                level = DEBUG,
                "Unable to find an address for {}, dropping",
                recipient
            );
            return;
        };

        if !self.filter.is_allowed(&address) {
            internal!(
                level = DEBUG,
                "Dropped {} for not matching the allowed recipient pattern",
                address
            );
            return;
        }

        let resolved = Recipient {
            address: Some(address.clone()),
            ..recipient.clone()
        };
        if classification.plain.contains(&resolved) || classification.encrypt.contains(&resolved) {
            return;
        }

        let local = self.filter.is_local(&address);
        if local {
            internal!(level = DEBUG, "Expecting local delivery to {}", address);
        }

        if !self.crypto_mode.encrypts() || local {
            classification.plain.insert(style, resolved);
            return;
        }

        let Some(crypto) = self.crypto else {
            internal!(
                level = WARN,
                "Dropped {}, encryption is required but no crypto engine is configured",
                address
            );
            return;
        };

        match crypto.pubkey_ids(&address).await {
            Ok(ids) if !ids.is_empty() => {
                internal!(level = DEBUG, "Found public keys for {}: {}", address, ids.join(", "));
                for id in ids {
                    if !classification.pubkey_ids.contains(&id) {
                        classification.pubkey_ids.push(id);
                    }
                }
                classification.encrypt.insert(style, resolved);
            }
            Ok(_) => {
                internal!(
                    level = DEBUG,
                    "Dropped {}, no public key has a user id matching {}",
                    recipient,
                    address
                );
            }
            Err(err) => {
                internal!(
                    level = WARN,
                    "Dropped {}, looking up public keys for {} failed: {}",
                    recipient,
                    address,
                    err
                );
            }
        }
    }

    /// The recipient's preferred style, or one the catalog offers in its place.
    fn style_for(&self, recipient: &Recipient) -> Option<String> {
        let preferred = recipient
            .name()
            .and_then(|name| {
                self.sessions?.preferred_format(
                    self.catalog.realm(),
                    name,
                    recipient.is_authenticated(),
                    TRANSPORT,
                )
            })
            .filter(|style| !style.is_empty())
            .unwrap_or_else(|| self.default_format.to_string());

        if self.catalog.contains(&preferred) {
            return Some(preferred);
        }

        internal!(
            level = DEBUG,
            "Format {} not available for {} {}, looking for an alternative",
            preferred,
            TRANSPORT,
            self.catalog.realm()
        );

        let alternative = self.catalog.alternative_for(&preferred);
        if alternative.is_none() {
            internal!(
                level = DEBUG,
                "Unable to find a formatter for format {}, dropping {}",
                preferred,
                recipient
            );
        }
        alternative
    }

    fn address_for(&self, recipient: &Recipient) -> Option<String> {
        if let Some(address) = recipient.resolved_address() {
            return Some(address.to_string());
        }

        let name = recipient.name()?;
        let (address, resolver) = self.resolvers.resolve(name, recipient.is_authenticated())?;
        internal!(
            level = DEBUG,
            "Found the address '{}' for {} via: {}",
            address,
            recipient,
            resolver
        );

        Some(address)
    }
}

impl fmt::Debug for RecipientClassifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipientClassifier")
            .field("catalog", self.catalog)
            .field("resolvers", self.resolvers)
            .field("default_format", &self.default_format)
            .field("crypto_mode", &self.crypto_mode)
            .finish_non_exhaustive()
    }
}
