//! The email distributor: classify, assemble, deliver.

use std::{fmt, sync::Arc};

use crate::{
    classify::RecipientClassifier,
    config::{EmailConfig, RecipientFilter},
    crypto::{CryptoEngine, GpgEngine},
    decorator::{Decorator, SubjectDecorator},
    delivery::{DeliveryChannel, DeliveryMode},
    error::{ConfigError, DistributeError},
    event::Event,
    format::{FormatCatalog, Formatter},
    internal,
    message::MessageAssembler,
    recipient::{Recipient, RecipientGroups},
    resolver::{
        AddressResolver, DefaultDomainResolver, ResolverChain, ResolverRegistry, SessionResolver,
        SpecifiedResolver,
    },
    sender::Sender,
    session::{MemorySessionStore, SessionStore},
};

/// The transport this distributor serves.
pub const TRANSPORT: &str = "email";

/// What one [`EmailDistributor::distribute`] call handed to delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub plain_messages: usize,
    pub encrypted_messages: usize,
    /// Envelope recipients of the plain messages.
    pub plain_recipients: usize,
    /// Envelope recipients of the encrypted messages.
    pub encrypted_recipients: usize,
}

impl DistributionReport {
    #[must_use]
    pub const fn messages(&self) -> usize {
        self.plain_messages + self.encrypted_messages
    }

    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.plain_recipients + self.encrypted_recipients
    }
}

/// Collects the collaborators of an [`EmailDistributor`].
///
/// The built-in resolvers (`specified`, `session`, `default_domain`) and the
/// [`SubjectDecorator`] are always available. A resolver registered under a
/// built-in name replaces it.
pub struct EmailDistributorBuilder {
    config: EmailConfig,
    formatters: Vec<Arc<dyn Formatter>>,
    resolvers: Vec<(String, Arc<dyn AddressResolver>)>,
    sessions: Option<Arc<dyn SessionStore>>,
    crypto: Option<Arc<dyn CryptoEngine>>,
    decorators: Vec<Arc<dyn Decorator>>,
    sender: Option<Arc<dyn Sender>>,
}

impl EmailDistributorBuilder {
    /// Add a formatter. Earlier formatters win styles both advertise.
    #[must_use]
    pub fn formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatters.push(formatter);
        self
    }

    /// Make `resolver` available to `email_address_resolvers` as `name`.
    #[must_use]
    pub fn resolver(mut self, name: impl Into<String>, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolvers.push((name.into(), resolver));
        self
    }

    /// Where per-user addresses and format preferences are stored.
    #[must_use]
    pub fn session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Use `crypto` instead of a [`GpgEngine`] built from the configuration.
    #[must_use]
    pub fn crypto_engine(mut self, crypto: Arc<dyn CryptoEngine>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Add a decorator. Decorators added later run earlier.
    #[must_use]
    pub fn decorator(mut self, decorator: Arc<dyn Decorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Use `sender` instead of the one named by `[sender]`.
    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// # Errors
    ///
    /// Returns an error if a recipient pattern or a sender address is invalid,
    /// or if `email_address_resolvers` names an unknown resolver.
    pub fn build(self) -> Result<EmailDistributor, ConfigError> {
        let config = self.config;

        let filter = config.recipient_filter().inspect_err(|err| {
            internal!(level = ERROR, "{}", err);
        })?;

        let sessions = self.sessions;
        let mut registry = ResolverRegistry::new();
        registry.register("specified", Arc::new(SpecifiedResolver));
        registry.register(
            "session",
            Arc::new(SessionResolver::new(sessions.clone().unwrap_or_else(|| {
                Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>
            }))),
        );
        registry.register(
            "default_domain",
            Arc::new(DefaultDomainResolver::new(config.default_domain.clone())),
        );
        for (name, resolver) in self.resolvers {
            registry.register(name, resolver);
        }

        let resolvers = registry
            .chain(&config.email_address_resolvers)
            .inspect_err(|err| {
                internal!(level = ERROR, "{}", err);
            })?;

        let crypto = self.crypto.or_else(|| {
            config.email_crypto.is_active().then(|| {
                Arc::new(GpgEngine::new(
                    config.gpg_binary.clone(),
                    config.gpg_home.clone(),
                )) as Arc<dyn CryptoEngine>
            })
        });

        let mut decorators = self.decorators;
        // Runs first, so other decorators see and may replace the subject.
        decorators.push(Arc::new(SubjectDecorator::new(config.subject_prefix())));

        let sender = self
            .sender
            .unwrap_or_else(|| config.sender.clone().into_sender());
        let delivery = DeliveryChannel::new(
            DeliveryMode::from_threaded(config.use_threaded_delivery),
            sender,
        );

        let assembler =
            MessageAssembler::new(&config, crypto.clone(), decorators).inspect_err(|err| {
                internal!(level = ERROR, "{}", err);
            })?;

        internal!(
            level = DEBUG,
            "Email distributor ready: resolvers {:?}, crypto '{}', {:?} delivery",
            resolvers,
            config.email_crypto,
            delivery.mode()
        );

        Ok(EmailDistributor {
            config,
            formatters: self.formatters,
            resolvers,
            sessions,
            filter,
            crypto,
            assembler,
            delivery,
        })
    }
}

/// Distributes events to email recipients.
pub struct EmailDistributor {
    config: EmailConfig,
    formatters: Vec<Arc<dyn Formatter>>,
    resolvers: ResolverChain,
    sessions: Option<Arc<dyn SessionStore>>,
    filter: RecipientFilter,
    crypto: Option<Arc<dyn CryptoEngine>>,
    assembler: MessageAssembler,
    delivery: DeliveryChannel,
}

impl EmailDistributor {
    pub const TRANSPORT: &'static str = TRANSPORT;

    #[must_use]
    pub fn builder(config: EmailConfig) -> EmailDistributorBuilder {
        EmailDistributorBuilder {
            config,
            formatters: Vec::new(),
            resolvers: Vec::new(),
            sessions: None,
            crypto: None,
            decorators: Vec::new(),
            sender: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EmailConfig {
        &self.config
    }

    /// The transports served; none while email is disabled.
    #[must_use]
    pub fn transports(&self) -> Vec<&'static str> {
        if self.config.email_enabled {
            vec![TRANSPORT]
        } else {
            Vec::new()
        }
    }

    /// The styles available for `transport` in `realm`.
    #[must_use]
    pub fn formats(&self, transport: &str, realm: &str) -> Vec<String> {
        FormatCatalog::build(transport, realm, &self.formatters)
            .styles()
            .map(str::to_string)
            .collect()
    }

    /// Send `event` to every recipient that can be served.
    ///
    /// Recipients without an address, or rejected by the configured
    /// patterns, or lacking a public key when encryption is required, are
    /// logged and skipped. Plain groups are sent before encrypted ones.
    ///
    /// # Errors
    ///
    /// Returns an error if no formatter supports the event's realm. If a
    /// group's message fails to assemble or deliver, the other groups are
    /// still attempted and the first failure is returned.
    pub async fn distribute(
        &self,
        transport: &str,
        recipients: &[Recipient],
        event: &Event,
    ) -> Result<DistributionReport, DistributeError> {
        if !self.config.email_enabled {
            internal!(level = DEBUG, "Email notifications are disabled");
            return Ok(DistributionReport::default());
        }

        if transport != TRANSPORT {
            internal!(level = DEBUG, "Transport '{}' is not handled here", transport);
            return Ok(DistributionReport::default());
        }

        let catalog = FormatCatalog::build(transport, &event.realm, &self.formatters);
        if catalog.is_empty() {
            return Err(ConfigError::NoFormatters {
                transport: transport.to_string(),
                realm: event.realm.clone(),
            }
            .into());
        }

        let classification = RecipientClassifier::new(
            &catalog,
            &self.resolvers,
            &self.filter,
            &self.config.default_email_format,
        )
        .with_sessions(self.sessions.as_deref())
        .with_crypto(self.config.email_crypto, self.crypto.as_deref())
        .classify(recipients)
        .await;

        let mut report = DistributionReport::default();
        let mut first_error = None;

        let (messages, addressed) = self
            .send_groups(event, &catalog, &classification.plain, None, &mut first_error)
            .await;
        report.plain_messages = messages;
        report.plain_recipients = addressed;

        let (messages, addressed) = self
            .send_groups(
                event,
                &catalog,
                &classification.encrypt,
                Some(classification.pubkey_ids.as_slice()),
                &mut first_error,
            )
            .await;
        report.encrypted_messages = messages;
        report.encrypted_recipients = addressed;

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Assemble and deliver one message per style. Returns the number of
    /// messages and of envelope recipients.
    async fn send_groups(
        &self,
        event: &Event,
        catalog: &FormatCatalog,
        groups: &RecipientGroups,
        pubkey_ids: Option<&[String]>,
        first_error: &mut Option<DistributeError>,
    ) -> (usize, usize) {
        let mut messages = 0;
        let mut addressed = 0;

        for (style, group) in groups {
            let Some(formatter) = catalog.get(style) else {
                continue;
            };

            internal!(
                level = DEBUG,
                "Sending event as '{}'{} to {} recipient(s)",
                style,
                if pubkey_ids.is_some() { " (encrypted)" } else { "" },
                group.len()
            );

            let outbound = match self
                .assembler
                .assemble(event, style, group, formatter.as_ref(), pubkey_ids)
                .await
            {
                Ok(Some(outbound)) => outbound,
                Ok(None) => continue,
                Err(err) => {
                    internal!(level = ERROR, "Unable to assemble '{}' message: {}", style, err);
                    first_error.get_or_insert(err.into());
                    continue;
                }
            };

            let count = outbound.recipients.len();
            match self.delivery.deliver(outbound).await {
                Ok(()) => {
                    messages += 1;
                    addressed += count;
                }
                Err(err) => {
                    internal!(level = ERROR, "Unable to deliver '{}' message: {}", style, err);
                    first_error.get_or_insert(err.into());
                }
            }
        }

        (messages, addressed)
    }
}

impl fmt::Debug for EmailDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailDistributor")
            .field("config", &self.config)
            .field("formatters", &self.formatters.len())
            .field("resolvers", &self.resolvers)
            .field("assembler", &self.assembler)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::BodyEncoding, format::TextFormatter, sender::LogSender};

    fn config() -> EmailConfig {
        EmailConfig {
            sender: crate::sender::SenderConfig::Log,
            ..EmailConfig::default()
        }
    }

    #[test]
    fn test_unknown_resolver_fails_build() {
        let err = EmailDistributor::builder(EmailConfig {
            email_address_resolvers: vec!["ldap".to_string()],
            ..config()
        })
        .build()
        .unwrap_err();

        assert!(matches!(err, ConfigError::UnknownResolver(name) if name == "ldap"));
    }

    #[test]
    fn test_invalid_pattern_fails_build() {
        let err = EmailDistributor::builder(EmailConfig {
            rcpt_allow_regexp: "(".to_string(),
            ..config()
        })
        .build()
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidPattern {
                field: "rcpt_allow_regexp",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_sender_address_fails_build() {
        let err = EmailDistributor::builder(EmailConfig {
            email_replyto: "replies at example.com".to_string(),
            ..config()
        })
        .build()
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidAddress {
                field: "email_replyto",
                ..
            }
        ));
    }

    #[test]
    fn test_transports_follow_enabled() {
        let enabled = EmailDistributor::builder(config()).build().unwrap();
        assert_eq!(enabled.transports(), [TRANSPORT]);

        let disabled = EmailDistributor::builder(EmailConfig {
            email_enabled: false,
            ..config()
        })
        .build()
        .unwrap();
        assert!(disabled.transports().is_empty());
    }

    #[test]
    fn test_formats() {
        let distributor = EmailDistributor::builder(config())
            .formatter(Arc::new(TextFormatter))
            .build()
            .unwrap();

        assert_eq!(distributor.formats(TRANSPORT, "ticket"), ["text/plain"]);
    }

    #[tokio::test]
    async fn test_no_formatters() {
        let distributor = EmailDistributor::builder(config())
            .sender(Arc::new(LogSender))
            .build()
            .unwrap();

        let err = distributor
            .distribute(
                TRANSPORT,
                &[Recipient::address("a@example.com")],
                &Event::new("ticket", "created", "#1"),
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_other_transport_is_ignored() {
        let distributor = EmailDistributor::builder(EmailConfig {
            mime_encoding: BodyEncoding::QuotedPrintable,
            ..config()
        })
        .formatter(Arc::new(TextFormatter))
        .build()
        .unwrap();

        let report = distributor
            .distribute(
                "xmpp",
                &[Recipient::address("a@example.com")],
                &Event::new("ticket", "created", "#1"),
            )
            .await
            .unwrap();
        assert_eq!(report, DistributionReport::default());
    }
}
