//! Building the message one group of recipients receives.

use std::{collections::BTreeSet, fmt, sync::Arc};

use chrono::Utc;
use lettre::message::{
    Mailbox, Mailboxes,
    header::{self, HeaderName, HeaderValue, Headers},
};
use sha2::{Digest, Sha256};

use crate::{
    config::{BodyEncoding, EmailConfig, UNDISCLOSED_RECIPIENTS},
    crypto::{CryptoEngine, CryptoMode},
    decorator::{Decorator, DecoratorChain},
    distributor::TRANSPORT,
    error::{AssemblyError, ConfigError},
    event::Event,
    format::Formatter,
    internal,
    mime::{self, Message},
    recipient::Recipient,
};

/// A serialised message and its envelope, ready for a [`crate::sender::Sender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// The `From` header value.
    pub from: String,
    /// Every address the message goes to, visible or not.
    pub recipients: Vec<String>,
    /// The message, with CRLF line endings.
    pub message: String,
}

/// Turns a rendered event into a complete message for one recipient group.
pub struct MessageAssembler {
    from: Mailbox,
    reply_to: Option<Mailbox>,
    host: String,
    encoding: BodyEncoding,
    public_cc: bool,
    to: Option<String>,
    project_url: String,
    crypto_mode: CryptoMode,
    signing_key: Option<String>,
    crypto: Option<Arc<dyn CryptoEngine>>,
    decorators: Vec<Arc<dyn Decorator>>,
}

impl MessageAssembler {
    /// `decorators` run last to first.
    ///
    /// # Errors
    ///
    /// Returns an error if `email_from` or `email_replyto` is not a valid
    /// address.
    pub fn new(
        config: &EmailConfig,
        crypto: Option<Arc<dyn CryptoEngine>>,
        decorators: Vec<Arc<dyn Decorator>>,
    ) -> Result<Self, ConfigError> {
        let from = mime::mailbox("email_from", config.from_name(), &config.email_from)?;
        let reply_to = (!config.email_replyto.is_empty())
            .then(|| mime::mailbox("email_replyto", "", &config.email_replyto))
            .transpose()?;

        Ok(Self {
            from,
            reply_to,
            host: config.from_host().to_string(),
            encoding: config.mime_encoding,
            public_cc: config.use_public_cc,
            to: config.to_placeholder().map(mime::single_line),
            project_url: config.project_url.clone(),
            crypto_mode: config.email_crypto,
            signing_key: config.gpg_signing_key.clone(),
            crypto,
            decorators,
        })
    }

    /// The `From` header every message carries.
    #[must_use]
    pub fn from_header(&self) -> String {
        self.from.to_string()
    }

    /// Build the message `recipients` receive when the event is rendered as
    /// `style` by `formatter`.
    ///
    /// `pubkey_ids` is given for encrypt groups, and selects the keys the
    /// body is encrypted to. Returns `Ok(None)` when there is nobody to
    /// send to.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or encrypting fails, or if the body is not
    /// ASCII while no transfer encoding is configured.
    pub async fn assemble(
        &self,
        event: &Event,
        style: &str,
        recipients: &BTreeSet<Recipient>,
        formatter: &dyn Formatter,
        pubkey_ids: Option<&[String]>,
    ) -> Result<Option<OutboundMessage>, AssemblyError> {
        let mut addresses = recipients
            .iter()
            .filter_map(Recipient::resolved_address)
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut headers = Headers::new();
        headers.set(header::MessageId::from(self.message_id(&event.realm)));
        headers.set(header::Date::now());
        headers.set(header::From::from(Mailboxes::from(self.from.clone())));
        if let Some(reply_to) = &self.reply_to {
            headers.set(header::ReplyTo::from(Mailboxes::from(reply_to.clone())));
        }

        if self.public_cc {
            headers.insert_raw(HeaderValue::new(
                HeaderName::new_from_ascii_str("Cc"),
                addresses.join(", "),
            ));
        } else {
            let to = match &self.to {
                Some(to) => {
                    addresses.push(to.clone());
                    format!("\"{to}\"")
                }
                None => UNDISCLOSED_RECIPIENTS.to_string(),
            };
            headers.insert_raw(HeaderValue::new(HeaderName::new_from_ascii_str("To"), to));
        }

        if addresses.is_empty() {
            internal!(level = DEBUG, "No recipients for '{}', nothing to assemble", style);
            return Ok(None);
        }

        let realm = event.realm.as_str();
        let mut output = formatter.format(TRANSPORT, realm, style, event);
        let mut alternative = None;

        match (self.crypto_operation(pubkey_ids), &self.crypto) {
            (Some(operation), Some(engine)) => {
                let key = self.signing_key.as_deref();
                let key_ids = pubkey_ids.unwrap_or_default();
                output = match operation {
                    CryptoMode::Sign => engine.sign(&output, key).await?,
                    CryptoMode::Encrypt => engine.encrypt(&output, key_ids).await?,
                    CryptoMode::SignEncrypt => engine.sign_encrypt(&output, key_ids, key).await?,
                    CryptoMode::Off => output,
                };
                internal!(level = DEBUG, "Applied '{}' to the '{}' body", operation, style);
            }
            (Some(operation), None) => {
                internal!(
                    level = WARN,
                    "'{}' is configured without a crypto engine, sending '{}' as is",
                    operation,
                    style
                );
            }
            (None, _) => {
                alternative = formatter
                    .alternative_style_for(TRANSPORT, realm, style)
                    .filter(|alternative| !alternative.is_empty() && alternative != style)
                    .map(|alternative| {
                        let body = formatter.format(TRANSPORT, realm, &alternative, event);
                        mime::text_part(&alternative, &body, self.encoding)
                    })
                    .transpose()?;
            }
        }

        let primary = mime::text_part(style, &output, self.encoding)?;
        let mut message = Message::new(headers, mime::related_body(primary, alternative));

        DecoratorChain::new(&self.decorators).proceed(event, &mut message);

        internal!(
            level = DEBUG,
            "Assembled '{}' message for {}",
            style,
            addresses.join(", ")
        );

        Ok(Some(OutboundMessage {
            from: self.from_header(),
            recipients: addresses,
            message: message.serialize(),
        }))
    }

    /// Which crypto operation applies to a group with these key ids.
    ///
    /// Only encrypt groups carry key ids; every other group is sent as
    /// rendered, whatever the mode.
    fn crypto_operation(&self, pubkey_ids: Option<&[String]>) -> Option<CryptoMode> {
        let has_keys = pubkey_ids.is_some_and(|ids| !ids.is_empty());
        (self.crypto_mode.is_active() && has_keys).then_some(self.crypto_mode)
    }

    /// `<len.digest@host>`, unique per call.
    #[must_use]
    pub fn message_id(&self, realm: &str) -> String {
        let realm = realm.chars().filter(char::is_ascii).collect::<String>();
        let seed = format!(
            "{}.{}.{}.{}",
            self.project_url,
            Utc::now().timestamp_micros(),
            rand::random_range(0..32_000),
            realm
        );
        let digest = hex::encode(Sha256::digest(seed.as_bytes()));

        format!("<{:03}.{digest}@{}>", seed.len(), self.host)
    }
}

impl fmt::Debug for MessageAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageAssembler")
            .field("from", &self.from)
            .field("encoding", &self.encoding)
            .field("public_cc", &self.public_cc)
            .field("crypto_mode", &self.crypto_mode)
            .field("decorators", &self.decorators.len())
            .finish_non_exhaustive()
    }
}
