//! Recording test doubles

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use empath_notify::{
    Event,
    crypto::CryptoEngine,
    decorator::{Decorator, DecoratorChain},
    error::{CryptoError, SendError},
    format::Formatter,
    mime::Message,
    sender::Sender,
};
use lettre::message::header::HeaderName;

/// One message as the sender saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub from: String,
    pub recipients: Vec<String>,
    pub message: String,
}

/// Keeps every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sender that refuses everything.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(
        &self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<(), SendError> {
        if self.fail {
            return Err(SendError::Rejected("550 mailbox unavailable".to_string()));
        }

        self.sent.lock().unwrap().push(Sent {
            from: from.to_string(),
            recipients: recipients.to_vec(),
            message: message.to_string(),
        });
        Ok(())
    }
}

/// A keyring with a fixed set of public keys, logging every operation.
#[derive(Debug, Default)]
pub struct FakeKeyring {
    keys: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeKeyring {
    pub fn with_keys(keys: &[(&str, &[&str])]) -> Arc<Self> {
        Self::build(keys, false)
    }

    /// Knows the keys, but every sign or encrypt fails.
    pub fn broken_with_keys(keys: &[(&str, &[&str])]) -> Arc<Self> {
        Self::build(keys, true)
    }

    fn build(keys: &[(&str, &[&str])], fail: bool) -> Arc<Self> {
        Arc::new(Self {
            keys: keys
                .iter()
                .map(|(address, ids)| {
                    (
                        (*address).to_string(),
                        ids.iter().map(|id| (*id).to_string()).collect(),
                    )
                })
                .collect(),
            calls: Mutex::default(),
            fail,
        })
    }

    fn record(&self, call: String) -> Result<(), CryptoError> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            return Err(CryptoError::Failed {
                status: "exit status: 2".to_string(),
                stderr: "gpg: no secret key".to_string(),
            });
        }
        Ok(())
    }

    /// `sign`, `encrypt KEY,KEY` or `sign_encrypt KEY,KEY`, in call order.
    /// Key lookups are not recorded.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CryptoEngine for FakeKeyring {
    async fn pubkey_ids(&self, address: &str) -> Result<Vec<String>, CryptoError> {
        Ok(self.keys.get(address).cloned().unwrap_or_default())
    }

    async fn sign(&self, text: &str, _private_key: Option<&str>) -> Result<String, CryptoError> {
        self.record("sign".to_string())?;
        Ok(format!("-----BEGIN PGP SIGNED MESSAGE-----\n{text}-----END PGP SIGNATURE-----\n"))
    }

    async fn encrypt(&self, _text: &str, key_ids: &[String]) -> Result<String, CryptoError> {
        self.record(format!("encrypt {}", key_ids.join(",")))?;
        Ok("-----BEGIN PGP MESSAGE-----\nencrypted\n-----END PGP MESSAGE-----\n".to_string())
    }

    async fn sign_encrypt(
        &self,
        _text: &str,
        key_ids: &[String],
        _private_key: Option<&str>,
    ) -> Result<String, CryptoError> {
        self.record(format!("sign_encrypt {}", key_ids.join(",")))?;
        Ok("-----BEGIN PGP MESSAGE-----\nsigned and encrypted\n-----END PGP MESSAGE-----\n".to_string())
    }
}

/// Renders `text/html` and `text/plain`, offering plain as the
/// alternative to html.
#[derive(Debug, Default)]
pub struct HtmlFormatter;

impl Formatter for HtmlFormatter {
    fn styles(&self, _transport: &str, _realm: &str) -> Vec<String> {
        vec!["text/html".to_string(), "text/plain".to_string()]
    }

    fn format(&self, _transport: &str, _realm: &str, style: &str, event: &Event) -> String {
        if style == "text/html" {
            format!("<p>{}</p>\n", event.summary)
        } else {
            format!("{}\n", event.summary)
        }
    }

    fn alternative_style_for(&self, _transport: &str, _realm: &str, style: &str) -> Option<String> {
        (style == "text/html").then(|| "text/plain".to_string())
    }
}

/// Adds its tag to the `X-Decorated` header, optionally stopping the chain.
#[derive(Debug)]
pub struct TaggingDecorator {
    pub tag: &'static str,
    pub stop: bool,
}

impl Decorator for TaggingDecorator {
    fn decorate_message(&self, event: &Event, message: &mut Message, next: DecoratorChain<'_>) {
        let tags = match message.header("X-Decorated") {
            Some(earlier) => format!("{earlier}, {}", self.tag),
            None => self.tag.to_string(),
        };
        message.set_header(HeaderName::new_from_ascii_str("X-Decorated"), &tags);
        if !self.stop {
            next.proceed(event, message);
        }
    }
}
