//! Transports that take a fully serialised message the rest of the way.

use std::{path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{error::SendError, outgoing};

/// Transmits a message to its recipients.
///
/// `from` is the `From` header value, possibly with a display name;
/// `message` is the complete message with CRLF line endings.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send `message` to every address in `recipients`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport did not accept the message. Failed
    /// sends are not retried.
    async fn send(&self, from: &str, recipients: &[String], message: &str)
    -> Result<(), SendError>;
}

/// Which [`Sender`] to build, as read from the `[sender]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum SenderConfig {
    /// Pipe messages to a sendmail compatible binary.
    Sendmail {
        #[serde(default = "default_sendmail_path")]
        path: PathBuf,
    },
    /// Log messages instead of sending them.
    Log,
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::Sendmail {
            path: default_sendmail_path(),
        }
    }
}

impl SenderConfig {
    #[must_use]
    pub fn into_sender(self) -> Arc<dyn Sender> {
        match self {
            Self::Sendmail { path } => Arc::new(SendmailSender::new(path)),
            Self::Log => Arc::new(LogSender),
        }
    }
}

/// The bare address of a `From` header value, for the envelope.
fn envelope_sender(from: &str) -> Result<String, SendError> {
    let invalid = || SendError::InvalidSender(from.to_string());
    let addresses = mailparse::addrparse(from).map_err(|_| invalid())?;

    match addresses.first() {
        Some(mailparse::MailAddr::Single(single)) => Ok(single.addr.clone()),
        _ => Err(invalid()),
    }
}

/// Hands messages to `sendmail -i -f <from> -- <recipients>`.
#[derive(Debug, Clone)]
pub struct SendmailSender {
    path: PathBuf,
}

impl SendmailSender {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Sender for SendmailSender {
    async fn send(
        &self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<(), SendError> {
        let envelope = envelope_sender(from)?;

        outgoing!(
            level = DEBUG,
            "Sending notification through {} to {}",
            self.path.display(),
            recipients.join(", ")
        );

        let mut child = Command::new(&self.path)
            .arg("-i")
            .arg("-f")
            .arg(&envelope)
            .arg("--")
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A sendmail that exits early is judged by its exit status.
            if let Err(err) = stdin.write_all(message.as_bytes()).await
                && err.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(err.into());
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SendError::Rejected(format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Logs each message at INFO instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(
        &self,
        from: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<(), SendError> {
        outgoing!(
            level = INFO,
            "Message from {} to {}:\n{}",
            from,
            recipients.join(", "),
            message
        );
        Ok(())
    }
}
