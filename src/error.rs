//! Error types for notification distribution.
//!
//! Per-recipient problems (no address, rejected by a pattern, missing public
//! key) never show up here: they are logged and the recipient is dropped.
//! What remains are failures the caller has to know about.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors in the configuration, or in how the distributor was put together.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `mime_encoding` is not one of the supported schemes.
    #[error("Invalid email encoding setting: {0}")]
    InvalidEncoding(String),

    /// `email_crypto` is not one of the supported modes.
    #[error("Invalid email crypto setting: {0}")]
    InvalidCryptoMode(String),

    /// A recipient pattern failed to compile.
    #[error("Invalid pattern for {field}: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    /// A configured address is not a valid email address.
    #[error("Invalid address for {field}: {source}")]
    InvalidAddress {
        field: &'static str,
        #[source]
        source: lettre::address::AddressError,
    },

    /// `email_address_resolvers` names a resolver nobody registered.
    #[error("Unknown email address resolver: {0}")]
    UnknownResolver(String),

    /// No formatter advertises any style for this transport and realm.
    #[error("No formatters available for transport '{transport}' in realm '{realm}'")]
    NoFormatters { transport: String, realm: String },

    /// Failed to read a configuration file.
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML, or has invalid values.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors reported by a [`crate::crypto::CryptoEngine`].
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The external tool could not be started or talked to.
    #[error("I/O error running crypto engine: {0}")]
    Io(#[from] io::Error),

    /// The external tool ran but reported failure.
    #[error("Crypto engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The tool produced output that is not UTF-8.
    #[error("Crypto engine produced invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Errors building one group's message.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The body contains non-ASCII text while `mime_encoding` is `none`.
    #[error("Message contains non-ASCII chars. Please change encoding setting")]
    NonAscii,

    /// Signing or encrypting the body failed.
    #[error("Crypto operation failed: {0}")]
    Crypto(#[from] CryptoError),
}

/// Errors reported by a [`crate::sender::Sender`].
#[derive(Debug, Error)]
pub enum SendError {
    /// I/O error talking to the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport refused the message.
    #[error("Transport rejected message: {0}")]
    Rejected(String),

    /// The from address could not be turned into an envelope sender.
    #[error("Invalid sender address: {0}")]
    InvalidSender(String),
}

/// Errors handing a message to delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The sender failed (synchronous delivery only).
    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    /// The background worker could not be started.
    #[error("Delivery worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The background worker has gone away.
    #[error("Delivery queue closed")]
    QueueClosed,
}

/// Top-level error returned by [`crate::EmailDistributor::distribute`].
#[derive(Debug, Error)]
pub enum DistributeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

impl DistributeError {
    /// Returns `true` if nothing was sent because of how things are configured.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` if a rendered body could not be encoded as configured.
    #[must_use]
    pub const fn is_encoding(&self) -> bool {
        matches!(self, Self::Assembly(AssemblyError::NonAscii))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidEncoding("utf-7".to_string());
        assert_eq!(err.to_string(), "Invalid email encoding setting: utf-7");

        let err = ConfigError::NoFormatters {
            transport: "email".to_string(),
            realm: "ticket".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No formatters available for transport 'email' in realm 'ticket'"
        );
    }

    #[test]
    fn test_distribute_error_classification() {
        let err = DistributeError::from(AssemblyError::NonAscii);
        assert!(err.is_encoding());
        assert!(!err.is_configuration());

        let err = DistributeError::from(ConfigError::UnknownResolver("ldap".to_string()));
        assert!(err.is_configuration());
        assert!(!err.is_encoding());

        let err = DistributeError::from(DeliveryError::QueueClosed);
        assert!(!err.is_configuration());
        assert!(!err.is_encoding());
    }

    #[test]
    fn test_error_source_chain() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = ConfigError::Read {
            path: PathBuf::from("/etc/empath/empath-notify.toml"),
            source: io_err,
        };

        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "Failed to read config from /etc/empath/empath-notify.toml: no such file"
        );
    }

    #[test]
    fn test_send_error_through_delivery() {
        let err = DistributeError::from(DeliveryError::from(SendError::Rejected(
            "550 no such user".to_string(),
        )));
        assert_eq!(
            err.to_string(),
            "Delivery error: Send failed: Transport rejected message: 550 no such user"
        );
    }
}
