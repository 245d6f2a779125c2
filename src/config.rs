//! Configuration for the email distributor.
//!
//! Every key is optional; a missing key takes the default listed on the
//! field. The file format is TOML:
//!
//! ```toml
//! email_from = "trac@example.com"
//! email_from_name = "Example Tracker"
//! mime_encoding = "qp"
//! email_crypto = "sign,encrypt"
//! gpg_home = "/var/lib/empath/gnupg"
//! rcpt_local_regexp = "@example\\.com$"
//!
//! [sender]
//! type = "sendmail"
//! path = "/usr/sbin/sendmail"
//! ```

use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
};

use regex::Regex;
use serde::Deserialize;

use crate::{crypto::CryptoMode, error::ConfigError, sender::SenderConfig};

/// Placeholder `To` header used when recipients are blind and no `email_to` is set.
pub const UNDISCLOSED_RECIPIENTS: &str = "undisclosed-recipients: ;";

fn default_resolvers() -> Vec<String> {
    vec![
        "specified".to_string(),
        "session".to_string(),
        "default_domain".to_string(),
    ]
}

fn default_address() -> String {
    "notifications@localhost".to_string()
}

fn default_format() -> String {
    "text/plain".to_string()
}

fn default_gpg_binary() -> String {
    "gpg".to_string()
}

fn default_project_name() -> String {
    "Empath".to_string()
}

/// How text bodies are encoded on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum BodyEncoding {
    #[default]
    Base64,
    QuotedPrintable,
    /// No transfer encoding; bodies must be plain ASCII.
    Unencoded,
}

impl BodyEncoding {
    /// Whether non-ASCII text can be carried at all.
    #[must_use]
    pub const fn is_ascii_only(self) -> bool {
        matches!(self, Self::Unencoded)
    }
}

impl FromStr for BodyEncoding {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "base64" => Ok(Self::Base64),
            "qp" | "quoted-printable" => Ok(Self::QuotedPrintable),
            "none" => Ok(Self::Unencoded),
            _ => Err(ConfigError::InvalidEncoding(value.to_string())),
        }
    }
}

impl TryFrom<String> for BodyEncoding {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for BodyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Unencoded => "none",
        })
    }
}

/// Settings for the `email` transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    /// Enable email notification.
    pub email_enabled: bool,

    /// Which [`crate::sender::Sender`] delivers assembled messages.
    pub sender: SenderConfig,

    /// Names of the address resolvers, in the order they are consulted.
    /// The first one to produce an address wins.
    pub email_address_resolvers: Vec<String>,

    /// Domain appended to bare user names by the `default_domain` resolver.
    pub default_domain: Option<String>,

    /// Sender address used in the envelope and `From` header.
    pub email_from: String,

    /// Sender name used in the `From` header; `project_name` when empty.
    pub email_from_name: String,

    /// `Reply-To` address.
    pub email_replyto: String,

    /// Transfer encoding for text bodies: `base64`, `qp`, or `none`.
    pub mime_encoding: BodyEncoding,

    /// Recipients can see each others addresses in a `Cc` header.
    ///
    /// Otherwise recipients are blind and `To` carries [`Self::email_to`].
    pub use_public_cc: bool,

    /// Default `To` header for blind delivery. When set, the address also
    /// receives every message.
    pub email_to: Option<String>,

    /// Text to prepend to the subject. Unset means `[project_name]`, an
    /// empty string disables the prefix.
    pub email_subject_prefix: Option<String>,

    /// Hand messages to a background worker instead of sending inline.
    pub use_threaded_delivery: bool,

    /// Rendering style used when a recipient has no stored preference.
    pub default_email_format: String,

    /// Only addresses matching this pattern receive anything. Empty allows all.
    pub rcpt_allow_regexp: String,

    /// Addresses matching this pattern are local and never encrypted to.
    /// Empty means no address is local.
    pub rcpt_local_regexp: String,

    /// Crypto applied to message bodies: `""`, `sign`, `encrypt`, or `sign,encrypt`.
    pub email_crypto: CryptoMode,

    /// GnuPG binary, either a name on `PATH` or a full path.
    pub gpg_binary: String,

    /// Directory containing the keyring files.
    pub gpg_home: Option<PathBuf>,

    /// Key id of the private key used for signing; gpg picks one when unset.
    pub gpg_signing_key: Option<String>,

    pub project_name: String,

    /// Seeds the generated `Message-ID`.
    pub project_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sender: SenderConfig::default(),
            email_address_resolvers: default_resolvers(),
            default_domain: None,
            email_from: default_address(),
            email_from_name: String::new(),
            email_replyto: default_address(),
            mime_encoding: BodyEncoding::default(),
            use_public_cc: false,
            email_to: None,
            email_subject_prefix: None,
            use_threaded_delivery: false,
            default_email_format: default_format(),
            rcpt_allow_regexp: String::new(),
            rcpt_local_regexp: String::new(),
            email_crypto: CryptoMode::default(),
            gpg_binary: default_gpg_binary(),
            gpg_home: None,
            gpg_signing_key: None,
            project_name: default_project_name(),
            project_url: String::new(),
        }
    }
}

impl EmailConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, has unknown keys, or
    /// names an unsupported encoding or crypto mode.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails to parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&content)
    }

    /// Compile the recipient allow/local patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if either pattern is not a valid regular expression.
    pub fn recipient_filter(&self) -> Result<RecipientFilter, ConfigError> {
        RecipientFilter::new(&self.rcpt_allow_regexp, &self.rcpt_local_regexp)
    }

    /// Name shown in the `From` header.
    #[must_use]
    pub fn from_name(&self) -> &str {
        if self.email_from_name.is_empty() {
            &self.project_name
        } else {
            &self.email_from_name
        }
    }

    /// The configured `To` placeholder, if there is a usable one.
    #[must_use]
    pub fn to_placeholder(&self) -> Option<&str> {
        self.email_to.as_deref().filter(|to| !to.is_empty())
    }

    /// The subject prefix to use, if any.
    #[must_use]
    pub fn subject_prefix(&self) -> Option<String> {
        match self.email_subject_prefix.as_deref() {
            None => Some(format!("[{}]", self.project_name)),
            Some("") => None,
            Some(prefix) => Some(prefix.to_string()),
        }
    }

    /// Host part of [`Self::email_from`], used for `Message-ID`.
    #[must_use]
    pub fn from_host(&self) -> &str {
        self.email_from
            .find('@')
            .map_or(self.email_from.as_str(), |at| &self.email_from[at + 1..])
    }
}

/// Compiled `rcpt_allow_regexp` / `rcpt_local_regexp`.
#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    allow: Option<Regex>,
    local: Option<Regex>,
}

impl RecipientFilter {
    /// Compile the two patterns; an empty pattern is treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-empty pattern fails to compile.
    pub fn new(allow: &str, local: &str) -> Result<Self, ConfigError> {
        let compile = |field, pattern: &str| {
            if pattern.is_empty() {
                Ok(None)
            } else {
                Regex::new(pattern)
                    .map(Some)
                    .map_err(|source| ConfigError::InvalidPattern { field, source })
            }
        };

        Ok(Self {
            allow: compile("rcpt_allow_regexp", allow)?,
            local: compile("rcpt_local_regexp", local)?,
        })
    }

    /// Whether `address` may receive notifications at all.
    #[must_use]
    pub fn is_allowed(&self, address: &str) -> bool {
        self.allow.as_ref().is_none_or(|re| re.is_match(address))
    }

    /// Whether `address` is exempt from encryption.
    #[must_use]
    pub fn is_local(&self, address: &str) -> bool {
        self.local.as_ref().is_some_and(|re| re.is_match(address))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = EmailConfig::from_toml_str("").unwrap();

        assert!(config.email_enabled);
        assert_eq!(config.mime_encoding, BodyEncoding::Base64);
        assert_eq!(config.email_crypto, CryptoMode::Off);
        assert_eq!(config.default_email_format, "text/plain");
        assert_eq!(
            config.email_address_resolvers,
            ["specified", "session", "default_domain"]
        );
        assert!(!config.use_public_cc);
        assert!(!config.use_threaded_delivery);
        assert_eq!(config.from_name(), "Empath");
        assert_eq!(config.from_host(), "localhost");
    }

    #[test]
    fn test_parse_full_document() {
        let config = EmailConfig::from_toml_str(
            r#"
            email_from = "tracker@example.com"
            email_from_name = "Tracker"
            mime_encoding = "QP"
            email_crypto = "sign,encrypt"
            gpg_signing_key = "DEADBEEF"
            use_public_cc = true
            email_to = "ops@example.com"
            email_address_resolvers = ["session"]

            [sender]
            type = "log"
            "#,
        )
        .unwrap();

        assert_eq!(config.mime_encoding, BodyEncoding::QuotedPrintable);
        assert_eq!(config.email_crypto, CryptoMode::SignEncrypt);
        assert_eq!(config.gpg_signing_key.as_deref(), Some("DEADBEEF"));
        assert_eq!(config.from_name(), "Tracker");
        assert_eq!(config.from_host(), "example.com");
        assert_eq!(config.to_placeholder(), Some("ops@example.com"));
        assert!(matches!(config.sender, SenderConfig::Log));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = EmailConfig::from_toml_str(include_str!("../empath-notify.toml")).unwrap();
        assert_eq!(config.sender, SenderConfig::Log);
        config.recipient_filter().unwrap();
    }

    #[test]
    fn test_invalid_encoding_is_rejected() {
        let err = EmailConfig::from_toml_str(r#"mime_encoding = "utf-7""#).unwrap_err();
        assert!(err.to_string().contains("Invalid email encoding setting: utf-7"));
    }

    #[test]
    fn test_invalid_crypto_mode_is_rejected() {
        let err = EmailConfig::from_toml_str(r#"email_crypto = "rot13""#).unwrap_err();
        assert!(err.to_string().contains("Invalid email crypto setting: rot13"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(EmailConfig::from_toml_str("smtp_server = \"localhost\"").is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project_name = \"Acme\"").unwrap();

        let config = EmailConfig::from_path(file.path()).unwrap();
        assert_eq!(config.project_name, "Acme");
        assert_eq!(config.subject_prefix().as_deref(), Some("[Acme]"));

        let err = EmailConfig::from_path("/nonexistent/empath-notify.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_subject_prefix() {
        let mut config = EmailConfig::default();
        assert_eq!(config.subject_prefix().as_deref(), Some("[Empath]"));

        config.email_subject_prefix = Some(String::new());
        assert_eq!(config.subject_prefix(), None);

        config.email_subject_prefix = Some("[ops]".to_string());
        assert_eq!(config.subject_prefix().as_deref(), Some("[ops]"));
    }

    #[test]
    fn test_to_placeholder_ignores_empty() {
        let mut config = EmailConfig::default();
        assert_eq!(config.to_placeholder(), None);

        config.email_to = Some(String::new());
        assert_eq!(config.to_placeholder(), None);
    }

    #[test]
    fn test_recipient_filter() {
        let filter = RecipientFilter::new(r"@example\.(com|org)$", r"@example\.org$").unwrap();

        assert!(filter.is_allowed("alice@example.com"));
        assert!(filter.is_allowed("bob@example.org"));
        assert!(!filter.is_allowed("eve@example.net"));

        assert!(filter.is_local("bob@example.org"));
        assert!(!filter.is_local("alice@example.com"));
    }

    #[test]
    fn test_empty_patterns_are_unset() {
        let filter = RecipientFilter::new("", "").unwrap();
        assert!(filter.is_allowed("anyone@anywhere.test"));
        assert!(!filter.is_local("anyone@anywhere.test"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RecipientFilter::new("(", "").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPattern {
                field: "rcpt_allow_regexp",
                ..
            }
        ));
    }
}
