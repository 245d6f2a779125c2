//! Signing and encryption of message bodies.
//!
//! Only the operations the distributor needs are modelled: look up the public
//! keys for an address, sign, encrypt, and sign-then-encrypt. Key management
//! is left to the keystore behind the engine.

use std::{
    fmt::{self, Display},
    path::PathBuf,
    process::Stdio,
    str::FromStr,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    error::{ConfigError, CryptoError},
    internal,
};

/// Which crypto operation is applied to message bodies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum CryptoMode {
    #[default]
    Off,
    Sign,
    Encrypt,
    SignEncrypt,
}

impl CryptoMode {
    /// Returns `true` unless crypto is disabled.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns `true` if recipients need a public key to receive anything.
    #[must_use]
    pub const fn encrypts(self) -> bool {
        matches!(self, Self::Encrypt | Self::SignEncrypt)
    }
}

impl FromStr for CryptoMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value
            .split(',')
            .map(str::trim)
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();

        match normalised
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .as_slice()
        {
            [""] => Ok(Self::Off),
            ["sign"] => Ok(Self::Sign),
            ["encrypt"] => Ok(Self::Encrypt),
            ["sign", "encrypt"] => Ok(Self::SignEncrypt),
            _ => Err(ConfigError::InvalidCryptoMode(value.to_string())),
        }
    }
}

impl TryFrom<String> for CryptoMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for CryptoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "",
            Self::Sign => "sign",
            Self::Encrypt => "encrypt",
            Self::SignEncrypt => "sign,encrypt",
        })
    }
}

/// An external keystore able to sign and encrypt text.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Ids of the public keys with a user id matching `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore could not be queried.
    async fn pubkey_ids(&self, address: &str) -> Result<Vec<String>, CryptoError>;

    /// Sign `text`, with `private_key` or the keystore's default key.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    async fn sign(&self, text: &str, private_key: Option<&str>) -> Result<String, CryptoError>;

    /// Encrypt `text` to every key in `key_ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    async fn encrypt(&self, text: &str, key_ids: &[String]) -> Result<String, CryptoError>;

    /// Sign `text`, then encrypt the result to every key in `key_ids`.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails.
    async fn sign_encrypt(
        &self,
        text: &str,
        key_ids: &[String],
        private_key: Option<&str>,
    ) -> Result<String, CryptoError>;
}

/// [`CryptoEngine`] backed by the `gpg` command line tool.
#[derive(Debug, Clone)]
pub struct GpgEngine {
    binary: String,
    home: Option<PathBuf>,
}

impl GpgEngine {
    #[must_use]
    pub fn new(binary: impl Into<String>, home: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            home,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(home) = &self.home {
            command.arg("--homedir").arg(home);
        }
        command.args(["--batch", "--yes", "--no-tty"]);
        command
    }

    /// Run gpg with `input` on stdin and return its stdout.
    async fn run(mut command: Command, input: &str) -> Result<String, CryptoError> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Write stdin while collecting stdout, so a large body can't deadlock
        // against gpg filling its stdout pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(CryptoError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written?;

        Ok(String::from_utf8(output.stdout)?)
    }
}

#[async_trait]
impl CryptoEngine for GpgEngine {
    async fn pubkey_ids(&self, address: &str) -> Result<Vec<String>, CryptoError> {
        let output = self
            .command()
            .args(["--with-colons", "--list-keys", "--"])
            .arg(address)
            .stdin(Stdio::null())
            .output()
            .await?;

        // gpg exits non-zero when nothing matches.
        if !output.status.success() {
            internal!(
                "gpg found no public key for {}: {}",
                address,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(Vec::new());
        }

        Ok(parse_key_ids(&String::from_utf8(output.stdout)?))
    }

    async fn sign(&self, text: &str, private_key: Option<&str>) -> Result<String, CryptoError> {
        let mut command = self.command();
        command.args(["--armor", "--clearsign"]);
        if let Some(key) = private_key {
            command.args(["--local-user", key]);
        }

        Self::run(command, text).await
    }

    async fn encrypt(&self, text: &str, key_ids: &[String]) -> Result<String, CryptoError> {
        let mut command = self.command();
        command.args(["--armor", "--trust-model", "always", "--encrypt"]);
        for key in key_ids {
            command.args(["--recipient", key]);
        }

        Self::run(command, text).await
    }

    async fn sign_encrypt(
        &self,
        text: &str,
        key_ids: &[String],
        private_key: Option<&str>,
    ) -> Result<String, CryptoError> {
        let mut command = self.command();
        command.args(["--armor", "--trust-model", "always", "--sign", "--encrypt"]);
        if let Some(key) = private_key {
            command.args(["--local-user", key]);
        }
        for key in key_ids {
            command.args(["--recipient", key]);
        }

        Self::run(command, text).await
    }
}

/// Extract the key ids of the primary keys from `--with-colons` output.
fn parse_key_ids(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let record = fields.next()?;
            // validity is field 2; `r`evoked, `e`xpired, `d`isabled keys are useless.
            let validity = fields.next()?;
            let key_id = fields.nth(2)?;

            (record == "pub" && !matches!(validity, "r" | "e" | "d") && !key_id.is_empty())
                .then(|| key_id.to_string())
        })
        .collect()
}
