#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod crypto;
pub mod decorator;
pub mod delivery;
pub mod distributor;
pub mod error;
pub mod event;
pub mod format;
pub mod logging;
pub mod message;
pub mod mime;
pub mod recipient;
pub mod resolver;
pub mod sender;
pub mod session;

pub use config::{BodyEncoding, EmailConfig};
pub use crypto::CryptoMode;
pub use distributor::{DistributionReport, EmailDistributor, EmailDistributorBuilder, TRANSPORT};
pub use error::DistributeError;
pub use event::Event;
pub use recipient::Recipient;
pub use tracing;
