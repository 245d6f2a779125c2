//! Message drafts built from `lettre`'s MIME parts.
//!
//! A [`Message`] is the header block plus the `multipart/related` body of one
//! notification. Decorators edit it through the `lettre` header map, and
//! [`Message::serialize`] turns it into the CRLF text handed to a sender.

use lettre::{
    Address,
    message::{
        Body, Mailbox, MultiPart, MultiPartKind, SinglePart,
        header::{self, ContentTransferEncoding, ContentType, HeaderName, HeaderValue, Headers},
    },
};
use sha2::{Digest, Sha256};

use crate::{
    config::BodyEncoding,
    error::{AssemblyError, ConfigError},
};

const fn transfer_encoding(encoding: BodyEncoding) -> ContentTransferEncoding {
    match encoding {
        BodyEncoding::Base64 => ContentTransferEncoding::Base64,
        BodyEncoding::QuotedPrintable => ContentTransferEncoding::QuotedPrintable,
        BodyEncoding::Unencoded => ContentTransferEncoding::SevenBit,
    }
}

/// A text part for `style`: `text/html` if the style mentions html, else
/// `text/plain`.
///
/// # Errors
///
/// Returns [`AssemblyError::NonAscii`] if `text` can't be sent with
/// `encoding`, i.e. non-ASCII text without a transfer encoding.
pub fn text_part(
    style: &str,
    text: &str,
    encoding: BodyEncoding,
) -> Result<SinglePart, AssemblyError> {
    let content_type = if style.contains("html") {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };

    let body = Body::new_with_encoding(normalize_line_endings(text), transfer_encoding(encoding))
        .map_err(|_| AssemblyError::NonAscii)?;

    Ok(SinglePart::builder().header(content_type).body(body))
}

/// The `multipart/related` body of a notification.
///
/// With an alternative, `primary` and `alternative` are wrapped in a
/// `multipart/alternative` part, primary last as the preferred rendering.
/// Boundaries are derived from the parts, so the same parts always produce
/// the same body.
#[must_use]
pub fn related_body(primary: SinglePart, alternative: Option<SinglePart>) -> MultiPart {
    let related = |children: &[Vec<u8>]| {
        MultiPart::builder()
            .kind(MultiPartKind::Related)
            .boundary(boundary_for(children))
    };

    match alternative {
        Some(alternative) => {
            let boundary = boundary_for(&[alternative.formatted(), primary.formatted()]);
            let parent = MultiPart::builder()
                .kind(MultiPartKind::Alternative)
                .boundary(boundary)
                .singlepart(alternative)
                .singlepart(primary);

            related(&[parent.formatted()]).multipart(parent)
        }
        None => related(&[primary.formatted()]).singlepart(primary),
    }
}

fn boundary_for(children: &[Vec<u8>]) -> String {
    let mut hasher = Sha256::new();
    for child in children {
        hasher.update(child);
    }

    let digest = hex::encode(hasher.finalize());
    format!("empath-notify-{}", &digest[..32])
}

/// Parse `address` into a mailbox shown as `name`.
///
/// # Errors
///
/// Returns an error if `address` is not a valid email address.
pub fn mailbox(field: &'static str, name: &str, address: &str) -> Result<Mailbox, ConfigError> {
    let email = address
        .parse::<Address>()
        .map_err(|source| ConfigError::InvalidAddress { field, source })?;
    let name = single_line(name);

    Ok(Mailbox::new((!name.is_empty()).then_some(name), email))
}

/// `value` with every line break folded into a single space.
///
/// Header values must not contain bare CR or LF: one would end the header
/// early, and an empty line would end the header block.
#[must_use]
pub fn single_line(value: &str) -> String {
    if !value.contains(['\r', '\n']) {
        return value.to_string();
    }

    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// One notification before serialisation.
#[derive(Debug, Clone)]
pub struct Message {
    headers: Headers,
    body: MultiPart,
}

impl Message {
    #[must_use]
    pub const fn new(headers: Headers, body: MultiPart) -> Self {
        Self { headers, body }
    }

    /// Typed access to the headers, e.g. `headers_mut().set(Subject::from(..))`.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The unencoded value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_raw(name)
    }

    /// Set header `name`, replacing any earlier value. Line breaks in
    /// `value` are folded into spaces.
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        self.headers
            .insert_raw(HeaderValue::new(name, single_line(value)));
    }

    /// The complete message, with CRLF line endings.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut headers = self.headers.clone();
        headers.set(header::MIME_VERSION_1_0);

        let mut out = headers.to_string().into_bytes();
        out.extend(self.body.formatted());

        normalize_line_endings(&String::from_utf8_lossy(&out))
    }
}
