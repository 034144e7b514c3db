//! Parsed email, indexed document, and search hit types.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Non-fatal degradations observed while parsing one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseFlags {
    /// The header block was malformed or lacked both `From` and `Subject`.
    pub header_degraded: bool,
    /// No text-bearing part could be decoded; the body is best-effort raw text.
    pub body_fallback: bool,
}

impl ParseFlags {
    /// Pack the flags into the integer column stored by the index.
    pub fn bits(&self) -> i64 {
        (self.header_degraded as i64) | ((self.body_fallback as i64) << 1)
    }

    /// Inverse of [`ParseFlags::bits`].
    pub fn from_bits(bits: i64) -> Self {
        Self {
            header_degraded: bits & 1 != 0,
            body_fallback: bits & 2 != 0,
        }
    }
}

/// Structured headers and cleaned body derived from one source record.
///
/// Owned by the ingestion pipeline for the duration of a single record.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// Decoded subject line (empty when the header is missing).
    pub subject: String,

    /// Decoded `From:` value.
    pub sender: String,

    /// `To:` recipients in header order.
    pub recipients: Vec<String>,

    /// `Message-ID` header value, angle brackets included.
    pub message_id: String,

    /// Parsed `Date:` header; `None` when missing or unparseable.
    pub sent_at: Option<DateTime<Utc>>,

    /// Readable body text. HTML is stripped, attachments never appear here.
    pub body: String,

    pub flags: ParseFlags,
}

/// The searchable projection of a [`ParsedEmail`], as written to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    /// Identifier of the source record (unique per index).
    pub record_id: String,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// Recipients joined with `", "`.
    pub recipients: String,
    /// RFC 3339 timestamp, when the date header parsed.
    pub sent_at: Option<String>,
    pub body: String,
    pub flags: ParseFlags,
}

impl IndexedDocument {
    /// Project a parsed email into the form stored by the index.
    pub fn from_parsed(record_id: &str, email: ParsedEmail) -> Self {
        Self {
            record_id: record_id.to_string(),
            message_id: email.message_id,
            subject: email.subject,
            sender: email.sender,
            recipients: email.recipients.join(", "),
            sent_at: email.sent_at.map(|d| d.to_rfc3339()),
            body: email.body,
            flags: email.flags,
        }
    }
}

/// One ranked match returned by the index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record_id: String,
    pub subject: String,
    pub sender: String,
    pub sent_at: Option<String>,
    /// Body excerpt around the matched terms.
    pub excerpt: String,
    /// Full extracted body.
    pub body: String,
    /// Relevance score; higher is better.
    pub score: f64,
}

impl SearchHit {
    /// The first `max_chars` characters of the body, with `...` appended when cut.
    pub fn body_preview(&self, max_chars: usize) -> Cow<'_, str> {
        match self.body.char_indices().nth(max_chars) {
            Some((cut, _)) => Cow::Owned(format!("{}...", &self.body[..cut])),
            None => Cow::Borrowed(&self.body),
        }
    }
}
