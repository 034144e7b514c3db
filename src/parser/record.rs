//! One [`RawRecord`] in, one [`ParsedEmail`] out.

use tracing::debug;

use crate::error::{MailIndexError, Result};
use crate::model::mail::{ParseFlags, ParsedEmail};
use crate::model::record::RawRecord;

use super::{header, mime};

/// Turns raw RFC 822 records into parsed emails.
///
/// Parsing performs no I/O; the only rejection is a record over the size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RecordParser {
    max_record_size: u64,
}

impl RecordParser {
    pub fn new(max_record_size: u64) -> Self {
        Self { max_record_size }
    }

    /// Parse one record. Malformed headers or bodies degrade, they never fail.
    pub fn parse(&self, record: &RawRecord) -> Result<ParsedEmail> {
        if record.raw_size > self.max_record_size {
            return Err(MailIndexError::RecordTooLarge {
                line: record.line,
                size: record.raw_size,
                limit: self.max_record_size,
            });
        }

        let (head, body_part) = header::split_message(&record.message);
        let fields = header::parse_header_block(head);

        let body = if head.is_empty() {
            // No header block: the whole message is readable text
            mime::BodyText {
                text: body_part.trim().to_string(),
                fallback: false,
            }
        } else {
            mime::extract_body(record.message.as_bytes())
        };

        if body.fallback {
            debug!(
                record = %record.id,
                line = record.line,
                "No text part decoded, using raw body"
            );
        }

        Ok(ParsedEmail {
            subject: fields.subject,
            sender: fields.sender,
            recipients: fields.recipients,
            message_id: fields.message_id,
            sent_at: fields.date,
            body: body.text,
            flags: ParseFlags {
                header_degraded: fields.degraded,
                body_fallback: body.fallback,
            },
        })
    }
}
