//! Source records and the schema that maps loosely-typed CSV rows onto them.

use crate::error::{MailIndexError, Result};

/// One schema-validated entry from the bulk source.
///
/// `id` and `message` are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Unique identifier of the record (e.g. the original maildir path).
    pub id: String,
    /// Raw RFC 822 message text: headers, blank line, body.
    pub message: String,
    /// 1-based source line where the row starts.
    pub line: u64,
    /// Serialized size of the row in bytes, excluding its line terminator.
    pub raw_size: u64,
}

/// Column positions of the required fields, resolved from the header row.
///
/// Extra columns are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    id_index: usize,
    message_index: usize,
}

impl RecordSchema {
    /// Resolve the id and message columns by name (case-insensitive).
    ///
    /// Fails when either column is absent: no row of such a source can be valid.
    pub fn from_header(header: &[String], id_column: &str, message_column: &str) -> Result<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };

        let id_index = find(id_column).ok_or_else(|| MailIndexError::SourceRowInvalid {
            line: 1,
            reason: format!("header has no '{id_column}' column"),
        })?;
        let message_index = find(message_column).ok_or_else(|| MailIndexError::SourceRowInvalid {
            line: 1,
            reason: format!("header has no '{message_column}' column"),
        })?;

        Ok(Self {
            id_index,
            message_index,
        })
    }

    /// Map one row onto a [`RawRecord`], taking ownership of the needed fields.
    pub fn validate(&self, line: u64, raw_size: u64, mut fields: Vec<String>) -> Result<RawRecord> {
        let invalid = |reason: &str| MailIndexError::SourceRowInvalid {
            line,
            reason: reason.to_string(),
        };

        if fields.len() <= self.id_index.max(self.message_index) {
            return Err(invalid("row has fewer columns than the header"));
        }

        let message = std::mem::take(&mut fields[self.message_index]);
        let id = std::mem::take(&mut fields[self.id_index]);
        let id = id.trim().to_string();

        if id.is_empty() {
            return Err(invalid("missing record identifier"));
        }
        if message.trim().is_empty() {
            return Err(invalid("empty message field"));
        }

        Ok(RawRecord {
            id,
            message,
            line,
            raw_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_schema_resolves_columns_in_any_order() {
        let schema =
            RecordSchema::from_header(&header(&["message", "extra", "File"]), "file", "message")
                .unwrap();
        let rec = schema
            .validate(
                2,
                20,
                header(&["Subject: hi\n\nbody", "ignored", "allen-p/1."]),
            )
            .unwrap();
        assert_eq!(rec.id, "allen-p/1.");
        assert!(rec.message.starts_with("Subject: hi"));
        assert_eq!(rec.line, 2);
    }

    #[test]
    fn test_schema_missing_column() {
        let err = RecordSchema::from_header(&header(&["file", "body"]), "file", "message");
        assert!(matches!(err, Err(MailIndexError::SourceRowInvalid { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let schema =
            RecordSchema::from_header(&header(&["file", "message"]), "file", "message").unwrap();
        let err = schema.validate(3, 10, header(&["  ", "Subject: x\n\ny"]));
        assert!(matches!(
            err,
            Err(MailIndexError::SourceRowInvalid { line: 3, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_message() {
        let schema =
            RecordSchema::from_header(&header(&["file", "message"]), "file", "message").unwrap();
        assert!(schema.validate(4, 5, header(&["a/1.", "   "])).is_err());
    }

    #[test]
    fn test_validate_rejects_short_row() {
        let schema =
            RecordSchema::from_header(&header(&["file", "message"]), "file", "message").unwrap();
        assert!(schema.validate(5, 4, header(&["a/1."])).is_err());
    }
}
