//! Record parsing: streaming CSV source, header decoding, and MIME body extraction.

pub mod csv;
pub mod header;
pub mod mime;
pub mod record;
