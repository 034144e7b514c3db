//! Core data model types: source records, parsed emails, and indexed documents.

pub mod mail;
pub mod record;
