//! `mailindex`: stream a CSV dump of RFC 822 emails into a SQLite FTS5 index and
//! search it with boolean, prefix, and typo-tolerant queries.
//!
//! The write path is [`parser::csv`] → [`parser::record`] → [`ingest`] →
//! [`index`]. The read path is [`search::query`] (fed by [`vocab`]) →
//! [`index`].

pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod search;
pub mod vocab;
