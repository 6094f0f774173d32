//! Forward emoji-tagged Slack messages into a Google Sheets tab, once each.
pub mod args;
pub mod auth;
pub mod cfg;
pub mod csv_sink;
pub mod enrich;
pub mod filter;
pub mod job;
pub mod model;
pub mod sheets;
pub mod slack;
pub mod state;
pub mod transform;
pub mod writer;
