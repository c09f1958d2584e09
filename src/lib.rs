//! Query client for the Kibana sample flights index.
//!
//! The crate builds Elasticsearch Query DSL bodies (`match_all`, `term`,
//! `match`, `range`, `bool`, aggregations, and sorting), sends them to a
//! cluster, and flattens the responses. It ships a CLI and an HTTP
//! daemon on top of the same pieces.

pub mod cli;
pub mod es;
pub mod models;
pub mod search;
pub mod server;
