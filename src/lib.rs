//! rowgate - a policy-filtered query gateway for multi-tenant document stores
//!
//! Client queries are checked against an operator allow-list, their
//! `#...#` date literals coerced, and the result compiled behind the
//! caller's row-security predicates before it reaches the store.

pub mod auth;
pub mod cli;
pub mod config;
pub mod http_server;
pub mod query;
pub mod store;
pub mod value;
