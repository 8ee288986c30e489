//! Episode downloader for animepahe.
//!
//! Requests go through a shared [`rate_limit::Throttler`] and a retrying
//! [`http_client::HttpClient`]. Pages guarded by anti-bot challenges are
//! rendered in pooled browser sessions from [`browser`], whose cookies are
//! bridged back into the HTTP client. [`resolver`] turns a title into
//! file-host links, [`download`] fetches them, and [`orchestrator`] runs a
//! whole episode range serially or across parallel workers.

pub mod browser;
pub mod config;
pub mod download;
pub mod error;
pub mod http_client;
pub mod orchestrator;
pub mod random;
pub mod rate_limit;
pub mod resolver;

pub use error::{PaheError, Result};
