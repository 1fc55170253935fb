//! Intel Guard Net Layer
//!
//! Everything that touches the network goes through here:
//! - HTTP client with the fixed identifying user agent and bounded timeouts
//! - Per-domain rate limiting
//! - Per-origin robots.txt cache and evaluator
//! - Guardrail policy composing allowlist, rate limit and robots checks
//! - Guarded fetch-and-clean of HTML pages
//! - RSS/Atom feed sources

pub mod client;
pub mod rate_limit;
pub mod robots;
pub mod guardrail;
pub mod fetcher;
pub mod feed;

pub use client::*;
pub use rate_limit::*;
pub use robots::*;
pub use guardrail::*;
pub use fetcher::*;
pub use feed::*;

pub use reqwest::Url;
