//! redi-core: Core types for the REDI diacritic restoration service
//!
//! This crate defines what the server caches and serves:
//! - [`Language`]: the fixed set of supported languages
//! - [`RediConfig`]: service configuration, loadable from JSON
//! - [`Lexicon`]: the per-language restoration model
//!
//! A lexicon is expensive to build (hundreds of MB for a full language), so
//! the server keeps one protected language resident and loads the rest on
//! demand. Everything about *when* a lexicon is resident lives in
//! `redi-server`; this crate only knows how to build and query one.

mod config;
mod error;
mod language;
mod lexicon;
mod tokenize;

pub use config::{RateLimitConfig, RediConfig, TierLimit, MODEL_FILE_PREFIX, SERVICE_VERSION};
pub use error::Error;
pub use language::Language;
pub use lexicon::{Candidates, Lexicon};
pub use tokenize::tokenize;

pub type Result<T> = std::result::Result<T, Error>;
