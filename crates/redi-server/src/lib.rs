//! redi-server: diacritic restoration HTTP service
//!
//! Keeps one lexicon per language in a lazily-loaded cache, with the
//! protected language pinned in memory, and rate-limits clients per
//! language tier.

pub mod cache;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod reclaim;
pub mod routes;
pub mod server;
pub mod state;

pub use cache::{CacheError, CacheStats, LanguageStats, LoadState, ModelCache, ModelLoader};
pub use error::ServerError;
pub use rate_limit::{RateLimiter, Tier};
pub use reclaim::Reclaimer;
pub use server::{RediServer, ServerBuilder};
pub use state::{create_shared_state, AppState, LexiconLoader, SharedState};
