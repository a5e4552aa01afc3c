//! Weave result cache: memoizes nested-query results by query source and
//! arguments, with optional JSON persistence.

pub mod key;
pub mod result;

pub use key::{CacheKey, KeyError};
pub use result::{CacheStats, ResultCache};
