//! Hash collections used by the caches.
//!
//! Cache keys are small integers or short identity lists, so AHash is used
//! in place of SipHash everywhere.

pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};
