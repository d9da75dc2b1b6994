//! Implementation modules for `cache`.
//!
//! `src/cache.rs` is the stable facade; the byte format, key derivation,
//! builder and read paths live here.

pub(crate) mod format;
pub(crate) mod keys;
pub(crate) mod maintain;
pub(crate) mod read;
pub(crate) mod write;
