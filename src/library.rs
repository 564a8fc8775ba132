//! Catalog model and reader-facing suggestions.

pub mod book;
pub mod recommend;
