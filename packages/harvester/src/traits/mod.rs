//! Core trait abstractions for the harvester library.
//!
//! The cache and the three external capabilities are injected as trait
//! objects so stages can be driven by real services or by the mocks in
//! [`crate::testing`].

pub mod ai;
pub mod cache;
pub mod crawler;
pub mod storage;
