//! vidshrink - shrink videos for sharing
//!
//! This library crate exposes the configuration layer for integration testing.
//! The pipeline itself lives in `vidshrink-transcode`.

pub mod config;
