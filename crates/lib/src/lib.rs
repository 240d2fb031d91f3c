//! depstrap-lib: build-configuration-time dependency resolution
//!
//! This crate decides, once per configuration pass, where a native library
//! comes from and what downstream targets are built from:
//! - `probe`: read-only search for an installed copy
//! - `fallback`: verified fetch and isolated source build when the probe misses
//! - `interface`: the single link handle hiding which path was taken
//! - `sources`: feature-gated compilation unit assembly
//! - `nested`: configure-then-build bootstrap of helper projects
//! - `orchestrate`: one full pass over a [`config::ProjectConfig`]

pub mod config;
pub mod consts;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod fetch;
pub mod graph;
pub mod interface;
pub mod ledger;
pub mod nested;
pub mod orchestrate;
pub mod placeholder;
pub mod platform;
pub mod probe;
pub mod process;
pub mod sources;
pub mod util;
