//! Statically declared plugin constructors.
//!
//! Device plugin crates expose a [`PluginProvider`]; listing it here is
//! what makes the daemon load it.

use hhd_core::PluginProvider;

pub const PROVIDERS: &[PluginProvider] = &[];

