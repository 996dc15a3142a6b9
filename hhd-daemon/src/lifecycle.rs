//! Ordered plugin hooks.
//!
//! Plugins are sorted once by ascending priority; ties keep discovery order.
//! `open` and `update` walk that order, `prepare` walks it backwards so
//! consumers stage before producers run. Every hook runs inside a
//! `plugin{tag=..}` span carrying the plugin's log tag.

use hhd_core::{Config, Context, Emitter, Plugin, PluginProvider, Settings};

use crate::error::DaemonError;

pub struct PluginManager {
    plugins: Vec<Box<dyn Plugin>>,
    opened: usize,
}

impl PluginManager {
    pub fn new(mut plugins: Vec<Box<dyn Plugin>>) -> Self {
        // `sort_by_key` is stable.
        plugins.sort_by_key(|p| p.priority());
        Self { plugins, opened: 0 }
    }

    /// Instantiate every plugin from the static registry.
    pub fn from_providers(providers: &[PluginProvider]) -> Self {
        Self::new(providers.iter().flat_map(|provide| provide()).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Names in update order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn settings(&self) -> Vec<Settings> {
        self.plugins.iter().map(|p| p.settings()).collect()
    }

    /// Open plugins in order, stopping at the first failure. Plugins opened
    /// before the failure stay open and are closed by [`Self::close_all`].
    pub fn open_all(&mut self, emit: &Emitter, ctx: &Context) -> Result<(), DaemonError> {
        while self.opened < self.plugins.len() {
            let plugin = &mut self.plugins[self.opened];
            let span = tracing::info_span!("plugin", tag = plugin.log_tag());
            let _enter = span.enter();

            tracing::debug!(plugin = plugin.name(), "opening");
            plugin
                .open(emit.clone(), ctx)
                .map_err(|source| DaemonError::PluginOpen {
                    plugin: plugin.name().to_owned(),
                    source,
                })?;
            self.opened += 1;
        }
        Ok(())
    }

    pub fn prepare_all(&mut self, conf: &Config) -> Result<(), DaemonError> {
        for plugin in self.plugins[..self.opened].iter_mut().rev() {
            let span = tracing::info_span!("plugin", tag = plugin.log_tag());
            let _enter = span.enter();

            plugin
                .prepare(conf)
                .map_err(|source| DaemonError::PluginRuntime {
                    plugin: plugin.name().to_owned(),
                    stage: "prepare",
                    source,
                })?;
        }
        Ok(())
    }

    pub fn update_all(&mut self, conf: &mut Config) -> Result<(), DaemonError> {
        for plugin in self.plugins[..self.opened].iter_mut() {
            let span = tracing::info_span!("plugin", tag = plugin.log_tag());
            let _enter = span.enter();

            plugin
                .update(conf)
                .map_err(|source| DaemonError::PluginRuntime {
                    plugin: plugin.name().to_owned(),
                    stage: "update",
                    source,
                })?;
        }
        Ok(())
    }

    /// Close every opened plugin in open order. Errors are logged, never
    /// propagated, so one faulty plugin cannot keep others open. Calling
    /// this again is a no-op.
    pub fn close_all(&mut self) {
        let opened = std::mem::take(&mut self.opened);
        for plugin in self.plugins[..opened].iter_mut() {
            let span = tracing::info_span!("plugin", tag = plugin.log_tag());
            let _enter = span.enter();

            if let Err(err) = plugin.close() {
                tracing::error!(plugin = plugin.name(), error = %err, "failed to close plugin");
            }
        }
    }
}
