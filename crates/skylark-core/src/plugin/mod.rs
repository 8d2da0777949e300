//! Plugin runtime.
//!
//! A plugin is a fixed capability set ([`hooks::Plugin`]) with every hook
//! optional. The [`runtime::PluginRuntime`] keeps one slot per discovered
//! plugin, runs hooks in priority order with timeout and panic isolation, and
//! implements enable/disable/reload without leaving a slot unusable.

pub mod box_plugin;
pub mod context;
pub mod hooks;
pub mod runtime;

pub use box_plugin::BoxPlugin;
pub use context::{PluginContext, PluginServices};
pub use hooks::{HookOutcome, Plugin};
pub use runtime::{DiscoveredPlugin, PluginFactory, PluginRuntime, PluginSource};
