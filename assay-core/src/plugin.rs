//! Isolation for pluggable code.
//!
//! Conditions, trigger predicates and aggregation metrics are supplied by the
//! embedding application. A misbehaving plugin must only affect its own
//! contribution, so every call into one goes through [`isolate`], which turns
//! both returned errors and panics into a [`PluginError`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::error::PluginError;

/// Run plugin code, catching panics.
pub(crate) fn isolate<T>(
    plugin: &str,
    f: impl FnOnce() -> Result<T, PluginError>,
) -> Result<T, PluginError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked {
            plugin: plugin.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Run infallible plugin code, catching panics.
pub(crate) fn isolate_infallible<T>(plugin: &str, f: impl FnOnce() -> T) -> Result<T, PluginError> {
    isolate(plugin, || Ok(f()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
