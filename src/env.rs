//! Environment lookup.
//!
//! Everything that reads configuration from the environment goes through
//! [`EnvSource`], so tests can hand in a plain map instead of mutating the
//! process environment.

use std::collections::HashMap;

/// Image tag of the EventStoreDB container.
pub const EVENTSTORE_DOCKER_TAG_ENV: &str = "EVENTSTORE_DOCKER_TAG_ENV";
/// `"true"` runs the EventStoreDB container in secure mode.
pub const SECURE_ENV: &str = "SECURE";

pub trait EnvSource {
    /// `None` when the variable is unset.
    fn var(&self, key: &str) -> Option<String>;

    fn var_or(&self, key: &str, default: &str) -> String {
        self.var(key).unwrap_or_else(|| default.to_string())
    }
}

/// The environment of the current process. Values that are not valid
/// unicode count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}
