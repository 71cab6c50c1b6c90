use std::{collections::BTreeMap, ffi::OsString, process::Command};

pub const WORKSPACE_BASE: &str = "WORKSPACE_BASE";
pub const WORKSPACE_MOUNT_PATH: &str = "WORKSPACE_MOUNT_PATH";
pub const STATE_PATH: &str = "OPENHANDS_STATE_PATH";
pub const RUN_AS_OPENHANDS: &str = "RUN_AS_OPENHANDS";

/// Environment changes handed to the wrapped command.
///
/// The bootstrapper never mutates its own environment; the overlay is applied to the
/// child's [`Command`] on top of the inherited variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    /// `Some` sets the variable, `None` removes it.
    vars: BTreeMap<String, Option<OsString>>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OsString>) -> &mut Self {
        self.vars.insert(key.into(), Some(value.into()));
        self
    }

    pub fn unset(&mut self, key: impl Into<String>) -> &mut Self {
        self.vars.insert(key.into(), None);
        self
    }

    /// The value the child will see, falling back to `inherited` when untouched.
    pub fn resolve(&self, key: &str, inherited: Option<&str>) -> Option<OsString> {
        match self.vars.get(key) {
            Some(value) => value.clone(),
            None => inherited.map(OsString::from),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.get(key).and_then(Option::as_ref)
    }

    pub fn is_unset(&self, key: &str) -> bool {
        matches!(self.vars.get(key), Some(None))
    }

    pub fn apply(&self, command: &mut Command) {
        for (key, value) in &self.vars {
            match value {
                Some(value) => command.env(key, value),
                None => command.env_remove(key),
            };
        }
    }
}
