use anyhow::{Context, Result};
use caps::{CapSet, CapsHashSet};

/// Represents the current state of process capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub effective: CapsHashSet,
    pub permitted: CapsHashSet,
    pub inheritable: CapsHashSet,
    pub bounding: CapsHashSet,
    pub ambient: CapsHashSet,
}

impl CapabilitySnapshot {
    /// Get the current snapshot of all capability sets
    pub fn current() -> Result<Self> {
        Ok(Self {
            effective: read_capability_set(CapSet::Effective)?,
            permitted: read_capability_set(CapSet::Permitted)?,
            inheritable: read_capability_set(CapSet::Inheritable)?,
            bounding: read_capability_set(CapSet::Bounding)?,
            ambient: read_capability_set(CapSet::Ambient)?,
        })
    }
}

impl std::fmt::Display for CapabilitySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capabilities - ")?;
        write!(f, "Effective: {}, ", self.effective.len())?;
        write!(f, "Permitted: {}, ", self.permitted.len())?;
        write!(f, "Inheritable: {}, ", self.inheritable.len())?;
        write!(f, "Bounding: {}, ", self.bounding.len())?;
        write!(f, "Ambient: {}", self.ambient.len())
    }
}

/// Logs the capability sets of the current thread at debug level.
#[macro_export]
macro_rules! trace_capability_snapshot {
    ($label:literal) => {{
        match $crate::capabilities::CapabilitySnapshot::current() {
            Ok(snapshot) => ::tracing::debug!(%snapshot, $label),
            Err(error) => ::tracing::debug!(?error, "capability snapshot unavailable"),
        }
    }};
}

fn read_capability_set(cap_set: CapSet) -> Result<CapsHashSet> {
    caps::read(None, cap_set).context(format!("Failed to read {:?} capability set", cap_set))
}

pub(crate) fn has_any_permitted_capabilities() -> Result<bool> {
    let capabilities = read_capability_set(CapSet::Permitted)?;
    Ok(!capabilities.is_empty())
}
