//! Enumeration snapshot diffing

use std::collections::HashSet;

use crate::usb::DeviceId;

/// Devices that appeared in, or vanished from, an enumeration snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnumerationDiff {
    pub appeared: Vec<DeviceId>,
    pub vanished: Vec<DeviceId>,
}

impl EnumerationDiff {
    /// Compare the devices believed present with a fresh snapshot.
    ///
    /// Both lists are sorted so that processing order is deterministic.
    pub fn between(known: &HashSet<DeviceId>, current: &HashSet<DeviceId>) -> Self {
        let mut appeared: Vec<DeviceId> = current.difference(known).cloned().collect();
        let mut vanished: Vec<DeviceId> = known.difference(current).cloned().collect();
        appeared.sort();
        vanished.sort();
        Self { appeared, vanished }
    }

    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.vanished.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<DeviceId> {
        ids.iter().map(|id| DeviceId::from(*id)).collect()
    }

    #[test]
    fn test_appeared_and_vanished() {
        let diff = EnumerationDiff::between(&set(&["a", "b"]), &set(&["b", "d", "c"]));

        assert_eq!(diff.appeared, vec![DeviceId::from("c"), DeviceId::from("d")]);
        assert_eq!(diff.vanished, vec![DeviceId::from("a")]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_identical_snapshots() {
        let diff = EnumerationDiff::between(&set(&["a"]), &set(&["a"]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_empty_to_empty() {
        assert!(EnumerationDiff::between(&set(&[]), &set(&[])).is_empty());
    }
}
