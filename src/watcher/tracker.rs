//! Attach/detach bookkeeping shared by the watch loop and permission results
//!
//! A device identifier is in at most one of {awaiting grant, granted, removed}.
//! Only granted devices ever produce a detach notification.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::differ::EnumerationDiff;
use super::grant_queue::GrantQueue;
use crate::usb::{AttachedDevice, DeviceDescriptor, DeviceFilter, DeviceId, PermissionResult};

/// Transition reported to the device listener
#[derive(Debug, Clone)]
pub enum DeviceNotification<D> {
    Attached(AttachedDevice<D>),
    Detached(DeviceId),
}

#[derive(Debug)]
pub struct ConnectionTracker<D> {
    connected: HashSet<DeviceId>,
    removed: HashSet<DeviceId>,
    granted: HashMap<DeviceId, AttachedDevice<D>>,
    awaiting: HashMap<DeviceId, DeviceDescriptor>,
    queue: GrantQueue,
    filters: Vec<DeviceFilter>,
}

impl<D: Clone> ConnectionTracker<D> {
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self {
            connected: HashSet::new(),
            removed: HashSet::new(),
            granted: HashMap::new(),
            awaiting: HashMap::new(),
            queue: GrantQueue::new(),
            filters,
        }
    }

    /// Diff a snapshot against the devices currently believed present
    pub fn diff(&self, snapshot: &HashSet<DeviceId>) -> EnumerationDiff {
        EnumerationDiff::between(&self.connected, snapshot)
    }

    /// Start tracking newly listed devices, returning the ones that still need describing.
    ///
    /// Devices already reported detached are never admitted again.
    pub fn claim(&mut self, appeared: &[DeviceId]) -> Vec<DeviceId> {
        let mut claimed = Vec::new();
        for id in appeared {
            if !self.removed.contains(id) && self.connected.insert(id.clone()) {
                claimed.push(id.clone());
            }
        }
        claimed
    }

    /// Queue a claimed device for permission if its descriptor marks it MIDI-capable
    pub fn enqueue(&mut self, id: &DeviceId, descriptor: Option<DeviceDescriptor>) {
        if !self.connected.contains(id) || self.queue.contains(id) || self.granted.contains_key(id) {
            return;
        }

        match descriptor {
            Some(descriptor) if descriptor.is_midi_device(&self.filters) => {
                debug!("MIDI device {} ({:04x}:{:04x}) queued for permission", id, descriptor.vendor_id, descriptor.product_id);
                self.awaiting.insert(id.clone(), descriptor);
                self.queue.push(id.clone());
            }
            Some(_) => debug!("Ignoring non-MIDI device {}", id),
            None => debug!("No descriptor for device {}, ignoring", id),
        }
    }

    /// Start the next permission request unless one is already outstanding
    pub fn begin_grant(&mut self) -> Option<DeviceId> {
        self.queue.begin_next()
    }

    /// Apply the answer to the outstanding permission request.
    ///
    /// Stale answers (device gone, or not the outstanding request) are ignored.
    pub fn complete_grant(&mut self, id: &DeviceId, result: PermissionResult<D>) -> Option<DeviceNotification<D>> {
        if !self.queue.finish(id) {
            debug!("Ignoring stale permission result for {}", id);
            return None;
        }
        let descriptor = self.awaiting.remove(id)?;

        match result {
            PermissionResult::Granted(handle) => {
                info!("Permission granted for {}", id);
                let device = AttachedDevice { descriptor, handle };
                self.granted.insert(id.clone(), device.clone());
                Some(DeviceNotification::Attached(device))
            }
            PermissionResult::Denied => {
                info!("Permission denied for {}", id);
                None
            }
        }
    }

    /// Move vanished devices to the removed set, reporting granted ones as detached
    pub fn retire(&mut self, vanished: &[DeviceId]) -> Vec<DeviceNotification<D>> {
        let mut notifications = Vec::new();

        for id in vanished {
            if !self.connected.contains(id) {
                continue;
            }
            self.removed.insert(id.clone());

            if self.granted.remove(id).is_some() {
                notifications.push(DeviceNotification::Detached(id.clone()));
            } else if self.queue.cancel(id) {
                self.awaiting.remove(id);
                debug!("Device {} vanished before permission was granted", id);
            }
        }

        let removed = &self.removed;
        self.connected.retain(|id| !removed.contains(id));
        notifications
    }

    /// Device with the outstanding permission request
    pub fn outstanding(&self) -> Option<&DeviceId> {
        self.queue.outstanding()
    }

    pub fn granted_devices(&self) -> Vec<AttachedDevice<D>> {
        let mut devices: Vec<_> = self.granted.values().cloned().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    pub fn is_granted(&self, id: &DeviceId) -> bool {
        self.granted.contains_key(id)
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.connected.contains(id)
    }

    pub fn is_removed(&self, id: &DeviceId) -> bool {
        self.removed.contains(id)
    }

    pub fn is_awaiting(&self, id: &DeviceId) -> bool {
        self.queue.contains(id)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
