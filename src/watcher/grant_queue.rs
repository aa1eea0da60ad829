//! FIFO of devices waiting for an OS permission grant
//!
//! At most one request is outstanding at any time.

use std::collections::VecDeque;

use crate::usb::DeviceId;

#[derive(Debug, Default)]
pub struct GrantQueue {
    waiting: VecDeque<DeviceId>,
    granting: Option<DeviceId>,
}

impl GrantQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a device; ignored if it is already waiting or being granted
    pub fn push(&mut self, id: DeviceId) {
        if !self.contains(&id) {
            self.waiting.push_back(id);
        }
    }

    /// Pop the next device and mark its request outstanding.
    ///
    /// Returns `None` while another request is outstanding.
    pub fn begin_next(&mut self) -> Option<DeviceId> {
        if self.granting.is_some() {
            return None;
        }
        let id = self.waiting.pop_front()?;
        self.granting = Some(id.clone());
        Some(id)
    }

    /// Clear the outstanding request if it belongs to `id`
    pub fn finish(&mut self, id: &DeviceId) -> bool {
        if self.granting.as_ref() == Some(id) {
            self.granting = None;
            true
        } else {
            false
        }
    }

    /// Forget `id`, whether it is waiting or outstanding
    pub fn cancel(&mut self, id: &DeviceId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|queued| queued != id);
        self.finish(id) || self.waiting.len() != before
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.granting.as_ref() == Some(id) || self.waiting.contains(id)
    }

    pub fn is_granting(&self) -> bool {
        self.granting.is_some()
    }

    pub fn outstanding(&self) -> Option<&DeviceId> {
        self.granting.as_ref()
    }

    /// Number of devices waiting behind the outstanding request
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
