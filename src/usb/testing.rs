//! In-memory USB host for tests

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::*;
use crate::error::Error;

/// What the fake does with permission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    Grant,
    Deny,
    /// Keep the responder until the test resolves it
    Hold,
}

pub struct FakeUsbHost {
    attached: Mutex<Vec<DeviceDescriptor>>,
    policy: Mutex<PermissionPolicy>,
    held: Mutex<HashMap<DeviceId, PermissionResponder<DeviceId>>>,
    requests: Mutex<Vec<DeviceId>>,
    unavailable: Mutex<HashSet<DeviceId>>,
    streams: Mutex<HashMap<DeviceId, Receiver<Vec<u8>>>>,
    fail_listing: Mutex<bool>,
}

impl FakeUsbHost {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            attached: Mutex::new(Vec::new()),
            policy: Mutex::new(policy),
            held: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            unavailable: Mutex::new(HashSet::new()),
            streams: Mutex::new(HashMap::new()),
            fail_listing: Mutex::new(false),
        }
    }

    /// Replace the current enumeration snapshot
    pub fn set_attached(&self, devices: Vec<DeviceDescriptor>) {
        *self.attached.lock() = devices;
    }

    pub fn set_policy(&self, policy: PermissionPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn set_fail_listing(&self, fail: bool) {
        *self.fail_listing.lock() = fail;
    }

    /// Answer a held permission request; false if none is held for `id`
    pub fn resolve(&self, id: &DeviceId, grant: bool) -> bool {
        match self.held.lock().remove(id) {
            Some(responder) if grant => {
                responder.grant(id.clone());
                true
            }
            Some(responder) => {
                responder.deny();
                true
            }
            None => false,
        }
    }

    pub fn requests(&self) -> Vec<DeviceId> {
        self.requests.lock().clone()
    }

    pub fn mark_unavailable(&self, id: &DeviceId) {
        self.unavailable.lock().insert(id.clone());
    }

    /// Bytes sent on the returned channel come out of the device's bulk-IN reader
    pub fn stream(&self, id: &DeviceId) -> Sender<Vec<u8>> {
        let (tx, rx) = unbounded();
        self.streams.lock().insert(id.clone(), rx);
        tx
    }
}

impl UsbHost for FakeUsbHost {
    type Device = DeviceId;
    type Reader = FakeReader;

    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        if *self.fail_listing.lock() {
            return Err(Error::Usb("enumeration failed".to_string()));
        }
        Ok(self.attached.lock().iter().map(|d| d.id.clone()).collect())
    }

    fn describe(&self, id: &DeviceId) -> Result<DeviceDescriptor> {
        self.attached
            .lock()
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(id.clone()))
    }

    fn request_permission(&self, id: &DeviceId) -> PermissionRequest<DeviceId> {
        self.requests.lock().push(id.clone());
        let (responder, request) = permission_channel();
        match *self.policy.lock() {
            PermissionPolicy::Grant => responder.grant(id.clone()),
            PermissionPolicy::Deny => responder.deny(),
            PermissionPolicy::Hold => {
                self.held.lock().insert(id.clone(), responder);
            }
        }
        request
    }

    fn open(
        &self,
        device: &AttachedDevice<DeviceId>,
        _interface: u8,
        _endpoint: &EndpointDescriptor,
    ) -> Result<Option<FakeReader>> {
        if self.unavailable.lock().contains(device.id()) {
            return Ok(None);
        }
        let rx = self
            .streams
            .lock()
            .remove(device.id())
            .unwrap_or_else(|| unbounded().1);
        Ok(Some(FakeReader { rx }))
    }
}

pub struct FakeReader {
    rx: Receiver<Vec<u8>>,
}

impl BulkRead for FakeReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.rx.recv_timeout(timeout) {
            Ok(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }
}

/// Class-compliant MIDI device with a bulk IN endpoint
pub fn midi_device(id: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: DeviceId::new(id),
        vendor_id: 0x0582,
        product_id: 0x0012,
        interfaces: vec![InterfaceDescriptor {
            number: 1,
            class: USB_CLASS_AUDIO,
            subclass: USB_SUBCLASS_MIDI_STREAMING,
            protocol: 0,
            endpoints: vec![
                EndpointDescriptor { address: 0x81, direction: Direction::In, transfer_type: TransferType::Bulk },
                EndpointDescriptor { address: 0x02, direction: Direction::Out, transfer_type: TransferType::Bulk },
            ],
        }],
    }
}

/// Device without any MIDI interface (a keyboard, a hub...)
pub fn plain_device(id: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: DeviceId::new(id),
        vendor_id: 0x046D,
        product_id: 0xC31C,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            class: 0x03,
            subclass: 0x01,
            protocol: 0x01,
            endpoints: vec![EndpointDescriptor {
                address: 0x81,
                direction: Direction::In,
                transfer_type: TransferType::Interrupt,
            }],
        }],
    }
}
