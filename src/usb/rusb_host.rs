//! libusb-backed host for desktop systems
//!
//! There is no interactive permission prompt on libusb: a device counts as
//! granted when it can be opened by the current user.

use rusb::{DeviceHandle, GlobalContext};
use std::time::Duration;
use tracing::{debug, warn};

use super::*;
use crate::error::Error;

pub type RusbDevice = rusb::Device<GlobalContext>;

#[derive(Debug, Default)]
pub struct RusbHost;

impl RusbHost {
    pub fn new() -> Self {
        Self
    }

    fn find(&self, id: &DeviceId) -> Result<RusbDevice> {
        rusb::devices()?
            .iter()
            .find(|device| &device_id(device) == id)
            .ok_or_else(|| Error::DeviceNotFound(id.clone()))
    }
}

/// `bus/address`, zero-padded like `lsusb` prints it
pub fn device_id(device: &RusbDevice) -> DeviceId {
    DeviceId::new(format!("{:03}/{:03}", device.bus_number(), device.address()))
}

fn describe_device(device: &RusbDevice) -> Result<DeviceDescriptor> {
    let desc = device.device_descriptor()?;
    let config = device.active_config_descriptor()?;

    let mut interfaces = Vec::new();
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            interfaces.push(InterfaceDescriptor {
                number: alt.interface_number(),
                class: alt.class_code(),
                subclass: alt.sub_class_code(),
                protocol: alt.protocol_code(),
                endpoints: alt
                    .endpoint_descriptors()
                    .map(|ep| EndpointDescriptor {
                        address: ep.address(),
                        direction: match ep.direction() {
                            rusb::Direction::In => Direction::In,
                            rusb::Direction::Out => Direction::Out,
                        },
                        transfer_type: match ep.transfer_type() {
                            rusb::TransferType::Control => TransferType::Control,
                            rusb::TransferType::Isochronous => TransferType::Isochronous,
                            rusb::TransferType::Bulk => TransferType::Bulk,
                            rusb::TransferType::Interrupt => TransferType::Interrupt,
                        },
                    })
                    .collect(),
            });
        }
    }

    Ok(DeviceDescriptor {
        id: device_id(device),
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        interfaces,
    })
}

impl UsbHost for RusbHost {
    type Device = RusbDevice;
    type Reader = RusbReader;

    fn list_devices(&self) -> Result<Vec<DeviceId>> {
        Ok(rusb::devices()?.iter().map(|d| device_id(&d)).collect())
    }

    fn describe(&self, id: &DeviceId) -> Result<DeviceDescriptor> {
        describe_device(&self.find(id)?)
    }

    fn request_permission(&self, id: &DeviceId) -> PermissionRequest<RusbDevice> {
        let result = match self.find(id) {
            Ok(device) => match device.open() {
                Ok(_) => PermissionResult::Granted(device),
                Err(e) => {
                    debug!("Cannot open {}: {}", id, e);
                    PermissionResult::Denied
                }
            },
            Err(e) => {
                debug!("Permission lookup for {} failed: {}", id, e);
                PermissionResult::Denied
            }
        };
        PermissionRequest::resolved(result)
    }

    fn open(
        &self,
        device: &AttachedDevice<RusbDevice>,
        interface: u8,
        endpoint: &EndpointDescriptor,
    ) -> Result<Option<RusbReader>> {
        let mut handle = match device.handle.open() {
            Ok(handle) => handle,
            Err(rusb::Error::Access | rusb::Error::Busy | rusb::Error::NoDevice) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Not supported on every platform
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable for {}: {}", device.id(), e);
        }

        match handle.claim_interface(interface) {
            Ok(()) => {}
            Err(rusb::Error::Access | rusb::Error::Busy | rusb::Error::NoDevice) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        Ok(Some(RusbReader {
            handle,
            interface,
            endpoint: endpoint.address,
        }))
    }
}

/// Claimed MIDI Streaming interface, released on drop
pub struct RusbReader {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    endpoint: u8,
}

impl BulkRead for RusbReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.read_bulk(self.endpoint, buf, timeout)?)
    }
}

impl Drop for RusbReader {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            // Expected after an unplug
            if e != rusb::Error::NoDevice {
                warn!("Failed to release interface {}: {}", self.interface, e);
            }
        }
    }
}
