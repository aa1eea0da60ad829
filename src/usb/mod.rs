//! USB capability layer
//!
//! The host driver never talks to an OS USB stack directly. Everything it
//! needs (enumeration, descriptors, permission grants, bulk reads) goes through
//! [`UsbHost`] and [`BulkRead`], so backends and test doubles plug in the same way.

#[cfg(feature = "rusb")]
pub mod rusb_host;

#[cfg(test)]
pub(crate) mod testing;

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// USB interface class: Audio
pub const USB_CLASS_AUDIO: u8 = 0x01;
/// USB audio interface subclass: MIDI Streaming
pub const USB_SUBCLASS_MIDI_STREAMING: u8 = 0x03;

/// Identifier of an attached USB device, stable for one attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Endpoint transfer direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    pub fn is_midi_streaming(&self) -> bool {
        self.class == USB_CLASS_AUDIO && self.subclass == USB_SUBCLASS_MIDI_STREAMING
    }

    fn bulk_endpoint(&self, direction: Direction) -> Option<&EndpointDescriptor> {
        self.endpoints
            .iter()
            .find(|ep| ep.direction == direction && ep.transfer_type == TransferType::Bulk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl DeviceDescriptor {
    /// Whether the device exposes a class-compliant MIDI Streaming interface
    pub fn has_midi_interface(&self) -> bool {
        self.interfaces.iter().any(InterfaceDescriptor::is_midi_streaming)
    }

    /// Class-compliant MIDI, or accepted by one of the configured filters
    pub fn is_midi_device(&self, filters: &[DeviceFilter]) -> bool {
        self.has_midi_interface() || filters.iter().any(|f| f.matches(self))
    }
}

/// Accepts vendor-specific MIDI devices that do not advertise the MIDI Streaming subclass
///
/// Unset fields match anything. `class`/`subclass` match against the device's interfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subclass: Option<u8>,
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        self.vendor_id.map_or(true, |v| v == device.vendor_id)
            && self.product_id.map_or(true, |p| p == device.product_id)
            && device.interfaces.iter().any(|i| self.matches_interface(i))
    }

    fn matches_interface(&self, interface: &InterfaceDescriptor) -> bool {
        self.class.map_or(true, |c| c == interface.class)
            && self.subclass.map_or(true, |s| s == interface.subclass)
    }

    /// A filter with no field set would accept every device
    pub fn is_empty(&self) -> bool {
        self.vendor_id.is_none() && self.product_id.is_none() && self.class.is_none() && self.subclass.is_none()
    }
}

/// Locate the bulk endpoint carrying USB-MIDI packets in `direction`.
///
/// MIDI Streaming interfaces are preferred; interfaces of a filter-matched
/// device are searched next. Returns the interface number with the endpoint.
pub fn find_midi_endpoint(
    device: &DeviceDescriptor,
    direction: Direction,
    filters: &[DeviceFilter],
) -> Option<(u8, EndpointDescriptor)> {
    let class_compliant = device
        .interfaces
        .iter()
        .filter(|i| i.is_midi_streaming())
        .find_map(|i| i.bulk_endpoint(direction).map(|ep| (i.number, ep.clone())));
    if class_compliant.is_some() {
        return class_compliant;
    }

    filters
        .iter()
        .filter(|f| f.matches(device))
        .find_map(|f| {
            device
                .interfaces
                .iter()
                .filter(|i| f.matches_interface(i))
                .find_map(|i| i.bulk_endpoint(direction).map(|ep| (i.number, ep.clone())))
        })
}

/// Outcome of one permission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionResult<D> {
    Granted(D),
    Denied,
}

/// Pending answer to a permission request, resolved at most once
#[derive(Debug)]
pub struct PermissionRequest<D> {
    rx: Receiver<PermissionResult<D>>,
}

/// Answering side of a [`PermissionRequest`]
#[derive(Debug)]
pub struct PermissionResponder<D> {
    tx: Sender<PermissionResult<D>>,
}

/// Create a linked responder/request pair
pub fn permission_channel<D>() -> (PermissionResponder<D>, PermissionRequest<D>) {
    let (tx, rx) = channel::bounded(1);
    (PermissionResponder { tx }, PermissionRequest { rx })
}

impl<D> PermissionRequest<D> {
    /// A request the backend could answer on the spot
    pub fn resolved(result: PermissionResult<D>) -> Self {
        let (responder, request) = permission_channel();
        responder.respond(result);
        request
    }

    pub fn receiver(&self) -> &Receiver<PermissionResult<D>> {
        &self.rx
    }
}

impl<D> PermissionResponder<D> {
    pub fn grant(self, device: D) {
        self.respond(PermissionResult::Granted(device));
    }

    pub fn deny(self) {
        self.respond(PermissionResult::Denied);
    }

    fn respond(self, result: PermissionResult<D>) {
        // The requester may have given up already
        let _ = self.tx.try_send(result);
    }
}

/// Device whose permission grant succeeded
#[derive(Debug, Clone)]
pub struct AttachedDevice<D> {
    pub descriptor: DeviceDescriptor,
    pub handle: D,
}

impl<D> AttachedDevice<D> {
    pub fn id(&self) -> &DeviceId {
        &self.descriptor.id
    }
}

/// Byte source for one bulk-IN endpoint
///
/// Reads may return any number of bytes with no packet alignment.
/// `Err(Error::Timeout)` means no data arrived in time.
pub trait BulkRead: Send {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl BulkRead for Box<dyn BulkRead> {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }
}

/// OS USB stack as seen by the host driver
pub trait UsbHost: Send + Sync + 'static {
    /// Opaque handle handed out by a successful permission grant
    type Device: Clone + Send + Sync + 'static;
    type Reader: BulkRead + 'static;

    /// Identifiers of every currently attached device
    fn list_devices(&self) -> Result<Vec<DeviceId>>;

    fn describe(&self, id: &DeviceId) -> Result<DeviceDescriptor>;

    /// Ask for access to a device; the answer may arrive later or never
    fn request_permission(&self, id: &DeviceId) -> PermissionRequest<Self::Device>;

    /// Open a granted device for reading `endpoint` on `interface`.
    ///
    /// `Ok(None)` means the connection is unavailable.
    fn open(
        &self,
        device: &AttachedDevice<Self::Device>,
        interface: u8,
        endpoint: &EndpointDescriptor,
    ) -> Result<Option<Self::Reader>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(address: u8, direction: Direction) -> EndpointDescriptor {
        EndpointDescriptor { address, direction, transfer_type: TransferType::Bulk }
    }

    fn device(interfaces: Vec<InterfaceDescriptor>) -> DeviceDescriptor {
        DeviceDescriptor { id: DeviceId::new("001/002"), vendor_id: 0x0582, product_id: 0x0012, interfaces }
    }

    fn audio_control() -> InterfaceDescriptor {
        InterfaceDescriptor { number: 0, class: 1, subclass: 1, protocol: 0, endpoints: vec![] }
    }

    fn midi_streaming() -> InterfaceDescriptor {
        InterfaceDescriptor {
            number: 1,
            class: 1,
            subclass: 3,
            protocol: 0,
            endpoints: vec![bulk(0x02, Direction::Out), bulk(0x81, Direction::In)],
        }
    }

    fn vendor_specific() -> InterfaceDescriptor {
        InterfaceDescriptor {
            number: 2,
            class: 0xFF,
            subclass: 0,
            protocol: 0,
            endpoints: vec![bulk(0x83, Direction::In)],
        }
    }

    #[test]
    fn test_class_compliant_device() {
        let dev = device(vec![audio_control(), midi_streaming()]);
        assert!(dev.has_midi_interface());
        assert!(dev.is_midi_device(&[]));

        let (iface, ep) = find_midi_endpoint(&dev, Direction::In, &[]).unwrap();
        assert_eq!(iface, 1);
        assert_eq!(ep.address, 0x81);

        let (_, ep) = find_midi_endpoint(&dev, Direction::Out, &[]).unwrap();
        assert_eq!(ep.address, 0x02);
    }

    #[test]
    fn test_vendor_device_needs_filter() {
        let dev = device(vec![vendor_specific()]);
        assert!(!dev.is_midi_device(&[]));
        assert_eq!(find_midi_endpoint(&dev, Direction::In, &[]), None);

        let filter = DeviceFilter { vendor_id: Some(0x0582), class: Some(0xFF), ..Default::default() };
        assert!(dev.is_midi_device(&[filter.clone()]));

        let (iface, ep) = find_midi_endpoint(&dev, Direction::In, &[filter]).unwrap();
        assert_eq!(iface, 2);
        assert_eq!(ep.address, 0x83);
    }

    #[test]
    fn test_filter_mismatch() {
        let dev = device(vec![vendor_specific()]);
        let wrong_vendor = DeviceFilter { vendor_id: Some(0x1234), ..Default::default() };
        let wrong_product = DeviceFilter { vendor_id: Some(0x0582), product_id: Some(1), ..Default::default() };

        assert!(!wrong_vendor.matches(&dev));
        assert!(!wrong_product.matches(&dev));
        assert!(!dev.is_midi_device(&[wrong_vendor, wrong_product]));
    }

    #[test]
    fn test_non_bulk_endpoints_are_skipped() {
        let mut iface = midi_streaming();
        for ep in &mut iface.endpoints {
            ep.transfer_type = TransferType::Interrupt;
        }
        let dev = device(vec![iface]);

        assert!(dev.has_midi_interface());
        assert_eq!(find_midi_endpoint(&dev, Direction::In, &[]), None);
    }

    #[test]
    fn test_permission_channel_is_one_shot() {
        let (responder, request) = permission_channel::<u32>();
        responder.grant(7);

        assert_eq!(request.receiver().try_recv().unwrap(), PermissionResult::Granted(7));
        assert!(request.receiver().try_recv().is_err());
    }

    #[test]
    fn test_dropped_responder_disconnects() {
        let (responder, request) = permission_channel::<u32>();
        drop(responder);
        assert!(matches!(
            request.receiver().try_recv(),
            Err(crossbeam::channel::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_resolved_request() {
        let request = PermissionRequest::<u32>::resolved(PermissionResult::Denied);
        assert_eq!(request.receiver().try_recv().unwrap(), PermissionResult::Denied);
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::from("003/011");
        assert_eq!(id.to_string(), "003/011");
        assert_eq!(id.as_str(), "003/011");
    }
}
