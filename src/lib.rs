//! USB MIDI host driver
//!
//! Decodes USB-MIDI event packets read from a device's bulk-IN endpoint into
//! MIDI events (with sysex reassembly and RPN/NRPN tracking), and watches the
//! USB bus for class-compliant MIDI devices coming and going.

pub mod config;
pub mod decoder;
pub mod error;
pub mod host;
pub mod input;
pub mod midi;
pub mod monitor;
pub mod usb;
pub mod watcher;

pub use config::HostConfig;
pub use decoder::rpn::ParameterNumberMode;
pub use decoder::{PacketDecoder, RpnMode};
pub use error::{Error, Result};
pub use host::{HostEventCallback, HostOptions, UsbMidiHost};
pub use input::{InputOptions, MidiInputDevice};
pub use midi::{EventCallback, MidiEvent, MidiEventListener};
pub use usb::{AttachedDevice, BulkRead, DeviceDescriptor, DeviceFilter, DeviceId, PermissionResult, UsbHost};
pub use watcher::{ConnectionWatcher, DeviceListener, WatcherOptions};
