//! USB MIDI host driver
//!
//! Ties the connection watcher to per-device input readers: every granted
//! device gets its MIDI IN endpoint opened and decoded, and loses it again on
//! detach. Decoded events are delivered together with the device they came from.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::decoder::rpn::ParameterNumberMode;
use crate::decoder::PacketDecoder;
use crate::error::{Error, Result};
use crate::input::{InputOptions, MidiInputDevice};
use crate::midi::MidiEvent;
use crate::usb::{find_midi_endpoint, AttachedDevice, DeviceFilter, DeviceId, Direction, UsbHost};
use crate::watcher::{ConnectionWatcher, DeviceListener, WatcherOptions};

/// Receives every decoded event with the device it arrived from
pub type HostEventCallback = Arc<dyn Fn(&DeviceId, MidiEvent) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    pub watcher: WatcherOptions,
    pub input: InputOptions,
    pub parameter_mode: ParameterNumberMode,
}

/// Opens and closes input readers as devices come and go
struct InputManager<H: UsbHost> {
    host: Arc<H>,
    filters: Vec<DeviceFilter>,
    input_options: InputOptions,
    parameter_mode: ParameterNumberMode,
    on_event: HostEventCallback,
    devices: Mutex<HashMap<DeviceId, MidiInputDevice>>,
    listener: Option<Arc<dyn DeviceListener<H::Device>>>,
}

impl<H: UsbHost> InputManager<H> {
    fn connect(&self, device: &AttachedDevice<H::Device>) -> Result<Option<MidiInputDevice>> {
        let id = device.id().clone();
        let (interface, endpoint) = find_midi_endpoint(&device.descriptor, Direction::In, &self.filters)
            .ok_or_else(|| Error::NoMidiEndpoint(id.clone()))?;

        debug!("Opening {} interface {} endpoint 0x{:02X}", id, interface, endpoint.address);
        let Some(reader) = self.host.open(device, interface, &endpoint)? else {
            return Ok(None);
        };

        let on_event = self.on_event.clone();
        let source = id.clone();
        let decoder = PacketDecoder::with_parameter_mode(
            Arc::new(move |event: MidiEvent| on_event(&source, event)),
            self.parameter_mode,
        );

        MidiInputDevice::start(id, reader, decoder, self.input_options.clone()).map(Some)
    }

    fn close_all(&self) {
        let devices: Vec<MidiInputDevice> = self.devices.lock().drain().map(|(_, d)| d).collect();
        for device in devices {
            device.stop();
        }
    }
}

impl<H: UsbHost> DeviceListener<H::Device> for InputManager<H> {
    fn on_device_attached(&self, device: AttachedDevice<H::Device>) {
        let input = match self.connect(&device) {
            Ok(Some(input)) => input,
            Ok(None) => {
                debug!("Connection to {} unavailable, attach dropped", device.id());
                return;
            }
            Err(e) => {
                warn!("Cannot read MIDI from {}: {}", device.id(), e);
                return;
            }
        };

        info!("Receiving MIDI from {}", device.id());
        let previous = self.devices.lock().insert(device.id().clone(), input);
        if let Some(previous) = previous {
            previous.stop();
        }

        if let Some(listener) = &self.listener {
            listener.on_device_attached(device);
        }
    }

    fn on_device_detached(&self, id: &DeviceId) {
        // Entries outlive a finished reader, so only reported attaches are in here
        let Some(input) = self.devices.lock().remove(id) else {
            debug!("{} detached without an open input", id);
            return;
        };
        input.stop();

        if let Some(listener) = &self.listener {
            listener.on_device_detached(id);
        }
    }
}

/// Running host driver
pub struct UsbMidiHost<H: UsbHost> {
    inputs: Arc<InputManager<H>>,
    watcher: Option<ConnectionWatcher<H>>,
}

impl<H: UsbHost> UsbMidiHost<H> {
    /// Start watching for devices.
    ///
    /// `listener` sees a device attach only once its input reader started, and
    /// sees the matching detach after that reader was stopped. Devices whose
    /// connection could not be opened are never reported.
    pub fn start(
        host: Arc<H>,
        options: HostOptions,
        on_event: HostEventCallback,
        listener: Option<Arc<dyn DeviceListener<H::Device>>>,
    ) -> Result<Self> {
        let inputs = Arc::new(InputManager {
            host: host.clone(),
            filters: options.watcher.filters.clone(),
            input_options: options.input,
            parameter_mode: options.parameter_mode,
            on_event,
            devices: Mutex::new(HashMap::new()),
            listener,
        });

        let watcher = ConnectionWatcher::start(host, options.watcher, inputs.clone())?;

        Ok(Self {
            inputs,
            watcher: Some(watcher),
        })
    }

    pub fn recheck(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.recheck();
        }
    }

    pub fn attached_devices(&self) -> Vec<AttachedDevice<H::Device>> {
        self.watcher
            .as_ref()
            .map(|w| w.attached_devices())
            .unwrap_or_default()
    }

    /// Devices with a running input reader
    pub fn open_inputs(&self) -> Vec<DeviceId> {
        let devices = self.inputs.devices.lock();
        let mut ids: Vec<DeviceId> = devices
            .values()
            .filter(|d| d.is_running())
            .map(|d| d.id().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
            self.inputs.close_all();
            info!("USB MIDI host stopped");
        }
    }
}

impl<H: UsbHost> Drop for UsbMidiHost<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::testing::{midi_device, FakeUsbHost, PermissionPolicy};
    use crossbeam::channel::{unbounded, Receiver, Sender};
    use std::time::{Duration, Instant};

    #[derive(Debug, PartialEq)]
    enum Seen {
        Attached(DeviceId),
        Detached(DeviceId),
    }

    struct Recorder(Sender<Seen>);

    impl DeviceListener<DeviceId> for Recorder {
        fn on_device_attached(&self, device: AttachedDevice<DeviceId>) {
            let _ = self.0.send(Seen::Attached(device.id().clone()));
        }

        fn on_device_detached(&self, id: &DeviceId) {
            let _ = self.0.send(Seen::Detached(id.clone()));
        }
    }

    struct Harness {
        fake: Arc<FakeUsbHost>,
        host: UsbMidiHost<FakeUsbHost>,
        events: Receiver<(DeviceId, MidiEvent)>,
        seen: Receiver<Seen>,
    }

    fn start(fake: Arc<FakeUsbHost>) -> Harness {
        let (event_tx, events) = unbounded();
        let (seen_tx, seen) = unbounded();
        let options = HostOptions {
            watcher: WatcherOptions {
                poll_interval: Duration::from_secs(30),
                filters: vec![],
            },
            input: InputOptions {
                read_timeout: Duration::from_millis(10),
                buffer_size: 64,
            },
            parameter_mode: ParameterNumberMode::Combined,
        };
        let on_event: HostEventCallback = Arc::new(move |id: &DeviceId, event: MidiEvent| {
            let _ = event_tx.send((id.clone(), event));
        });

        let listener: Arc<dyn DeviceListener<DeviceId>> = Arc::new(Recorder(seen_tx));

        let host = UsbMidiHost::start(fake.clone(), options, on_event, Some(listener)).unwrap();
        Harness { fake, host, events, seen }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    #[test]
    fn test_events_are_tagged_with_device() {
        let fake = Arc::new(FakeUsbHost::new(PermissionPolicy::Grant));
        fake.set_attached(vec![midi_device("A")]);
        let stream = fake.stream(&DeviceId::from("A"));

        let h = start(fake);
        let seen = h.seen.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen, Seen::Attached(DeviceId::from("A")));
        assert_eq!(h.host.open_inputs(), vec![DeviceId::from("A")]);

        stream.send(vec![0x19, 0x91, 0x40, 0x7F]).unwrap();
        let (id, event) = h.events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(id, DeviceId::from("A"));
        assert_eq!(event, MidiEvent::NoteOn { cable: 1, channel: 1, note: 0x40, velocity: 0x7F });

        h.host.stop();
    }

    #[test]
    fn test_detach_closes_input() {
        let fake = Arc::new(FakeUsbHost::new(PermissionPolicy::Grant));
        fake.set_attached(vec![midi_device("A")]);
        let _stream = fake.stream(&DeviceId::from("A"));

        let h = start(fake);
        h.seen.recv_timeout(Duration::from_secs(2)).unwrap();

        h.fake.set_attached(vec![]);
        h.host.recheck();
        let seen = h.seen.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen, Seen::Detached(DeviceId::from("A")));
        assert!(h.host.open_inputs().is_empty());
        assert!(h.host.attached_devices().is_empty());
    }

    #[test]
    fn test_unavailable_connection_is_skipped() {
        let fake = Arc::new(FakeUsbHost::new(PermissionPolicy::Grant));
        fake.set_attached(vec![midi_device("A")]);
        fake.mark_unavailable(&DeviceId::from("A"));

        let h = start(fake);
        assert!(wait_for(|| h.host.attached_devices().len() == 1));
        assert!(h.seen.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(h.host.open_inputs().is_empty());

        // No attach was reported, so neither is the detach
        h.fake.set_attached(vec![]);
        h.host.recheck();
        assert!(wait_for(|| h.host.attached_devices().is_empty()));
        assert!(h.seen.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_device_without_in_endpoint_is_not_read() {
        let fake = Arc::new(FakeUsbHost::new(PermissionPolicy::Grant));
        let mut out_only = midi_device("A");
        out_only.interfaces[0].endpoints.retain(|ep| ep.direction == Direction::Out);
        fake.set_attached(vec![out_only]);

        let h = start(fake);
        assert!(wait_for(|| h.host.attached_devices().len() == 1));
        assert!(h.seen.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(h.host.open_inputs().is_empty());
    }

    #[test]
    fn test_disconnected_reader_leaves_open_inputs() {
        let fake = Arc::new(FakeUsbHost::new(PermissionPolicy::Grant));
        fake.set_attached(vec![midi_device("A")]);
        let stream = fake.stream(&DeviceId::from("A"));

        let h = start(fake);
        h.seen.recv_timeout(Duration::from_secs(2)).unwrap();

        drop(stream);
        assert!(wait_for(|| h.host.open_inputs().is_empty()));

        h.fake.set_attached(vec![]);
        h.host.recheck();
        let seen = h.seen.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen, Seen::Detached(DeviceId::from("A")));
    }

    #[test]
    fn test_stop_closes_everything() {
        let fake = Arc::new(FakeUsbHost::new(PermissionPolicy::Grant));
        fake.set_attached(vec![midi_device("A"), midi_device("B")]);
        let _a = fake.stream(&DeviceId::from("A"));
        let _b = fake.stream(&DeviceId::from("B"));

        let h = start(fake);
        assert!(wait_for(|| h.host.open_inputs().len() == 2));

        let inputs = h.host.inputs.clone();
        h.host.stop();
        assert!(inputs.devices.lock().is_empty());
    }
}
