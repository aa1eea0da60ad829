//! USB MIDI device connection watcher
//!
//! A dedicated thread polls the USB enumeration at a fixed interval, queues
//! newly attached MIDI devices for permission (one request at a time), and
//! reports attach/detach transitions exactly once.

pub mod differ;
pub mod grant_queue;
pub mod tracker;


use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::usb::{AttachedDevice, DeviceFilter, DeviceId, PermissionRequest, PermissionResult, UsbHost};

pub use differ::EnumerationDiff;
pub use grant_queue::GrantQueue;
pub use tracker::{ConnectionTracker, DeviceNotification};

/// Receives attach/detach transitions from the watcher thread
pub trait DeviceListener<D>: Send + Sync {
    /// Called once per attachment, only after permission was granted
    fn on_device_attached(&self, device: AttachedDevice<D>);

    /// Called once when a previously attached device disappears
    fn on_device_detached(&self, id: &DeviceId);
}

/// Watcher settings
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub poll_interval: Duration,
    pub filters: Vec<DeviceFilter>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            filters: Vec::new(),
        }
    }
}

enum Control {
    Recheck,
    Stop,
}

/// Handle to the running watcher thread
///
/// Dropping the handle stops the thread and waits for it to exit.
pub struct ConnectionWatcher<H: UsbHost> {
    tracker: Arc<Mutex<ConnectionTracker<H::Device>>>,
    control_tx: Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl<H: UsbHost> ConnectionWatcher<H> {
    /// Spawn the watcher thread; the first cycle runs immediately
    pub fn start(
        host: Arc<H>,
        options: WatcherOptions,
        listener: Arc<dyn DeviceListener<H::Device>>,
    ) -> Result<Self> {
        let tracker = Arc::new(Mutex::new(ConnectionTracker::new(options.filters.clone())));
        let (control_tx, control_rx) = channel::unbounded();

        let watch_loop = WatchLoop::new(host, tracker.clone(), listener);
        let poll_interval = options.poll_interval;
        let thread = std::thread::Builder::new()
            .name("usb-midi-watcher".to_string())
            .spawn(move || watch_loop.run(control_rx, poll_interval))?;

        info!("USB MIDI connection watcher started (interval {:?})", poll_interval);

        Ok(Self {
            tracker,
            control_tx,
            thread: Some(thread),
        })
    }

    /// Run a cycle now instead of waiting for the next tick
    pub fn recheck(&self) {
        let _ = self.control_tx.send(Control::Recheck);
    }

    /// Devices currently attached and granted
    pub fn attached_devices(&self) -> Vec<AttachedDevice<H::Device>> {
        self.tracker.lock().granted_devices()
    }

    /// Stop the thread and wait for it to exit.
    ///
    /// No notification is delivered after this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.control_tx.send(Control::Stop);
            if thread.join().is_err() {
                warn!("USB MIDI connection watcher thread panicked");
            }
            info!("USB MIDI connection watcher stopped");
        }
    }
}

impl<H: UsbHost> Drop for ConnectionWatcher<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One watch cycle plus the permission request it may leave outstanding
pub(crate) struct WatchLoop<H: UsbHost> {
    host: Arc<H>,
    tracker: Arc<Mutex<ConnectionTracker<H::Device>>>,
    listener: Arc<dyn DeviceListener<H::Device>>,
    pending: Option<(DeviceId, PermissionRequest<H::Device>)>,
}

impl<H: UsbHost> WatchLoop<H> {
    pub(crate) fn new(
        host: Arc<H>,
        tracker: Arc<Mutex<ConnectionTracker<H::Device>>>,
        listener: Arc<dyn DeviceListener<H::Device>>,
    ) -> Self {
        Self {
            host,
            tracker,
            listener,
            pending: None,
        }
    }

    fn run(mut self, control_rx: Receiver<Control>, poll_interval: Duration) {
        let never = channel::never();

        loop {
            self.cycle();

            let permission_rx = self
                .pending
                .as_ref()
                .map(|(_, request)| request.receiver().clone())
                .unwrap_or_else(|| never.clone());

            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Recheck) => debug!("Recheck requested"),
                    Ok(Control::Stop) | Err(_) => break,
                },
                recv(permission_rx) -> result => {
                    // A responder dropped without answering counts as a denial
                    self.complete_pending(result.unwrap_or(PermissionResult::Denied));
                },
                default(poll_interval) => {},
            }
        }

        debug!("USB MIDI connection watcher loop exited");
    }

    /// Enumerate, admit new devices, issue a permission request, retire vanished devices
    pub(crate) fn cycle(&mut self) {
        let snapshot: HashSet<DeviceId> = match self.host.list_devices() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!("USB enumeration failed, skipping cycle: {}", e);
                return;
            }
        };

        let (diff, claimed) = {
            let mut tracker = self.tracker.lock();
            let diff = tracker.diff(&snapshot);
            let claimed = tracker.claim(&diff.appeared);
            (diff, claimed)
        };

        // Host calls may block on the USB stack, keep them off the lock
        let described: Vec<_> = claimed
            .into_iter()
            .map(|id| {
                let descriptor = match self.host.describe(&id) {
                    Ok(descriptor) => Some(descriptor),
                    Err(e) => {
                        warn!("Failed to read descriptors of {}: {}", id, e);
                        None
                    }
                };
                (id, descriptor)
            })
            .collect();

        let next = {
            let mut tracker = self.tracker.lock();
            for (id, descriptor) in described {
                tracker.enqueue(&id, descriptor);
            }
            tracker.begin_grant()
        };

        if let Some(id) = next {
            info!("Requesting permission for {}", id);
            let request = self.host.request_permission(&id);
            self.pending = Some((id, request));
        }

        let notifications = {
            let mut tracker = self.tracker.lock();
            let notifications = tracker.retire(&diff.vanished);

            let abandoned = matches!(&self.pending, Some((id, _)) if tracker.outstanding() != Some(id));
            if abandoned {
                debug!("Abandoning permission request for vanished device");
                self.pending = None;
            }

            notifications
        };

        self.dispatch(notifications);
    }

    /// Apply a permission result if one has arrived, without blocking
    #[cfg(test)]
    pub(crate) fn poll_permission(&mut self) -> bool {
        let result = match &self.pending {
            Some((_, request)) => match request.receiver().try_recv() {
                Ok(result) => result,
                Err(channel::TryRecvError::Empty) => return false,
                Err(channel::TryRecvError::Disconnected) => PermissionResult::Denied,
            },
            None => return false,
        };
        self.complete_pending(result);
        true
    }

    fn complete_pending(&mut self, result: PermissionResult<H::Device>) {
        let Some((id, _)) = self.pending.take() else {
            return;
        };
        let notification = self.tracker.lock().complete_grant(&id, result);
        self.dispatch(notification.into_iter().collect());
    }

    fn dispatch(&self, notifications: Vec<DeviceNotification<H::Device>>) {
        for notification in notifications {
            match notification {
                DeviceNotification::Attached(device) => {
                    info!("USB MIDI device attached: {}", device.id());
                    self.listener.on_device_attached(device);
                }
                DeviceNotification::Detached(id) => {
                    info!("USB MIDI device detached: {}", id);
                    self.listener.on_device_detached(&id);
                }
            }
        }
    }
}
