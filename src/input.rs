//! Bulk-IN reader thread feeding a packet decoder

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::decoder::{PacketDecoder, PACKET_SIZE};
use crate::error::{Error, Result};
use crate::usb::{BulkRead, DeviceId};

/// Reader thread settings
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// Upper bound on how long `stop()` waits for the reader to notice
    pub read_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            buffer_size: 64,
        }
    }
}

/// One opened MIDI IN endpoint and the thread draining it
pub struct MidiInputDevice {
    id: DeviceId,
    decoder: Arc<PacketDecoder>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MidiInputDevice {
    pub fn start<R: BulkRead + 'static>(
        id: DeviceId,
        reader: R,
        decoder: PacketDecoder,
        options: InputOptions,
    ) -> Result<Self> {
        if options.buffer_size < PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "read buffer must hold at least one {}-byte packet",
                PACKET_SIZE
            )));
        }

        let decoder = Arc::new(decoder);
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let id = id.clone();
            let decoder = decoder.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name(format!("usb-midi-in-{}", id))
                .spawn(move || read_loop(id, reader, decoder, running, options))?
        };

        info!("MIDI input started for {}", id);

        Ok(Self {
            id,
            decoder,
            running,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn decoder(&self) -> &PacketDecoder {
        &self.decoder
    }

    /// False once the reader thread has exited, e.g. after a disconnect
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("MIDI input thread for {} panicked", self.id);
            }
            info!("MIDI input stopped for {}", self.id);
        }
    }
}

impl Drop for MidiInputDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop<R: BulkRead>(
    id: DeviceId,
    mut reader: R,
    decoder: Arc<PacketDecoder>,
    running: Arc<AtomicBool>,
    options: InputOptions,
) {
    let mut buf = vec![0u8; options.buffer_size];

    while running.load(Ordering::Relaxed) {
        match reader.read(&mut buf, options.read_timeout) {
            Ok(0) | Err(Error::Timeout) => continue,
            Ok(n) => decoder.feed(&buf[..n]),
            Err(Error::Disconnected) => {
                info!("MIDI input {} disconnected", id);
                break;
            }
            Err(e) => {
                // Stall, overflow and the like clear up; only a disconnect is final
                warn!("Bulk read from {} failed, retrying: {}", id, e);
                std::thread::sleep(options.read_timeout);
            }
        }
    }

    debug!("MIDI input loop for {} exited", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEvent;
    use crossbeam::channel::{unbounded, Receiver};

    fn collecting_decoder() -> (PacketDecoder, Receiver<MidiEvent>) {
        let (tx, rx) = unbounded();
        let decoder = PacketDecoder::new(Arc::new(move |event: MidiEvent| {
            let _ = tx.send(event);
        }));
        (decoder, rx)
    }

    fn fast() -> InputOptions {
        InputOptions {
            read_timeout: Duration::from_millis(10),
            buffer_size: 64,
        }
    }

    struct ScriptedReader {
        reads: Vec<Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(mut reads: Vec<Result<Vec<u8>>>) -> Self {
            reads.reverse();
            Self { reads }
        }
    }

    impl BulkRead for ScriptedReader {
        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            match self.reads.pop() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(timeout);
                    Err(Error::Timeout)
                }
            }
        }
    }

    #[test]
    fn test_reads_are_decoded_across_chunks() {
        let (decoder, rx) = collecting_decoder();
        let reader = ScriptedReader::new(vec![
            Ok(vec![0x09, 0x90, 0x3C]),
            Err(Error::Timeout),
            Ok(vec![0x64, 0x0B, 0xB0, 0x07, 0x40]),
        ]);

        let input = MidiInputDevice::start(DeviceId::from("a"), reader, decoder, fast()).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, MidiEvent::NoteOn { cable: 0, channel: 0, note: 0x3C, velocity: 0x64 });
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second, MidiEvent::ControlChange { cable: 0, channel: 0, controller: 7, value: 0x40 });

        assert!(input.is_running());
        input.stop();
    }

    #[test]
    fn test_disconnect_ends_reader() {
        let (decoder, rx) = collecting_decoder();
        let reader = ScriptedReader::new(vec![Ok(vec![0x0F, 0xF8, 0x00, 0x00]), Err(Error::Disconnected)]);

        let input = MidiInputDevice::start(DeviceId::from("a"), reader, decoder, fast()).unwrap();
        assert!(matches!(rx.recv_timeout(Duration::from_secs(2)), Ok(MidiEvent::SingleByte { byte: 0xF8, .. })));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while input.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!input.is_running());
        input.stop();
    }

    #[test]
    fn test_read_error_is_retried() {
        let (decoder, rx) = collecting_decoder();
        let reader = ScriptedReader::new(vec![
            Err(Error::Usb("pipe error".to_string())),
            Ok(vec![0x09, 0x90, 0x3C, 0x64]),
        ]);

        let input = MidiInputDevice::start(DeviceId::from("a"), reader, decoder, fast()).unwrap();
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, MidiEvent::NoteOn { cable: 0, channel: 0, note: 0x3C, velocity: 0x64 });
        assert!(input.is_running());
        input.stop();
    }

    #[test]
    fn test_stop_while_idle() {
        let (decoder, rx) = collecting_decoder();
        let reader = ScriptedReader::new(vec![]);

        let input = MidiInputDevice::start(DeviceId::from("a"), reader, decoder, fast()).unwrap();
        let started = std::time::Instant::now();
        input.stop();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_partial_packet_stays_buffered() {
        let (decoder, rx) = collecting_decoder();
        let reader = ScriptedReader::new(vec![Ok(vec![0x09, 0x90])]);

        let input = MidiInputDevice::start(DeviceId::from("a"), reader, decoder, fast()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while input.decoder().pending_len() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(input.decoder().pending_len(), 2);
        assert!(rx.try_recv().is_err());
        drop(input);
    }

    #[test]
    fn test_buffer_smaller_than_packet_is_rejected() {
        let (decoder, _rx) = collecting_decoder();
        let options = InputOptions { buffer_size: 2, ..fast() };

        let result = MidiInputDevice::start(DeviceId::from("a"), ScriptedReader::new(vec![]), decoder, options);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
