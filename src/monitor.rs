//! MIDI monitor for debugging and development
//!
//! Prints decoded events either from a hex dump of captured bulk-IN bytes or,
//! with the `rusb` feature, live from every attached USB MIDI device.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use colored::*;
use crossbeam::channel::unbounded;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::decoder::rpn::ParameterNumberMode;
use crate::decoder::PacketDecoder;
use crate::error::Error;
use crate::midi::MidiEvent;
use crate::usb::DeviceId;

/// How each event is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Serialize)]
struct EventLine<'a> {
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a DeviceId>,
    #[serde(flatten)]
    event: &'a MidiEvent,
}

/// Parse a hex dump such as `09 90 3C 64` into raw bytes.
///
/// Whitespace, commas, `0x` prefixes and `#` comments are ignored.
pub fn parse_dump(text: &str) -> crate::error::Result<Vec<u8>> {
    let digits: String = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == ','))
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();

    if digits.len() % 2 != 0 {
        return Err(Error::InvalidDump(format!("odd number of hex digits ({})", digits.len())));
    }
    Ok(hex::decode(digits)?)
}

/// Run bytes through a fresh decoder and collect what comes out
pub fn decode_bytes(data: &[u8], mode: ParameterNumberMode) -> Vec<MidiEvent> {
    let (tx, rx) = unbounded();
    let decoder = PacketDecoder::with_parameter_mode(
        Arc::new(move |event: MidiEvent| {
            let _ = tx.send(event);
        }),
        mode,
    );
    decoder.feed(data);
    drop(decoder);
    rx.into_iter().collect()
}

/// Format one event for the console
pub fn format_event(
    device: Option<&DeviceId>,
    event: &MidiEvent,
    format: OutputFormat,
    timestamp: DateTime<Local>,
) -> String {
    match format {
        OutputFormat::Json => {
            let line = EventLine {
                timestamp: timestamp.to_rfc3339(),
                device,
                event,
            };
            serde_json::to_string(&line).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
        }
        OutputFormat::Text => {
            let time = timestamp.format("%H:%M:%S%.3f").to_string();
            let source = device.map(|d| format!("{:>7} | ", d.as_str())).unwrap_or_default();
            format!("[{}] {}{}", time.dimmed(), source.white(), colorize(event))
        }
    }
}

fn colorize(event: &MidiEvent) -> ColoredString {
    let text = event.to_string();
    match event {
        MidiEvent::NoteOn { .. } => text.bright_green(),
        MidiEvent::NoteOff { .. } => text.bright_red(),
        MidiEvent::ControlChange { .. } => text.bright_yellow(),
        MidiEvent::PitchWheel { .. } => text.bright_cyan(),
        MidiEvent::SystemExclusive { .. } => text.bright_magenta(),
        MidiEvent::Rpn { .. } | MidiEvent::Nrpn { .. } => text.bright_blue(),
        MidiEvent::SingleByte { .. } => text.dimmed(),
        _ => text.normal(),
    }
}

/// Decode a captured hex dump file and print the events
pub async fn run_decode(path: &Path, format: OutputFormat, mode: ParameterNumberMode) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read dump file: {}", path.display()))?;
    let data = parse_dump(&text).with_context(|| format!("Invalid dump file: {}", path.display()))?;

    let events = decode_bytes(&data, mode);
    for event in &events {
        println!("{}", format_event(None, event, format, Local::now()));
    }

    if format == OutputFormat::Text {
        let trailing = data.len() % crate::decoder::PACKET_SIZE;
        println!(
            "{}",
            format!("{} bytes, {} events, {} trailing bytes", data.len(), events.len(), trailing).dimmed()
        );
    }
    Ok(())
}

#[cfg(feature = "rusb")]
mod live {
    use super::*;
    use crate::config::HostConfig;
    use crate::host::{HostEventCallback, UsbMidiHost};
    use crate::usb::rusb_host::RusbHost;
    use crate::usb::{find_midi_endpoint, AttachedDevice, Direction, UsbHost};
    use crate::watcher::DeviceListener;
    use tracing::info;

    struct ConsoleListener {
        format: OutputFormat,
    }

    impl<D> DeviceListener<D> for ConsoleListener {
        fn on_device_attached(&self, device: AttachedDevice<D>) {
            if self.format == OutputFormat::Text {
                println!(
                    "{} {} ({:04x}:{:04x})",
                    "+ attached".green(),
                    device.id(),
                    device.descriptor.vendor_id,
                    device.descriptor.product_id
                );
            }
        }

        fn on_device_detached(&self, id: &DeviceId) {
            if self.format == OutputFormat::Text {
                println!("{} {}", "- detached".red(), id);
            }
        }
    }

    /// Print events from every USB MIDI device until Ctrl+C
    pub async fn run_monitor(config: &HostConfig, format: OutputFormat) -> Result<()> {
        if format == OutputFormat::Text {
            println!("{}", "=== USB MIDI Monitor ===".bold().cyan());
            println!("Press Ctrl+C to exit\n");
        }

        let on_event: HostEventCallback = Arc::new(move |id: &DeviceId, event: MidiEvent| {
            println!("{}", format_event(Some(id), &event, format, Local::now()));
        });
        let listener: Arc<dyn DeviceListener<crate::usb::rusb_host::RusbDevice>> = Arc::new(ConsoleListener { format });

        let host = UsbMidiHost::start(Arc::new(RusbHost::new()), config.host_options(), on_event, Some(listener))
            .context("Failed to start USB MIDI host")?;

        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        info!("Ctrl+C received, stopping monitor");

        tokio::task::spawn_blocking(move || host.stop()).await?;
        if format == OutputFormat::Text {
            println!("\n{}", "Monitor stopped".yellow());
        }
        Ok(())
    }

    /// Print every attached USB device and whether it looks MIDI-capable
    pub fn list_devices(config: &HostConfig) -> Result<()> {
        let host = RusbHost::new();
        let ids = host.list_devices().context("Failed to enumerate USB devices")?;

        println!("{}", "=== USB Devices ===".bold().cyan());
        for id in ids {
            let descriptor = match host.describe(&id) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    println!("  {} {}", id, format!("(unreadable: {})", e).bright_black());
                    continue;
                }
            };

            let midi = descriptor.is_midi_device(&config.device_filters);
            let endpoint = find_midi_endpoint(&descriptor, Direction::In, &config.device_filters)
                .map(|(iface, ep)| format!("iface {} ep 0x{:02X}", iface, ep.address))
                .unwrap_or_else(|| "-".to_string());
            let line = format!(
                "  {} {:04x}:{:04x}  {}",
                id, descriptor.vendor_id, descriptor.product_id, endpoint
            );
            if midi {
                println!("{} {}", line.green(), "MIDI".bold());
            } else {
                println!("{}", line.bright_black());
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rusb")]
pub use live::{list_devices, run_monitor};
