//! MIDI event types delivered by the packet decoder
//!
//! One variant per decoded unit. Every variant carries the USB-MIDI cable
//! number the packet arrived on.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Decoded inbound MIDI event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiEvent {
    /// Miscellaneous function codes (CIN 0x0), reserved for future extension
    MiscellaneousFunctionCodes { cable: u8, byte1: u8, byte2: u8, byte3: u8 },

    /// Cable events (CIN 0x1), reserved for future expansion
    CableEvents { cable: u8, byte1: u8, byte2: u8, byte3: u8 },

    /// System common message, 1 to 3 bytes
    SystemCommon { cable: u8, data: Vec<u8> },

    /// Complete system exclusive message, including the F0/F7 framing bytes
    SystemExclusive { cable: u8, data: Vec<u8> },

    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { cable: u8, channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { cable: u8, channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure
    PolyphonicAftertouch { cable: u8, channel: u8, note: u8, pressure: u8 },

    /// Control Change
    ControlChange { cable: u8, channel: u8, controller: u8, value: u8 },

    /// Program Change
    ProgramChange { cable: u8, channel: u8, program: u8 },

    /// Channel Pressure
    ChannelAftertouch { cable: u8, channel: u8, pressure: u8 },

    /// Pitch Bend: 14-bit value (0-16383), 8192 is center
    PitchWheel { cable: u8, channel: u8, value: u16 },

    /// Single byte (CIN 0xF), usually a real-time message
    SingleByte { cable: u8, byte: u8 },

    /// Registered parameter data entry.
    /// `value_lsb` is `None` until a data entry LSB (CC 38) arrives.
    Rpn {
        cable: u8,
        channel: u8,
        parameter: u16,
        value_msb: u8,
        value_lsb: Option<u8>,
    },

    /// Non-registered parameter data entry, same shape as `Rpn`
    Nrpn {
        cable: u8,
        channel: u8,
        parameter: u16,
        value_msb: u8,
        value_lsb: Option<u8>,
    },
}

impl MidiEvent {
    /// Cable number (0-15) the event arrived on
    pub fn cable(&self) -> u8 {
        match *self {
            MidiEvent::MiscellaneousFunctionCodes { cable, .. }
            | MidiEvent::CableEvents { cable, .. }
            | MidiEvent::SystemCommon { cable, .. }
            | MidiEvent::SystemExclusive { cable, .. }
            | MidiEvent::NoteOff { cable, .. }
            | MidiEvent::NoteOn { cable, .. }
            | MidiEvent::PolyphonicAftertouch { cable, .. }
            | MidiEvent::ControlChange { cable, .. }
            | MidiEvent::ProgramChange { cable, .. }
            | MidiEvent::ChannelAftertouch { cable, .. }
            | MidiEvent::PitchWheel { cable, .. }
            | MidiEvent::SingleByte { cable, .. }
            | MidiEvent::Rpn { cable, .. }
            | MidiEvent::Nrpn { cable, .. } => cable,
        }
    }

    /// Get the channel for channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOff { channel, .. }
            | MidiEvent::NoteOn { channel, .. }
            | MidiEvent::PolyphonicAftertouch { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::ChannelAftertouch { channel, .. }
            | MidiEvent::PitchWheel { channel, .. }
            | MidiEvent::Rpn { channel, .. }
            | MidiEvent::Nrpn { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Data entry LSB in the `-1 = not yet received` shape
    pub fn lsb_or_minus_one(&self) -> Option<i16> {
        match *self {
            MidiEvent::Rpn { value_lsb, .. } | MidiEvent::Nrpn { value_lsb, .. } => {
                Some(value_lsb.map_or(-1, i16::from))
            }
            _ => None,
        }
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiEvent::NoteOff { cable, channel, note, velocity } => {
                write!(f, "[{}] NoteOff ch:{} n:{} v:{}", cable, channel + 1, note, velocity)
            }
            MidiEvent::NoteOn { cable, channel, note, velocity } => {
                write!(f, "[{}] NoteOn ch:{} n:{} v:{}", cable, channel + 1, note, velocity)
            }
            MidiEvent::PolyphonicAftertouch { cable, channel, note, pressure } => {
                write!(f, "[{}] PolyPressure ch:{} n:{} p:{}", cable, channel + 1, note, pressure)
            }
            MidiEvent::ControlChange { cable, channel, controller, value } => {
                write!(f, "[{}] CC ch:{} cc:{} v:{}", cable, channel + 1, controller, value)
            }
            MidiEvent::ProgramChange { cable, channel, program } => {
                write!(f, "[{}] ProgramChange ch:{} p:{}", cable, channel + 1, program)
            }
            MidiEvent::ChannelAftertouch { cable, channel, pressure } => {
                write!(f, "[{}] ChannelPressure ch:{} p:{}", cable, channel + 1, pressure)
            }
            MidiEvent::PitchWheel { cable, channel, value } => {
                write!(f, "[{}] PitchBend ch:{} v:{}", cable, channel + 1, value)
            }
            MidiEvent::SystemCommon { cable, data } => {
                write!(f, "[{}] SystemCommon {}", cable, format_hex(data))
            }
            MidiEvent::SystemExclusive { cable, data } => {
                write!(f, "[{}] SysEx {} bytes: {}", cable, data.len(), format_hex(data))
            }
            MidiEvent::SingleByte { cable, byte } => {
                write!(f, "[{}] SingleByte {:02X}", cable, byte)
            }
            MidiEvent::MiscellaneousFunctionCodes { cable, byte1, byte2, byte3 } => {
                write!(f, "[{}] Misc {:02X} {:02X} {:02X}", cable, byte1, byte2, byte3)
            }
            MidiEvent::CableEvents { cable, byte1, byte2, byte3 } => {
                write!(f, "[{}] CableEvent {:02X} {:02X} {:02X}", cable, byte1, byte2, byte3)
            }
            MidiEvent::Rpn { cable, channel, parameter, value_msb, value_lsb } => {
                write!(f, "[{}] RPN ch:{} #{} msb:{} lsb:{}", cable, channel + 1, parameter, value_msb, lsb_text(*value_lsb))
            }
            MidiEvent::Nrpn { cable, channel, parameter, value_msb, value_lsb } => {
                write!(f, "[{}] NRPN ch:{} #{} msb:{} lsb:{}", cable, channel + 1, parameter, value_msb, lsb_text(*value_lsb))
            }
        }
    }
}

fn lsb_text(lsb: Option<u8>) -> String {
    lsb.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Callback type for decoded events, invoked synchronously from `feed`
pub type EventCallback = Arc<dyn Fn(MidiEvent) + Send + Sync>;

/// Listener with one method per event kind
///
/// Every method defaults to a no-op so implementors only override what they
/// care about. Use [`dispatch`] (or [`listener_callback`]) to route decoded
/// events into it.
#[allow(unused_variables)]
pub trait MidiEventListener: Send + Sync {
    fn on_miscellaneous_function_codes(&self, cable: u8, byte1: u8, byte2: u8, byte3: u8) {}
    fn on_cable_events(&self, cable: u8, byte1: u8, byte2: u8, byte3: u8) {}
    fn on_system_common_message(&self, cable: u8, data: &[u8]) {}
    fn on_system_exclusive(&self, cable: u8, data: &[u8]) {}
    fn on_note_off(&self, cable: u8, channel: u8, note: u8, velocity: u8) {}
    fn on_note_on(&self, cable: u8, channel: u8, note: u8, velocity: u8) {}
    fn on_polyphonic_aftertouch(&self, cable: u8, channel: u8, note: u8, pressure: u8) {}
    fn on_control_change(&self, cable: u8, channel: u8, controller: u8, value: u8) {}
    fn on_program_change(&self, cable: u8, channel: u8, program: u8) {}
    fn on_channel_aftertouch(&self, cable: u8, channel: u8, pressure: u8) {}
    fn on_pitch_wheel(&self, cable: u8, channel: u8, value: u16) {}
    fn on_single_byte(&self, cable: u8, byte: u8) {}
    fn on_rpn_received(&self, cable: u8, channel: u8, parameter: u16, value_msb: u8, value_lsb: i16) {}
    fn on_nrpn_received(&self, cable: u8, channel: u8, parameter: u16, value_msb: u8, value_lsb: i16) {}
}

/// Route one event to the matching listener method
pub fn dispatch(listener: &dyn MidiEventListener, event: &MidiEvent) {
    match *event {
        MidiEvent::MiscellaneousFunctionCodes { cable, byte1, byte2, byte3 } => {
            listener.on_miscellaneous_function_codes(cable, byte1, byte2, byte3)
        }
        MidiEvent::CableEvents { cable, byte1, byte2, byte3 } => {
            listener.on_cable_events(cable, byte1, byte2, byte3)
        }
        MidiEvent::SystemCommon { cable, ref data } => listener.on_system_common_message(cable, data),
        MidiEvent::SystemExclusive { cable, ref data } => listener.on_system_exclusive(cable, data),
        MidiEvent::NoteOff { cable, channel, note, velocity } => {
            listener.on_note_off(cable, channel, note, velocity)
        }
        MidiEvent::NoteOn { cable, channel, note, velocity } => {
            listener.on_note_on(cable, channel, note, velocity)
        }
        MidiEvent::PolyphonicAftertouch { cable, channel, note, pressure } => {
            listener.on_polyphonic_aftertouch(cable, channel, note, pressure)
        }
        MidiEvent::ControlChange { cable, channel, controller, value } => {
            listener.on_control_change(cable, channel, controller, value)
        }
        MidiEvent::ProgramChange { cable, channel, program } => {
            listener.on_program_change(cable, channel, program)
        }
        MidiEvent::ChannelAftertouch { cable, channel, pressure } => {
            listener.on_channel_aftertouch(cable, channel, pressure)
        }
        MidiEvent::PitchWheel { cable, channel, value } => listener.on_pitch_wheel(cable, channel, value),
        MidiEvent::SingleByte { cable, byte } => listener.on_single_byte(cable, byte),
        MidiEvent::Rpn { cable, channel, parameter, value_msb, value_lsb } => listener.on_rpn_received(
            cable,
            channel,
            parameter,
            value_msb,
            value_lsb.map_or(-1, i16::from),
        ),
        MidiEvent::Nrpn { cable, channel, parameter, value_msb, value_lsb } => listener.on_nrpn_received(
            cable,
            channel,
            parameter,
            value_msb,
            value_lsb.map_or(-1, i16::from),
        ),
    }
}

/// Wrap a listener into an [`EventCallback`]
pub fn listener_callback<L: MidiEventListener + 'static>(listener: Arc<L>) -> EventCallback {
    Arc::new(move |event: MidiEvent| dispatch(listener.as_ref(), &event))
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
