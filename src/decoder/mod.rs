//! USB-MIDI packet decoder
//!
//! Turns raw bulk-IN bytes into [`MidiEvent`]s. Input may arrive in any chunk
//! size; incomplete packets are held until the rest shows up. Malformed packets
//! are dropped without surfacing an error.
//!
//! Packet layout (USB Device Class Definition for MIDI Devices, 1.0):
//!
//! ```text
//! byte 0: cable number (high nibble) | code index number (low nibble)
//! byte 1..3: MIDI payload, 1 to 3 bytes depending on the CIN
//! ```

pub mod frame_buffer;
pub mod rpn;
pub mod sysex;


use parking_lot::Mutex;
use tracing::trace;

use crate::midi::{EventCallback, MidiEvent};
use frame_buffer::{packets, FrameBuffer};
use rpn::{ParameterNumberMode, RpnState};
use sysex::SysexAccumulator;

pub use frame_buffer::PACKET_SIZE;
pub use rpn::RpnMode;

/// Code index numbers
mod cin {
    pub const MISC_FUNCTION: u8 = 0x0;
    pub const CABLE_EVENT: u8 = 0x1;
    pub const SYSTEM_COMMON_2: u8 = 0x2;
    pub const SYSTEM_COMMON_3: u8 = 0x3;
    pub const SYSEX_START: u8 = 0x4;
    pub const SYSEX_END_1: u8 = 0x5;
    pub const SYSEX_END_2: u8 = 0x6;
    pub const SYSEX_END_3: u8 = 0x7;
    pub const NOTE_OFF: u8 = 0x8;
    pub const NOTE_ON: u8 = 0x9;
    pub const POLY_PRESSURE: u8 = 0xA;
    pub const CONTROL_CHANGE: u8 = 0xB;
    pub const PROGRAM_CHANGE: u8 = 0xC;
    pub const CHANNEL_PRESSURE: u8 = 0xD;
    pub const PITCH_BEND: u8 = 0xE;
    pub const SINGLE_BYTE: u8 = 0xF;
}

#[derive(Debug)]
struct DecoderState {
    frames: FrameBuffer,
    sysex: SysexAccumulator,
    rpn: RpnState,
}

/// Stateful decoder for one inbound USB-MIDI stream
///
/// All calls to [`feed`](Self::feed) are serialized: concurrent readers on the
/// same decoder never interleave packet processing. The callback runs while
/// the decoder is locked and must not feed the same decoder again.
pub struct PacketDecoder {
    state: Mutex<DecoderState>,
    callback: EventCallback,
}

impl PacketDecoder {
    pub fn new(callback: EventCallback) -> Self {
        Self::with_parameter_mode(callback, ParameterNumberMode::default())
    }

    pub fn with_parameter_mode(callback: EventCallback, mode: ParameterNumberMode) -> Self {
        Self {
            state: Mutex::new(DecoderState {
                frames: FrameBuffer::new(),
                sysex: SysexAccumulator::new(),
                rpn: RpnState::new(mode),
            }),
            callback,
        }
    }

    /// Decode as many whole packets as are available, emitting one callback per event
    pub fn feed(&self, data: &[u8]) {
        let mut state = self.state.lock();

        let frames = state.frames.push(data);
        if frames.is_empty() {
            return;
        }

        for packet in packets(&frames) {
            state.decode(packet, &*self.callback);
        }
    }

    /// Drop any partial packet and any unfinished sysex message
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.sysex = SysexAccumulator::new();
    }

    /// Bytes waiting for the rest of their packet
    pub fn pending_len(&self) -> usize {
        self.state.lock().frames.pending().len()
    }

    /// Whether a sysex message is currently open
    pub fn sysex_open(&self) -> bool {
        self.state.lock().sysex.is_open()
    }

    pub fn rpn_mode(&self) -> RpnMode {
        self.state.lock().rpn.mode()
    }
}

impl DecoderState {
    fn decode(&mut self, packet: [u8; PACKET_SIZE], emit: &dyn Fn(MidiEvent)) {
        let [header, byte1, byte2, byte3] = packet;
        let cable = header >> 4;
        let code = header & 0x0F;
        let channel = byte1 & 0x0F;

        match code {
            cin::MISC_FUNCTION => emit(MidiEvent::MiscellaneousFunctionCodes { cable, byte1, byte2, byte3 }),
            cin::CABLE_EVENT => emit(MidiEvent::CableEvents { cable, byte1, byte2, byte3 }),
            cin::SYSTEM_COMMON_2 => emit(MidiEvent::SystemCommon { cable, data: vec![byte1, byte2] }),
            cin::SYSTEM_COMMON_3 => emit(MidiEvent::SystemCommon { cable, data: vec![byte1, byte2, byte3] }),
            cin::SYSEX_START => self.sysex.append(&[byte1, byte2, byte3]),
            cin::SYSEX_END_1 => match self.sysex.finish(&[byte1]) {
                Some(data) => emit(MidiEvent::SystemExclusive { cable, data }),
                None => emit(MidiEvent::SystemCommon { cable, data: vec![byte1] }),
            },
            cin::SYSEX_END_2 => self.finish_sysex(cable, &[byte1, byte2], emit),
            cin::SYSEX_END_3 => self.finish_sysex(cable, &[byte1, byte2, byte3], emit),
            cin::NOTE_OFF => emit(MidiEvent::NoteOff { cable, channel, note: byte2, velocity: byte3 }),
            cin::NOTE_ON if byte3 == 0 => {
                emit(MidiEvent::NoteOff { cable, channel, note: byte2, velocity: byte3 })
            }
            cin::NOTE_ON => emit(MidiEvent::NoteOn { cable, channel, note: byte2, velocity: byte3 }),
            cin::POLY_PRESSURE => {
                emit(MidiEvent::PolyphonicAftertouch { cable, channel, note: byte2, pressure: byte3 })
            }
            cin::CONTROL_CHANGE => {
                emit(MidiEvent::ControlChange { cable, channel, controller: byte2, value: byte3 });
                if let Some(event) = self.rpn.process(cable, byte1, byte2, byte3) {
                    emit(event);
                }
            }
            cin::PROGRAM_CHANGE => emit(MidiEvent::ProgramChange { cable, channel, program: byte2 }),
            cin::CHANNEL_PRESSURE => emit(MidiEvent::ChannelAftertouch { cable, channel, pressure: byte2 }),
            cin::PITCH_BEND => {
                let value = u16::from(byte2) | (u16::from(byte3) << 7);
                emit(MidiEvent::PitchWheel { cable, channel, value })
            }
            cin::SINGLE_BYTE => emit(MidiEvent::SingleByte { cable, byte: byte1 }),
            _ => trace!("Dropping packet with unknown CIN: {:02X?}", packet),
        }
    }

    fn finish_sysex(&mut self, cable: u8, tail: &[u8], emit: &dyn Fn(MidiEvent)) {
        match self.sysex.finish(tail) {
            Some(data) => emit(MidiEvent::SystemExclusive { cable, data }),
            None => trace!("Dropping sysex terminator without open message (cable {})", cable),
        }
    }
}
