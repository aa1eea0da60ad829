//! RPN/NRPN tracking across control change messages
//!
//! State is shared by every channel and cable decoded by one decoder, so
//! parameter selections on different channels overwrite each other.

use serde::{Deserialize, Serialize};

use crate::midi::MidiEvent;

const CC_DATA_ENTRY_MSB: u8 = 6;
const CC_DATA_ENTRY_LSB: u8 = 38;
const CC_NRPN_LSB: u8 = 98;
const CC_NRPN_MSB: u8 = 99;
const CC_RPN_LSB: u8 = 100;
const CC_RPN_MSB: u8 = 101;

/// Function number half that, on both halves, deselects the RPN
const RPN_NULL: u8 = 0x7F;

/// Active parameter addressing mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RpnMode {
    #[default]
    None,
    Rpn,
    Nrpn,
}

/// How the two 7-bit function number halves form the reported parameter number.
///
/// `Legacy` reproduces the AND-based formula some existing USB MIDI hosts
/// report. The shifted MSB and the 7-bit LSB never share a bit, so it always
/// yields 0 and drops the parameter number. `Combined` is the corrected
/// 14-bit value and the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterNumberMode {
    /// `(msb << 7) | lsb`, the 14-bit parameter number
    #[default]
    Combined,
    /// `(msb << 7) & lsb`, always 0 for 7-bit halves
    Legacy,
}

impl ParameterNumberMode {
    pub fn compose(self, msb: u8, lsb: u8) -> u16 {
        let msb = u16::from(msb & 0x7F) << 7;
        let lsb = u16::from(lsb & 0x7F);
        match self {
            ParameterNumberMode::Combined => msb | lsb,
            ParameterNumberMode::Legacy => msb & lsb,
        }
    }
}

/// RPN/NRPN state machine fed with every control change
#[derive(Debug, Default)]
pub struct RpnState {
    mode: RpnMode,
    rpn_msb: u8,
    rpn_lsb: u8,
    nrpn_msb: u8,
    nrpn_lsb: u8,
    value_msb: u8,
    composition: ParameterNumberMode,
}

impl RpnState {
    pub fn new(composition: ParameterNumberMode) -> Self {
        Self {
            composition,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> RpnMode {
        self.mode
    }

    /// Feed one control change and return the data entry event it completes, if any
    pub fn process(&mut self, cable: u8, status: u8, controller: u8, value: u8) -> Option<MidiEvent> {
        let value = value & 0x7F;
        match controller {
            CC_NRPN_LSB => {
                self.nrpn_lsb = value;
                self.mode = RpnMode::Nrpn;
                None
            }
            CC_NRPN_MSB => {
                self.nrpn_msb = value;
                self.mode = RpnMode::Nrpn;
                None
            }
            CC_RPN_LSB => {
                self.rpn_lsb = value;
                self.select_rpn();
                None
            }
            CC_RPN_MSB => {
                self.rpn_msb = value;
                self.select_rpn();
                None
            }
            CC_DATA_ENTRY_MSB => {
                self.value_msb = value;
                self.data_entry(cable, status & 0x0F, None)
            }
            CC_DATA_ENTRY_LSB => self.data_entry(cable, status & 0x0F, Some(value)),
            _ => None,
        }
    }

    fn select_rpn(&mut self) {
        self.mode = if self.rpn_msb == RPN_NULL && self.rpn_lsb == RPN_NULL {
            RpnMode::None
        } else {
            RpnMode::Rpn
        };
    }

    fn data_entry(&self, cable: u8, channel: u8, value_lsb: Option<u8>) -> Option<MidiEvent> {
        let value_msb = self.value_msb;
        match self.mode {
            RpnMode::Rpn => Some(MidiEvent::Rpn {
                cable,
                channel,
                parameter: self.composition.compose(self.rpn_msb, self.rpn_lsb),
                value_msb,
                value_lsb,
            }),
            RpnMode::Nrpn => Some(MidiEvent::Nrpn {
                cable,
                channel,
                parameter: self.composition.compose(self.nrpn_msb, self.nrpn_lsb),
                value_msb,
                value_lsb,
            }),
            RpnMode::None => None,
        }
    }
}
