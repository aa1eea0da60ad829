//! System exclusive reassembly across USB-MIDI packets

/// Growable sysex buffer, present only while a message is open
#[derive(Debug, Default)]
pub struct SysexAccumulator {
    session: Option<Vec<u8>>,
}

impl SysexAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Start or continue a message (CIN 0x4)
    pub fn append(&mut self, bytes: &[u8]) {
        self.session
            .get_or_insert_with(|| Vec::with_capacity(32))
            .extend_from_slice(bytes);
    }

    /// Close the open message with its final bytes.
    ///
    /// Returns `None` and leaves state untouched when nothing is open.
    pub fn finish(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        let mut data = self.session.take()?;
        data.extend_from_slice(bytes);
        Some(data)
    }

    /// Bytes collected so far for the open message
    pub fn buffered(&self) -> Option<&[u8]> {
        self.session.as_deref()
    }
}
