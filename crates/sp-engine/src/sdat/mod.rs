//! The SDAT (Nitro) engine.
//!
//! A 192 Hz timer drives everything. Each timer tick adds the tempo to an
//! accumulator and runs one sequencer quantum per 240 accumulated; envelopes,
//! modulation and portamento sweeps then advance once for the tick. Sixteen
//! hardware channels are shared by PCM, PSG and noise instruments.

mod player;
mod track;

pub use player::SdatPlayer;
pub use track::Track;

/// Settings of an SDAT player entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdatConfig {
    /// Hardware channels the player may allocate, one bit per channel.
    pub channel_mask: u16,
}

impl Default for SdatConfig {
    fn default() -> Self {
        Self {
            channel_mask: 0xFFFF,
        }
    }
}

impl SdatConfig {
    /// Whether channel `id` may be allocated.
    pub fn allows(&self, id: usize) -> bool {
        id < 16 && self.channel_mask & (1 << id) != 0
    }
}
