//! The M4A ("Sappy") engine.
//!
//! Sequencing runs once per 59.7275 Hz frame; envelopes and mixing run four
//! times per frame. Direct-sound channels come from a pool of up to 12
//! software voices and are mixed through the reverb; the four Game Boy
//! channels are fixed slots mixed dry.

mod player;
mod track;

pub use player::M4aPlayer;
pub use track::Track;

use crate::reverb::ReverbKind;

/// Settings of the M4A sound driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct M4aConfig {
    /// The driver's mixing rate. Fixed-frequency voices play at this rate.
    pub sample_rate: u32,
    /// Direct-sound channels, 1..=12.
    pub direct_channels: usize,
    /// Reverb algorithm; `None` disables reverb.
    pub reverb: Option<ReverbKind>,
    /// Intensity used when the song header does not enable reverb itself.
    pub reverb_intensity: u8,
    /// Direct-sound master volume, 0..=15.
    pub pcm_volume: u8,
    /// Whether the loader expects delta-compressed samples.
    pub compressed_samples: bool,
}

impl Default for M4aConfig {
    fn default() -> Self {
        Self {
            sample_rate: 13_379,
            direct_channels: 8,
            reverb: Some(ReverbKind::Normal),
            reverb_intensity: 0,
            pcm_volume: 15,
            compressed_samples: false,
        }
    }
}

impl M4aConfig {
    /// Maximum direct-sound channels.
    pub const MAX_DIRECT_CHANNELS: usize = 12;
}
