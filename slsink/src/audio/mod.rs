//! PCM format description and unit geometry

pub mod format;
pub mod volume;

pub use format::{ChannelLayout, PcmFormat, UnitGeometry, CLOCK_FREQ, PTS_FREQ};
pub use volume::{linear_to_millibels, MILLIBEL_MIN};
