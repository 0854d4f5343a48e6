//! Linear volume to hardware attenuation
//!
//! The hardware volume interface takes an attenuation in millibels (1/100 dB)
//! where 0 is unity gain. UI volume is perceptual, so it goes through a cubic
//! curve before the log conversion.

/// Lowest attenuation the hardware accepts (effectively silence)
pub const MILLIBEL_MIN: i16 = i16::MIN;

/// Convert a linear UI volume (0.0 - 1.0) to millibels
///
/// Values are clamped to [0.0, 1.0]; the result lies in [MILLIBEL_MIN, 0].
pub fn linear_to_millibels(volume: f32) -> i16 {
    let volume = volume.clamp(0.0, 1.0);
    let cubed = volume * volume * volume;
    if cubed <= 0.0 {
        return MILLIBEL_MIN;
    }
    let mb = (2000.0 * cubed.log10()).round();
    mb.clamp(MILLIBEL_MIN as f32, 0.0) as i16
}
