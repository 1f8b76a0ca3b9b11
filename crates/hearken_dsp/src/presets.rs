//! Built-in Band Presets

use crate::filter_bank::{BandSetting, BAND_FREQUENCIES};

/// Named preset with one gain per default band
pub type Preset = (&'static str, [f32; 6]);

/// Gains the settings screen starts from: every other band lifted by 6 dB
pub const UI_DEFAULT: [f32; 6] = [0.0, 6.0, 0.0, 6.0, 0.0, 6.0];

/// List of built-in presets
pub const PRESETS: &[Preset] = &[
    ("Flat", [0.0; 6]),
    ("Speech", UI_DEFAULT),
];

/// Default bands carrying the gains of the named preset (case-insensitive)
pub fn preset_bands(name: &str) -> Option<Vec<BandSetting>> {
    let (_, gains) = PRESETS
        .iter()
        .find(|(preset, _)| preset.eq_ignore_ascii_case(name))?;
    Some(
        BAND_FREQUENCIES
            .iter()
            .zip(gains.iter())
            .map(|(&frequency_hz, &gain_db)| BandSetting::new(frequency_hz, gain_db))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_preset_matches_ui_default() {
        let bands = preset_bands("speech").unwrap();
        let pairs: Vec<(u32, f32)> = bands.iter().map(|b| (b.frequency_hz, b.gain_db)).collect();
        assert_eq!(
            pairs,
            vec![(250, 0.0), (500, 6.0), (1000, 0.0), (2000, 6.0), (4000, 0.0), (8000, 6.0)]
        );
    }

    #[test]
    fn test_unknown_preset() {
        assert!(preset_bands("Bass Boost").is_none());
        assert!(preset_bands("FLAT").unwrap().iter().all(|b| b.gain_db == 0.0));
    }
}
