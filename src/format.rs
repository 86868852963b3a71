//! Format negotiation.
//!
//! Capture hardware exposes a fixed ladder of encoding profiles. A requested frame
//! height is mapped onto that ladder and expanded into the media-format descriptor
//! used to configure the source stage and the sample grabber.

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// 100-ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Fixed capture rate of the supported devices.
pub const FRAMES_PER_SECOND: u32 = 30;

/// Duration of one frame at 30 fps in 100-ns ticks.
pub const FRAME_DURATION_HNS: i64 = TICKS_PER_SECOND / FRAMES_PER_SECOND as i64;

/// Bytes per pixel of packed 4:2:2.
pub const YUV_BYTES_PER_PIXEL: u32 = 2;

/// What happens to a height that is not on the profile ladder.
///
/// Unmatched heights configure the 1080 profile instead of refusing to start.
/// Pending product confirmation; kept as a named policy so it can be found.
pub const UNMATCHED_HEIGHT_POLICY: EncodingProfile = EncodingProfile::P1080;

/// Hardware encoding profiles, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingProfile {
    P240,
    P360,
    P480,
    P720,
    P1080,
}

impl EncodingProfile {
    pub const LADDER: [EncodingProfile; 5] = [
        EncodingProfile::P240,
        EncodingProfile::P360,
        EncodingProfile::P480,
        EncodingProfile::P720,
        EncodingProfile::P1080,
    ];

    pub fn height(self) -> u32 {
        match self {
            EncodingProfile::P240 => 240,
            EncodingProfile::P360 => 360,
            EncodingProfile::P480 => 480,
            EncodingProfile::P720 => 720,
            EncodingProfile::P1080 => 1080,
        }
    }

    /// 16:9 width, rounded to an even pixel count for 4:2:2 packing.
    pub fn width(self) -> u32 {
        match self {
            EncodingProfile::P240 => 426,
            EncodingProfile::P360 => 640,
            EncodingProfile::P480 => 854,
            EncodingProfile::P720 => 1280,
            EncodingProfile::P1080 => 1920,
        }
    }

    /// Exact ladder match, or `None`.
    pub fn for_height(height: u32) -> Option<Self> {
        Self::LADDER
            .into_iter()
            .find(|profile| profile.height() == height)
    }
}

/// Pixel layout of delivered frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Packed 4:2:2, U Y0 V Y1.
    Uyvy,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelLayout::Uyvy => YUV_BYTES_PER_PIXEL,
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(self, PixelLayout::Uyvy)
    }
}

/// Media-format descriptor negotiated between the source and the grabber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub profile: EncodingProfile,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub bytes_per_pixel: u32,
    /// Frame period in 100-ns ticks.
    pub frame_duration: i64,
}

impl FrameFormat {
    pub fn for_profile(profile: EncodingProfile) -> Self {
        let layout = PixelLayout::Uyvy;
        Self {
            profile,
            width: profile.width(),
            height: profile.height(),
            layout,
            bytes_per_pixel: layout.bytes_per_pixel(),
            frame_duration: FRAME_DURATION_HNS,
        }
    }

    /// Row length in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    /// Fixed size of one sample in bytes.
    pub fn sample_size(&self) -> usize {
        self.stride() * self.height as usize
    }

    pub fn frames_per_second(&self) -> u32 {
        (TICKS_PER_SECOND / self.frame_duration) as u32
    }

    /// Fails unless `received` matches the fixed sample size.
    pub fn check_sample_size(&self, stage: &str, received: usize) -> Result<()> {
        let expected = self.sample_size();
        if expected != received {
            return Err(CaptureError::SampleSizeMismatch {
                stage: stage.to_string(),
                expected,
                actual: received,
            });
        }
        Ok(())
    }
}

/// Map a requested height onto the hardware ladder.
///
/// Heights on the ladder select their own profile; anything else gets
/// [`UNMATCHED_HEIGHT_POLICY`].
pub fn resolve_format(requested_height: u32) -> FrameFormat {
    let profile = EncodingProfile::for_height(requested_height).unwrap_or_else(|| {
        log::warn!(
            "format: height {} is not a hardware profile, using {}p",
            requested_height,
            UNMATCHED_HEIGHT_POLICY.height()
        );
        UNMATCHED_HEIGHT_POLICY
    });
    FrameFormat::for_profile(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_heights_resolve_exactly() {
        for height in [240, 360, 480, 720, 1080] {
            let format = resolve_format(height);
            assert_eq!(format.height, height);
            assert_eq!(format.profile.height(), height);
        }
    }

    #[test]
    fn unmatched_heights_fall_back_to_1080() {
        for height in [0, 1, 239, 500, 719, 1081, 2160, u32::MAX] {
            let format = resolve_format(height);
            assert_eq!(format.profile, EncodingProfile::P1080);
            assert_eq!(format.width, 1920);
            assert_eq!(format.height, 1080);
        }
    }

    #[test]
    fn frame_duration_is_thirty_fps() {
        assert_eq!(FRAME_DURATION_HNS, 333_333);
        let format = resolve_format(720);
        assert_eq!(format.frame_duration, FRAME_DURATION_HNS);
        assert_eq!(format.frames_per_second(), 30);
    }

    #[test]
    fn sample_size_is_width_height_bpp() {
        let format = resolve_format(1080);
        assert_eq!(format.stride(), 1920 * 2);
        assert_eq!(format.sample_size(), 1920 * 1080 * 2);
        assert!(format.check_sample_size("grabber", 1920 * 1080 * 2).is_ok());

        let err = format
            .check_sample_size("grabber", 1920 * 1080 * 3)
            .unwrap_err();
        assert_eq!(
            err,
            CaptureError::SampleSizeMismatch {
                stage: "grabber".into(),
                expected: 1920 * 1080 * 2,
                actual: 1920 * 1080 * 3,
            }
        );
    }

    #[test]
    fn widths_are_even() {
        for profile in EncodingProfile::LADDER {
            assert_eq!(profile.width() % 2, 0, "{:?}", profile);
        }
    }
}
