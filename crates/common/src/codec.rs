//! Video codec and chroma layout enums.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    Mpeg2,
    Mpeg4,
    Vc1,
    H264,
    H265,
    Mjpeg,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Every codec the bridge knows how to name.
    pub const ALL: [VideoCodec; 9] = [
        Self::Mpeg2,
        Self::Mpeg4,
        Self::Vc1,
        Self::H264,
        Self::H265,
        Self::Mjpeg,
        Self::Vp8,
        Self::Vp9,
        Self::Av1,
    ];

    /// Human-readable codec name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Mpeg2 => "MPEG-2",
            Self::Mpeg4 => "MPEG-4 Part 2",
            Self::Vc1 => "VC-1",
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Mjpeg => "Motion JPEG",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
        }
    }

    /// Whether the driver may absorb coded-size growth past the decoder's
    /// declared maximum without an explicit reconfigure.
    pub fn driver_handles_growth(self) -> bool {
        matches!(self, Self::Vp9)
    }
}

/// Chroma subsampling layout reported by the bitstream parser.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaFormat {
    Monochrome,
    #[default]
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaFormat {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Monochrome => "4:0:0",
            Self::Yuv420 => "4:2:0",
            Self::Yuv422 => "4:2:2",
            Self::Yuv444 => "4:4:4",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_display() {
        assert_eq!(VideoCodec::H264.display_name(), "H.264/AVC");
        assert_eq!(VideoCodec::H265.display_name(), "H.265/HEVC");
    }

    #[test]
    fn only_vp9_lets_driver_absorb_growth() {
        let absorbing: Vec<_> = VideoCodec::ALL
            .iter()
            .filter(|c| c.driver_handles_growth())
            .collect();
        assert_eq!(absorbing, vec![&VideoCodec::Vp9]);
    }

    #[test]
    fn chroma_default_is_420() {
        assert_eq!(ChromaFormat::default(), ChromaFormat::Yuv420);
        assert_eq!(ChromaFormat::Yuv420.display_name(), "4:2:0");
    }
}
