//! Session configuration accepted at construction time.

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::error::DecodeError;
use crate::types::{Rect, Resolution};

/// Default number of picture buffers (and ring slots) per session.
pub const DEFAULT_BUFFER_DEPTH: usize = 5;

/// Configuration for one decode session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// GPU device index (0 for the first device).
    #[serde(default)]
    pub device_ordinal: usize,
    pub codec: VideoCodec,
    /// Picture-pool depth; also the handoff ring capacity.
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: usize,
    /// Upper bound the decoder is created for, so later in-bounds
    /// resolution changes can be handled with a reconfigure.
    #[serde(default)]
    pub max_resolution: Option<Resolution>,
    /// Crop applied by the decoder before output.
    #[serde(default)]
    pub crop: Option<Rect>,
    /// Scaled output size.
    #[serde(default)]
    pub resize: Option<Resolution>,
    /// Parser display delay in frames (0 = lowest latency).
    #[serde(default)]
    pub max_display_delay: u32,
}

fn default_buffer_depth() -> usize {
    DEFAULT_BUFFER_DEPTH
}

impl SessionConfig {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            device_ordinal: 0,
            codec,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            max_resolution: None,
            crop: None,
            resize: None,
            max_display_delay: 0,
        }
    }

    pub fn with_device(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }

    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth;
        self
    }

    pub fn with_max_resolution(mut self, max: Resolution) -> Self {
        self.max_resolution = Some(max);
        self
    }

    pub fn with_crop(mut self, crop: Rect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_resize(mut self, size: Resolution) -> Self {
        self.resize = Some(size);
        self
    }

    /// Reject configurations no session could run with.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.buffer_depth == 0 {
            return Err(DecodeError::InvalidConfig(
                "buffer_depth must be > 0".to_string(),
            ));
        }
        if let Some(crop) = self.crop {
            if crop.is_empty() || crop.left < 0 || crop.top < 0 {
                return Err(DecodeError::InvalidConfig(format!(
                    "crop rectangle {crop} is empty or negative"
                )));
            }
        }
        if let Some(size) = self.resize {
            if size.is_empty() {
                return Err(DecodeError::InvalidConfig(format!(
                    "resize target {size} is empty"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON session description.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| DecodeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_match_new() {
        let config = SessionConfig::from_json(r#"{ "codec": "H264" }"#).unwrap();
        assert_eq!(config, SessionConfig::new(VideoCodec::H264));
        assert_eq!(config.buffer_depth, DEFAULT_BUFFER_DEPTH);
        assert_eq!(config.device_ordinal, 0);
    }

    #[test]
    fn json_with_geometry() {
        let json = r#"{
            "codec": "H265",
            "device_ordinal": 1,
            "buffer_depth": 8,
            "crop": { "left": 0, "top": 0, "right": 1280, "bottom": 720 },
            "resize": { "width": 640, "height": 360 }
        }"#;
        let config = SessionConfig::from_json(json).unwrap();
        assert_eq!(config.device_ordinal, 1);
        assert_eq!(config.crop, Some(Rect::new(0, 0, 1280, 720)));
        assert_eq!(config.resize, Some(Resolution::new(640, 360)));
    }

    #[test]
    fn zero_depth_rejected() {
        let err = SessionConfig::new(VideoCodec::H264)
            .with_buffer_depth(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidConfig(_)));
    }

    #[test]
    fn empty_crop_rejected() {
        let config = SessionConfig::new(VideoCodec::H264).with_crop(Rect::new(10, 10, 10, 40));
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_invalid_config() {
        let err = SessionConfig::from_json("{ codec: }").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidConfig(_)));
    }
}
