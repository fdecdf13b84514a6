//! Decode-surface sizing and decode-order bookkeeping.
//!
//! The surface count sent to the hardware also sizes the session's
//! per-picture tables, so the two always agree.

use tracing::warn;

use nvb_common::{Resolution, VideoCodec};

/// HEVC level 6.2 maximum luma picture size in samples.
const HEVC_MAX_LUMA_PS: u64 = 35_651_584;
/// HEVC maximum DPB size at the largest picture size.
const HEVC_MAX_DPB_PIC_BUF: u32 = 6;
/// Extra surfaces on top of the DPB for pictures waiting to be displayed.
const DISPLAY_MARGIN: u32 = 4;

/// Number of decode surfaces to reserve for `codec` at `coded` size.
pub fn decode_surface_count(codec: VideoCodec, coded: Resolution) -> u32 {
    match codec {
        VideoCodec::Vp9 => 12,
        VideoCodec::H264 => 20,
        VideoCodec::H265 => {
            let samples = coded.area();
            let max_dpb = if samples <= HEVC_MAX_LUMA_PS >> 2 {
                HEVC_MAX_DPB_PIC_BUF * 4
            } else if samples <= HEVC_MAX_LUMA_PS >> 1 {
                HEVC_MAX_DPB_PIC_BUF * 2
            } else if samples <= (HEVC_MAX_LUMA_PS * 3) >> 2 {
                (HEVC_MAX_DPB_PIC_BUF * 4) / 3
            } else {
                HEVC_MAX_DPB_PIC_BUF
            };
            max_dpb.min(16) + DISPLAY_MARGIN
        }
        _ => 8,
    }
}

/// Fixed-capacity map from picture index to the order pictures were
/// submitted for decode.
#[derive(Clone, Debug)]
pub struct DecodeOrderTable {
    order: Vec<Option<u64>>,
    next: u64,
}

impl DecodeOrderTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            order: vec![None; capacity as usize],
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.order.len()
    }

    /// Resize for a new surface count, forgetting every recorded entry.
    pub fn resize(&mut self, capacity: u32) {
        self.order.clear();
        self.order.resize(capacity as usize, None);
    }

    /// Record that `picture_index` was just submitted. Returns its decode
    /// order number, or `None` if the index is outside the table.
    pub fn record(&mut self, picture_index: i32) -> Option<u64> {
        let slot = usize::try_from(picture_index)
            .ok()
            .and_then(|i| self.order.get_mut(i));
        match slot {
            Some(entry) => {
                let n = self.next;
                *entry = Some(n);
                self.next += 1;
                Some(n)
            }
            None => {
                warn!(
                    picture_index,
                    capacity = self.order.len(),
                    "Picture index outside decode-order table"
                );
                None
            }
        }
    }

    pub fn lookup(&self, picture_index: i32) -> Option<u64> {
        usize::try_from(picture_index)
            .ok()
            .and_then(|i| self.order.get(i).copied().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_counts_per_codec() {
        let hd = Resolution::new(1920, 1080);
        assert_eq!(decode_surface_count(VideoCodec::H264, hd), 20);
        assert_eq!(decode_surface_count(VideoCodec::Vp9, hd), 12);
        assert_eq!(decode_surface_count(VideoCodec::Av1, hd), 8);
        assert_eq!(decode_surface_count(VideoCodec::Mpeg2, hd), 8);
    }

    #[test]
    fn hevc_count_shrinks_with_picture_size() {
        // Small pictures: DPB 24 capped at 16, plus margin.
        assert_eq!(decode_surface_count(VideoCodec::H265, Resolution::new(1920, 1080)), 20);
        // 4096x2304 = 9_437_184 samples: above a quarter, below half.
        assert_eq!(decode_surface_count(VideoCodec::H265, Resolution::new(4096, 2304)), 16);
        // 8192x3072 = 25_165_824 samples: below three quarters.
        assert_eq!(decode_surface_count(VideoCodec::H265, Resolution::new(8192, 3072)), 12);
        // 8192x4320 = 35_389_440 samples: largest class.
        assert_eq!(decode_surface_count(VideoCodec::H265, Resolution::new(8192, 4320)), 10);
    }

    #[test]
    fn decode_order_records_sequence() {
        let mut table = DecodeOrderTable::new(4);
        assert_eq!(table.record(2), Some(0));
        assert_eq!(table.record(0), Some(1));
        assert_eq!(table.record(2), Some(2));
        assert_eq!(table.lookup(2), Some(2));
        assert_eq!(table.lookup(0), Some(1));
        assert_eq!(table.lookup(1), None);
    }

    #[test]
    fn out_of_range_index_ignored() {
        let mut table = DecodeOrderTable::new(2);
        assert_eq!(table.record(5), None);
        assert_eq!(table.record(-1), None);
        assert_eq!(table.lookup(5), None);
    }

    #[test]
    fn resize_matches_surface_count() {
        let mut table = DecodeOrderTable::new(decode_surface_count(VideoCodec::H264, Resolution::new(64, 64)));
        assert_eq!(table.capacity(), 20);
        table.record(3);
        table.resize(decode_surface_count(VideoCodec::Vp9, Resolution::new(64, 64)));
        assert_eq!(table.capacity(), 12);
        assert_eq!(table.lookup(3), None);
    }
}
