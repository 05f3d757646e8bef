// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The element flowing through processor queues: a media frame with plane descriptors
//! and timestamps. See [`Frame`] for details.

use smallvec::SmallVec;
use strum_macros::{Display, EnumString};

/// Maximum number of plane descriptors a frame carries.
pub const MAX_PLANES: usize = 8;

/// Advisory maximum frame width in samples. Not enforced by the runtime.
pub const MAX_WIDTH: usize = 4096;

/// Advisory maximum frame height in samples. Not enforced by the runtime.
pub const MAX_HEIGHT: usize = 4096;

/// Sample-format tag. Tags outside this set are type-private and travel as
/// [`SampleFormat::Undef`] with the interpretation left to the processor pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
pub enum SampleFormat {
    #[default]
    #[strum(serialize = "undef")]
    Undef,
    #[strum(serialize = "yuv420p")]
    Yuv420p,
    #[strum(serialize = "s16")]
    S16,
    #[strum(serialize = "s16p")]
    S16p,
}

/// One plane of a [`Frame`], described as a window into the frame's data buffer.
///
/// Invariants (from the wire ancestry):
/// - `height == 1` means the plane is one-dimensional and `width` is its byte length.
/// - `width == 0` terminates the plane list; later entries are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    /// Byte offset of the plane's first line inside [`Frame::data`].
    pub offset: usize,
    /// Line stride in bytes (distance between the starts of consecutive lines).
    pub stride: usize,
    /// Samples per line; byte length of the plane when `height == 1`.
    pub width: usize,
    /// Number of lines.
    pub height: usize,
}

/// A media frame: one owned data buffer, up to [`MAX_PLANES`] plane descriptors into
/// it, and presentation metadata.
///
/// Frames are opaque to the runtime - queues move them, the default I/O hooks account
/// their payload size and timestamps, and everything else is between the producing and
/// consuming processors. [`Clone`] is the default element duplicator and [`Drop`] the
/// release, matching the dup/release hook pair of the C hook table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Primary data buffer all planes point into.
    pub data: Vec<u8>,
    /// Plane descriptors; entries past the first `width == 0` are dead.
    pub planes: SmallVec<[Plane; MAX_PLANES]>,
    pub sample_format: SampleFormat,
    /// Samples per second (or frames per second for video).
    pub sampling_rate: u32,
    /// Presentation timestamp in microseconds.
    pub pts: i64,
    /// Decoding timestamp in microseconds.
    pub dts: i64,
    /// Elementary-stream id.
    pub es_id: i32,
}

impl Frame {
    /// A one-dimensional frame: a single plane covering `data` entirely.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>, pts: i64) -> Self {
        let len = data.len();
        let mut planes = SmallVec::new();
        planes.push(Plane { offset: 0, stride: len, width: len, height: 1 });
        Self {
            data,
            planes,
            sample_format: SampleFormat::Undef,
            sampling_rate: 0,
            pts,
            dts: pts,
            es_id: 0,
        }
    }

    /// A planar frame with explicit plane descriptors.
    #[must_use]
    pub fn with_planes(
        data: Vec<u8>,
        planes: SmallVec<[Plane; MAX_PLANES]>,
        sample_format: SampleFormat,
        pts: i64,
    ) -> Self {
        Self {
            data,
            planes,
            sample_format,
            sampling_rate: 0,
            pts,
            dts: pts,
            es_id: 0,
        }
    }

    /// Live plane descriptors: the prefix of [`Self::planes`] before the first
    /// `width == 0` terminator, capped at [`MAX_PLANES`].
    pub fn live_planes(&self) -> impl Iterator<Item = &Plane> {
        self.planes
            .iter()
            .take(MAX_PLANES)
            .take_while(|plane| plane.width > 0)
    }

    /// Payload size in bytes: Σ `width · height` over the live planes, honoring the
    /// 1-D rule (`height == 1` ⇒ `width` is the byte length).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.live_planes()
            .map(|plane| plane.width * plane.height)
            .sum()
    }

    /// Borrow of plane `index`'s bytes, line by line contiguous only when
    /// `stride == width`. Returns `None` for a dead plane or an out-of-bounds window.
    #[must_use]
    pub fn plane_data(&self, index: usize) -> Option<&[u8]> {
        let plane = self.planes.get(index)?;
        if plane.width == 0 {
            return None;
        }
        let len = if plane.height <= 1 {
            plane.width
        } else {
            // Full lines at `stride`, except the last line which only needs `width`.
            plane.stride * (plane.height - 1) + plane.width
        };
        self.data.get(plane.offset..plane.offset + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn one_dimensional_frame_payload_is_byte_length() {
        let frame = Frame::from_bytes(vec![0u8; 1500], 100);
        assert_eq!(frame.payload_len(), 1500);
        assert_eq!(frame.plane_data(0).unwrap().len(), 1500);
    }

    #[test]
    fn zero_width_terminates_plane_list() {
        let planes: SmallVec<[Plane; MAX_PLANES]> = smallvec![
            Plane { offset: 0, stride: 16, width: 16, height: 4 },
            Plane { offset: 64, stride: 0, width: 0, height: 0 },
            Plane { offset: 64, stride: 8, width: 8, height: 2 },
        ];
        let frame =
            Frame::with_planes(vec![0u8; 128], planes, SampleFormat::Yuv420p, 0);
        // The third plane sits behind the terminator and must not count.
        assert_eq!(frame.payload_len(), 64);
        assert_eq!(frame.live_planes().count(), 1);
        assert!(frame.plane_data(1).is_none());
    }

    #[test]
    fn plane_data_respects_stride() {
        let planes: SmallVec<[Plane; MAX_PLANES]> = smallvec![Plane {
            offset: 0,
            stride: 8,
            width: 6,
            height: 3,
        }];
        let frame = Frame::with_planes(vec![0u8; 24], planes, SampleFormat::S16, 0);
        // 2 full strides + 1 final width.
        assert_eq!(frame.plane_data(0).unwrap().len(), 8 * 2 + 6);
        assert_eq!(frame.payload_len(), 18);
    }

    #[test]
    fn sample_format_round_trips_through_names() {
        assert_eq!(SampleFormat::Yuv420p.to_string(), "yuv420p");
        assert_eq!("s16p".parse::<SampleFormat>().unwrap(), SampleFormat::S16p);
        assert!("bogus".parse::<SampleFormat>().is_err());
    }
}
