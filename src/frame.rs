//! Owned media frame handed through the processor-interface hooks.

/// One plane of frame data.
///
/// Planar formats carry one plane per component; packed formats carry a
/// single plane. `linesize` may exceed `width` when rows are padded.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Plane {
    /// Raw plane bytes, `linesize * height` of them.
    pub data: Vec<u8>,
    /// Bytes per row, including padding.
    pub linesize: usize,
    /// Visible width in samples.
    pub width: usize,
    /// Visible height in rows.
    pub height: usize,
}

/// One frame of media data as the surrounding pipeline sees it.
///
/// This is the logical element the default enqueue/dequeue hooks of the
/// processor interface duplicate and transport through a FIFO; the FIFO
/// itself never interprets it. `Clone` produces an independent deep copy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MediaFrame {
    /// Data planes.
    pub planes: Vec<Plane>,
    /// Sample format discriminator defined by the surrounding pipeline.
    pub sample_fmt: i32,
    /// Presentation timestamp in stream time-base units.
    pub pts: i64,
    /// Elementary-stream identifier.
    pub es_id: i32,
}

impl MediaFrame {
    /// Convenience constructor for a single packed plane.
    pub fn packed(data: Vec<u8>, width: usize, height: usize) -> Self {
        let linesize = if height > 0 { data.len() / height } else { 0 };
        Self {
            planes: vec![Plane {
                data,
                linesize,
                width,
                height,
            }],
            ..Self::default()
        }
    }
}
