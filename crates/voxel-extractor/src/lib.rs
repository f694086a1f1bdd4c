//! Voxel grid extraction
//!
//! Materializes the typed sample grid from a parsed dataset and its source
//! buffer. The grid is read-only after extraction and carries the derived
//! slice count; analysis downstream reads the first plane only.

pub mod window;

use cbct_common::{PipelineError, Result};
use cbct_container_parser::TaggedDataset;
use tracing::debug;

/// Binary interpretation of the raw pixel payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    /// 8-bit unsigned samples
    Eight,
    /// 16-bit unsigned little-endian samples
    Sixteen,
}

impl SampleWidth {
    /// Select the decode width from the bits-allocated element
    #[must_use]
    pub fn from_bits_allocated(bits: u16) -> Self {
        if bits == 8 {
            Self::Eight
        } else {
            Self::Sixteen
        }
    }

    /// Bits per sample
    #[must_use]
    pub fn bits(self) -> u16 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    /// Bytes per sample
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }

    /// Largest representable sample value
    #[must_use]
    pub fn max_value(self) -> u16 {
        match self {
            Self::Eight => u16::from(u8::MAX),
            Self::Sixteen => u16::MAX,
        }
    }
}

/// Rectangular grid of non-negative integer samples
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    width: usize,
    height: usize,
    slice_count: usize,
    sample_width: SampleWidth,
    samples: Vec<u16>,
}

impl VoxelGrid {
    /// Build a grid directly from decoded samples
    ///
    /// # Errors
    ///
    /// Returns `DegenerateGrid` when the plane is empty or the samples do
    /// not cover a single full slice.
    pub fn new(
        width: usize,
        height: usize,
        sample_width: SampleWidth,
        samples: Vec<u16>,
    ) -> Result<Self> {
        let plane = width * height;
        let slice_count = if plane == 0 { 0 } else { samples.len() / plane };

        if plane == 0 || slice_count == 0 {
            return Err(PipelineError::DegenerateGrid {
                width,
                height,
                slice_count,
            });
        }

        Ok(Self {
            width,
            height,
            slice_count,
            sample_width,
            samples,
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of whole slices covered by the decoded samples
    #[must_use]
    pub fn slice_count(&self) -> usize {
        self.slice_count
    }

    #[must_use]
    pub fn sample_width(&self) -> SampleWidth {
        self.sample_width
    }

    /// All decoded samples, slice-major
    #[must_use]
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// The first slice's worth of samples, row-major
    #[must_use]
    pub fn plane(&self) -> &[u16] {
        &self.samples[..self.width * self.height]
    }

    /// Sample at `(x, y)` on the first plane
    #[must_use]
    pub fn sample(&self, x: usize, y: usize) -> u16 {
        self.samples[y * self.width + x]
    }

    /// Largest sample on the first plane
    #[must_use]
    pub fn max_sample(&self) -> u16 {
        self.plane().iter().copied().max().unwrap_or(0)
    }
}

/// Materialize the voxel grid described by a parsed dataset
///
/// Reads bits-allocated to choose 8-bit vs 16-bit decoding and derives the
/// slice count from the payload length.
///
/// # Errors
///
/// Returns `MalformedContainer` when the pixel descriptor points outside
/// the source buffer, and `DegenerateGrid` for an empty plane or a payload
/// shorter than one slice.
pub fn extract(dataset: &TaggedDataset, raw_bytes: &[u8]) -> Result<VoxelGrid> {
    let descriptor = dataset.pixel_data;
    let end = descriptor.byte_offset + descriptor.byte_length;
    if end > raw_bytes.len() {
        return Err(PipelineError::MalformedContainer(format!(
            "pixel descriptor overruns buffer ({} bytes at offset {})",
            descriptor.byte_length, descriptor.byte_offset
        )));
    }

    let width = dataset.columns();
    let height = dataset.rows();
    let sample_width = SampleWidth::from_bits_allocated(dataset.bits_allocated());
    let payload = &raw_bytes[descriptor.byte_offset..end];

    let samples: Vec<u16> = match sample_width {
        SampleWidth::Eight => payload.iter().map(|&b| u16::from(b)).collect(),
        SampleWidth::Sixteen => payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    };

    let grid = VoxelGrid::new(width, height, sample_width, samples)?;

    debug!(
        width = grid.width(),
        height = grid.height(),
        slices = grid.slice_count(),
        bits = grid.sample_width().bits(),
        "extracted voxel grid"
    );

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbct_container_parser::{parse, tags};

    fn container_with(rows: u16, cols: u16, bits: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        for (tag, value) in [
            (tags::ROWS, rows),
            (tags::COLUMNS, cols),
            (tags::BITS_ALLOCATED, bits),
        ] {
            bytes.extend_from_slice(&tag.0.to_le_bytes());
            bytes.extend_from_slice(&tag.1.to_le_bytes());
            bytes.extend_from_slice(b"US");
            bytes.extend_from_slice(&2u16.to_le_bytes());
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&tags::PIXEL_DATA.0.to_le_bytes());
        bytes.extend_from_slice(&tags::PIXEL_DATA.1.to_le_bytes());
        bytes.extend_from_slice(b"OW");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_extract_sixteen_bit() {
        let payload: Vec<u8> = [1000u16, 1200, 800, 1500]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let bytes = container_with(2, 2, 16, &payload);
        let dataset = parse(&bytes).unwrap();

        let grid = extract(&dataset, &bytes).unwrap();

        assert_eq!(grid.width(), 2);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.slice_count(), 1);
        assert_eq!(grid.sample_width(), SampleWidth::Sixteen);
        assert_eq!(grid.plane(), &[1000, 1200, 800, 1500]);
        assert_eq!(grid.sample(1, 1), 1500);
        assert_eq!(grid.max_sample(), 1500);
    }

    #[test]
    fn test_extract_eight_bit() {
        let bytes = container_with(2, 2, 8, &[10, 20, 30, 40]);
        let dataset = parse(&bytes).unwrap();

        let grid = extract(&dataset, &bytes).unwrap();

        assert_eq!(grid.sample_width(), SampleWidth::Eight);
        assert_eq!(grid.plane(), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_multi_slice_payload_keeps_first_plane() {
        // Two full 2x2 slices; the second is carried but not analyzed.
        let payload: Vec<u8> = (0u16..8).flat_map(|s| (s * 100).to_le_bytes()).collect();
        let bytes = container_with(2, 2, 16, &payload);
        let dataset = parse(&bytes).unwrap();

        let grid = extract(&dataset, &bytes).unwrap();

        assert_eq!(grid.slice_count(), 2);
        assert_eq!(grid.plane(), &[0, 100, 200, 300]);
        assert_eq!(grid.samples().len(), 8);
    }

    #[test]
    fn test_short_payload_is_degenerate() {
        // 4x4 grid declared, but only 2 samples present.
        let payload: Vec<u8> = [1000u16, 1000].iter().flat_map(|s| s.to_le_bytes()).collect();
        let bytes = container_with(4, 4, 16, &payload);
        let dataset = parse(&bytes).unwrap();

        let err = extract(&dataset, &bytes).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DegenerateGrid {
                width: 4,
                height: 4,
                slice_count: 0
            }
        ));
    }

    #[test]
    fn test_zero_area_grid_is_degenerate() {
        let bytes = container_with(0, 4, 16, &[0, 0]);
        let dataset = parse(&bytes).unwrap();

        let err = extract(&dataset, &bytes).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateGrid { .. }));
    }

    #[test]
    fn test_sample_width_selection() {
        assert_eq!(SampleWidth::from_bits_allocated(8), SampleWidth::Eight);
        assert_eq!(SampleWidth::from_bits_allocated(16), SampleWidth::Sixteen);
        // Anything else falls back to the 16-bit default.
        assert_eq!(SampleWidth::from_bits_allocated(12), SampleWidth::Sixteen);
        assert_eq!(SampleWidth::Eight.max_value(), 255);
        assert_eq!(SampleWidth::Sixteen.bytes(), 2);
    }
}
