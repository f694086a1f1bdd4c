//! Shared helpers for the integration suites: synthetic explicit-VR
//! container construction.

use cbct_container_parser::{tags, Tag};

/// Builder for synthetic explicit-VR little-endian scan files
pub struct SyntheticScan {
    bytes: Vec<u8>,
}

impl SyntheticScan {
    #[must_use]
    pub fn new() -> Self {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        Self { bytes }
    }

    fn element_header(&mut self, tag: Tag, vr: &[u8; 2]) {
        self.bytes.extend_from_slice(&tag.0.to_le_bytes());
        self.bytes.extend_from_slice(&tag.1.to_le_bytes());
        self.bytes.extend_from_slice(vr);
    }

    /// Append a short-form element
    #[must_use]
    pub fn element(mut self, tag: Tag, vr: &[u8; 2], value: &[u8]) -> Self {
        self.element_header(tag, vr);
        self.bytes
            .extend_from_slice(&(value.len() as u16).to_le_bytes());
        self.bytes.extend_from_slice(value);
        self
    }

    /// Append a 16-bit unsigned element
    #[must_use]
    pub fn us(self, tag: Tag, value: u16) -> Self {
        self.element(tag, b"US", &value.to_le_bytes())
    }

    /// Declare grid dimensions and sample width
    #[must_use]
    pub fn dimensions(self, rows: u16, columns: u16, bits_allocated: u16) -> Self {
        self.us(tags::ROWS, rows)
            .us(tags::COLUMNS, columns)
            .us(tags::BITS_ALLOCATED, bits_allocated)
    }

    /// Append the pixel-data element from 16-bit samples
    #[must_use]
    pub fn pixels_u16(mut self, samples: &[u16]) -> Self {
        self.element_header(tags::PIXEL_DATA, b"OW");
        self.bytes.extend_from_slice(&[0, 0]);
        self.bytes
            .extend_from_slice(&((samples.len() * 2) as u32).to_le_bytes());
        for sample in samples {
            self.bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for SyntheticScan {
    fn default() -> Self {
        Self::new()
    }
}

/// The 4x4 16-bit reference grid used across the suites
pub const REFERENCE_SAMPLES: [u16; 16] = [
    1000, 1000, 1000, 1000,
    1200, 1200, 1200, 1200,
    800, 800, 800, 800,
    1500, 1500, 1500, 1500,
];

/// Complete reference scan: metadata, dimensions, and pixel payload
#[must_use]
pub fn reference_scan() -> Vec<u8> {
    SyntheticScan::new()
        .element(tags::PATIENT_NAME, b"PN", b"DOE^JOHN")
        .element(tags::MODALITY, b"CS", b"CT")
        .dimensions(4, 4, 16)
        .pixels_u16(&REFERENCE_SAMPLES)
        .build()
}

/// Write a scan to a unique temp file, returning its path
#[must_use]
pub fn write_scan(name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path =
        std::env::temp_dir().join(format!("cbct-suite-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).expect("failed to write synthetic scan");
    path
}
