//! Tagged-binary container parser
//!
//! Decodes a DICOM-style explicit-VR little-endian container into a
//! [`TaggedDataset`]: a tag-to-value dictionary plus a descriptor locating
//! the raw pixel payload. The parse is a pure decode with no side effects;
//! pixel samples themselves are materialized later by the voxel extractor.

use std::collections::HashMap;
use std::fmt;

use cbct_common::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Element tag: group and element number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub u16, pub u16);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

/// Well-known element tags
pub mod tags {
    use super::Tag;

    pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
    pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
    pub const MODALITY: Tag = Tag(0x0008, 0x0060);
    pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
    pub const ROWS: Tag = Tag(0x0028, 0x0010);
    pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
    pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
    pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
    pub const RESCALE_INTERCEPT: Tag = Tag(0x0028, 0x1052);
    pub const RESCALE_SLOPE: Tag = Tag(0x0028, 0x1053);
    pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);
}

/// Decoded element value
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Text(String),
    Unsigned(u64),
    Float(f64),
    FloatList(Vec<f64>),
}

/// Location of the raw pixel payload inside the source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelDescriptor {
    pub byte_offset: usize,
    pub byte_length: usize,
}

/// Immutable result of one parse call
#[derive(Debug, Clone)]
pub struct TaggedDataset {
    pub elements: HashMap<Tag, ElementValue>,
    pub pixel_data: PixelDescriptor,
}

impl TaggedDataset {
    /// Textual value of an element, if present and text-typed
    #[must_use]
    pub fn text(&self, tag: Tag) -> Option<&str> {
        match self.elements.get(&tag) {
            Some(ElementValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Unsigned integer value of an element
    #[must_use]
    pub fn unsigned(&self, tag: Tag) -> Option<u64> {
        match self.elements.get(&tag) {
            Some(ElementValue::Unsigned(v)) => Some(*v),
            _ => None,
        }
    }

    /// Floating-point value of an element (first entry for lists)
    #[must_use]
    pub fn float(&self, tag: Tag) -> Option<f64> {
        match self.elements.get(&tag)? {
            ElementValue::Float(v) => Some(*v),
            ElementValue::Unsigned(v) => Some(*v as f64),
            ElementValue::FloatList(vs) => vs.first().copied(),
            ElementValue::Text(_) => None,
        }
    }

    /// Image height in rows (default 512 when absent)
    #[must_use]
    pub fn rows(&self) -> usize {
        self.unsigned(tags::ROWS).unwrap_or(512) as usize
    }

    /// Image width in columns (default 512 when absent)
    #[must_use]
    pub fn columns(&self) -> usize {
        self.unsigned(tags::COLUMNS).unwrap_or(512) as usize
    }

    /// Bits allocated per sample (default 16 when absent)
    #[must_use]
    pub fn bits_allocated(&self) -> u16 {
        self.unsigned(tags::BITS_ALLOCATED).unwrap_or(16) as u16
    }
}

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// VRs that use the 12-byte header form (2 reserved bytes + 32-bit length)
const LONG_VRS: [[u8; 2]; 6] = [*b"OB", *b"OW", *b"OF", *b"SQ", *b"UT", *b"UN"];

fn malformed(msg: impl Into<String>) -> PipelineError {
    PipelineError::MalformedContainer(msg.into())
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Parse a tagged-binary container into a structured dataset
///
/// # Errors
///
/// Returns `MalformedContainer` when the buffer cannot be decoded as an
/// explicit-VR little-endian container (missing magic, truncated element,
/// invalid VR, encapsulated pixel data), and `MissingPixelData` when the
/// walk completes without locating a pixel-data element.
pub fn parse(bytes: &[u8]) -> Result<TaggedDataset> {
    if bytes.len() < PREAMBLE_LEN + MAGIC.len() {
        return Err(malformed(format!(
            "buffer too short for preamble and magic: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()] != MAGIC {
        return Err(malformed("DICM magic not found after preamble"));
    }

    let mut elements = HashMap::new();
    let mut pixel_data = None;
    let mut cursor = PREAMBLE_LEN + MAGIC.len();

    while cursor < bytes.len() {
        if cursor + 8 > bytes.len() {
            return Err(malformed(format!(
                "truncated element header at offset {cursor}"
            )));
        }

        let tag = Tag(read_u16(bytes, cursor), read_u16(bytes, cursor + 2));
        let vr = [bytes[cursor + 4], bytes[cursor + 5]];
        if !vr.iter().all(u8::is_ascii_uppercase) {
            return Err(malformed(format!(
                "invalid VR {:?} for element {tag} at offset {cursor}",
                vr
            )));
        }

        let (value_offset, value_len) = if LONG_VRS.contains(&vr) {
            if cursor + 12 > bytes.len() {
                return Err(malformed(format!(
                    "truncated long-form header for element {tag}"
                )));
            }
            (cursor + 12, read_u32(bytes, cursor + 8))
        } else {
            (cursor + 8, u32::from(read_u16(bytes, cursor + 6)))
        };

        if value_len == UNDEFINED_LENGTH {
            // Encapsulated pixel data and undefined-length sequences are
            // outside the flat-extraction scope.
            return Err(malformed(format!(
                "undefined-length element {tag} is not supported"
            )));
        }

        let value_end = value_offset + value_len as usize;
        if value_end > bytes.len() {
            return Err(malformed(format!(
                "element {tag} value overruns buffer ({value_len} bytes at offset {value_offset})"
            )));
        }

        if tag == tags::PIXEL_DATA {
            pixel_data = Some(PixelDescriptor {
                byte_offset: value_offset,
                byte_length: value_len as usize,
            });
        } else {
            let value = decode_value(vr, &bytes[value_offset..value_end]);
            elements.insert(tag, value);
        }

        cursor = value_end;
    }

    let pixel_data = pixel_data.ok_or(PipelineError::MissingPixelData)?;

    debug!(
        elements = elements.len(),
        pixel_offset = pixel_data.byte_offset,
        pixel_length = pixel_data.byte_length,
        "parsed container"
    );

    Ok(TaggedDataset {
        elements,
        pixel_data,
    })
}

/// Decode one element value according to its VR
fn decode_value(vr: [u8; 2], raw: &[u8]) -> ElementValue {
    match &vr {
        b"US" if raw.len() >= 2 => ElementValue::Unsigned(u64::from(read_u16(raw, 0))),
        b"UL" if raw.len() >= 4 => ElementValue::Unsigned(u64::from(read_u32(raw, 0))),
        b"FL" if raw.len() >= 4 => ElementValue::Float(f64::from(f32::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3],
        ]))),
        b"FD" if raw.len() >= 8 => ElementValue::Float(f64::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ])),
        b"DS" | b"IS" => decode_numeric_string(raw),
        _ => ElementValue::Text(decode_text(raw)),
    }
}

/// Decimal/integer strings: backslash-separated numbers
fn decode_numeric_string(raw: &[u8]) -> ElementValue {
    let text = decode_text(raw);
    let values: Vec<f64> = text
        .split('\\')
        .filter_map(|part| part.trim().parse::<f64>().ok())
        .collect();

    match values.as_slice() {
        [] => ElementValue::Text(text),
        [single] => ElementValue::Float(*single),
        _ => ElementValue::FloatList(values),
    }
}

/// Text values are space- or null-padded to even length
fn decode_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal explicit-VR writer for synthetic containers
    struct ContainerBuilder {
        bytes: Vec<u8>,
    }

    impl ContainerBuilder {
        fn new() -> Self {
            let mut bytes = vec![0u8; PREAMBLE_LEN];
            bytes.extend_from_slice(MAGIC);
            Self { bytes }
        }

        fn header(&mut self, tag: Tag, vr: &[u8; 2]) {
            self.bytes.extend_from_slice(&tag.0.to_le_bytes());
            self.bytes.extend_from_slice(&tag.1.to_le_bytes());
            self.bytes.extend_from_slice(vr);
        }

        fn short_element(mut self, tag: Tag, vr: &[u8; 2], value: &[u8]) -> Self {
            self.header(tag, vr);
            self.bytes
                .extend_from_slice(&(value.len() as u16).to_le_bytes());
            self.bytes.extend_from_slice(value);
            self
        }

        fn us(self, tag: Tag, value: u16) -> Self {
            self.short_element(tag, b"US", &value.to_le_bytes())
        }

        fn pixel_data(mut self, samples: &[u16]) -> Self {
            self.header(tags::PIXEL_DATA, b"OW");
            self.bytes.extend_from_slice(&[0, 0]);
            self.bytes
                .extend_from_slice(&((samples.len() * 2) as u32).to_le_bytes());
            for sample in samples {
                self.bytes.extend_from_slice(&sample.to_le_bytes());
            }
            self
        }

        fn build(self) -> Vec<u8> {
            self.bytes
        }
    }

    #[test]
    fn test_empty_buffer_is_malformed() {
        let err = parse(&[]).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedContainer(_)));
    }

    #[test]
    fn test_bad_magic_is_malformed() {
        let bytes = vec![0u8; 200];
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedContainer(_)));
    }

    #[test]
    fn test_parse_recovers_metadata_and_pixel_range() {
        let bytes = ContainerBuilder::new()
            .short_element(tags::PATIENT_NAME, b"PN", b"DOE^JANE")
            .short_element(tags::MODALITY, b"CS", b"CT")
            .us(tags::ROWS, 4)
            .us(tags::COLUMNS, 4)
            .us(tags::BITS_ALLOCATED, 16)
            .short_element(tags::RESCALE_INTERCEPT, b"DS", b"-1000 ")
            .pixel_data(&[1000; 16])
            .build();

        let dataset = parse(&bytes).unwrap();

        assert_eq!(dataset.text(tags::PATIENT_NAME), Some("DOE^JANE"));
        assert_eq!(dataset.text(tags::MODALITY), Some("CT"));
        assert_eq!(dataset.rows(), 4);
        assert_eq!(dataset.columns(), 4);
        assert_eq!(dataset.bits_allocated(), 16);
        assert_eq!(dataset.float(tags::RESCALE_INTERCEPT), Some(-1000.0));
        assert_eq!(dataset.pixel_data.byte_length, 32);
        assert_eq!(
            dataset.pixel_data.byte_offset + dataset.pixel_data.byte_length,
            bytes.len()
        );
    }

    #[test]
    fn test_defaults_when_dimensions_absent() {
        let bytes = ContainerBuilder::new().pixel_data(&[0; 4]).build();
        let dataset = parse(&bytes).unwrap();

        assert_eq!(dataset.rows(), 512);
        assert_eq!(dataset.columns(), 512);
        assert_eq!(dataset.bits_allocated(), 16);
    }

    #[test]
    fn test_missing_pixel_data() {
        let bytes = ContainerBuilder::new()
            .us(tags::ROWS, 4)
            .us(tags::COLUMNS, 4)
            .build();

        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::MissingPixelData));
    }

    #[test]
    fn test_truncated_element_is_malformed() {
        let mut bytes = ContainerBuilder::new().us(tags::ROWS, 4).build();
        // Claim an 8-byte value but provide none.
        bytes.extend_from_slice(&tags::COLUMNS.0.to_le_bytes());
        bytes.extend_from_slice(&tags::COLUMNS.1.to_le_bytes());
        bytes.extend_from_slice(b"US");
        bytes.extend_from_slice(&8u16.to_le_bytes());

        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedContainer(_)));
    }

    #[test]
    fn test_encapsulated_pixel_data_is_rejected() {
        let mut builder = ContainerBuilder::new();
        builder.header(tags::PIXEL_DATA, b"OB");
        builder.bytes.extend_from_slice(&[0, 0]);
        builder
            .bytes
            .extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());

        let err = parse(&builder.build()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedContainer(_)));
    }

    #[test]
    fn test_pixel_spacing_float_list() {
        let bytes = ContainerBuilder::new()
            .short_element(tags::PIXEL_SPACING, b"DS", b"0.25\\0.25")
            .pixel_data(&[0; 4])
            .build();

        let dataset = parse(&bytes).unwrap();
        assert_eq!(
            dataset.elements.get(&tags::PIXEL_SPACING),
            Some(&ElementValue::FloatList(vec![0.25, 0.25]))
        );
    }
}
