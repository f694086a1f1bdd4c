//! Display windowing for the rendering collaborator
//!
//! A [`DisplayWindow`] maps raw sample intensities onto an 8-bit grayscale
//! ramp. Lookup tables are built once per (window, sample width) pair and
//! reused through a [`WindowLutCache`] with a bounded entry count; the cache
//! is an explicit handle owned by the caller, not process-global state.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use image::GrayImage;
use tracing::debug;

use crate::{SampleWidth, VoxelGrid};

/// Intensity window: center level and full width
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DisplayWindow {
    pub center: f64,
    pub width: f64,
}

impl DisplayWindow {
    /// Build a window; the width must be strictly positive
    #[must_use]
    pub fn new(center: f64, width: f64) -> Option<Self> {
        if width > 0.0 && center.is_finite() && width.is_finite() {
            Some(Self { center, width })
        } else {
            None
        }
    }

    /// Wide window suited to cortical and trabecular bone
    #[must_use]
    pub fn bone() -> Self {
        Self {
            center: 1400.0,
            width: 2400.0,
        }
    }

    fn lower_bound(self) -> f64 {
        self.center - self.width / 2.0
    }

    fn upper_bound(self) -> f64 {
        self.center + self.width / 2.0
    }

    /// Map one sample onto the 8-bit ramp
    #[must_use]
    pub fn apply(self, sample: u16) -> u8 {
        let value = f64::from(sample);
        let lower = self.lower_bound();
        if value <= lower {
            u8::MIN
        } else if value >= self.upper_bound() {
            u8::MAX
        } else {
            ((value - lower) / self.width * 255.0) as u8
        }
    }
}

impl Default for DisplayWindow {
    fn default() -> Self {
        Self::bone()
    }
}

/// Precomputed sample-to-gray table for one window
#[derive(Debug)]
pub struct WindowLut {
    table: Vec<u8>,
}

impl WindowLut {
    /// Build the table covering every representable sample value
    #[must_use]
    pub fn build(window: DisplayWindow, sample_width: SampleWidth) -> Self {
        let entries = usize::from(sample_width.max_value()) + 1;
        let table = (0..entries).map(|s| window.apply(s as u16)).collect();
        Self { table }
    }

    /// Gray level for a sample
    #[must_use]
    pub fn map(&self, sample: u16) -> u8 {
        self.table[usize::from(sample)]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Cache key: window parameters quantized to millis plus sample width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
    center_milli: i64,
    width_milli: i64,
    bits: u16,
}

impl WindowKey {
    fn new(window: DisplayWindow, sample_width: SampleWidth) -> Self {
        Self {
            center_milli: (window.center * 1000.0).round() as i64,
            width_milli: (window.width * 1000.0).round() as i64,
            bits: sample_width.bits(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLutCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded lookup-table cache, evicting oldest entries first
pub struct WindowLutCache {
    entries: HashMap<WindowKey, Arc<WindowLut>>,
    order: VecDeque<WindowKey>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl WindowLutCache {
    /// Create a cache holding at most `capacity` tables
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Fetch the table for a window, building it on first use
    pub fn get_or_build(
        &mut self,
        window: DisplayWindow,
        sample_width: SampleWidth,
    ) -> Arc<WindowLut> {
        let key = WindowKey::new(window, sample_width);

        if let Some(lut) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(lut);
        }

        self.misses += 1;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        debug!(
            center = window.center,
            width = window.width,
            bits = sample_width.bits(),
            "building window LUT"
        );

        let lut = Arc::new(WindowLut::build(window, sample_width));
        self.entries.insert(key, Arc::clone(&lut));
        self.order.push_back(key);
        lut
    }

    #[must_use]
    pub fn stats(&self) -> WindowLutCacheStats {
        WindowLutCacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for WindowLutCache {
    fn default() -> Self {
        Self::with_capacity(8)
    }
}

/// Render the grid's first plane as an 8-bit grayscale preview
#[must_use]
pub fn render_preview(grid: &VoxelGrid, lut: &WindowLut) -> GrayImage {
    let pixels = grid.plane().iter().map(|&s| lut.map(s)).collect();
    // Plane dimensions always fit the image type's u32 coordinates.
    GrayImage::from_vec(grid.width() as u32, grid.height() as u32, pixels)
        .expect("plane length matches grid dimensions")
}
