//! 2D prefix-sum table for O(1) rectangle-sum queries

use cbct_voxel_extractor::VoxelGrid;

/// `(width+1) x (height+1)` grid of running sums; cell `(x, y)` holds the
/// sum of all samples with column `< x` and row `< y`, so the first row and
/// column are zero.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    /// Build the table over the grid's first plane
    #[must_use]
    pub fn build(grid: &VoxelGrid) -> Self {
        let width = grid.width();
        let height = grid.height();
        let stride = width + 1;
        let mut sums = vec![0u64; stride * (height + 1)];

        let plane = grid.plane();
        for y in 1..=height {
            for x in 1..=width {
                sums[y * stride + x] = u64::from(plane[(y - 1) * width + (x - 1)])
                    + sums[(y - 1) * stride + x]
                    + sums[y * stride + (x - 1)]
                    - sums[(y - 1) * stride + (x - 1)];
            }
        }

        Self {
            width,
            height,
            sums,
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Sum over the rectangle at `(x, y)` with extent `w x h`
    ///
    /// Pure arithmetic over the four corner lookups. The caller must ensure
    /// `x + w <= width` and `y + h <= height`; the analyzer clamps its
    /// region rectangles before calling.
    #[must_use]
    pub fn region_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let stride = self.width + 1;
        self.sums[(y + h) * stride + (x + w)] + self.sums[y * stride + x]
            - self.sums[y * stride + (x + w)]
            - self.sums[(y + h) * stride + x]
    }
}
