use crate::error::{MovingWindowError, Result};
use ndarray::{Array2, ArrayView2};

/// A boolean kernel with odd dimensions; `true` cells take part in the
/// window centred on the middle cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    mask: Array2<bool>,
}

/// Shapes a bare window size can be expanded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowShape {
    #[default]
    Circle,
    Square,
}

impl Footprint {
    /// A `(2r+1)x(2r+1)` disc: a cell at offset `(dy, dx)` is included iff
    /// `sqrt(dx² + dy²) <= r`. Returns `None` for a zero radius.
    pub fn circular(radius: usize) -> Option<Self> {
        if radius == 0 {
            return None;
        }
        let n = 2 * radius + 1;
        let r = radius as i64;
        let mask = Array2::from_shape_fn((n, n), |(row, col)| {
            let dy = row as i64 - r;
            let dx = col as i64 - r;
            dx * dx + dy * dy <= r * r
        });
        Some(Self { mask })
    }

    /// A fully populated `(2r+1)x(2r+1)` square. Returns `None` for a zero
    /// radius.
    pub fn square(radius: usize) -> Option<Self> {
        if radius == 0 {
            return None;
        }
        let n = 2 * radius + 1;
        Some(Self {
            mask: Array2::from_elem((n, n), true),
        })
    }

    pub fn with_shape(shape: WindowShape, radius: usize) -> Option<Self> {
        match shape {
            WindowShape::Circle => Self::circular(radius),
            WindowShape::Square => Self::square(radius),
        }
    }

    /// Wrap an explicit mask. Both dimensions must be odd and at least one
    /// cell must be set.
    pub fn from_mask(mask: Array2<bool>) -> Result<Self> {
        let (rows, cols) = mask.dim();
        if rows % 2 == 0 || cols % 2 == 0 {
            return Err(MovingWindowError::InvalidInput(format!(
                "footprint dimensions must be odd, got {}x{}",
                rows, cols
            )));
        }
        if !mask.iter().any(|&m| m) {
            return Err(MovingWindowError::InvalidInput(
                "footprint selects no cells".to_string(),
            ));
        }
        Ok(Self { mask })
    }

    pub fn mask(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    /// Half-extent in rows and columns.
    pub fn radius(&self) -> (usize, usize) {
        let (rows, cols) = self.mask.dim();
        (rows / 2, cols / 2)
    }

    /// Number of cells in the window.
    pub fn len(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(dy, dx)` offsets of the selected cells relative to the centre, in
    /// row-major order.
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let (ry, rx) = self.radius();
        self.mask
            .indexed_iter()
            .filter(|(_, &m)| m)
            .map(|((row, col), _)| (row as isize - ry as isize, col as isize - rx as isize))
            .collect()
    }

    /// Per-row spans `(dy, dx_min, dx_max)` when every row of the footprint
    /// is one contiguous run, which is what the summed fast path needs.
    pub fn row_runs(&self) -> Option<Vec<(isize, isize, isize)>> {
        let (ry, rx) = self.radius();
        let mut runs = Vec::new();
        for (row, line) in self.mask.outer_iter().enumerate() {
            let set: Vec<usize> = line
                .iter()
                .enumerate()
                .filter(|(_, &m)| m)
                .map(|(col, _)| col)
                .collect();
            let (Some(&first), Some(&last)) = (set.first(), set.last()) else {
                continue;
            };
            if last - first + 1 != set.len() {
                return None;
            }
            runs.push((
                row as isize - ry as isize,
                first as isize - rx as isize,
                last as isize - rx as isize,
            ));
        }
        Some(runs)
    }
}
