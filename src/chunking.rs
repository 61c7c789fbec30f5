use crate::error::{MovingWindowError, Result};
use log::debug;
use ndarray::{ArrayView3, Axis, Slice};
use std::ops::Range;

/// Split `rows` into `segments` contiguous ranges whose lengths differ by at
/// most one, longer ranges first. Never returns empty ranges, so fewer
/// than `segments` ranges come back when `rows < segments`.
pub fn split_rows(rows: usize, segments: usize) -> Vec<Range<usize>> {
    let segments = segments.clamp(1, rows.max(1));
    let base = rows / segments;
    let extra = rows % segments;

    let mut ranges = Vec::with_capacity(segments);
    let mut start = 0;
    for i in 0..segments {
        let len = base + usize::from(i < extra);
        if len == 0 {
            break;
        }
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// A chunk of output rows and the input rows needed to compute them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedRows {
    pub output: Range<usize>,
    /// `output` grown by the window padding, clamped to the raster.
    pub input: Range<usize>,
}

impl PaddedRows {
    /// Position of the output rows inside the input slab.
    pub fn local(&self) -> Range<usize> {
        self.output.start - self.input.start..self.output.end - self.input.start
    }
}

/// Cover `rows` with chunks of at most `chunk_rows` output rows, each
/// reading `padding` extra rows above and below where the raster has them.
pub fn padded_row_chunks(rows: usize, chunk_rows: usize, padding: usize) -> Result<Vec<PaddedRows>> {
    if chunk_rows == 0 {
        return Err(MovingWindowError::InvalidInput(
            "row chunks must be at least one row high".to_string(),
        ));
    }
    let chunks: Vec<PaddedRows> = (0..rows)
        .step_by(chunk_rows)
        .map(|start| {
            let end = start.saturating_add(chunk_rows).min(rows);
            PaddedRows {
                output: start..end,
                input: start.saturating_sub(padding)..end.saturating_add(padding).min(rows),
            }
        })
        .collect();
    debug!(
        "Padded row chunks: {} rows in {} chunks of <= {} (+{} padding)",
        rows,
        chunks.len(),
        chunk_rows,
        padding
    );
    Ok(chunks)
}

/// Row-wise chunks of `(rows, cols, bands)` cells, yielded top to bottom.
#[derive(Debug, Clone)]
pub struct RowChunks<'a> {
    cells: ArrayView3<'a, f64>,
    ranges: std::vec::IntoIter<Range<usize>>,
}

impl<'a> RowChunks<'a> {
    /// Chunks of `chunk_rows` rows; the last may be shorter.
    pub fn by_height(cells: ArrayView3<'a, f64>, chunk_rows: usize) -> Result<Self> {
        if chunk_rows == 0 {
            return Err(MovingWindowError::InvalidInput(
                "row chunks must be at least one row high".to_string(),
            ));
        }
        let rows = cells.len_of(Axis(0));
        let ranges: Vec<Range<usize>> = (0..rows)
            .step_by(chunk_rows)
            .map(|start| start..(start + chunk_rows).min(rows))
            .collect();
        debug!("RowChunks: {} rows in {} chunks of <= {}", rows, ranges.len(), chunk_rows);
        Ok(Self {
            cells,
            ranges: ranges.into_iter(),
        })
    }

    /// `segments` near-equal chunks, see [`split_rows`].
    pub fn by_count(cells: ArrayView3<'a, f64>, segments: usize) -> Self {
        let ranges = split_rows(cells.len_of(Axis(0)), segments);
        debug!("RowChunks: {} segments", ranges.len());
        Self {
            cells,
            ranges: ranges.into_iter(),
        }
    }
}

impl<'a> Iterator for RowChunks<'a> {
    type Item = ArrayView3<'a, f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.ranges.next()?;
        Some(
            self.cells
                .clone()
                .slice_axis_move(Axis(0), Slice::from(range)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ranges.size_hint()
    }
}

impl ExactSizeIterator for RowChunks<'_> {}
