use crate::dtype::DataType;
use crate::error::{MovingWindowError, Result};
use crate::raster::Raster;
use log::{debug, warn};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Something whose in-memory footprint can be estimated.
#[derive(Debug, Clone, Copy)]
pub enum ArrayLike<'a> {
    /// Bare dimensions; the element type must be supplied separately.
    Shape(&'a [usize]),
    /// A raster container; shape and element type come from the container.
    Raster(&'a Raster),
}

/// Outcome of comparing an estimated size against free memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    pub available: bool,
    /// Free bytes left after the allocation; negative when short.
    pub surplus_bytes: i64,
}

impl MemoryBudget {
    pub fn from_free(free_bytes: u64, required_bytes: u64) -> Self {
        let surplus = i128::from(free_bytes) - i128::from(required_bytes);
        let surplus_bytes = surplus.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        Self {
            available: surplus_bytes > 0,
            surplus_bytes,
        }
    }
}

/// Estimate the size in bytes of `source`.
///
/// For a bare shape, `data_type` is required. For a raster, the container's
/// own element type is used and `data_type` is ignored.
pub fn estimate_size(source: ArrayLike<'_>, data_type: Option<DataType>) -> Result<u64> {
    let (cells, data_type) = match source {
        ArrayLike::Shape(dims) => {
            if dims.is_empty() {
                return Err(MovingWindowError::InvalidInput(
                    "cannot estimate the size of an array without dimensions".to_string(),
                ));
            }
            let data_type = data_type.ok_or_else(|| {
                MovingWindowError::InvalidInput(
                    "an element type is required to estimate the size of a bare shape"
                        .to_string(),
                )
            })?;
            (element_count(dims)?, data_type)
        }
        ArrayLike::Raster(raster) => {
            let (rows, cols, bands) = raster.shape();
            (element_count(&[rows, cols, bands])?, raster.data_type())
        }
    };

    cells
        .checked_mul(data_type.size_of() as u64)
        .ok_or_else(|| MovingWindowError::InvalidInput("array size overflows u64".to_string()))
}

fn element_count(dims: &[usize]) -> Result<u64> {
    dims.iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
        .ok_or_else(|| MovingWindowError::InvalidInput("array size overflows u64".to_string()))
}

/// Memory the OS reports as available for new allocations, in bytes.
pub fn free_memory() -> u64 {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    system.available_memory()
}

/// Compare the estimated size of `source` against currently free memory.
pub fn check_budget(source: ArrayLike<'_>, data_type: Option<DataType>) -> Result<MemoryBudget> {
    let required = estimate_size(source, data_type)?;
    let free = free_memory();
    let budget = MemoryBudget::from_free(free, required);
    debug!(
        "Memory budget: {} bytes required, {} bytes free, surplus {}",
        required, free, budget.surplus_bytes
    );
    Ok(budget)
}

/// Log a memory advisory for `what` when the budget is short.
pub fn advise(budget: &MemoryBudget, what: &str) {
    if !budget.available {
        warn!(
            "Insufficient free memory for {} ({} bytes short); consider enabling disc caching",
            what,
            budget.surplus_bytes.unsigned_abs()
        );
    }
}
