//! Index spaces and their slicing into work items.

use crate::error::{Error, Result};
use std::ops::Range;

/// The iteration space of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpace {
    /// `[lo, hi)`.
    OneD(Range<i32>),
    /// `[ylo, yhi) x [xlo, xhi)`, rows outer.
    TwoD(Range<i32>, Range<i32>),
}

fn check_range(range: &Range<i32>) -> Result<()> {
    if range.start > range.end {
        return Err(Error::InvalidIndexSpace(format!(
            "range {}..{} has lo > hi",
            range.start, range.end
        )));
    }
    Ok(())
}

impl IndexSpace {
    /// A one-dimensional space.
    pub fn one(range: Range<i32>) -> Result<Self> {
        check_range(&range)?;
        Ok(IndexSpace::OneD(range))
    }

    /// A two-dimensional space, `rows` outer.
    pub fn two(rows: Range<i32>, cols: Range<i32>) -> Result<Self> {
        check_range(&rows)?;
        check_range(&cols)?;
        Ok(IndexSpace::TwoD(rows, cols))
    }

    /// Build from a list of `[lo, hi)` ranges; only one or two are allowed.
    pub fn from_ranges(ranges: &[Range<i32>]) -> Result<Self> {
        match ranges {
            [a] => Self::one(a.clone()),
            [a, b] => Self::two(a.clone(), b.clone()),
            _ => Err(Error::InvalidIndexSpace(format!(
                "{} dimensions, only 1 and 2 are supported",
                ranges.len()
            ))),
        }
    }

    /// Re-check the bounds of a space built from its variants directly.
    pub fn validate(&self) -> Result<()> {
        match self {
            IndexSpace::OneD(r) => check_range(r),
            IndexSpace::TwoD(y, x) => check_range(y).and_then(|_| check_range(x)),
        }
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        match self {
            IndexSpace::OneD(_) => 1,
            IndexSpace::TwoD(..) => 2,
        }
    }

    /// Words per work item: a `[lo, hi)` pair per dimension.
    pub fn item_words(&self) -> usize {
        self.dims() * 2
    }

    /// Total number of indices.
    pub fn len(&self) -> usize {
        let span = |r: &Range<i32>| (r.end as i64 - r.start as i64) as usize;
        match self {
            IndexSpace::OneD(r) => span(r),
            IndexSpace::TwoD(y, x) => span(y) * span(x),
        }
    }

    /// Returns true if the space has no indices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice into work items, `pieces` slices per dimension.
    pub fn slice(&self, pieces: usize) -> Vec<WorkItem> {
        match self {
            IndexSpace::OneD(r) => slice_range(r.clone(), pieces)
                .into_iter()
                .map(WorkItem::OneD)
                .collect(),
            IndexSpace::TwoD(y, x) => {
                let cols = slice_range(x.clone(), pieces);
                slice_range(y.clone(), pieces)
                    .into_iter()
                    .flat_map(|row| {
                        cols.iter()
                            .map(move |col| WorkItem::TwoD(row.clone(), col.clone()))
                    })
                    .collect()
            }
        }
    }
}

impl TryFrom<&[Range<i32>]> for IndexSpace {
    type Error = Error;

    fn try_from(ranges: &[Range<i32>]) -> Result<Self> {
        Self::from_ranges(ranges)
    }
}

impl TryFrom<Range<i32>> for IndexSpace {
    type Error = Error;

    fn try_from(range: Range<i32>) -> Result<Self> {
        Self::one(range)
    }
}

/// One claimable unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// `[lo, hi)`.
    OneD(Range<i32>),
    /// `[ylo, yhi) x [xlo, xhi)`.
    TwoD(Range<i32>, Range<i32>),
}

impl WorkItem {
    /// Append the item's bounds as `lo, hi` pairs.
    pub fn write_words(&self, out: &mut Vec<i32>) {
        match self {
            WorkItem::OneD(r) => out.extend([r.start, r.end]),
            WorkItem::TwoD(y, x) => out.extend([y.start, y.end, x.start, x.end]),
        }
    }
}

/// Split `[lo, hi)` into `pieces` contiguous slices.
///
/// Every slice is `n / pieces` long; the first `n % pieces` slices get one
/// extra index. Empty slices are dropped, so a range shorter than `pieces`
/// yields one item per index.
pub fn slice_range(range: Range<i32>, pieces: usize) -> Vec<Range<i32>> {
    let n = (range.end as i64 - range.start as i64).max(0);
    let pieces = pieces.max(1) as i64;
    let height = n / pieces;
    let mut extra = n % pieces;

    let mut items = Vec::new();
    let mut lo = range.start as i64;
    let end = range.end as i64;
    while lo < end {
        let mut hi = lo + height;
        if extra > 0 {
            hi += 1;
            extra -= 1;
        }
        items.push(lo as i32..hi as i32);
        lo = hi;
    }
    items
}
