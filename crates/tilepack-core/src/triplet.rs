//! Coordinate triplets: the canonical sparse-entry representation
//!
//! Every sparse path starts from a [`TripletSet`]: an unordered collection of
//! `(row, col, value)` entries with declared dimensions. Coordinates are
//! validated against the dimensions when the set is built, so malformed input
//! is rejected here and never reaches the partitioner.
//!
//! Values must be finite and non-zero. Layouts pad tiles with zero-valued
//! placeholders and drop zeros when decoding, so an explicit zero could not
//! survive a round trip.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One non-zero entry, 0-based
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub row: u32,
    pub col: u32,
    pub value: f64,
}

impl Triplet {
    pub fn new(row: u32, col: u32, value: f64) -> Self {
        Self { row, col, value }
    }

    /// Order by (row, col)
    pub fn by_row(a: &Self, b: &Self) -> Ordering {
        (a.row, a.col).cmp(&(b.row, b.col))
    }

    /// Order by (col, row), the order streaming stage consumers expect
    pub fn by_col(a: &Self, b: &Self) -> Ordering {
        (a.col, a.row).cmp(&(b.col, b.row))
    }
}

fn check_value(row: i64, col: i64, value: f64) -> Result<()> {
    if value == 0.0 || !value.is_finite() {
        return Err(Error::Data(format!(
            "entry ({row}, {col}) has value {value}, expected a finite non-zero value"
        )));
    }
    Ok(())
}

/// Triplets plus the declared `rows x cols` dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripletSet {
    rows: usize,
    cols: usize,
    entries: Vec<Triplet>,
}

impl TripletSet {
    /// Validate and wrap 0-based triplets
    pub fn new(rows: usize, cols: usize, entries: Vec<Triplet>) -> Result<Self> {
        Self::check_dims(rows, cols)?;
        for t in &entries {
            if t.row as usize >= rows || t.col as usize >= cols {
                return Err(Error::out_of_range(t.row.into(), t.col.into(), rows, cols));
            }
            check_value(t.row.into(), t.col.into(), t.value)?;
        }
        Ok(Self {
            rows,
            cols,
            entries,
        })
    }

    /// An empty set with the given dimensions
    pub fn empty(rows: usize, cols: usize) -> Result<Self> {
        Self::new(rows, cols, Vec::new())
    }

    /// Normalize 1-based coordinates (as written by matrix-market style
    /// loaders) to 0-based, rejecting non-positive or out-of-range indices
    pub fn from_one_based<I>(rows: usize, cols: usize, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, i64, f64)>,
    {
        Self::check_dims(rows, cols)?;
        let entries = entries
            .into_iter()
            .map(|(row, col, value)| {
                if row <= 0 || col <= 0 {
                    return Err(Error::Data(format!(
                        "1-based entry ({row}, {col}) has a non-positive index"
                    )));
                }
                if row as u64 > rows as u64 || col as u64 > cols as u64 {
                    return Err(Error::out_of_range(row, col, rows, cols));
                }
                check_value(row, col, value)?;
                Ok(Triplet::new((row - 1) as u32, (col - 1) as u32, value))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rows,
            cols,
            entries,
        })
    }

    fn check_dims(rows: usize, cols: usize) -> Result<()> {
        let limit = u32::MAX as usize;
        if rows == 0 || cols == 0 || rows > limit || cols > limit {
            return Err(Error::Data(format!(
                "Matrix dimensions {rows}x{cols} must be positive and fit in 32 bits"
            )));
        }
        Ok(())
    }

    /// Append one entry after validating it
    pub fn push(&mut self, triplet: Triplet) -> Result<()> {
        if triplet.row as usize >= self.rows || triplet.col as usize >= self.cols {
            return Err(Error::out_of_range(
                triplet.row.into(),
                triplet.col.into(),
                self.rows,
                self.cols,
            ));
        }
        check_value(triplet.row.into(), triplet.col.into(), triplet.value)?;
        self.entries.push(triplet);
        Ok(())
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Triplet] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triplet> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<Triplet> {
        self.entries
    }

    pub fn sort_by_col(&mut self) {
        self.entries.sort_by(Triplet::by_col);
    }

    pub fn sort_by_row(&mut self) {
        self.entries.sort_by(Triplet::by_row);
    }

    /// Deterministic diagonal fill
    ///
    /// Walks the main diagonal, then successive diagonals: for wide matrices
    /// each new diagonal starts one column further right on row 0, otherwise
    /// one row further down on column 0. Values run `(first + 1) % modulus`,
    /// `(first + 2) % modulus`, ..., stepping over zero.
    pub fn diagonal_fill(
        rows: usize,
        cols: usize,
        nnz: usize,
        first: f64,
        modulus: f64,
    ) -> Result<Self> {
        Self::check_dims(rows, cols)?;
        if modulus <= 0.0 || !modulus.is_finite() {
            return Err(Error::Data(format!(
                "diagonal fill modulus must be positive, got {modulus}"
            )));
        }
        let per_row = (nnz / rows).max(1);
        if cols / per_row < 2 {
            return Err(Error::Data(format!(
                "{nnz} entries are too dense for a diagonal fill of {rows}x{cols}"
            )));
        }

        let wide = cols > rows;
        let (mut row, mut col, mut next_start) = (0usize, 0usize, 1usize);
        let mut value = first;
        let mut entries = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            if row >= rows || col >= cols {
                return Err(Error::Data(format!(
                    "{nnz} entries exceed the diagonals of a {rows}x{cols} matrix"
                )));
            }
            value = (value + 1.0) % modulus;
            if value == 0.0 {
                value = (value + 1.0) % modulus;
            }
            if value == 0.0 || !value.is_finite() {
                return Err(Error::Data(format!(
                    "diagonal fill from {first} modulo {modulus} only produces zeros"
                )));
            }
            entries.push(Triplet::new(row as u32, col as u32, value));

            row += 1;
            col += 1;
            if row >= rows || col >= cols {
                if wide {
                    row = 0;
                    col = next_start;
                } else {
                    col = 0;
                    row = next_start;
                }
                next_start += 1;
            }
        }

        Ok(Self {
            rows,
            cols,
            entries,
        })
    }

    /// Unique random coordinates with non-zero integral values in `[-1000, 1000]`
    #[cfg(feature = "rand")]
    pub fn random<R: rand::Rng>(rows: usize, cols: usize, nnz: usize, rng: &mut R) -> Result<Self> {
        Self::check_dims(rows, cols)?;
        let cells = rows as u128 * cols as u128;
        if nnz as u128 > cells {
            return Err(Error::Data(format!(
                "{nnz} entries do not fit in a {rows}x{cols} matrix"
            )));
        }

        let mut seen = std::collections::HashSet::with_capacity(nnz);
        let mut entries = Vec::with_capacity(nnz);
        while entries.len() < nnz {
            let row = rng.gen_range(0..rows) as u32;
            let col = rng.gen_range(0..cols) as u32;
            if !seen.insert((row, col)) {
                continue;
            }
            let mut value = 0i32;
            while value == 0 {
                value = rng.gen_range(-1000..=1000);
            }
            entries.push(Triplet::new(row, col, f64::from(value)));
        }

        Ok(Self {
            rows,
            cols,
            entries,
        })
    }
}

impl<'a> IntoIterator for &'a TripletSet {
    type Item = &'a Triplet;
    type IntoIter = std::slice::Iter<'a, Triplet>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_coordinates() {
        let set = TripletSet::new(4, 4, vec![Triplet::new(3, 3, 1.0)]).unwrap();
        assert_eq!(set.nnz(), 1);

        let err = TripletSet::new(4, 4, vec![Triplet::new(4, 0, 1.0)]).unwrap_err();
        assert!(err.is_data());
        let err = TripletSet::new(4, 4, vec![Triplet::new(0, 9, 1.0)]).unwrap_err();
        assert!(err.is_data());
        assert!(TripletSet::new(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_one_based_normalization() {
        let set =
            TripletSet::from_one_based(3, 3, vec![(1, 1, 2.0), (3, 2, -1.5)]).unwrap();
        assert_eq!(set.entries()[0], Triplet::new(0, 0, 2.0));
        assert_eq!(set.entries()[1], Triplet::new(2, 1, -1.5));
    }

    #[test]
    fn test_one_based_rejects_bad_indices() {
        assert!(TripletSet::from_one_based(3, 3, vec![(0, 1, 1.0)]).unwrap_err().is_data());
        assert!(TripletSet::from_one_based(3, 3, vec![(1, -2, 1.0)]).unwrap_err().is_data());
        assert!(TripletSet::from_one_based(3, 3, vec![(4, 1, 1.0)]).unwrap_err().is_data());
    }

    #[test]
    fn test_push_validates() {
        let mut set = TripletSet::empty(2, 2).unwrap();
        set.push(Triplet::new(1, 1, 3.0)).unwrap();
        assert!(set.push(Triplet::new(2, 1, 3.0)).is_err());
        assert_eq!(set.nnz(), 1);
    }

    #[test]
    fn test_sorting() {
        let mut set = TripletSet::new(
            3,
            3,
            vec![
                Triplet::new(2, 0, 1.0),
                Triplet::new(0, 1, 2.0),
                Triplet::new(1, 0, 3.0),
            ],
        )
        .unwrap();
        set.sort_by_col();
        let coords: Vec<_> = set.iter().map(|t| (t.row, t.col)).collect();
        assert_eq!(coords, vec![(1, 0), (2, 0), (0, 1)]);

        set.sort_by_row();
        let coords: Vec<_> = set.iter().map(|t| (t.row, t.col)).collect();
        assert_eq!(coords, vec![(0, 1), (1, 0), (2, 0)]);
    }

    #[test]
    fn test_diagonal_fill_tall() {
        let set = TripletSet::diagonal_fill(4, 3, 5, 0.0, 100.0).unwrap();
        let coords: Vec<_> = set.iter().map(|t| (t.row, t.col)).collect();
        // main diagonal stops at col 3, next diagonal starts at row 1
        assert_eq!(coords, vec![(0, 0), (1, 1), (2, 2), (1, 0), (2, 1)]);
        let values: Vec<_> = set.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_diagonal_fill_wide() {
        let set = TripletSet::diagonal_fill(2, 6, 4, 0.0, 3.0).unwrap();
        let coords: Vec<_> = set.iter().map(|t| (t.row, t.col)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 1), (0, 1), (1, 2)]);
        let values: Vec<_> = set.iter().map(|t| t.value).collect();
        // 0 is stepped over
        assert_eq!(values, vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_diagonal_fill_only_zeros() {
        let err = TripletSet::diagonal_fill(4, 4, 2, 0.0, 1.0).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn test_rejects_zero_and_non_finite_values() {
        let err = TripletSet::new(2, 2, vec![Triplet::new(0, 0, 0.0)]).unwrap_err();
        assert!(err.is_data());
        assert!(TripletSet::new(2, 2, vec![Triplet::new(1, 1, -0.0)]).is_err());
        assert!(TripletSet::new(2, 2, vec![Triplet::new(1, 0, f64::NAN)]).is_err());
        assert!(TripletSet::from_one_based(2, 2, vec![(1, 1, f64::INFINITY)]).is_err());
        assert!(TripletSet::from_one_based(2, 2, vec![(2, 2, 0.0)]).unwrap_err().is_data());

        let mut set = TripletSet::empty(2, 2).unwrap();
        assert!(set.push(Triplet::new(0, 1, 0.0)).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_diagonal_fill_unique_coordinates() {
        let set = TripletSet::diagonal_fill(64, 64, 200, 0.0, 1000.0).unwrap();
        let mut coords: Vec<_> = set.iter().map(|t| (t.row, t.col)).collect();
        coords.sort_unstable();
        coords.dedup();
        assert_eq!(coords.len(), 200);
    }

    #[test]
    fn test_diagonal_fill_too_dense() {
        assert!(TripletSet::diagonal_fill(4, 4, 16, 0.0, 10.0).is_err());
        assert!(TripletSet::diagonal_fill(4, 4, 2, 0.0, 0.0).is_err());
    }

    #[cfg(feature = "rand")]
    #[test]
    fn test_random_is_unique_and_nonzero() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let set = TripletSet::random(16, 16, 100, &mut rng).unwrap();
        assert_eq!(set.nnz(), 100);
        assert!(set.iter().all(|t| t.value != 0.0));
        let mut coords: Vec<_> = set.iter().map(|t| (t.row, t.col)).collect();
        coords.sort_unstable();
        coords.dedup();
        assert_eq!(coords.len(), 100);

        assert!(TripletSet::random(2, 2, 5, &mut rng).is_err());
    }
}
