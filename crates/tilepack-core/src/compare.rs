//! Reference-vs-device result comparison
//!
//! A mismatch is a verification outcome, not a failure of the call: the
//! report carries counts and the first few offending cells for the caller to
//! act on.

use serde::{Deserialize, Serialize};

/// How many mismatching cells a report keeps for diagnostics
pub const MAX_RECORDED_MISMATCHES: usize = 16;

/// Outcome of comparing one value against its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Exact,
    WithinTolerance,
    Mismatch,
}

/// Compare a single value against its reference
///
/// Matches if equal, if the relative difference is within `rel_tol` (only
/// meaningful for a non-zero reference) or if the absolute difference is
/// within `abs_tol`.
pub fn compare_values(value: f64, reference: f64, rel_tol: f64, abs_tol: f64) -> Verdict {
    if value == reference {
        return Verdict::Exact;
    }
    let diff_abs = (value - reference).abs();
    let rel_ok = reference != 0.0 && diff_abs / reference.abs() <= rel_tol;
    if rel_ok || diff_abs <= abs_tol {
        Verdict::WithinTolerance
    } else {
        Verdict::Mismatch
    }
}

/// One cell that failed comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellMismatch {
    pub row: usize,
    pub col: usize,
    pub value: f64,
    pub reference: f64,
}

/// Counts of an elementwise comparison
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareReport {
    pub exact: usize,
    pub within_tolerance: usize,
    pub mismatched: usize,
    pub max_abs_diff: f64,
    pub first_mismatches: Vec<CellMismatch>,
}

impl CompareReport {
    /// Fold one cell into the report
    pub fn record(&mut self, row: usize, col: usize, value: f64, reference: f64, verdict: Verdict) {
        let diff = (value - reference).abs();
        if diff > self.max_abs_diff {
            self.max_abs_diff = diff;
        }
        match verdict {
            Verdict::Exact => self.exact += 1,
            Verdict::WithinTolerance => self.within_tolerance += 1,
            Verdict::Mismatch => {
                self.mismatched += 1;
                if self.first_mismatches.len() < MAX_RECORDED_MISMATCHES {
                    self.first_mismatches.push(CellMismatch {
                        row,
                        col,
                        value,
                        reference,
                    });
                }
            }
        }
    }

    /// Cells inspected
    pub fn total(&self) -> usize {
        self.exact + self.within_tolerance + self.mismatched
    }

    /// True iff no cell mismatched
    pub fn passed(&self) -> bool {
        self.mismatched == 0
    }
}

impl std::fmt::Display for CompareReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cells: {} exact, {} within tolerance, {} mismatched (max |diff| {})",
            self.total(),
            self.exact,
            self.within_tolerance,
            self.mismatched,
            self.max_abs_diff
        )
    }
}
