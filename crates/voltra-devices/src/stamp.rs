//! Shared stamping patterns built on reserved matrix entries.

use voltra_core::matrix::{EntryId, MnaMatrix};
use voltra_solver::SetupContext;

/// The four-point conductance pattern between two nodes.
///
/// Reserved once at setup; stamping adds `+g` on the diagonals and `-g`
/// on the off-diagonals. Ground terminals collapse to sentinel entries
/// and cost nothing at stamp time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConductancePattern {
    ii: EntryId,
    jj: EntryId,
    ij: EntryId,
    ji: EntryId,
}

impl ConductancePattern {
    pub(crate) fn reserve(ctx: &mut SetupContext<'_>, i: Option<usize>, j: Option<usize>) -> Self {
        Self {
            ii: ctx.entry(i, i),
            jj: ctx.entry(j, j),
            ij: ctx.entry(i, j),
            ji: ctx.entry(j, i),
        }
    }

    pub(crate) fn stamp(&self, matrix: &mut MnaMatrix, g: f64) {
        matrix.add(self.ii, g);
        matrix.add(self.jj, g);
        matrix.add(self.ij, -g);
        matrix.add(self.ji, -g);
    }
}

/// The ±1 coupling pattern tying a branch current row to its two nodes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BranchPattern {
    pr: EntryId,
    rp: EntryId,
    nr: EntryId,
    rn: EntryId,
}

impl BranchPattern {
    pub(crate) fn reserve(
        ctx: &mut SetupContext<'_>,
        pos: Option<usize>,
        neg: Option<usize>,
        row: usize,
    ) -> Self {
        Self {
            pr: ctx.entry(pos, Some(row)),
            rp: ctx.entry(Some(row), pos),
            nr: ctx.entry(neg, Some(row)),
            rn: ctx.entry(Some(row), neg),
        }
    }

    pub(crate) fn stamp(&self, matrix: &mut MnaMatrix) {
        matrix.add(self.pr, 1.0);
        matrix.add(self.rp, 1.0);
        matrix.add(self.nr, -1.0);
        matrix.add(self.rn, -1.0);
    }
}
