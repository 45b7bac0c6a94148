//! MNA matrix with stable element handles and LU factor/solve.
//!
//! The system is `Ax = b` where A is the conductance/coefficient matrix,
//! x is the solution vector (node voltages + branch currents), and b is the
//! RHS vector (current sources + voltage sources). Ground is eliminated;
//! branch current rows follow the node rows.
//!
//! Devices reserve positions once during setup with [`MnaMatrix::entry`] and
//! stamp through the returned [`EntryId`] on every load. Handles stay valid
//! until the matrix is dropped; no caller may rely on the internal storage.

use std::collections::HashMap;

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::error::{Error, Result};

/// Handle to a reserved matrix position.
///
/// Obtained from [`MnaMatrix::entry`] during setup and used for stamping on
/// every subsequent load. Stamps through the ground sentinel are dropped,
/// so devices connected to ground need no special casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u32);

impl EntryId {
    /// Sentinel for positions in the eliminated ground row or column.
    pub const GROUND: EntryId = EntryId(u32::MAX);

    /// Check if this is the ground sentinel.
    pub fn is_ground(self) -> bool {
        self.0 == u32::MAX
    }
}

/// MNA system with handle-based stamping and dense LU solve.
#[derive(Debug, Clone)]
pub struct MnaMatrix {
    num_nodes: usize,
    num_branches: usize,
    a: DMatrix<f64>,
    rhs: DVector<f64>,
    /// Reserved (row, col) positions, indexed by `EntryId`.
    entries: Vec<(usize, usize)>,
    lookup: HashMap<(usize, usize), EntryId>,
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl MnaMatrix {
    /// Create a new MNA system.
    ///
    /// # Arguments
    /// * `num_nodes` - Number of nodes excluding ground
    /// * `num_branches` - Number of branch current variables (voltage
    ///   sources, inductors)
    pub fn new(num_nodes: usize, num_branches: usize) -> Self {
        let size = num_nodes + num_branches;
        Self {
            num_nodes,
            num_branches,
            a: DMatrix::zeros(size, size),
            rhs: DVector::zeros(size),
            entries: Vec::new(),
            lookup: HashMap::new(),
            lu: None,
        }
    }

    /// Total system size (nodes + branch current variables).
    pub fn size(&self) -> usize {
        self.num_nodes + self.num_branches
    }

    /// Number of nodes (excluding ground).
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of branch current variables.
    pub fn num_branches(&self) -> usize {
        self.num_branches
    }

    /// Matrix row of a branch current variable.
    pub fn branch_row(&self, branch: usize) -> usize {
        self.num_nodes + branch
    }

    /// Reserve a matrix position, returning a stable handle for stamping.
    ///
    /// `None` for row or column means ground; the returned handle is then
    /// the ground sentinel and stamps through it are dropped. Reserving the
    /// same position twice returns the same handle.
    pub fn entry(&mut self, row: Option<usize>, col: Option<usize>) -> EntryId {
        let (row, col) = match (row, col) {
            (Some(r), Some(c)) => (r, c),
            _ => return EntryId::GROUND,
        };
        if let Some(&id) = self.lookup.get(&(row, col)) {
            return id;
        }
        let id = EntryId(self.entries.len() as u32);
        self.entries.push((row, col));
        self.lookup.insert((row, col), id);
        id
    }

    /// Add a value at a reserved position. Ground stamps are dropped.
    pub fn add(&mut self, entry: EntryId, value: f64) {
        if entry.is_ground() {
            return;
        }
        let (row, col) = self.entries[entry.0 as usize];
        self.a[(row, col)] += value;
    }

    /// Add a value to the RHS vector. Ground rows are dropped.
    pub fn rhs_add(&mut self, row: Option<usize>, value: f64) {
        if let Some(r) = row {
            self.rhs[r] += value;
        }
    }

    /// Clear the matrix and RHS to zeros, invalidating any prior factor.
    pub fn clear(&mut self) {
        self.a.fill(0.0);
        self.rhs.fill(0.0);
        self.lu = None;
    }

    /// LU-factor the matrix in place.
    ///
    /// Returns [`Error::Singular`] with the offending row on a zero pivot.
    pub fn factor(&mut self) -> Result<()> {
        let lu = self.a.clone().lu();
        if let Some(row) = singular_row(lu.u().diagonal().as_slice()) {
            self.lu = None;
            return Err(Error::Singular { row });
        }
        self.lu = Some(lu);
        Ok(())
    }

    /// Solve the factored system against the current RHS.
    pub fn solve(&self) -> Result<DVector<f64>> {
        let lu = self.lu.as_ref().ok_or(Error::Unfactored)?;
        lu.solve(&self.rhs).ok_or(Error::Singular { row: 0 })
    }

    /// Stamp a conductance between two nodes (`None` for ground).
    ///
    /// For a conductance G between rows i and j:
    /// - A[i,i] += G, A[j,j] += G
    /// - A[i,j] -= G, A[j,i] -= G
    pub fn stamp_conductance(&mut self, node_i: Option<usize>, node_j: Option<usize>, g: f64) {
        if let Some(i) = node_i {
            self.a[(i, i)] += g;
        }
        if let Some(j) = node_j {
            self.a[(j, j)] += g;
        }
        if let (Some(i), Some(j)) = (node_i, node_j) {
            self.a[(i, j)] -= g;
            self.a[(j, i)] -= g;
        }
    }

    /// Stamp a current source flowing from node i to node j.
    pub fn stamp_current_source(
        &mut self,
        node_i: Option<usize>,
        node_j: Option<usize>,
        current: f64,
    ) {
        if let Some(i) = node_i {
            self.rhs[i] -= current;
        }
        if let Some(j) = node_j {
            self.rhs[j] += current;
        }
    }

    /// Stamp a voltage source between two nodes.
    ///
    /// # Arguments
    /// * `node_pos` - Positive node (None for ground)
    /// * `node_neg` - Negative node (None for ground)
    /// * `branch` - Index of this source's branch current variable
    /// * `voltage` - Voltage value
    pub fn stamp_voltage_source(
        &mut self,
        node_pos: Option<usize>,
        node_neg: Option<usize>,
        branch: usize,
        voltage: f64,
    ) {
        let row = self.branch_row(branch);
        if let Some(i) = node_pos {
            self.a[(i, row)] += 1.0;
            self.a[(row, i)] += 1.0;
        }
        if let Some(j) = node_neg {
            self.a[(j, row)] -= 1.0;
            self.a[(row, j)] -= 1.0;
        }
        self.rhs[row] += voltage;
    }

    /// Get a reference to the coefficient matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// Get a reference to the RHS vector.
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// Residual `A·x - b` for a candidate solution.
    pub fn residual(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.a * x - &self.rhs
    }
}

/// Find the first effectively-zero pivot in an LU diagonal.
fn singular_row(diag: &[f64]) -> Option<usize> {
    diag.iter().position(|d| d.abs() < 1e-30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_handles_dedup() {
        let mut m = MnaMatrix::new(2, 0);
        let a = m.entry(Some(0), Some(1));
        let b = m.entry(Some(0), Some(1));
        assert_eq!(a, b);

        let g = m.entry(None, Some(1));
        assert!(g.is_ground());
    }

    #[test]
    fn test_handle_stamping() {
        let mut m = MnaMatrix::new(2, 0);
        let ii = m.entry(Some(0), Some(0));
        let gnd = m.entry(Some(0), None);

        m.add(ii, 2.5);
        m.add(gnd, 99.0); // dropped
        assert_eq!(m.matrix()[(0, 0)], 2.5);
        assert_eq!(m.matrix()[(1, 1)], 0.0);
    }

    #[test]
    fn test_stamp_conductance() {
        let mut m = MnaMatrix::new(2, 0);
        m.stamp_conductance(Some(0), Some(1), 1.0);

        assert_eq!(m.matrix()[(0, 0)], 1.0);
        assert_eq!(m.matrix()[(1, 1)], 1.0);
        assert_eq!(m.matrix()[(0, 1)], -1.0);
        assert_eq!(m.matrix()[(1, 0)], -1.0);
    }

    #[test]
    fn test_voltage_divider_solve() {
        // V1=10V at node 0, R1=1k from 0 to 1, R2=1k from 1 to ground.
        let mut m = MnaMatrix::new(2, 1);
        m.stamp_voltage_source(Some(0), None, 0, 10.0);
        m.stamp_conductance(Some(0), Some(1), 1e-3);
        m.stamp_conductance(Some(1), None, 1e-3);

        m.factor().unwrap();
        let x = m.solve().unwrap();

        assert!((x[0] - 10.0).abs() < 1e-9);
        assert!((x[1] - 5.0).abs() < 1e-9, "divider voltage = {}", x[1]);
    }

    #[test]
    fn test_singular_reports_row() {
        // Node 1 is floating: its row is all zeros.
        let mut m = MnaMatrix::new(2, 0);
        m.stamp_conductance(Some(0), None, 1.0);

        match m.factor() {
            Err(Error::Singular { row }) => assert_eq!(row, 1),
            other => panic!("expected singular, got {:?}", other),
        }
    }

    #[test]
    fn test_solve_requires_factor() {
        let m = MnaMatrix::new(1, 0);
        assert!(matches!(m.solve(), Err(Error::Unfactored)));
    }

    #[test]
    fn test_clear_invalidates_factor() {
        let mut m = MnaMatrix::new(1, 0);
        m.stamp_conductance(Some(0), None, 1.0);
        m.factor().unwrap();
        m.clear();
        assert!(matches!(m.solve(), Err(Error::Unfactored)));
    }

    #[test]
    fn test_residual() {
        let mut m = MnaMatrix::new(1, 0);
        m.stamp_conductance(Some(0), None, 2.0);
        m.stamp_current_source(None, Some(0), 1.0);

        m.factor().unwrap();
        let x = m.solve().unwrap();
        let r = m.residual(&x);
        assert!(r.amax() < 1e-12);
    }
}
