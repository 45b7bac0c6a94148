//! AC small-signal frequency-domain analysis.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use voltra_core::NodeId;

use crate::error::Result;
use voltra_core::Error as CoreError;

/// AC sweep type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AcSweepType {
    /// Linear frequency spacing.
    Linear,
    /// Logarithmic spacing, points per decade.
    Decade,
    /// Logarithmic spacing, points per octave.
    Octave,
}

/// AC analysis parameters.
#[derive(Debug, Clone)]
pub struct AcParams {
    /// Start frequency (Hz).
    pub fstart: f64,
    /// Stop frequency (Hz).
    pub fstop: f64,
    /// Number of points (total for Linear, per decade/octave for log sweeps).
    pub num_points: usize,
    /// Sweep type.
    pub sweep_type: AcSweepType,
}

/// Complex MNA system for one AC frequency point.
///
/// Rows/columns `0..num_nodes` are node voltages; the rest are branch
/// currents. Rebuilt per frequency, so devices stamp directly rather than
/// through reserved handles.
#[derive(Debug, Clone)]
pub struct ComplexMna {
    matrix: DMatrix<Complex<f64>>,
    rhs: DVector<Complex<f64>>,
    num_nodes: usize,
    num_branches: usize,
}

impl ComplexMna {
    pub fn new(num_nodes: usize, num_branches: usize) -> Self {
        let size = num_nodes + num_branches;
        Self {
            matrix: DMatrix::from_element(size, size, Complex::new(0.0, 0.0)),
            rhs: DVector::from_element(size, Complex::new(0.0, 0.0)),
            num_nodes,
            num_branches,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn size(&self) -> usize {
        self.num_nodes + self.num_branches
    }

    /// Add a value at (row, col).
    pub fn add_element(&mut self, row: usize, col: usize, value: Complex<f64>) {
        self.matrix[(row, col)] += value;
    }

    /// Add a value to the RHS vector.
    pub fn add_rhs(&mut self, row: usize, value: Complex<f64>) {
        self.rhs[row] += value;
    }

    /// Stamp a complex admittance between two nodes.
    pub fn stamp_admittance(
        &mut self,
        node_i: Option<usize>,
        node_j: Option<usize>,
        y: Complex<f64>,
    ) {
        if let Some(i) = node_i {
            self.add_element(i, i, y);
        }
        if let Some(j) = node_j {
            self.add_element(j, j, y);
        }
        if let (Some(i), Some(j)) = (node_i, node_j) {
            self.add_element(i, j, -y);
            self.add_element(j, i, -y);
        }
    }

    /// Stamp a real conductance between two nodes.
    pub fn stamp_conductance(&mut self, node_i: Option<usize>, node_j: Option<usize>, g: f64) {
        self.stamp_admittance(node_i, node_j, Complex::new(g, 0.0));
    }

    /// Stamp a current source flowing from node i to node j (the current
    /// is pushed into node j, matching the real-matrix convention).
    pub fn stamp_current_source(
        &mut self,
        node_i: Option<usize>,
        node_j: Option<usize>,
        current: Complex<f64>,
    ) {
        if let Some(i) = node_i {
            self.add_rhs(i, -current);
        }
        if let Some(j) = node_j {
            self.add_rhs(j, current);
        }
    }

    /// Stamp a voltage source: V(pos) - V(neg) = voltage.
    pub fn stamp_voltage_source(
        &mut self,
        node_pos: Option<usize>,
        node_neg: Option<usize>,
        branch: usize,
        voltage: Complex<f64>,
    ) {
        let bi = self.num_nodes + branch;
        let one = Complex::new(1.0, 0.0);

        if let Some(p) = node_pos {
            self.add_element(p, bi, one);
            self.add_element(bi, p, one);
        }
        if let Some(n) = node_neg {
            self.add_element(n, bi, -one);
            self.add_element(bi, n, -one);
        }
        self.add_rhs(bi, voltage);
    }

    /// Stamp an inductor (impedance jωL) on its branch current variable.
    pub fn stamp_inductor(
        &mut self,
        node_pos: Option<usize>,
        node_neg: Option<usize>,
        branch: usize,
        omega: f64,
        inductance: f64,
    ) {
        let bi = self.num_nodes + branch;
        let one = Complex::new(1.0, 0.0);

        if let Some(p) = node_pos {
            self.add_element(p, bi, one);
            self.add_element(bi, p, one);
        }
        if let Some(n) = node_neg {
            self.add_element(n, bi, -one);
            self.add_element(bi, n, -one);
        }
        self.add_element(bi, bi, -Complex::new(0.0, omega * inductance));
    }

    /// Factor and solve this frequency point.
    pub fn solve(&self) -> Result<DVector<Complex<f64>>> {
        let lu = self.matrix.clone().lu();
        let row = lu
            .u()
            .diagonal()
            .iter()
            .position(|d| d.norm() < 1e-30);
        if let Some(row) = row {
            return Err(CoreError::Singular { row }.into());
        }
        lu.solve(&self.rhs)
            .ok_or_else(|| CoreError::Singular { row: 0 }.into())
    }
}

/// Generate frequency points for an AC sweep.
pub fn generate_frequencies(params: &AcParams) -> Vec<f64> {
    let n = params.num_points;
    match params.sweep_type {
        AcSweepType::Linear => {
            if n <= 1 {
                return vec![params.fstart];
            }
            let step = (params.fstop - params.fstart) / (n - 1) as f64;
            (0..n).map(|i| params.fstart + step * i as f64).collect()
        }
        AcSweepType::Decade => log_sweep(params, 10.0),
        AcSweepType::Octave => log_sweep(params, 2.0),
    }
}

fn log_sweep(params: &AcParams, base: f64) -> Vec<f64> {
    let mut freqs = Vec::new();
    let ratio = base.powf(1.0 / params.num_points.max(1) as f64);
    let mut f = params.fstart;
    while f <= params.fstop * (1.0 + 1e-9) {
        freqs.push(f);
        f *= ratio;
    }
    freqs
}

/// Result of an AC sweep.
#[derive(Debug, Clone)]
pub struct AcResult {
    /// Frequency points (Hz).
    pub frequencies: Vec<f64>,
    /// Complex solution at each frequency.
    pub solutions: Vec<DVector<Complex<f64>>>,
    /// Number of nodes (excluding ground).
    pub num_nodes: usize,
}

impl AcResult {
    /// Complex node voltage across the sweep.
    pub fn voltage(&self, node: NodeId) -> Vec<Complex<f64>> {
        match node.matrix_index() {
            Some(idx) => self.solutions.iter().map(|s| s[idx]).collect(),
            None => vec![Complex::new(0.0, 0.0); self.solutions.len()],
        }
    }

    /// Voltage magnitude at a node across the sweep.
    pub fn magnitude(&self, node: NodeId) -> Vec<f64> {
        self.voltage(node).iter().map(|v| v.norm()).collect()
    }

    /// Voltage magnitude in dB at a node across the sweep.
    pub fn magnitude_db(&self, node: NodeId) -> Vec<f64> {
        self.magnitude(node)
            .iter()
            .map(|m| 20.0 * m.max(1e-300).log10())
            .collect()
    }

    /// Voltage phase in degrees at a node across the sweep.
    pub fn phase_deg(&self, node: NodeId) -> Vec<f64> {
        self.voltage(node)
            .iter()
            .map(|v| v.arg() * 180.0 / PI)
            .collect()
    }
}
