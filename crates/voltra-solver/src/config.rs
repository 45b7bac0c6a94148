//! Analysis configuration: time axis, tolerances, integration method.

use crate::error::{Error, Result};

/// Integration method family for transient analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Gear/BDF: implicit multistep, orders 1-6. A-stable at order 2,
    /// damps numerical ringing; the safe choice for stiff circuits.
    Gear,
    /// Trapezoidal: orders 1-2. No numerical damping, so lossless
    /// oscillators keep their amplitude; can ring at sharp edges.
    Trapezoidal,
}

impl Method {
    /// Default maximum order (2 for both families, as in SPICE).
    pub fn default_order(self) -> usize {
        2
    }

    /// Largest order the family supports.
    pub fn order_limit(self) -> usize {
        match self {
            Method::Gear => 6,
            Method::Trapezoidal => 2,
        }
    }
}

/// Time-axis configuration for transient analysis.
#[derive(Debug, Clone)]
pub struct TimeConfig {
    /// Start time (s).
    pub tstart: f64,
    /// Stop time (s); must exceed `tstart`.
    pub tstop: f64,
    /// Initial timestep hint (s).
    pub tstep: f64,
    /// Maximum timestep (s).
    pub tmax: f64,
    /// Minimum timestep (s).
    pub delta_min: f64,
    /// Skip the DC operating point and start from device initial
    /// conditions (SPICE `UIC`).
    pub use_ic: bool,
}

impl TimeConfig {
    /// Create a configuration for the given stop time with defaults:
    /// `tmax = tstop / 50`, `delta_min = 1e-9 * tmax`, `tstep = tmax`.
    pub fn new(tstop: f64) -> Self {
        let tmax = tstop / 50.0;
        Self {
            tstart: 0.0,
            tstop,
            tstep: tmax,
            tmax,
            delta_min: 1e-9 * tmax,
            use_ic: false,
        }
    }

    /// Set the initial timestep hint.
    pub fn with_tstep(mut self, tstep: f64) -> Self {
        self.tstep = tstep;
        self
    }

    /// Set the maximum timestep. Also rescales `delta_min` to its default
    /// of `1e-9 * tmax`.
    pub fn with_tmax(mut self, tmax: f64) -> Self {
        self.tmax = tmax;
        self.delta_min = 1e-9 * tmax;
        self
    }

    /// Set the minimum timestep.
    pub fn with_delta_min(mut self, delta_min: f64) -> Self {
        self.delta_min = delta_min;
        self
    }

    /// Set the start time. The span `tstop - tstart` must stay positive.
    pub fn with_tstart(mut self, tstart: f64) -> Self {
        self.tstart = tstart;
        self
    }

    /// Start from device initial conditions, skipping the DC operating point.
    pub fn with_use_ic(mut self, use_ic: bool) -> Self {
        self.use_ic = use_ic;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tstop.is_finite() || self.tstop <= self.tstart {
            return Err(Error::Misconfigured(format!(
                "tstop ({}) must exceed tstart ({})",
                self.tstop, self.tstart
            )));
        }
        if self.tstep <= 0.0 || self.tmax <= 0.0 {
            return Err(Error::Misconfigured(
                "tstep and tmax must be positive".into(),
            ));
        }
        if self.delta_min <= 0.0 || self.delta_min > self.tmax {
            return Err(Error::Misconfigured(format!(
                "delta_min ({}) must lie in (0, tmax]",
                self.delta_min
            )));
        }
        Ok(())
    }
}

/// Solver tolerances and iteration limits.
#[derive(Debug, Clone)]
pub struct Options {
    /// Truncation-error overestimation factor.
    pub trtol: f64,
    /// Relative tolerance, shared by Newton convergence and LTE control.
    pub reltol: f64,
    /// Absolute voltage tolerance (V).
    pub vntol: f64,
    /// Absolute current tolerance (A).
    pub abstol: f64,
    /// Absolute charge/flux tolerance for LTE control.
    pub chgtol: f64,
    /// Largest step-growth ratio between consecutive accepted steps.
    pub expansion: f64,
    /// Maximum Newton iterations per time point.
    pub max_iter: usize,
    /// Minimum conductance shunted across nonlinear junctions.
    pub gmin: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            trtol: 7.0,
            reltol: 1e-3,
            vntol: 1e-6,
            abstol: 1e-12,
            chgtol: 1e-14,
            expansion: 2.0,
            max_iter: 100,
            gmin: 1e-12,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("trtol", self.trtol),
            ("reltol", self.reltol),
            ("vntol", self.vntol),
            ("abstol", self.abstol),
            ("chgtol", self.chgtol),
        ];
        for (name, value) in positive {
            if value <= 0.0 || !value.is_finite() {
                return Err(Error::Misconfigured(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.expansion < 1.0 {
            return Err(Error::Misconfigured(format!(
                "expansion must be >= 1, got {}",
                self.expansion
            )));
        }
        if self.max_iter == 0 {
            return Err(Error::Misconfigured("max_iter must be nonzero".into()));
        }
        Ok(())
    }
}
