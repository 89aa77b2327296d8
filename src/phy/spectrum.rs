//! Per-resource-block power spectral density values.
//!
//! Every PSD handled by the receiver is a vector of linear power values, one
//! entry per resource block (RB). Vectors of different lengths combine as if
//! the shorter one were padded with zeros.

/// Linear power per resource block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpectrumValue {
    values: Vec<f64>,
}

impl SpectrumValue {
    pub fn zeros(num_rbs: usize) -> Self {
        Self { values: vec![0.0; num_rbs] }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Build a PSD of `num_rbs` entries with `power` on `rbs` and zero elsewhere.
    ///
    /// RB indices outside `0..num_rbs` are ignored.
    pub fn on_rbs(num_rbs: usize, rbs: &[usize], power: f64) -> Self {
        let mut values = vec![0.0; num_rbs];
        for &rb in rbs {
            if let Some(v) = values.get_mut(rb) {
                *v = power;
            }
        }
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Power on `rb`, zero when the RB is outside the vector.
    pub fn get(&self, rb: usize) -> f64 {
        self.values.get(rb).copied().unwrap_or(0.0)
    }

    pub fn add_assign(&mut self, other: &SpectrumValue) {
        if other.values.len() > self.values.len() {
            self.values.resize(other.values.len(), 0.0);
        }
        for (v, o) in self.values.iter_mut().zip(other.values.iter()) {
            *v += o;
        }
    }

    /// Element-wise subtraction, clamped at zero to absorb rounding.
    pub fn sub_assign(&mut self, other: &SpectrumValue) {
        if other.values.len() > self.values.len() {
            self.values.resize(other.values.len(), 0.0);
        }
        for (v, o) in self.values.iter_mut().zip(other.values.iter()) {
            *v = (*v - o).max(0.0);
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for v in self.values.iter_mut() {
            *v *= factor;
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        out.scale(factor);
        out
    }

    /// Indices of RBs carrying non-zero power.
    pub fn occupied_rbs(&self) -> Vec<usize> {
        self.values.iter().enumerate().filter(|(_, v)| **v > 0.0).map(|(rb, _)| rb).collect()
    }

    /// Arithmetic mean over the given RBs. Returns 0.0 for an empty set.
    pub fn mean_over(&self, rbs: &[usize]) -> f64 {
        if rbs.is_empty() {
            return 0.0;
        }
        rbs.iter().map(|&rb| self.get(rb)).sum::<f64>() / rbs.len() as f64
    }
}

/// Convert a linear ratio to decibels.
pub fn linear_to_db(value: f64) -> f64 {
    10.0 * value.log10()
}

/// Convert decibels to a linear ratio.
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}
