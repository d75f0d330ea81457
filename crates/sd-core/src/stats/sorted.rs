//! Sorted value / cumulative-weight table

/// One distinct value with its weight and running weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedValue {
    pub value: f64,
    pub weight: f64,
    /// Sum of weights of this and every smaller value
    pub cumulative: f64,
}

/// Distinct values in ascending order with accumulated weights.
///
/// Built once per variable and shared by percentiles, mode and
/// frequency rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortedWeightedTable {
    entries: Vec<WeightedValue>,
    total_weight: f64,
}

impl SortedWeightedTable {
    /// Build from parallel values and weights; pairs with a non-finite
    /// value or a non-positive weight are skipped.
    pub fn build(values: &[f64], weights: &[f64]) -> Self {
        let mut pairs: Vec<(f64, f64)> = values
            .iter()
            .zip(weights)
            .filter(|(v, w)| v.is_finite() && w.is_finite() && **w > 0.0)
            .map(|(&v, &w)| (v, w))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut entries: Vec<WeightedValue> = Vec::new();
        let mut cumulative = 0.0;
        for (value, weight) in pairs {
            cumulative += weight;
            match entries.last_mut() {
                Some(last) if last.value == value => {
                    last.weight += weight;
                    last.cumulative = cumulative;
                }
                _ => entries.push(WeightedValue {
                    value,
                    weight,
                    cumulative,
                }),
            }
        }

        Self {
            entries,
            total_weight: cumulative,
        }
    }

    /// Build with unit weights
    pub fn unweighted(values: &[f64]) -> Self {
        Self::build(values, &vec![1.0; values.len()])
    }

    pub fn entries(&self) -> &[WeightedValue] {
        &self.entries
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn min(&self) -> Option<f64> {
        self.entries.first().map(|e| e.value)
    }

    pub fn max(&self) -> Option<f64> {
        self.entries.last().map(|e| e.value)
    }

    /// Every value carrying the largest weight, ascending
    pub fn modes(&self) -> Vec<f64> {
        let Some(max_weight) = self
            .entries
            .iter()
            .map(|e| e.weight)
            .max_by(|a, b| a.total_cmp(b))
        else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| (e.weight - max_weight).abs() <= 1e-9 * max_weight.max(1.0))
            .map(|e| e.value)
            .collect()
    }

    /// 1-based value lookup clamped to the table: `x(0)` is the minimum and
    /// `x(len + 1)` the maximum.
    pub(crate) fn value_at(&self, k: usize) -> f64 {
        let idx = k.clamp(1, self.entries.len()) - 1;
        self.entries[idx].value
    }

    /// Cumulative weight up to and including the `k`-th value (`cc(0) = 0`)
    pub(crate) fn cumulative_at(&self, k: usize) -> f64 {
        if k == 0 {
            0.0
        } else {
            self.entries[k.min(self.entries.len()) - 1].cumulative
        }
    }

    /// Weight of the `k`-th value, 1 past the end
    pub(crate) fn weight_at(&self, k: usize) -> f64 {
        if k >= 1 && k <= self.entries.len() {
            self.entries[k - 1].weight
        } else {
            1.0
        }
    }
}
