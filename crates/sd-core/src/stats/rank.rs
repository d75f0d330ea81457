//! Mid-rank transform and tie bookkeeping for rank tests

/// Ranks of `values` in their original order; tied values share the
/// average of the positions they occupy, `(first + 1 + last + 1) / 2`.
pub fn mid_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + 1 + end + 1) as f64 / 2.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }
    ranks
}

/// Mid-ranks with frequency weights: a tie group occupying cumulative
/// weight `(c, c + w]` gets rank `c + (w + 1) / 2`.
pub fn weighted_mid_ranks(values: &[f64], weights: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut below = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let group: f64 = order[start..=end].iter().map(|&i| weights[i]).sum();
        let rank = below + (group + 1.0) / 2.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        below += group;
        start = end + 1;
    }
    ranks
}

/// Sizes of the groups of tied values (groups of one included)
pub fn tie_counts(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut counts = Vec::new();
    let mut iter = sorted.iter().peekable();
    while let Some(v) = iter.next() {
        let mut count = 1.0;
        while iter.peek().is_some_and(|next| *next == v) {
            iter.next();
            count += 1.0;
        }
        counts.push(count);
    }
    counts
}

/// `Σ (t³ − t)` over tie groups, the usual tie-correction term
pub fn tie_correction_sum(values: &[f64]) -> f64 {
    tie_counts(values).iter().map(|t| t * t * t - t).sum()
}
