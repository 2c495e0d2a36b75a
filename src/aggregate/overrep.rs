use std::collections::HashMap;

use super::{sigma_bin, CompoundKey, CompoundStats};
use crate::tags::{ClosingPrimerId, TagCode};

/// The three aggregation axes a structure is scored on.
pub const AXES: [&str; 3] = ["raw", "dedup", "unique"];

type PlaneKey = (usize, TagCode);
type LineKey = (usize, TagCode, usize, TagCode);

///////////////////////////////
/// One row of the `.over` output: a structure whose statistic exceeds the
/// per-closing-primer mean by more than one standard deviation
#[derive(Debug, Clone)]
pub struct OverEntry {
    pub cp_id: ClosingPrimerId,
    pub axis: &'static str,
    pub structure: String,
    pub value: u64,
    pub mean: f64,
    pub sd: f64,
    pub bin: i64,
}

///////////////////////////////
/// σ-bins of all over-represented planes and lines, by closing primer
#[derive(Debug, Default)]
pub struct OverAnalysis {
    pub entries: Vec<OverEntry>,
    plane_bins: HashMap<ClosingPrimerId, HashMap<PlaneKey, [i64; 3]>>,
    line_bins: HashMap<ClosingPrimerId, HashMap<LineKey, [i64; 3]>>,
}

impl OverAnalysis {
    /// Over-signal sums for one compound: `[lines, planes] × [raw, dedup,
    /// unique]`. Each participating over structure contributes 1, plus a 0.1
    /// fractional bump when its bin exceeds 1.
    pub fn compound_signals(&self, key: &CompoundKey) -> [[f64; 3]; 2] {
        let mut out = [[0.0f64; 3]; 2];

        if let Some(lines) = self.line_bins.get(&key.cp_id) {
            for i in 0..key.tags.len() {
                for j in i + 1..key.tags.len() {
                    let lk = (i, key.tags[i].clone(), j, key.tags[j].clone());
                    if let Some(bins) = lines.get(&lk) {
                        for (axis, &bin) in bins.iter().enumerate() {
                            if bin != 0 {
                                out[0][axis] += 1.0 + if bin > 1 { 0.1 } else { 0.0 };
                            }
                        }
                    }
                }
            }
        }
        if let Some(planes) = self.plane_bins.get(&key.cp_id) {
            for (i, tag) in key.tags.iter().enumerate() {
                if let Some(bins) = planes.get(&(i, tag.clone())) {
                    for (axis, &bin) in bins.iter().enumerate() {
                        if bin != 0 {
                            out[1][axis] += 1.0 + if bin > 1 { 0.1 } else { 0.0 };
                        }
                    }
                }
            }
        }
        out
    }
}

/// Accumulate raw/dedup/unique sums for every single tag (plane) and every
/// unordered pair of tags (line) per closing primer, then classify each
/// structure against its per-closing-primer distribution.
pub fn analyze(
    compounds: &HashMap<CompoundKey, CompoundStats>,
    dedup_by_key: &HashMap<CompoundKey, u64>,
) -> OverAnalysis {
    let mut planes: HashMap<ClosingPrimerId, HashMap<PlaneKey, [u64; 3]>> = HashMap::new();
    let mut lines: HashMap<ClosingPrimerId, HashMap<LineKey, [u64; 3]>> = HashMap::new();

    for (key, stats) in compounds {
        let dedup = dedup_by_key.get(key).copied().unwrap_or(0);
        let cp_planes = planes.entry(key.cp_id.clone()).or_default();
        for (i, tag) in key.tags.iter().enumerate() {
            let acc = cp_planes.entry((i, tag.clone())).or_insert([0; 3]);
            acc[0] += stats.raw;
            acc[1] += dedup;
            acc[2] += 1;
        }
        let cp_lines = lines.entry(key.cp_id.clone()).or_default();
        for i in 0..key.tags.len() {
            for j in i + 1..key.tags.len() {
                let acc = cp_lines
                    .entry((i, key.tags[i].clone(), j, key.tags[j].clone()))
                    .or_insert([0; 3]);
                acc[0] += stats.raw;
                acc[1] += dedup;
                acc[2] += 1;
            }
        }
    }

    let mut analysis = OverAnalysis::default();

    for (cp_id, structures) in &planes {
        let bins = classify_structures(structures, cp_id, &mut analysis.entries, |(cycle, tag)| {
            format!("{}:{}", cycle + 1, tag)
        });
        analysis.plane_bins.insert(cp_id.clone(), bins);
    }
    for (cp_id, structures) in &lines {
        let bins = classify_structures(structures, cp_id, &mut analysis.entries, |(c1, t1, c2, t2)| {
            format!("{}:{}|{}:{}", c1 + 1, t1, c2 + 1, t2)
        });
        analysis.line_bins.insert(cp_id.clone(), bins);
    }

    analysis.entries.sort_by(|a, b| {
        (&a.cp_id, a.axis, &a.structure).cmp(&(&b.cp_id, b.axis, &b.structure))
    });
    analysis
}

fn classify_structures<K: Clone + std::hash::Hash + Eq>(
    structures: &HashMap<K, [u64; 3]>,
    cp_id: &str,
    entries: &mut Vec<OverEntry>,
    describe: impl Fn(&K) -> String,
) -> HashMap<K, [i64; 3]> {
    let mut bins: HashMap<K, [i64; 3]> = HashMap::new();
    let n = structures.len() as f64;
    if n == 0.0 {
        return bins;
    }

    for (axis, axis_name) in AXES.iter().enumerate() {
        let mean = structures.values().map(|v| v[axis] as f64).sum::<f64>() / n;
        let sd = (structures
            .values()
            .map(|v| (v[axis] as f64 - mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        for (key, values) in structures {
            let v = values[axis] as f64;
            if v > mean + sd {
                let bin = sigma_bin(v, mean, sd);
                bins.entry(key.clone()).or_insert([0; 3])[axis] = bin;
                entries.push(OverEntry {
                    cp_id: cp_id.to_string(),
                    axis: axis_name,
                    structure: describe(key),
                    value: values[axis],
                    mean,
                    sd,
                    bin,
                });
            }
        }
    }
    bins
}
