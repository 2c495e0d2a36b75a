pub mod output;
pub mod overrep;

use std::collections::{BTreeMap, HashMap};

use crate::tags::classify::MatchEvent;
use crate::tags::{ClosingPrimerId, Engine, Orientation, TagCode};
use crate::umi::{dedup_count, BaseError, ErrorModel};

/// Row sorting is skipped beyond this many output rows.
pub const SORT_LIMIT: usize = 100_000;

///////////////////////////////
/////////////////////////////// Read counters
///////////////////////////////

/// Updated exactly once per read; every read lands in exactly one primary
/// category, the derived tallies (opened, similar, forward/reverse, valid)
/// come on top.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCounters {
    pub total: u64,
    pub shorter: u64,
    pub reduced: u64,
    pub longer: u64,
    pub low_qual: u64,
    pub invalid: u64,
    pub opened_only: u64,
    pub unfound: u64,
    pub chimera: u64,
    pub matched: u64,

    pub opened: u64,
    pub similar: u64,
    pub forward: u64,
    pub reverse: u64,
    pub valid: u64,
    pub matched_recovered: u64,
    pub undedup: u64,
}

impl ReadCounters {
    pub fn merge(&mut self, other: &ReadCounters) {
        self.total += other.total;
        self.shorter += other.shorter;
        self.reduced += other.reduced;
        self.longer += other.longer;
        self.low_qual += other.low_qual;
        self.invalid += other.invalid;
        self.opened_only += other.opened_only;
        self.unfound += other.unfound;
        self.chimera += other.chimera;
        self.matched += other.matched;
        self.opened += other.opened;
        self.similar += other.similar;
        self.forward += other.forward;
        self.reverse += other.reverse;
        self.valid += other.valid;
        self.matched_recovered += other.matched_recovered;
        self.undedup += other.undedup;
    }

    /// (name, value) pairs in log order; also the shard-log key set.
    pub fn entries(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("total", self.total),
            ("shorter", self.shorter),
            ("reduced", self.reduced),
            ("longer", self.longer),
            ("lowQual", self.low_qual),
            ("invalid", self.invalid),
            ("openedOnly", self.opened_only),
            ("unfound", self.unfound),
            ("chimera", self.chimera),
            ("matched", self.matched),
            ("opened", self.opened),
            ("similar", self.similar),
            ("forward", self.forward),
            ("reverse", self.reverse),
            ("valid", self.valid),
            ("matchedRecovered", self.matched_recovered),
            ("undedup", self.undedup),
        ]
    }

    pub fn set(&mut self, name: &str, value: u64) {
        match name {
            "total" => self.total = value,
            "shorter" => self.shorter = value,
            "reduced" => self.reduced = value,
            "longer" => self.longer = value,
            "lowQual" => self.low_qual = value,
            "invalid" => self.invalid = value,
            "openedOnly" => self.opened_only = value,
            "unfound" => self.unfound = value,
            "chimera" => self.chimera = value,
            "matched" => self.matched = value,
            "opened" => self.opened = value,
            "similar" => self.similar = value,
            "forward" => self.forward = value,
            "reverse" => self.reverse = value,
            "valid" => self.valid = value,
            "matchedRecovered" => self.matched_recovered = value,
            "undedup" => self.undedup = value,
            _ => {}
        }
    }
}

///////////////////////////////
/////////////////////////////// Per-compound accumulators
///////////////////////////////

/// The counting identity: closing primer plus the full tag-code tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompoundKey {
    pub cp_id: ClosingPrimerId,
    pub tags: Vec<TagCode>,
}

#[derive(Debug, Clone, Default)]
pub struct CompoundStats {
    pub raw: u64,
    pub strand_net: i64,
    pub umis: HashMap<Vec<u8>, u64>,
    pub undedup: u64,
}

///////////////////////////////
/// The single mutable aggregate threaded through the stream
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub counters: ReadCounters,
    pub compounds: HashMap<CompoundKey, CompoundStats>,
    pub error_model: ErrorModel,
    pub length_hist: BTreeMap<usize, u64>,
}

impl PipelineState {
    pub fn apply_event(&mut self, event: MatchEvent) {
        let entry = self
            .compounds
            .entry(CompoundKey {
                cp_id: event.cp_id,
                tags: event.codes,
            })
            .or_default();
        entry.raw += 1;
        entry.strand_net += match event.orientation {
            Orientation::Forward => 1,
            Orientation::Reverse => -1,
        };
        match event.umi {
            Some(umi) => *entry.umis.entry(umi).or_insert(0) += 1,
            None => {
                if event.umi_applicable {
                    entry.undedup += 1;
                    self.counters.undedup += 1;
                }
            }
        }
        if let Some((static_seq, observed)) = event.static_obs {
            self.error_model.record(&static_seq, &observed);
        }
    }

    pub fn record_length(&mut self, len: usize) {
        *self.length_hist.entry(len).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: PipelineState) {
        self.counters.merge(&other.counters);
        for (key, stats) in other.compounds {
            let entry = self.compounds.entry(key).or_default();
            entry.raw += stats.raw;
            entry.strand_net += stats.strand_net;
            entry.undedup += stats.undedup;
            for (umi, count) in stats.umis {
                *entry.umis.entry(umi).or_insert(0) += count;
            }
        }
        self.error_model.merge(&other.error_model);
        for (len, count) in other.length_hist {
            *self.length_hist.entry(len).or_insert(0) += count;
        }
    }
}

///////////////////////////////
/////////////////////////////// Finalization
///////////////////////////////

#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    pub no_umi: bool,
    pub no_umi_cleanup: bool,
    pub no_overrep: bool,
    /// compound selector of a `-d` degenerate-window dump, `[cp:]t1+t2+…`
    pub dump_umi: Option<String>,
}

/// One output row of the final table.
#[derive(Debug, Clone)]
pub struct CompoundRow {
    pub key: CompoundKey,
    pub raw: u64,
    pub dedup: u64,
    pub strand_bias: f64,
    pub raw_norm: f64,
    pub dedup_norm: f64,
    pub expected: bool,
    pub sd_raw: i64,
    pub sd_dedup: i64,
    /// [lines, planes] × [raw, dedup, unique]
    pub over: [[f64; 3]; 2],
}

/// Per-closing-primer summary for the run log.
#[derive(Debug, Clone)]
pub struct CpSummary {
    pub cp_id: ClosingPrimerId,
    pub uniq: u64,
    pub matched_reads: u64,
    pub library_size: u64,
    pub mean_raw: f64,
    pub sd_raw: f64,
    pub mean_dedup: f64,
    pub sd_dedup: f64,
}

pub struct Finalized {
    pub counters: ReadCounters,
    pub rows: Vec<CompoundRow>,
    pub cp_summaries: Vec<CpSummary>,
    pub over_entries: Vec<overrep::OverEntry>,
    pub base_error: BaseError,
    pub length_hist: BTreeMap<usize, u64>,
    pub deduped_total: u64,
    pub sorted: bool,
    pub degen_dump: Option<(CompoundKey, Vec<(Vec<u8>, u64)>)>,
}

/// Freeze the stream state: dedup every compound, derive norms and σ-bins,
/// run the over-representation analysis and order the rows.
pub fn finalize(mut state: PipelineState, engine: &Engine, opts: &FinalizeOptions) -> Finalized {
    let base_error = if opts.no_umi || opts.no_umi_cleanup {
        BaseError::default()
    } else {
        state.error_model.base_error()
    };

    let dump_key = opts.dump_umi.as_deref().map(parse_compound_selector);
    let mut degen_dump = None;

    // dedup pass; UMI multisets are dropped as soon as their count is known
    let mut dedup_by_key: HashMap<CompoundKey, u64> = HashMap::new();
    for (key, stats) in state.compounds.iter_mut() {
        let has_degen = engine
            .closer_by_id(&key.cp_id)
            .map(|cp| cp.degen_len > 0)
            .unwrap_or(false);

        let dedup = if opts.no_umi || !has_degen {
            stats.raw
        } else if stats.umis.is_empty() {
            // degenerate window never extracted for this compound
            u64::min(1, stats.raw)
        } else if opts.no_umi_cleanup {
            stats.umis.len() as u64
        } else {
            dedup_count(&stats.umis, &base_error)
        };
        dedup_by_key.insert(key.clone(), dedup);

        if let Some(sel) = &dump_key {
            if sel == key {
                let mut dump: Vec<(Vec<u8>, u64)> =
                    stats.umis.iter().map(|(u, &c)| (u.clone(), c)).collect();
                dump.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                degen_dump = Some((key.clone(), dump));
            }
        }
        stats.umis = HashMap::new();
    }

    // per-closing-primer totals
    let mut matched_per_cp: HashMap<ClosingPrimerId, u64> = HashMap::new();
    for (key, stats) in &state.compounds {
        *matched_per_cp.entry(key.cp_id.clone()).or_insert(0) += stats.raw;
    }

    // per-cp mean and σ of the compound count distributions (two passes)
    let mut cp_summaries: Vec<CpSummary> = Vec::new();
    let mut cp_stats: HashMap<ClosingPrimerId, (f64, f64, f64, f64)> = HashMap::new();
    for cp_id in matched_per_cp.keys() {
        let values: Vec<(u64, u64)> = state
            .compounds
            .iter()
            .filter(|(k, _)| &k.cp_id == cp_id)
            .map(|(k, s)| (s.raw, dedup_by_key[k]))
            .collect();
        let n = values.len() as f64;
        let mean_raw = values.iter().map(|v| v.0 as f64).sum::<f64>() / n;
        let mean_dedup = values.iter().map(|v| v.1 as f64).sum::<f64>() / n;
        let sd_raw = (values
            .iter()
            .map(|v| (v.0 as f64 - mean_raw).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        let sd_dedup = (values
            .iter()
            .map(|v| (v.1 as f64 - mean_dedup).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        cp_stats.insert(cp_id.clone(), (mean_raw, sd_raw, mean_dedup, sd_dedup));
        cp_summaries.push(CpSummary {
            cp_id: cp_id.clone(),
            uniq: values.len() as u64,
            matched_reads: matched_per_cp[cp_id],
            library_size: engine.library_size(cp_id),
            mean_raw,
            sd_raw,
            mean_dedup,
            sd_dedup,
        });
    }
    cp_summaries.sort_by(|a, b| a.cp_id.cmp(&b.cp_id));

    // over-representation structures
    let over = if opts.no_overrep {
        overrep::OverAnalysis::default()
    } else {
        overrep::analyze(&state.compounds, &dedup_by_key)
    };

    // assemble rows
    let mut rows: Vec<CompoundRow> = Vec::with_capacity(state.compounds.len());
    let mut deduped_total = 0u64;
    for (key, stats) in &state.compounds {
        let dedup = dedup_by_key[key];
        deduped_total += dedup;
        let matched_cp = matched_per_cp[&key.cp_id].max(1) as f64;
        let library_size = engine.library_size(&key.cp_id) as f64;
        let (mean_raw, sd_raw, mean_dedup, sd_dedup) = cp_stats[&key.cp_id];

        rows.push(CompoundRow {
            key: key.clone(),
            raw: stats.raw,
            dedup,
            strand_bias: stats.strand_net.unsigned_abs() as f64 / stats.raw.max(1) as f64,
            raw_norm: stats.raw as f64 * library_size / matched_cp,
            dedup_norm: dedup as f64 * library_size / matched_cp,
            expected: engine.inventory.expected(&key.cp_id, &key.tags),
            sd_raw: sigma_bin(stats.raw as f64, mean_raw, sd_raw),
            sd_dedup: sigma_bin(dedup as f64, mean_dedup, sd_dedup),
            over: over.compound_signals(key),
        });
    }

    let sorted = rows.len() <= SORT_LIMIT;
    if sorted {
        rows.sort_by(|a, b| b.raw.cmp(&a.raw).then_with(|| a.key.cmp(&b.key)));
    }

    Finalized {
        counters: state.counters,
        rows,
        cp_summaries,
        over_entries: over.entries,
        base_error,
        length_hist: state.length_hist,
        deduped_total,
        sorted,
        degen_dump,
    }
}

/// `⌈(v − μ)/σ⌉`; values at or below the mean, and degenerate σ, bin to 0.
pub fn sigma_bin(v: f64, mean: f64, sd: f64) -> i64 {
    if sd <= 0.0 || v <= mean {
        0
    } else {
        ((v - mean) / sd).ceil() as i64
    }
}

/// Parse a `-d` selector: `[cpId:]tag1+tag2+…`.
fn parse_compound_selector(spec: &str) -> CompoundKey {
    let (cp_id, tags) = match spec.split_once(':') {
        Some((cp, rest)) => (cp.to_string(), rest),
        None => (String::new(), spec),
    };
    CompoundKey {
        cp_id,
        tags: tags.split('+').map(str::to_string).collect(),
    }
}
