use crate::aggregate::output::StreamDiagnostics;
use crate::aggregate::PipelineState;
use crate::umi::extract_umi;
use crate::utils::revcomp;

use super::inventory::{ClosingPrimerId, TagCode, TagInventory};
use super::matcher::TagMatcher;
use super::primer::{AnchorMatcher, CompiledPrimers};
use super::{Engine, MatchOptions, TagSchema, BASE_OPTS};

/// Recovery passes are bounded; the residual shrinks by at least a tag
/// region per pass so this is only a backstop.
pub const MAX_RECOVERY_PASSES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Forward,
    Reverse,
}

/// Primary per-read outcome; every read lands in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCategory {
    Shorter,
    Reduced,
    Longer,
    LowQual,
    Invalid,
    Opened,
    Unfound,
    Chimera,
    Matched,
}

impl ReadCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ReadCategory::Shorter => "shorter",
            ReadCategory::Reduced => "reduced",
            ReadCategory::Longer => "longer",
            ReadCategory::LowQual => "lowQual",
            ReadCategory::Invalid => "invalid",
            ReadCategory::Opened => "opened",
            ReadCategory::Unfound => "unfound",
            ReadCategory::Chimera => "chimera",
            ReadCategory::Matched => "matched",
        }
    }
}

/// A successful identification, handed to the aggregator.
#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub cp_id: ClosingPrimerId,
    pub codes: Vec<TagCode>,
    pub orientation: Orientation,
    pub umi: Option<Vec<u8>>,
    pub umi_applicable: bool,
    /// (expected static sequence, observed window) for error calibration
    pub static_obs: Option<(Vec<u8>, Vec<u8>)>,
    pub similar_label: Option<String>,
}

struct Located {
    orientation: Orientation,
    cp_idx: Option<usize>,
    tag_start: usize,
    tag_len: Option<usize>,
    short_suffix: bool,
    opened: bool,
}

struct PassResult {
    category: ReadCategory,
    opened: bool,
    orientation: Option<Orientation>,
    counted_valid: bool,
    similar: Option<String>,
    event: Option<MatchEvent>,
    region_start: Option<usize>,
    observed_len: Option<usize>,
}

impl PassResult {
    fn bare(category: ReadCategory) -> PassResult {
        PassResult {
            category,
            opened: false,
            orientation: None,
            counted_valid: false,
            similar: None,
            event: None,
            region_start: None,
            observed_len: None,
        }
    }
}

///////////////////////////////
/// Per-read state machine: anchor location, tag-string extraction,
/// orientation, length classification, quality gate, matching and the
/// bounded recovery loop
pub struct ReadClassifier<'a> {
    primers: &'a CompiledPrimers,
    schema: &'a TagSchema,
    inventory: &'a TagInventory,
    options: &'a MatchOptions,
}

impl<'a> ReadClassifier<'a> {
    pub fn new(engine: &'a Engine) -> ReadClassifier<'a> {
        ReadClassifier {
            primers: &engine.primers,
            schema: &engine.schema,
            inventory: &engine.inventory,
            options: &engine.options,
        }
    }

    /// Classify one read, updating counters exactly once and re-entering
    /// past the tag region while recovery mode finds further anchors.
    pub fn classify(
        &self,
        seq: &[u8],
        qual: &[u8],
        state: &mut PipelineState,
        diag: &mut StreamDiagnostics,
    ) {
        state.counters.total += 1;
        let min_len = self.primers.min_primer_len + self.schema.total_len + self.primers.anchor_size;

        let mut offset = 0usize;
        let mut pass: u32 = 0;
        loop {
            let s = &seq[offset..];
            let q = &qual[offset..];
            let res = self.classify_pass(s, q);

            if pass == 0 {
                let c = &mut state.counters;
                match res.category {
                    ReadCategory::Shorter => c.shorter += 1,
                    ReadCategory::Reduced => c.reduced += 1,
                    ReadCategory::Longer => c.longer += 1,
                    ReadCategory::LowQual => c.low_qual += 1,
                    ReadCategory::Invalid => c.invalid += 1,
                    ReadCategory::Opened => c.opened_only += 1,
                    ReadCategory::Unfound => c.unfound += 1,
                    ReadCategory::Chimera => c.chimera += 1,
                    ReadCategory::Matched => c.matched += 1,
                }
                if res.opened {
                    c.opened += 1;
                }
                if res.similar.is_some() {
                    c.similar += 1;
                }
                if res.counted_valid {
                    c.valid += 1;
                    match res.orientation {
                        Some(Orientation::Forward) => c.forward += 1,
                        Some(Orientation::Reverse) => c.reverse += 1,
                        None => {}
                    }
                }
                if let Some(len) = res.observed_len {
                    state.record_length(len);
                }
                match res.category {
                    ReadCategory::Invalid | ReadCategory::Unfound => diag.record_invalid(s),
                    ReadCategory::Chimera => diag.record_chimera(s),
                    _ => {}
                }
            } else {
                if res.category == ReadCategory::Matched {
                    state.counters.matched_recovered += 1;
                }
                diag.record_recovery(pass, offset, res.category.name());
            }

            let region = res.region_start;
            if let Some(event) = res.event {
                state.apply_event(event);
            }

            if !self.options.recovery {
                break;
            }
            let Some(p) = region else { break };
            let next = offset + p + self.schema.total_len + self.primers.anchor_size;
            if next >= seq.len() || seq.len() - next < min_len {
                break;
            }
            offset = next;
            pass += 1;
            if pass > MAX_RECOVERY_PASSES {
                break;
            }
        }
    }

    fn classify_pass(&self, s: &[u8], q: &[u8]) -> PassResult {
        let l = self.schema.total_len;
        let a = self.primers.anchor_size;

        if s.len() < self.primers.min_primer_len + l + a {
            return PassResult::bare(ReadCategory::Shorter);
        }

        // exact anchors first; the similar variants only when the exact
        // search produced no tag-string
        let mut located = self.locate(s, false);
        let exact_found_tag = located
            .as_ref()
            .map(|x| x.tag_len.is_some())
            .unwrap_or(false);
        if !exact_found_tag && self.options.similar {
            if let Some(near) = self.locate(s, true) {
                let replace = match &located {
                    None => true,
                    Some(x) => near.tag_len.is_some() && x.tag_len.is_none(),
                };
                if replace {
                    located = Some(near);
                }
            }
        }

        let Some(loc) = located else {
            return PassResult::bare(ReadCategory::Invalid);
        };
        if loc.short_suffix {
            return PassResult::bare(ReadCategory::Shorter);
        }

        let mut result = PassResult::bare(ReadCategory::Unfound);
        result.opened = loc.opened;
        result.orientation = Some(loc.orientation);

        let Some(ts_len) = loc.tag_len else {
            result.category = ReadCategory::Opened;
            return result;
        };
        result.region_start = Some(loc.tag_start);
        result.observed_len = Some(ts_len);

        let cp_idx = loc.cp_idx.unwrap_or(0);
        let cp = &self.primers.closers[cp_idx];

        let raw_ts = &s[loc.tag_start..loc.tag_start + ts_len];
        let ts: Vec<u8> = match loc.orientation {
            Orientation::Forward => raw_ts.to_vec(),
            Orientation::Reverse => revcomp(raw_ts),
        };

        let matcher = TagMatcher::new(self.inventory, self.schema, self.options);

        // length classification and candidate generation
        let mut candidates: Vec<(Vec<u8>, Option<String>)> = Vec::new();
        if ts.len() == l {
            candidates.push((ts.clone(), None));
        } else if ts.len() + 1 == l && self.options.similar {
            result.similar = Some("del".to_string());
            for pos in 0..=ts.len() {
                for &base in &BASE_OPTS {
                    let mut cand = Vec::with_capacity(l);
                    cand.extend_from_slice(&ts[..pos]);
                    cand.push(base);
                    cand.extend_from_slice(&ts[pos..]);
                    candidates.push((cand, Some(format!("del,{}", pos))));
                }
            }
        } else if ts.len() == l + 1 && self.options.similar {
            result.similar = Some("ins".to_string());
            for pos in 0..ts.len() {
                let mut cand = ts.clone();
                cand.remove(pos);
                candidates.push((cand, Some(format!("ins,{}", pos))));
            }
        } else if ts.len() < l {
            result.category = ReadCategory::Reduced;
            return result;
        } else {
            if matcher.chimera_scan(&ts) {
                result.category = ReadCategory::Chimera;
                return result;
            }
            if !self.options.left_anchored {
                result.category = ReadCategory::Longer;
                return result;
            }
            candidates.push((ts.clone(), None));
        }

        // quality gate: phred-33, reject on any base in the lowest
        // `min_base_quality + 1` quality classes
        if self.options.min_base_quality > 0 {
            let cutoff = b'!' + self.options.min_base_quality;
            let qr = q.get(loc.tag_start..loc.tag_start + ts_len).unwrap_or(&[]);
            if qr.iter().any(|&c| c <= cutoff) {
                result.category = ReadCategory::LowQual;
                return result;
            }
        }

        result.counted_valid = true;

        for (cand, indel_label) in &candidates {
            let Some(hit) = matcher.match_candidate(cand, &cp.id, indel_label.is_some()) else {
                continue;
            };

            let mut label_parts: Vec<String> = Vec::new();
            if let Some(label) = indel_label {
                label_parts.push(label.clone());
            }
            for vp in &hit.var_positions {
                label_parts.push(format!("var,{}", vp));
            }
            let similar_label = if label_parts.is_empty() {
                None
            } else {
                Some(label_parts.join(","))
            };
            if similar_label.is_some() {
                result.similar = similar_label.clone();
            }

            let umi_applicable = !self.options.no_umi && cp.degen_len > 0;
            let mut umi = None;
            let mut static_obs = None;
            if umi_applicable {
                umi = extract_umi(cp, s, loc.tag_start, l, loc.orientation);
                let sp = cp.static_prefix.len();
                static_obs = match loc.orientation {
                    Orientation::Forward => {
                        let start = loc.tag_start + ts_len;
                        s.get(start..start + sp)
                            .map(|w| (cp.static_prefix.clone(), w.to_vec()))
                    }
                    Orientation::Reverse => {
                        let prefix_rc = revcomp(&s[..loc.tag_start]);
                        prefix_rc
                            .get(..sp)
                            .map(|w| (cp.static_prefix.clone(), w.to_vec()))
                    }
                };
            }

            result.event = Some(MatchEvent {
                cp_id: cp.id.clone(),
                codes: hit.codes,
                orientation: loc.orientation,
                umi,
                umi_applicable,
                static_obs,
                similar_label,
            });
            result.category = ReadCategory::Matched;
            return result;
        }

        result
    }

    /// Locate the 5' anchor (head pieces first, fixing forward orientation;
    /// closing-primer reverse complements second) and then the matching
    /// opposite-strand 3' anchor within the anchored suffix.
    fn locate(&self, s: &[u8], near: bool) -> Option<Located> {
        let l = self.schema.total_len;
        let a = self.primers.anchor_size;

        let mut five: Option<(Orientation, Option<usize>, usize)> = None;
        for m in &self.primers.fwd5 {
            if let Some(end) = find5(m, s, near) {
                five = Some((Orientation::Forward, None, end));
                break;
            }
        }
        if five.is_none() {
            for (i, m) in self.primers.rev5.iter().enumerate() {
                if let Some(end) = find5(m, s, near) {
                    five = Some((Orientation::Reverse, Some(i), end));
                    break;
                }
            }
        }
        let (orientation, cp5, tag_start) = five?;

        let suffix = &s[tag_start..];
        if suffix.len() < l + a {
            return Some(Located {
                orientation,
                cp_idx: cp5,
                tag_start,
                tag_len: None,
                short_suffix: true,
                opened: false,
            });
        }

        let three: &[AnchorMatcher] = match orientation {
            Orientation::Forward => &self.primers.fwd3,
            Orientation::Reverse => &self.primers.rev3,
        };

        let mut found: Option<(usize, usize)> = None;
        if !near {
            // shortest prefix before any complementary 3' anchor wins
            for (i, m) in three.iter().enumerate() {
                if let Some(p) = m.find_exact(suffix) {
                    if found.map(|(_, best)| p < best).unwrap_or(true) {
                        found = Some((i, p));
                    }
                }
            }
        } else {
            'lengths: for d in [l.saturating_sub(1), l, l + 1] {
                for (i, m) in three.iter().enumerate() {
                    if m.is_at(suffix, d) {
                        found = Some((i, d));
                        break 'lengths;
                    }
                }
            }
        }

        match found {
            Some((idx, pos)) => Some(Located {
                orientation,
                cp_idx: match orientation {
                    Orientation::Forward => Some(idx),
                    Orientation::Reverse => cp5,
                },
                tag_start,
                tag_len: Some(pos),
                short_suffix: false,
                opened: false,
            }),
            None => Some(Located {
                orientation,
                // without a 3' hit a forward read cannot identify its
                // closing primer; the first configured one is charged
                cp_idx: cp5.or(Some(0)),
                tag_start,
                tag_len: if self.options.left_anchored {
                    Some(suffix.len())
                } else {
                    None
                },
                short_suffix: false,
                opened: true,
            }),
        }
    }
}

fn find5(m: &AnchorMatcher, s: &[u8], near: bool) -> Option<usize> {
    if near {
        m.find_near(s).map(|(p, matched)| p + matched)
    } else {
        m.find_exact(s).map(|p| p + m.len())
    }
}
