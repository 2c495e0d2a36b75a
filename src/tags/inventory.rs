use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;

use super::primer::ClosingPrimer;

///////////////////////////////
/////////////////////////////// Tag and closing-primer identifiers
///////////////////////////////

pub type TagCode = String;
pub type ClosingPrimerId = String;

///////////////////////////////
/// All accepted tags of one synthesis cycle. Every tag in a cycle has the
/// same length; the first mapping for a sequence wins
#[derive(Debug, Clone)]
pub struct CycleTags {
    pub cycle: u32,
    pub tag_len: usize,
    pub seq_to_code: HashMap<Vec<u8>, TagCode>,
    pub n_duplicates: usize,
}

///////////////////////////////
/// The full tag inventory: per-cycle tables, library memberships and the
/// per-closing-primer validity sets derived from them
#[derive(Debug, Clone, Default)]
pub struct TagInventory {
    pub cycles: Vec<CycleTags>,
    pub code_cycle: HashMap<TagCode, usize>,

    tag_libraries: HashMap<TagCode, HashSet<String>>,
    cp_libraries: HashMap<String, HashSet<String>>,
    pub has_memberships: bool,

    pub valid_tags: HashMap<ClosingPrimerId, HashSet<TagCode>>,
    tags_per_cycle: HashMap<ClosingPrimerId, Vec<u64>>,
}

impl TagInventory {
    /// Number of tags in cycle `idx`.
    pub fn cycle_size(&self, idx: usize) -> u64 {
        self.cycles.get(idx).map(|c| c.seq_to_code.len() as u64).unwrap_or(0)
    }

    /// Link the inventory to the closing primers of this run, deriving the
    /// expected tag set per closing primer from the library memberships.
    pub fn bind_closing_primers(&mut self, closers: &[ClosingPrimer]) -> Result<()> {
        for cp in closers {
            let valid: HashSet<TagCode> = if self.has_memberships {
                let seq = String::from_utf8_lossy(&cp.seq).to_uppercase();
                let Some(cp_libs) = self.cp_libraries.get(&seq) else {
                    bail!(
                        "closing primer {} is not declared in any CPL row of the tag table",
                        seq
                    );
                };
                self.code_cycle
                    .keys()
                    .filter(|code| match self.tag_libraries.get(*code) {
                        // tags from tables without membership columns are accepted everywhere
                        None => true,
                        Some(libs) => libs.iter().any(|l| cp_libs.contains(l)),
                    })
                    .cloned()
                    .collect()
            } else {
                self.code_cycle.keys().cloned().collect()
            };
            self.valid_tags.insert(cp.id.clone(), valid);
        }
        Ok(())
    }

    /// Valid rules are additive, invalid rules subtractive, in that order.
    pub fn apply_rules(&mut self, valid: &[TagRule], invalid: &[TagRule]) {
        let all_codes: Vec<TagCode> = self.code_cycle.keys().cloned().collect();
        let cp_ids: Vec<ClosingPrimerId> = self.valid_tags.keys().cloned().collect();

        for rule in valid {
            for cp_id in rule.scoped(&cp_ids) {
                let set = self.valid_tags.entry(cp_id).or_default();
                for code in &all_codes {
                    if rule.pattern.is_match(code) {
                        set.insert(code.clone());
                    }
                }
            }
        }
        for rule in invalid {
            for cp_id in rule.scoped(&cp_ids) {
                if let Some(set) = self.valid_tags.get_mut(&cp_id) {
                    set.retain(|code| !rule.pattern.is_match(code));
                }
            }
        }
    }

    /// Per-cycle valid-tag cardinalities used for library sizes. A cycle
    /// left empty by memberships falls back to its full inventory size so
    /// normalization does not collapse to zero.
    pub fn finalize_library_sizes(&mut self) {
        let mut per_cp = HashMap::new();
        for (cp_id, valid) in &self.valid_tags {
            let mut counts = vec![0u64; self.cycles.len()];
            for code in valid {
                if let Some(&idx) = self.code_cycle.get(code) {
                    counts[idx] += 1;
                }
            }
            for (idx, c) in counts.iter_mut().enumerate() {
                if *c == 0 {
                    *c = self.cycle_size(idx);
                }
            }
            per_cp.insert(cp_id.clone(), counts);
        }
        self.tags_per_cycle = per_cp;
    }

    pub fn library_size(&self, cp_id: &str) -> u64 {
        match self.tags_per_cycle.get(cp_id) {
            Some(counts) => counts.iter().product(),
            None => (0..self.cycles.len()).map(|i| self.cycle_size(i)).product(),
        }
    }

    pub fn is_valid(&self, cp_id: &str, code: &str) -> bool {
        self.valid_tags
            .get(cp_id)
            .map(|set| set.contains(code))
            .unwrap_or(false)
    }

    /// A compound is expected iff every tag code is valid for its closing primer.
    pub fn expected(&self, cp_id: &str, codes: &[TagCode]) -> bool {
        codes.iter().all(|c| self.is_valid(cp_id, c))
    }
}

///////////////////////////////
/// Scoped tag-code pattern from the command line: `<cp1>;<cp2>;…;<regex>`,
/// the leading fields restricting the rule to those closing primers
#[derive(Debug, Clone)]
pub struct TagRule {
    pub cp_scope: Vec<ClosingPrimerId>,
    pub pattern: Regex,
}

impl TagRule {
    pub fn parse(spec: &str) -> Result<TagRule> {
        let mut fields: Vec<&str> = spec.split(';').collect();
        let pattern_str = fields.pop().unwrap_or_default();
        let pattern = Regex::new(pattern_str)
            .with_context(|| format!("invalid tag pattern in rule: {}", spec))?;
        Ok(TagRule {
            cp_scope: fields.into_iter().map(str::to_string).collect(),
            pattern,
        })
    }

    fn scoped(&self, all: &[ClosingPrimerId]) -> Vec<ClosingPrimerId> {
        if self.cp_scope.is_empty() {
            all.to_vec()
        } else {
            self.cp_scope.clone()
        }
    }
}

///////////////////////////////
/// Incremental loader over one or more tag-table files
pub struct InventoryLoader {
    cycle_re: Regex,
    reverse_cycles: bool,
    cycles: BTreeMap<u32, CycleTags>,
    tag_libraries: HashMap<TagCode, HashSet<String>>,
    cp_libraries: HashMap<String, HashSet<String>>,
    has_memberships: bool,
}

impl InventoryLoader {
    pub fn new(reverse_cycles: bool) -> InventoryLoader {
        InventoryLoader {
            cycle_re: Regex::new(r"^(?:\S*?)(\d+)[.\-]\d+").unwrap(),
            reverse_cycles,
            cycles: BTreeMap::new(),
            tag_libraries: HashMap::new(),
            cp_libraries: HashMap::new(),
            has_memberships: false,
        }
    }

    pub fn load_path(&mut self, path: &Path, libraries: &[String]) -> Result<()> {
        let file =
            File::open(path).with_context(|| format!("cannot open tag file {}", path.display()))?;
        self.load_from(file, &path.display().to_string(), libraries)
    }

    /// Read one tag table. Line kinds: `#ID` header rows naming library
    /// columns, `CPL` closing-primer membership rows, and tag rows.
    pub fn load_from(&mut self, src: impl Read, origin: &str, libraries: &[String]) -> Result<()> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .has_headers(false)
            .from_reader(src);

        // library names of the membership columns, set by the last #ID row
        let mut column_libs: Vec<String> = Vec::new();

        for result in reader.records() {
            let record = result.with_context(|| format!("unreadable line in {}", origin))?;
            let line_no = record.position().map(|p| p.line()).unwrap_or(0);
            let first = match record.get(0) {
                Some(f) => f,
                None => continue,
            };

            if first.starts_with('#') {
                if first == "#ID" {
                    column_libs = record.iter().skip(2).map(str::to_string).collect();
                    self.has_memberships = true;
                }
                continue;
            }

            let Some(seq_field) = record.get(1) else {
                bail!(
                    "malformed tag-table line {} in {}: {:?}",
                    line_no,
                    origin,
                    record.iter().collect::<Vec<_>>().join("\t")
                );
            };
            let members = membership_set(&record, &column_libs, libraries);

            if first == "CPL" {
                let seq = seq_field.to_uppercase();
                self.cp_libraries.entry(seq).or_default().extend(members);
                continue;
            }

            // tag row
            let code = first.to_string();
            let Some(caps) = self.cycle_re.captures(&code) else {
                bail!(
                    "malformed tag code at line {} in {}: {:?}",
                    line_no,
                    origin,
                    record.iter().collect::<Vec<_>>().join("\t")
                );
            };
            let cycle: u32 = caps[1].parse().with_context(|| {
                format!("tag code cycle out of range at line {} in {}", line_no, origin)
            })?;

            let mut seq = seq_field.to_uppercase().into_bytes();
            if self.reverse_cycles && cycle % 2 == 0 {
                seq = crate::utils::revcomp(&seq);
            }

            let entry = self.cycles.entry(cycle).or_insert_with(|| CycleTags {
                cycle,
                tag_len: seq.len(),
                seq_to_code: HashMap::new(),
                n_duplicates: 0,
            });
            if seq.len() != entry.tag_len {
                bail!(
                    "tag length mismatch in cycle {} at line {} in {}: expected {}, got {}",
                    cycle,
                    line_no,
                    origin,
                    entry.tag_len,
                    seq.len()
                );
            }
            if entry.seq_to_code.contains_key(&seq) {
                entry.n_duplicates += 1;
            } else {
                entry.seq_to_code.insert(seq, code.clone());
            }

            // with a header in effect even an all-zero row is a membership
            // statement; only headerless tables leave tags universal
            if !column_libs.is_empty() {
                self.tag_libraries.entry(code).or_default().extend(members);
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<TagInventory> {
        if self.cycles.is_empty() {
            bail!("tag tables contained no tag rows");
        }

        let cycles: Vec<CycleTags> = self.cycles.into_values().collect();
        let mut code_cycle = HashMap::new();
        for (idx, cycle) in cycles.iter().enumerate() {
            for code in cycle.seq_to_code.values() {
                code_cycle.insert(code.clone(), idx);
            }
        }

        Ok(TagInventory {
            cycles,
            code_cycle,
            tag_libraries: self.tag_libraries,
            cp_libraries: self.cp_libraries,
            has_memberships: self.has_memberships,
            valid_tags: HashMap::new(),
            tags_per_cycle: HashMap::new(),
        })
    }
}

/// Library names whose membership column is nonzero, filtered by the
/// per-file library selector when one is given.
fn membership_set(
    record: &csv::StringRecord,
    column_libs: &[String],
    selector: &[String],
) -> HashSet<String> {
    let mut set = HashSet::new();
    for (i, lib) in column_libs.iter().enumerate() {
        if !selector.is_empty() && !selector.contains(lib) {
            continue;
        }
        if let Some(v) = record.get(2 + i) {
            let v = v.trim();
            if !v.is_empty() && v != "0" {
                set.insert(lib.clone());
            }
        }
    }
    set
}
