use super::inventory::{TagCode, TagInventory};
use super::{MatchOptions, TagSchema, BASE_OPTS};

///////////////////////////////
/// A fully matched candidate: one tag code per cycle, plus the positions
/// (within the tag-string) where a substitution was tolerated
#[derive(Debug, Clone)]
pub struct TagHit {
    pub codes: Vec<TagCode>,
    pub var_positions: Vec<usize>,
}

///////////////////////////////
/// Maps a candidate tag-string to per-cycle tag codes
pub struct TagMatcher<'a> {
    pub inventory: &'a TagInventory,
    pub schema: &'a TagSchema,
    pub options: &'a MatchOptions,
}

impl<'a> TagMatcher<'a> {
    pub fn new(
        inventory: &'a TagInventory,
        schema: &'a TagSchema,
        options: &'a MatchOptions,
    ) -> TagMatcher<'a> {
        TagMatcher {
            inventory,
            schema,
            options,
        }
    }

    /// Walk the candidate left to right, one cycle at a time. `read_similar`
    /// marks candidates that already carry an indel correction.
    pub fn match_candidate(
        &self,
        candidate: &[u8],
        cp_id: &str,
        read_similar: bool,
    ) -> Option<TagHit> {
        let mut pos = 0usize;
        let mut codes: Vec<TagCode> = Vec::with_capacity(self.schema.cycle_lens.len());
        let mut var_positions: Vec<usize> = Vec::new();

        for (k, &cycle_len) in self.schema.cycle_lens.iter().enumerate() {
            let tag = candidate.get(pos..pos + cycle_len)?;
            let overhang = &self.schema.overhangs[k];
            if !overhang.is_empty() && !self.options.similar {
                let post = candidate.get(pos + cycle_len..pos + cycle_len + overhang.len())?;
                if post != overhang.as_slice() {
                    return None;
                }
            }

            let cycle = &self.inventory.cycles[k];
            if let Some(code) = cycle.seq_to_code.get(tag) {
                if self.options.restrict_valid
                    && read_similar
                    && !self.inventory.is_valid(cp_id, code)
                {
                    return None;
                }
                codes.push(code.clone());
            } else if self.options.similar && !(self.options.similar_strict && read_similar) {
                let (code, var_pos) = self.substitution_search(tag, k, cp_id)?;
                codes.push(code);
                var_positions.push(pos + var_pos);
            } else {
                return None;
            }

            pos += cycle_len + overhang.len();
        }

        Some(TagHit {
            codes,
            var_positions,
        })
    }

    /// One-substitution search: wildcard each position in turn, first
    /// inventory hit wins.
    fn substitution_search(&self, tag: &[u8], k: usize, cp_id: &str) -> Option<(TagCode, usize)> {
        let cycle = &self.inventory.cycles[k];
        let mut probe = tag.to_vec();
        for i in 0..tag.len() {
            for &base in &BASE_OPTS {
                if base == tag[i] {
                    continue;
                }
                probe[i] = base;
                if let Some(code) = cycle.seq_to_code.get(&probe) {
                    // indels and substitutions often fall onto invalid codes
                    // by coincidence
                    if self.options.restrict_valid && !self.inventory.is_valid(cp_id, code) {
                        continue;
                    }
                    return Some((code.clone(), i));
                }
            }
            probe[i] = tag[i];
        }
        None
    }

    /// Chimera scan for over-long tag-strings: any cycle whose tag at the
    /// natural offset hits the inventory while the same sequence occurs more
    /// than once in the whole tag-string marks the read as chimeric.
    pub fn chimera_scan(&self, tag_string: &[u8]) -> bool {
        let mut pos = 0usize;
        for (k, &cycle_len) in self.schema.cycle_lens.iter().enumerate() {
            let Some(tag) = tag_string.get(pos..pos + cycle_len) else {
                break;
            };
            if self.inventory.cycles[k].seq_to_code.contains_key(tag) {
                let occurrences = tag_string.windows(cycle_len).filter(|w| *w == tag).count();
                if occurrences > 1 {
                    return true;
                }
            }
            pos += cycle_len + self.schema.overhangs[k].len();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::inventory::InventoryLoader;
    use crate::tags::primer::ClosingPrimer;
    use std::io::Cursor;

    fn fixture() -> (TagInventory, TagSchema) {
        let table = "1.001\tAAA\n1.002\tGGG\n2.001\tCCC\n2.002\tTTT\n";
        let mut loader = InventoryLoader::new(false);
        loader.load_from(Cursor::new(table), "test", &[]).unwrap();
        let mut inv = loader.finish().unwrap();
        let cp = ClosingPrimer::parse("CCAGCA").unwrap();
        inv.bind_closing_primers(std::slice::from_ref(&cp)).unwrap();
        let schema = TagSchema::build(&inv, &[]).unwrap();
        (inv, schema)
    }

    #[test]
    fn exact_match_all_cycles() {
        let opts = MatchOptions::default();
        let (inv, schema) = fixture();
        let m = TagMatcher::new(&inv, &schema, &opts);
        let hit = m.match_candidate(b"AAACCC", "", false).unwrap();
        assert_eq!(hit.codes, vec!["1.001".to_string(), "2.001".to_string()]);
        assert!(hit.var_positions.is_empty());
    }

    #[test]
    fn no_match_without_similar() {
        let opts = MatchOptions::default();
        let (inv, schema) = fixture();
        let m = TagMatcher::new(&inv, &schema, &opts);
        assert!(m.match_candidate(b"AATCCC", "", false).is_none());
    }

    #[test]
    fn one_substitution_with_similar() {
        let opts = MatchOptions {
            similar: true,
            ..Default::default()
        };
        let (inv, schema) = fixture();
        let m = TagMatcher::new(&inv, &schema, &opts);
        let hit = m.match_candidate(b"AATCCC", "", false).unwrap();
        assert_eq!(hit.codes, vec!["1.001".to_string(), "2.001".to_string()]);
        assert_eq!(hit.var_positions, vec![2]);
    }

    #[test]
    fn strict_blocks_substitution_on_indel_candidates() {
        let opts = MatchOptions {
            similar: true,
            similar_strict: true,
            ..Default::default()
        };
        let (inv, schema) = fixture();
        let m = TagMatcher::new(&inv, &schema, &opts);
        // read already similar: substitutions disallowed
        assert!(m.match_candidate(b"AATCCC", "", true).is_none());
        // exact cycles still fine on a similar read
        assert!(m.match_candidate(b"AAACCC", "", true).is_some());
    }

    #[test]
    fn overhang_enforced_when_not_similar() {
        let table = "1.001\tAAA\n2.001\tCCC\n";
        let mut loader = InventoryLoader::new(false);
        loader.load_from(Cursor::new(table), "test", &[]).unwrap();
        let mut inv = loader.finish().unwrap();
        let cp = ClosingPrimer::parse("CCAGCA").unwrap();
        inv.bind_closing_primers(std::slice::from_ref(&cp)).unwrap();
        let schema = TagSchema::build(&inv, &["GT".to_string()]).unwrap();

        let opts = MatchOptions::default();
        let m = TagMatcher::new(&inv, &schema, &opts);
        assert!(m.match_candidate(b"AAAGTCCC", "", false).is_some());
        assert!(m.match_candidate(b"AAATTCCC", "", false).is_none());

        let opts = MatchOptions {
            similar: true,
            ..Default::default()
        };
        let m = TagMatcher::new(&inv, &schema, &opts);
        // similar search skips the overhang verification
        assert!(m.match_candidate(b"AAATTCCC", "", false).is_some());
    }

    #[test]
    fn valid_restriction_applies_to_similar_reads() {
        let opts = MatchOptions {
            similar: true,
            restrict_valid: true,
            ..Default::default()
        };
        let (mut inv, schema) = fixture();
        // make 1.001 invalid for the (empty-id) closing primer
        inv.valid_tags.get_mut("").unwrap().remove("1.001");
        let m = TagMatcher::new(&inv, &schema, &opts);
        // exact cycles on a non-similar read are not restricted
        assert!(m.match_candidate(b"AAACCC", "", false).is_some());
        // the same tuple on a similar read is rejected
        assert!(m.match_candidate(b"AAACCC", "", true).is_none());
        // a substitution landing on the invalid code is rejected too
        assert!(m.match_candidate(b"AATCCC", "", false).is_none());
    }

    #[test]
    fn chimera_scan_ignores_validity() {
        let opts = MatchOptions {
            restrict_valid: true,
            ..Default::default()
        };
        let (mut inv, schema) = fixture();
        inv.valid_tags.get_mut("").unwrap().clear();
        let m = TagMatcher::new(&inv, &schema, &opts);
        // cycle2 tag CCC occurs three times: chimeric no matter the validity sets
        assert!(m.chimera_scan(b"AAACCCCCC"));
        assert!(!m.chimera_scan(b"AAACCCGGG"));
    }

    #[test]
    fn substitution_probe_restores_position() {
        let opts = MatchOptions {
            similar: true,
            ..Default::default()
        };
        let (inv, schema) = fixture();
        let m = TagMatcher::new(&inv, &schema, &opts);
        // TTG is one substitution from TTT (cycle 2)
        let hit = m.match_candidate(b"AAATTG", "", false).unwrap();
        assert_eq!(hit.codes[1], "2.002");
        assert_eq!(hit.var_positions, vec![5]);
    }
}
