use anyhow::{bail, Result};

use crate::utils::revcomp;

use super::inventory::ClosingPrimerId;

///////////////////////////////
/// 5' flank expected before the first tag on a forward read
#[derive(Debug, Clone)]
pub struct HeadPiece {
    pub seq: Vec<u8>,
}

impl HeadPiece {
    pub fn parse(spec: &str) -> Result<HeadPiece> {
        let seq = parse_bases(spec)?;
        if seq.is_empty() {
            bail!("empty head piece");
        }
        Ok(HeadPiece { seq })
    }
}

///////////////////////////////
/// 3' flank expected after the last tag. An optional run of N marks the
/// degenerate window (UMI); an optional `<label>-` prefix names the primer
#[derive(Debug, Clone)]
pub struct ClosingPrimer {
    pub label: String,
    pub seq: Vec<u8>,
    pub static_prefix: Vec<u8>,
    pub degen_len: usize,
    pub static_tail: Vec<u8>,
    pub id: ClosingPrimerId,
    pub umi_pattern: Option<regex::bytes::Regex>,
}

impl ClosingPrimer {
    pub fn parse(spec: &str) -> Result<ClosingPrimer> {
        let (label, seq_str) = match spec.rfind('-') {
            Some(ix) => (&spec[..ix], &spec[ix + 1..]),
            None => ("", spec),
        };
        let seq = parse_bases(seq_str)?;
        if seq.is_empty() {
            bail!("empty closing primer");
        }

        let n_start = seq.iter().position(|&c| c == b'N');
        let (static_prefix, degen_len, static_tail) = match n_start {
            None => (seq.clone(), 0, Vec::new()),
            Some(start) => {
                let end = seq[start..]
                    .iter()
                    .position(|&c| c != b'N')
                    .map(|p| start + p)
                    .unwrap_or(seq.len());
                (seq[..start].to_vec(), end - start, seq[end..].to_vec())
            }
        };

        // the id is the label plus the non-degenerate prefix; primers without
        // a degenerate window contribute only the label
        let id = if degen_len > 0 {
            format!("{}{}", label, String::from_utf8_lossy(&static_prefix))
        } else {
            label.to_string()
        };

        // the static tail is part of the pattern so that a tag region ending
        // in the prefix bases cannot shift the captured window
        let umi_pattern = if degen_len > 0 {
            let pattern = format!(
                "(?-u){}(.{{{}}}){}",
                regex::escape(&String::from_utf8_lossy(&static_prefix)),
                degen_len,
                regex::escape(&String::from_utf8_lossy(&static_tail)),
            );
            Some(regex::bytes::Regex::new(&pattern)?)
        } else {
            None
        };

        Ok(ClosingPrimer {
            label: label.to_string(),
            seq,
            static_prefix,
            degen_len,
            static_tail,
            id,
            umi_pattern,
        })
    }
}

fn parse_bases(spec: &str) -> Result<Vec<u8>> {
    let seq = spec.trim().to_uppercase().into_bytes();
    for &c in &seq {
        if !matches!(c, b'A' | b'C' | b'G' | b'T' | b'N') {
            bail!("invalid base {:?} in primer {}", c as char, spec);
        }
    }
    Ok(seq)
}

///////////////////////////////
/// Position-returning anchor search: exact substring, or with one inserted
/// base at any interior position (the similar-search variant list)
#[derive(Debug, Clone)]
pub struct AnchorMatcher {
    anchor: Vec<u8>,
}

impl AnchorMatcher {
    pub fn new(anchor: Vec<u8>) -> AnchorMatcher {
        AnchorMatcher { anchor }
    }

    pub fn len(&self) -> usize {
        self.anchor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchor.is_empty()
    }

    /// First exact occurrence, as a start index.
    pub fn find_exact(&self, s: &[u8]) -> Option<usize> {
        if s.len() < self.anchor.len() {
            return None;
        }
        s.windows(self.anchor.len()).position(|w| w == self.anchor)
    }

    /// Exact anchor at a fixed position.
    pub fn is_at(&self, s: &[u8], pos: usize) -> bool {
        s.get(pos..pos + self.anchor.len())
            .map(|w| w == self.anchor)
            .unwrap_or(false)
    }

    /// First occurrence of the anchor with one arbitrary base inserted at an
    /// interior position. Returns (start, matched length).
    pub fn find_near(&self, s: &[u8]) -> Option<(usize, usize)> {
        let a = self.anchor.len();
        if s.len() < a + 1 {
            return None;
        }
        for start in 0..=s.len() - (a + 1) {
            let w = &s[start..start + a + 1];
            for split in 1..a {
                if w[..split] == self.anchor[..split] && w[split + 1..] == self.anchor[split..] {
                    return Some((start, a + 1));
                }
            }
        }
        None
    }
}

///////////////////////////////
/// All anchors compiled once at startup, both strands
pub struct CompiledPrimers {
    pub anchor_size: usize,
    pub min_primer_len: usize,
    pub heads: Vec<HeadPiece>,
    pub closers: Vec<ClosingPrimer>,

    /// forward 5': last `anchor_size` bases of each head piece
    pub fwd5: Vec<AnchorMatcher>,
    /// forward 3': first `anchor_size` bases of each closing primer
    pub fwd3: Vec<AnchorMatcher>,
    /// reverse 5': reverse complement of each closing primer's first bases
    pub rev5: Vec<AnchorMatcher>,
    /// reverse 3': reverse complement of each head piece's last bases
    pub rev3: Vec<AnchorMatcher>,
}

impl CompiledPrimers {
    pub fn compile(
        heads: Vec<HeadPiece>,
        closers: Vec<ClosingPrimer>,
        anchor_size: usize,
    ) -> Result<CompiledPrimers> {
        if anchor_size == 0 {
            bail!("anchor size must be positive");
        }
        for hp in &heads {
            if hp.seq.len() < anchor_size {
                bail!(
                    "anchor size {} exceeds head piece {} of length {}",
                    anchor_size,
                    String::from_utf8_lossy(&hp.seq),
                    hp.seq.len()
                );
            }
        }
        for cp in &closers {
            if cp.static_prefix.len() < anchor_size {
                bail!(
                    "anchor size {} exceeds the static prefix of closing primer {} ({})",
                    anchor_size,
                    String::from_utf8_lossy(&cp.seq),
                    cp.static_prefix.len()
                );
            }
        }

        let fwd5 = heads
            .iter()
            .map(|h| AnchorMatcher::new(h.seq[h.seq.len() - anchor_size..].to_vec()))
            .collect();
        let fwd3 = closers
            .iter()
            .map(|c| AnchorMatcher::new(c.seq[..anchor_size].to_vec()))
            .collect();
        let rev5 = closers
            .iter()
            .map(|c| AnchorMatcher::new(revcomp(&c.seq[..anchor_size])))
            .collect();
        let rev3 = heads
            .iter()
            .map(|h| AnchorMatcher::new(revcomp(&h.seq[h.seq.len() - anchor_size..])))
            .collect();

        // the shortest leading flank a read can carry is one anchor
        let min_primer_len = heads
            .iter()
            .map(|h| h.seq.len())
            .chain(closers.iter().map(|c| c.seq.len()))
            .min()
            .unwrap_or(0)
            .min(anchor_size);

        Ok(CompiledPrimers {
            anchor_size,
            min_primer_len,
            heads,
            closers,
            fwd5,
            fwd3,
            rev5,
            rev3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_primer_without_degen() {
        let cp = ClosingPrimer::parse("CCAGCA").unwrap();
        assert_eq!(cp.static_prefix, b"CCAGCA");
        assert_eq!(cp.degen_len, 0);
        assert_eq!(cp.id, "");
        assert!(cp.umi_pattern.is_none());
    }

    #[test]
    fn closing_primer_with_degen_and_label() {
        let cp = ClosingPrimer::parse("exp1-CCNNNNCA").unwrap();
        assert_eq!(cp.label, "exp1");
        assert_eq!(cp.static_prefix, b"CC");
        assert_eq!(cp.degen_len, 4);
        assert_eq!(cp.static_tail, b"CA");
        assert_eq!(cp.id, "exp1CC");
        let pat = cp.umi_pattern.as_ref().unwrap();
        let caps = pat.captures(b"GGCCTTGACAGG").unwrap();
        assert_eq!(caps.get(1).unwrap().as_bytes(), b"TTGA");
    }

    #[test]
    fn rejects_bad_bases() {
        assert!(ClosingPrimer::parse("CCXGCA").is_err());
        assert!(HeadPiece::parse("").is_err());
    }

    #[test]
    fn anchor_exact_and_positional() {
        let m = AnchorMatcher::new(b"GTCAG".to_vec());
        assert_eq!(m.find_exact(b"GTCAGAAACCC"), Some(0));
        assert_eq!(m.find_exact(b"TTGTCAGAAA"), Some(2));
        assert_eq!(m.find_exact(b"TTTTT"), None);
        assert!(m.is_at(b"TTGTCAGAAA", 2));
        assert!(!m.is_at(b"TTGTCAGAAA", 3));
    }

    #[test]
    fn anchor_one_insertion() {
        let m = AnchorMatcher::new(b"GTCAG".to_vec());
        // GT[A]CAG: inserted base inside the anchor
        assert_eq!(m.find_near(b"TTGTACAGAAA"), Some((2, 6)));
        // exact anchors do not have to match the near variant
        assert_eq!(m.find_near(b"TTTTTTT"), None);
    }

    #[test]
    fn compile_checks_anchor_size() {
        let heads = vec![HeadPiece::parse("CAGGTCAG").unwrap()];
        let closers = vec![ClosingPrimer::parse("CCNNNNCA").unwrap()];
        // static prefix of the closer is CC: anchor 5 does not fit
        assert!(CompiledPrimers::compile(heads.clone(), closers.clone(), 5).is_err());
        assert!(CompiledPrimers::compile(heads, closers, 2).is_ok());
    }

    #[test]
    fn anchor_may_cover_the_whole_primer() {
        let heads = vec![HeadPiece::parse("CAGGTCAG").unwrap()];
        let closers = vec![ClosingPrimer::parse("CCAGCA").unwrap()];
        assert!(CompiledPrimers::compile(heads.clone(), closers.clone(), 6).is_ok());
        assert!(CompiledPrimers::compile(heads, closers, 7).is_err());
    }

    #[test]
    fn compiled_anchor_orientation() {
        let heads = vec![HeadPiece::parse("CAGGTCAG").unwrap()];
        let closers = vec![ClosingPrimer::parse("CCAGCA").unwrap()];
        let p = CompiledPrimers::compile(heads, closers, 5).unwrap();
        assert_eq!(p.fwd5[0].find_exact(b"GTCAGAAA"), Some(0));
        assert_eq!(p.fwd3[0].find_exact(b"AAACCAGC"), Some(3));
        // reverse 5' anchor is revcomp of CCAGC = GCTGG
        assert_eq!(p.rev5[0].find_exact(b"TGCTGGAAA"), Some(1));
        // reverse 3' anchor is revcomp of GTCAG = CTGAC
        assert_eq!(p.rev3[0].find_exact(b"AAACTGACTT"), Some(3));
    }
}
