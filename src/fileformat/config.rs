use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::utils::glob_match;

///////////////////////////////
/// One record of the run configuration file. Lines are tab-separated:
/// `fastqGlob, reverseCycles, tagFile, headPieces, overhangs,
/// closingPrimers, validTags, invalidTags`; `#` and `;` lines are comments.
/// The first record whose glob matches the input filename fills whatever
/// the command line left unset
#[derive(Debug, Clone, Default)]
pub struct ConfigRecord {
    pub fastq_glob: String,
    pub reverse_cycles: Option<bool>,
    pub tag_files: Option<String>,
    pub head_pieces: Option<String>,
    pub overhangs: Option<String>,
    pub closing_primers: Option<String>,
    pub valid_tags: Option<String>,
    pub invalid_tags: Option<String>,
}

impl ConfigRecord {
    fn parse(line: &str) -> Option<ConfigRecord> {
        let fields: Vec<&str> = line.split('\t').collect();
        let fastq_glob = fields.first()?.trim();
        if fastq_glob.is_empty() {
            return None;
        }
        let field = |i: usize| -> Option<String> {
            fields
                .get(i)
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_string)
        };
        Some(ConfigRecord {
            fastq_glob: fastq_glob.to_string(),
            reverse_cycles: field(1).map(|f| f != "0"),
            tag_files: field(2),
            head_pieces: field(3),
            overhangs: field(4),
            closing_primers: field(5),
            valid_tags: field(6),
            invalid_tags: field(7),
        })
    }
}

/// Find the first record matching the input filename.
pub fn lookup(path: &Path, fastq_name: &str) -> Result<Option<ConfigRecord>> {
    let file =
        File::open(path).with_context(|| format!("cannot open config file {}", path.display()))?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(record) = ConfigRecord::parse(&line) {
            if glob_match(&record.fastq_glob, fastq_name) {
                return Ok(Some(record));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn first_matching_record_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.conf");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "; another comment").unwrap();
        writeln!(f, "other_*\t1\tother.tsv").unwrap();
        writeln!(
            f,
            "run_*.fastq\t0\ttags.tsv\tCAGGTCAG\t\tCCAGCA\t\t^9\\."
        )
        .unwrap();
        writeln!(f, "run_*\t1\tlate.tsv").unwrap();
        drop(f);

        let record = lookup(&path, "run_1.fastq").unwrap().unwrap();
        assert_eq!(record.tag_files.as_deref(), Some("tags.tsv"));
        assert_eq!(record.reverse_cycles, Some(false));
        assert_eq!(record.head_pieces.as_deref(), Some("CAGGTCAG"));
        assert!(record.overhangs.is_none());
        assert_eq!(record.invalid_tags.as_deref(), Some("^9\\."));

        assert!(lookup(&path, "nomatch.fq").unwrap().is_none());
    }
}
