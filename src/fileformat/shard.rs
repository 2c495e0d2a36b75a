//! Per-shard intermediate artifacts. Each worker writes one `.allTags`
//! file (one line per compound: `match,cpId,count,strandNet,umi1;umi2;…`)
//! and one `.log` file carrying its counters, error-model observations and
//! length histogram. The reducer streams these back and merges them.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use itertools::Itertools;

use crate::aggregate::{CompoundKey, PipelineState};

pub fn shard_tags_path(dir: &Path, shard: usize) -> PathBuf {
    dir.join(format!("shard_{}.allTags", shard))
}

pub fn shard_log_path(dir: &Path, shard: usize) -> PathBuf {
    dir.join(format!("shard_{}.log", shard))
}

/// Derive the log path belonging to a shard `.allTags` path.
pub fn log_path_for(tags_path: &Path) -> PathBuf {
    let name = tags_path
        .file_name()
        .map(|n| n.to_string_lossy().replace(".allTags", ".log"))
        .unwrap_or_else(|| "shard.log".to_string());
    tags_path.with_file_name(name)
}

///////////////////////////////
/////////////////////////////// Writing
///////////////////////////////

pub fn write_shard_tags(path: &Path, state: &PipelineState) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path)
            .with_context(|| format!("cannot create shard output {}", path.display()))?,
    );

    for (key, stats) in state.compounds.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        let umis = stats
            .umis
            .iter()
            .sorted()
            .flat_map(|(umi, &count)| {
                std::iter::repeat(String::from_utf8_lossy(umi).into_owned()).take(count as usize)
            })
            .join(";");
        writeln!(
            w,
            "{},{},{},{},{}",
            key.tags.join("+"),
            key.cp_id,
            stats.raw,
            stats.strand_net,
            umis
        )?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_shard_log(path: &Path, state: &PipelineState) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path)
            .with_context(|| format!("cannot create shard log {}", path.display()))?,
    );

    writeln!(w, "#counters")?;
    crate::aggregate::output::write_counters(&mut w, &state.counters)?;

    writeln!(w, "#errormodel")?;
    for (static_seq, observed, count) in state.error_model.iter_observations() {
        writeln!(
            w,
            "{}\t{}\t{}",
            String::from_utf8_lossy(static_seq),
            String::from_utf8_lossy(observed),
            count
        )?;
    }

    writeln!(w, "#lengths")?;
    for (len, count) in &state.length_hist {
        writeln!(w, "{}\t{}", len, count)?;
    }
    w.flush()?;
    Ok(())
}

///////////////////////////////
/////////////////////////////// Reading / merging
///////////////////////////////

/// Stream one shard `.allTags` file into the merged state. UMI lists are
/// concatenated, counters are untouched (they live in the shard log).
pub fn read_shard_tags(path: &Path, state: &mut PipelineState) -> Result<()> {
    let file =
        File::open(path).with_context(|| format!("cannot open shard file {}", path.display()))?;
    let reader = BufReader::new(file);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.splitn(5, ',').collect();
        if fields.len() != 5 {
            bail!(
                "malformed shard line {} in {}: {}",
                line_no + 1,
                path.display(),
                line
            );
        }
        let key = CompoundKey {
            cp_id: fields[1].to_string(),
            tags: fields[0].split('+').map(str::to_string).collect(),
        };
        let raw: u64 = fields[2]
            .parse()
            .with_context(|| format!("bad count in shard line: {}", line))?;
        let strand_net: i64 = fields[3]
            .parse()
            .with_context(|| format!("bad strand sum in shard line: {}", line))?;

        let entry = state.compounds.entry(key).or_default();
        entry.raw += raw;
        entry.strand_net += strand_net;
        let mut n_umis = 0u64;
        for umi in fields[4].split(';').filter(|u| !u.is_empty()) {
            *entry.umis.entry(umi.as_bytes().to_vec()).or_insert(0) += 1;
            n_umis += 1;
        }
        // reads whose degenerate window was never extracted
        entry.undedup += raw.saturating_sub(n_umis);
    }
    Ok(())
}

/// Merge one shard `.log` file: counters, error-model observations and the
/// length histogram.
pub fn read_shard_log(path: &Path, state: &mut PipelineState) -> Result<()> {
    let file =
        File::open(path).with_context(|| format!("cannot open shard log {}", path.display()))?;
    let reader = BufReader::new(file);

    #[derive(PartialEq)]
    enum Section {
        Counters,
        ErrorModel,
        Lengths,
    }
    let mut section = Section::Counters;

    for line in reader.lines() {
        let line = line?;
        match line.as_str() {
            "" => continue,
            "#counters" => {
                section = Section::Counters;
                continue;
            }
            "#errormodel" => {
                section = Section::ErrorModel;
                continue;
            }
            "#lengths" => {
                section = Section::Lengths;
                continue;
            }
            _ => {}
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match section {
            Section::Counters => {
                if fields.len() == 2 {
                    let value: u64 = fields[1].parse().unwrap_or(0);
                    let mut single = crate::aggregate::ReadCounters::default();
                    single.set(fields[0], value);
                    state.counters.merge(&single);
                }
            }
            Section::ErrorModel => {
                if fields.len() == 3 {
                    let count: u64 = fields[2].parse().unwrap_or(0);
                    state
                        .error_model
                        .record_n(fields[0].as_bytes(), fields[1].as_bytes(), count);
                }
            }
            Section::Lengths => {
                if fields.len() == 2 {
                    let len: usize = fields[0].parse().unwrap_or(0);
                    let count: u64 = fields[1].parse().unwrap_or(0);
                    *state.length_hist.entry(len).or_insert(0) += count;
                }
            }
        }
    }
    Ok(())
}
