use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::tags::Engine;

use super::{Finalized, ReadCounters};

///////////////////////////////
/// Optional per-read diagnostic streams, written while the pipeline runs.
/// In sharded runs every worker owns its own set, suffixed by shard index
pub struct StreamDiagnostics {
    invalid: Option<BufWriter<File>>,
    chimeras: Option<BufWriter<File>>,
    recovery: Option<BufWriter<File>>,
}

impl StreamDiagnostics {
    pub fn disabled() -> StreamDiagnostics {
        StreamDiagnostics {
            invalid: None,
            chimeras: None,
            recovery: None,
        }
    }

    pub fn create(
        dir: &Path,
        prefix: &str,
        shard: Option<usize>,
        invalid: bool,
        chimeras: bool,
        recovery: bool,
    ) -> Result<StreamDiagnostics> {
        let open = |kind: &str| -> Result<BufWriter<File>> {
            let name = match shard {
                Some(i) => format!("tags_{}_{}.{}", prefix, i, kind),
                None => format!("tags_{}.{}", prefix, kind),
            };
            let path = dir.join(name);
            Ok(BufWriter::new(File::create(&path).with_context(|| {
                format!("cannot create diagnostic output {}", path.display())
            })?))
        };
        Ok(StreamDiagnostics {
            invalid: if invalid { Some(open("invalid")?) } else { None },
            chimeras: if chimeras { Some(open("chimeras")?) } else { None },
            recovery: if recovery { Some(open("recovery")?) } else { None },
        })
    }

    pub fn record_invalid(&mut self, seq: &[u8]) {
        if let Some(w) = &mut self.invalid {
            let _ = w.write_all(seq);
            let _ = w.write_all(b"\n");
        }
    }

    pub fn record_chimera(&mut self, seq: &[u8]) {
        if let Some(w) = &mut self.chimeras {
            let _ = w.write_all(seq);
            let _ = w.write_all(b"\n");
        }
    }

    pub fn record_recovery(&mut self, pass: u32, offset: usize, outcome: &str) {
        if let Some(w) = &mut self.recovery {
            let _ = writeln!(w, "{}\t{}\t{}", pass, offset, outcome);
        }
    }

    pub fn flush(&mut self) {
        for w in [&mut self.invalid, &mut self.chimeras, &mut self.recovery]
            .into_iter()
            .flatten()
        {
            let _ = w.flush();
        }
    }
}

///////////////////////////////
/////////////////////////////// Final tabular outputs
///////////////////////////////

#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub out_dir: PathBuf,
    pub prefix: String,
    pub with_overrep: bool,
    pub expected_only: bool,
    pub write_lengths: bool,
    pub write_errors: bool,
    pub write_tagcounts: bool,
    pub write_existing: bool,
    pub write_expected: bool,
}

impl OutputOptions {
    pub fn path(&self, suffix: &str) -> PathBuf {
        self.out_dir.join(format!("tags_{}.{}", self.prefix, suffix))
    }
}

/// Write every enabled output file for a finalized run. Returns the paths
/// written, for the run log.
pub fn write_outputs(fin: &Finalized, engine: &Engine, opts: &OutputOptions) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let all_tags = opts.path("allTags");
    write_all_tags(&all_tags, fin, opts, false)?;
    written.push(all_tags);

    // the filtered companion appears when unexpected compounds dominate
    let missing = fin.rows.iter().filter(|r| !r.expected).count();
    let found = fin.rows.len() - missing;
    if missing > found {
        let filtered = opts.path("filtered");
        write_all_tags(&filtered, fin, opts, true)?;
        written.push(filtered);
    }

    if opts.with_overrep {
        let over = opts.path("over");
        write_over(&over, fin)?;
        written.push(over);
    }

    let log = opts.path("log");
    write_log(&log, fin)?;
    written.push(log);

    if opts.write_lengths {
        let path = opts.path("lengths");
        write_lengths(&path, fin)?;
        written.push(path);
    }
    if opts.write_errors {
        let path = opts.path("errors");
        write_errors(&path, fin)?;
        written.push(path);
    }
    if opts.write_tagcounts {
        let path = opts.path("tagcounts");
        write_tagcounts(&path, fin)?;
        written.push(path);
    }
    if opts.write_existing {
        let path = opts.path("existingtags");
        write_existing(&path, fin)?;
        written.push(path);
    }
    if opts.write_expected {
        let path = opts.path("expected");
        write_expected(&path, engine)?;
        written.push(path);
    }
    if let Some((key, umis)) = &fin.degen_dump {
        let path = opts.path("degen");
        let mut w = create(&path)?;
        writeln!(w, "# {} {}", key.cp_id, key.tags.join("+"))?;
        for (umi, count) in umis {
            writeln!(w, "{}\t{}", String::from_utf8_lossy(umi), count)?;
        }
        written.push(path);
    }

    Ok(written)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path).with_context(|| {
        format!("cannot create output file {}", path.display())
    })?))
}

fn write_all_tags(
    path: &Path,
    fin: &Finalized,
    opts: &OutputOptions,
    expected_rows_only: bool,
) -> Result<()> {
    let mut w = create(path)?;
    let n_cycles = fin.rows.first().map(|r| r.key.tags.len()).unwrap_or(0);

    let mut header: Vec<String> = (1..=n_cycles).map(|i| format!("TAG{}", i)).collect();
    header.extend(
        ["CP", "RAW", "DEDUP", "STRANDBIAS", "RAW_NORM", "DEDUP_NORM", "EXPECTED"]
            .map(str::to_string),
    );
    if opts.with_overrep {
        header.extend(
            [
                "SDCOUNT_RAW",
                "SDCOUNT_DEDUP",
                "OVER_RAW_LINES",
                "OVER_DEDUP_LINES",
                "OVER_UNIQUE_LINES",
                "OVER_RAW_PLANES",
                "OVER_DEDUP_PLANES",
                "OVER_UNIQUE_PLANES",
            ]
            .map(str::to_string),
        );
    }
    writeln!(w, "{}", header.join("\t"))?;

    for row in &fin.rows {
        if (expected_rows_only || opts.expected_only) && !row.expected {
            continue;
        }
        let mut fields: Vec<String> = row.key.tags.clone();
        fields.push(row.key.cp_id.clone());
        fields.push(row.raw.to_string());
        fields.push(row.dedup.to_string());
        fields.push(format!("{:.3}", row.strand_bias));
        fields.push(format!("{:.3}", row.raw_norm));
        fields.push(format!("{:.3}", row.dedup_norm));
        fields.push(if row.expected { "1" } else { "0" }.to_string());
        if opts.with_overrep {
            fields.push(row.sd_raw.to_string());
            fields.push(row.sd_dedup.to_string());
            for kind in 0..2 {
                for axis in 0..3 {
                    fields.push(format!("{:.1}", row.over[kind][axis]));
                }
            }
        }
        writeln!(w, "{}", fields.join("\t"))?;
    }
    w.flush()?;
    Ok(())
}

fn write_over(path: &Path, fin: &Finalized) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "CP\tTYPE\tSTRUCTURE\tVALUE\tMEAN\tSD\tBIN")?;
    for entry in &fin.over_entries {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{:.3}\t{:.3}\t{}",
            entry.cp_id, entry.axis, entry.structure, entry.value, entry.mean, entry.sd, entry.bin
        )?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_counters(w: &mut impl Write, counters: &ReadCounters) -> Result<()> {
    for (name, value) in counters.entries() {
        writeln!(w, "{}\t{}", name, value)?;
    }
    Ok(())
}

fn write_log(path: &Path, fin: &Finalized) -> Result<()> {
    let mut w = create(path)?;
    write_counters(&mut w, &fin.counters)?;
    writeln!(w, "deduped\t{}", fin.deduped_total)?;
    writeln!(w, "compounds\t{}", fin.rows.len())?;
    if !fin.sorted {
        writeln!(w, "unsorted\t1")?;
    }
    for cp in &fin.cp_summaries {
        writeln!(
            w,
            "cp\t{}\tuniq\t{}\treads\t{}\tlibrarySize\t{}\tmeanRaw\t{:.3}\tsdRaw\t{:.3}\tmeanDedup\t{:.3}\tsdDedup\t{:.3}",
            cp.cp_id,
            cp.uniq,
            cp.matched_reads,
            cp.library_size,
            cp.mean_raw,
            cp.sd_raw,
            cp.mean_dedup,
            cp.sd_dedup
        )?;
    }
    w.flush()?;
    Ok(())
}

fn write_lengths(path: &Path, fin: &Finalized) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "LENGTH\tREADS")?;
    for (len, count) in &fin.length_hist {
        writeln!(w, "{}\t{}", len, count)?;
    }
    w.flush()?;
    Ok(())
}

fn write_errors(path: &Path, fin: &Finalized) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "ERRORS\tRATE_PER_BASE")?;
    for (e, rate) in fin.base_error.entries() {
        writeln!(w, "{}\t{:.6}", e, rate)?;
    }
    w.flush()?;
    Ok(())
}

/// Per-cycle observed counts of every tag code in the final rows.
fn write_tagcounts(path: &Path, fin: &Finalized) -> Result<()> {
    use std::collections::BTreeMap;
    let mut counts: BTreeMap<(usize, &str), u64> = BTreeMap::new();
    for row in &fin.rows {
        for (cycle, code) in row.key.tags.iter().enumerate() {
            *counts.entry((cycle, code)).or_insert(0) += row.raw;
        }
    }
    let mut w = create(path)?;
    writeln!(w, "CYCLE\tTAG\tRAW")?;
    for ((cycle, code), count) in counts {
        writeln!(w, "{}\t{}\t{}", cycle + 1, code, count)?;
    }
    w.flush()?;
    Ok(())
}

/// Tag codes observed in at least one matched compound.
fn write_existing(path: &Path, fin: &Finalized) -> Result<()> {
    use std::collections::BTreeSet;
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for row in &fin.rows {
        for code in &row.key.tags {
            seen.insert(code);
        }
    }
    let mut w = create(path)?;
    for code in seen {
        writeln!(w, "{}", code)?;
    }
    w.flush()?;
    Ok(())
}

/// The expected tag sets per closing primer, as configured.
fn write_expected(path: &Path, engine: &Engine) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "CP\tTAG")?;
    let mut cp_ids: Vec<&String> = engine.inventory.valid_tags.keys().collect();
    cp_ids.sort();
    for cp_id in cp_ids {
        let mut codes: Vec<&String> = engine.inventory.valid_tags[cp_id].iter().collect();
        codes.sort();
        for code in codes {
            writeln!(w, "{}\t{}", cp_id, code)?;
        }
    }
    w.flush()?;
    Ok(())
}
