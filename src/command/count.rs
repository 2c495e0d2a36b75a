use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use seq_io::fastq::Record as FastqRecord;

use crate::aggregate::output::{self, OutputOptions, StreamDiagnostics};
use crate::aggregate::{self, FinalizeOptions, Finalized, PipelineState};
use crate::fileformat::shard;
use crate::fileformat::{config, open_fastq};
use crate::tags::{Engine, EngineConfig, MatchOptions, TagFileSpec};
use crate::{log_critical, log_info, log_warning};

pub const DEFAULT_ANCHOR_SIZE: usize = 7;

///////////////////////////////
/// Commandline option: count tags in one FASTQ input
#[derive(Args)]
pub struct CountCMD {
    #[arg(short = 'f', long = "fastq", help = "Input FASTQ file (plain or gzipped)")]
    pub path_fastq: PathBuf,

    #[arg(
        short = 't',
        long = "tags",
        num_args = 1..,
        value_delimiter = ',',
        help = "Tag table files (comma-separated); a :libA:libB suffix restricts library columns"
    )]
    pub tag_files: Vec<String>,

    #[arg(
        short = 'H',
        long = "head-pieces",
        num_args = 1..,
        value_delimiter = ',',
        help = "Head piece sequences (comma-separated)"
    )]
    pub head_pieces: Vec<String>,

    #[arg(
        short = 'o',
        long = "overhangs",
        num_args = 1..,
        value_delimiter = ',',
        help = "Overhang sequences between cycles (comma-separated)"
    )]
    pub overhangs: Vec<String>,

    #[arg(
        short = 'p',
        long = "closing-primers",
        num_args = 1..,
        value_delimiter = ',',
        help = "Closing primer sequences (comma-separated); an optional <label>- prefix names each"
    )]
    pub closing_primers: Vec<String>,

    #[arg(short = 'a', long = "anchor-size", default_value_t = DEFAULT_ANCHOR_SIZE)]
    pub anchor_size: usize,

    #[arg(
        short = 'q',
        long = "min-base-quality",
        default_value_t = 0,
        help = "Minimum base quality inside the tag region (phred-33)"
    )]
    pub min_base_quality: u8,

    #[arg(short = 'l', long = "left-anchored", help = "Accept reads with a 5' anchor only")]
    pub left_anchored: bool,

    #[arg(short = 's', long = "similar", help = "Tolerate one error per cycle")]
    pub similar: bool,

    #[arg(
        short = 'S',
        long = "similar-strict",
        help = "Tolerate one error per tag-string (implies -s)"
    )]
    pub similar_strict: bool,

    #[arg(
        short = 'i',
        long = "reverse-cycles",
        help = "Reverse-complement tags of even cycles while loading"
    )]
    pub reverse_cycles: bool,

    #[arg(short = 'N', long = "no-umi", help = "Disable degenerate-window handling")]
    pub no_umi: bool,

    #[arg(short = 'O', long = "no-overrep", help = "Disable over-representation analysis")]
    pub no_overrep: bool,

    #[arg(short = 'D', long = "no-umi-cleanup", help = "Disable error-aware UMI cleanup")]
    pub no_umi_cleanup: bool,

    #[arg(short = 'v', long = "valid", help = "Valid tag pattern <cp;..;regex>, repeatable")]
    pub valid: Vec<String>,

    #[arg(short = 'V', long = "invalid", help = "Invalid tag pattern <cp;..;regex>, repeatable")]
    pub invalid: Vec<String>,

    #[arg(
        short = 'W',
        long = "expected-only",
        help = "Exclude unexpected compounds from the output"
    )]
    pub expected_only: bool,

    #[arg(
        short = 'd',
        long = "dump-umi",
        help = "Dump the degenerate-window distribution of one compound ([cp:]t1+t2+..)"
    )]
    pub dump_umi: Option<String>,

    #[arg(short = 'r', long = "recovery", help = "Re-enter reads past a located tag region")]
    pub recovery: bool,

    #[arg(short = 'R', long = "recovery-log", help = "Write the recovery pass log")]
    pub recovery_log: bool,

    #[arg(short = 'T', long = "max-reads", help = "Stop after this many reads")]
    pub max_reads: Option<u64>,

    #[arg(short = 'x', long = "shards", default_value_t = 1, help = "Process with this many workers")]
    pub shards: usize,

    #[arg(short = 'I', long = "write-invalid", help = "Write unmatched reads")]
    pub write_invalid: bool,

    #[arg(short = 'X', long = "write-chimeras", help = "Write chimeric reads")]
    pub write_chimeras: bool,

    #[arg(short = 'L', long = "write-lengths", help = "Write the tag-string length histogram")]
    pub write_lengths: bool,

    #[arg(short = 'E', long = "write-errors", help = "Write the calibrated error rates")]
    pub write_errors: bool,

    #[arg(short = 'c', long = "write-tagcounts", help = "Write per-cycle tag counts")]
    pub write_tagcounts: bool,

    #[arg(short = 'e', long = "write-existingtags", help = "Write observed tag codes")]
    pub write_existing: bool,

    #[arg(short = 'w', long = "write-expected", help = "Write the expected tag sets")]
    pub write_expected: bool,

    #[arg(long = "out-dir", help = "Output directory; defaults to the input's directory")]
    pub out_dir: Option<PathBuf>,

    #[arg(long = "prefix", help = "Output name prefix; defaults to the input stem")]
    pub prefix: Option<String>,

    #[arg(long = "config", help = "Run configuration file")]
    pub config: Option<PathBuf>,
}

impl CountCMD {
    pub fn try_execute(&mut self) -> Result<()> {
        self.merge_config()?;
        if self.tag_files.is_empty() {
            log_critical!("No tag files specified. Provide -t or a matching config record.");
        }
        if self.head_pieces.is_empty() || self.closing_primers.is_empty() {
            log_critical!("Both head pieces (-H) and closing primers (-p) are required.");
        }
        let params = self.to_params()?;

        log_info!("Counting tags"; "fastq" => %params.fastq.display(), "shards" => params.shards);
        let finalized = Count::run(&params)?;

        if finalized.counters.total == 0 {
            log_warning!("Input contained no reads");
        }

        log_info!(
            "Count finished";
            "total" => finalized.counters.total,
            "matched" => finalized.counters.matched,
            "compounds" => finalized.rows.len()
        );
        Ok(())
    }

    /// Fill unset values from the first config record whose glob matches
    /// the input filename.
    fn merge_config(&mut self) -> Result<()> {
        let Some(config_path) = &self.config else {
            return Ok(());
        };
        let fastq_name = self
            .path_fastq
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(record) = config::lookup(config_path, &fastq_name)? else {
            return Ok(());
        };
        log_info!("Using config record"; "glob" => %record.fastq_glob);

        let split = |s: &str| -> Vec<String> { s.split(',').map(str::to_string).collect() };
        if self.tag_files.is_empty() {
            if let Some(v) = &record.tag_files {
                self.tag_files = split(v);
            }
        }
        if self.head_pieces.is_empty() {
            if let Some(v) = &record.head_pieces {
                self.head_pieces = split(v);
            }
        }
        if self.overhangs.is_empty() {
            if let Some(v) = &record.overhangs {
                self.overhangs = split(v);
            }
        }
        if self.closing_primers.is_empty() {
            if let Some(v) = &record.closing_primers {
                self.closing_primers = split(v);
            }
        }
        if self.valid.is_empty() {
            if let Some(v) = &record.valid_tags {
                self.valid = vec![v.clone()];
            }
        }
        if self.invalid.is_empty() {
            if let Some(v) = &record.invalid_tags {
                self.invalid = vec![v.clone()];
            }
        }
        if !self.reverse_cycles {
            if let Some(v) = record.reverse_cycles {
                self.reverse_cycles = v;
            }
        }
        Ok(())
    }

    fn to_params(&self) -> Result<CountParams> {
        let out_dir = match &self.out_dir {
            Some(dir) => dir.clone(),
            None => self
                .path_fastq
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let prefix = self
            .prefix
            .clone()
            .unwrap_or_else(|| derive_prefix(&self.path_fastq));

        Ok(CountParams {
            fastq: self.path_fastq.clone(),
            engine: EngineConfig {
                tag_files: self.tag_files.iter().map(|s| TagFileSpec::parse(s)).collect(),
                reverse_cycles: self.reverse_cycles,
                head_pieces: self.head_pieces.clone(),
                overhangs: self.overhangs.clone(),
                closing_primers: self.closing_primers.clone(),
                anchor_size: self.anchor_size,
                valid_rules: self.valid.clone(),
                invalid_rules: self.invalid.clone(),
                options: MatchOptions {
                    similar: self.similar,
                    similar_strict: self.similar_strict,
                    left_anchored: self.left_anchored,
                    recovery: self.recovery || self.recovery_log,
                    min_base_quality: self.min_base_quality,
                    restrict_valid: false,
                    no_umi: self.no_umi,
                },
            },
            finalize: FinalizeOptions {
                no_umi: self.no_umi,
                no_umi_cleanup: self.no_umi_cleanup,
                no_overrep: self.no_overrep,
                dump_umi: self.dump_umi.clone(),
            },
            output: OutputOptions {
                out_dir,
                prefix,
                with_overrep: !self.no_overrep,
                expected_only: self.expected_only,
                write_lengths: self.write_lengths,
                write_errors: self.write_errors,
                write_tagcounts: self.write_tagcounts,
                write_existing: self.write_existing,
                write_expected: self.write_expected,
            },
            shards: self.shards.max(1),
            max_reads: self.max_reads,
            write_invalid: self.write_invalid,
            write_chimeras: self.write_chimeras,
            recovery_log: self.recovery_log,
        })
    }
}

/// Input stem with the usual fastq extensions stripped.
fn derive_prefix(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reads".to_string());
    for ext in [".gz", ".fastq", ".fq"] {
        if let Some(stripped) = name.strip_suffix(ext) {
            name = stripped.to_string();
        }
    }
    name
}

///////////////////////////////
/// Fully resolved run parameters
#[derive(Debug, Clone)]
pub struct CountParams {
    pub fastq: PathBuf,
    pub engine: EngineConfig,
    pub finalize: FinalizeOptions,
    pub output: OutputOptions,
    pub shards: usize,
    pub max_reads: Option<u64>,
    pub write_invalid: bool,
    pub write_chimeras: bool,
    pub recovery_log: bool,
}

pub struct Count;

impl Count {
    pub fn run(params: &CountParams) -> Result<Finalized> {
        let engine = Engine::build(&params.engine)?;

        let state = if params.shards <= 1 {
            Self::run_single(params, &engine)?
        } else {
            Self::run_sharded(params, &engine)?
        };

        let finalized = aggregate::finalize(state, &engine, &params.finalize);
        output::write_outputs(&finalized, &engine, &params.output)?;
        Ok(finalized)
    }

    fn run_single(params: &CountParams, engine: &Engine) -> Result<PipelineState> {
        let mut reader = open_fastq(&params.fastq)?;
        let mut diag = StreamDiagnostics::create(
            &params.output.out_dir,
            &params.output.prefix,
            None,
            params.write_invalid,
            params.write_chimeras,
            params.recovery_log,
        )?;
        let classifier = engine.classifier();

        let mut state = PipelineState::default();
        let mut n_reads: u64 = 0;
        while let Some(record) = reader.next() {
            let record = record.context("error reading fastq record")?;
            classifier.classify(record.seq(), record.qual(), &mut state, &mut diag);
            n_reads += 1;
            if params.max_reads.is_some_and(|m| n_reads >= m) {
                break;
            }
        }
        diag.flush();
        Ok(state)
    }

    /// Deal reads round-robin to worker threads, each with a private state;
    /// write the per-shard artifacts, then merge.
    fn run_sharded(params: &CountParams, engine: &Engine) -> Result<PipelineState> {
        let n_shards = params.shards;
        let mut reader = open_fastq(&params.fastq)?;

        let states = std::thread::scope(|scope| -> Result<Vec<PipelineState>> {
            let mut senders = Vec::with_capacity(n_shards);
            let mut handles = Vec::with_capacity(n_shards);

            for shard_idx in 0..n_shards {
                let (tx, rx) = crossbeam::channel::bounded::<(Vec<u8>, Vec<u8>)>(1024);
                senders.push(tx);

                let out_dir = params.output.out_dir.clone();
                let prefix = params.output.prefix.clone();
                let (write_invalid, write_chimeras, recovery_log) = (
                    params.write_invalid,
                    params.write_chimeras,
                    params.recovery_log,
                );

                let handle = scope.spawn(move || -> Result<PipelineState> {
                    let mut diag = StreamDiagnostics::create(
                        &out_dir,
                        &prefix,
                        Some(shard_idx),
                        write_invalid,
                        write_chimeras,
                        recovery_log,
                    )?;
                    let classifier = engine.classifier();
                    let mut state = PipelineState::default();
                    while let Ok((seq, qual)) = rx.recv() {
                        classifier.classify(&seq, &qual, &mut state, &mut diag);
                    }
                    diag.flush();
                    Ok(state)
                });
                handles.push(handle);
            }

            let mut n_reads: u64 = 0;
            while let Some(record) = reader.next() {
                let record = record.context("error reading fastq record")?;
                let target = (n_reads as usize) % n_shards;
                let _ = senders[target].send((record.seq().to_vec(), record.qual().to_vec()));
                n_reads += 1;
                if params.max_reads.is_some_and(|m| n_reads >= m) {
                    break;
                }
            }
            drop(senders);

            let mut states = Vec::with_capacity(n_shards);
            for handle in handles {
                states.push(handle.join().expect("shard worker panicked")?);
            }
            Ok(states)
        })?;

        let mut merged = PipelineState::default();
        for (shard_idx, state) in states.into_iter().enumerate() {
            shard::write_shard_tags(&shard::shard_tags_path(&params.output.out_dir, shard_idx), &state)?;
            shard::write_shard_log(&shard::shard_log_path(&params.output.out_dir, shard_idx), &state)?;
            log_info!("Shard finished"; "shard" => shard_idx, "reads" => state.counters.total);
            merged.merge(state);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_strips_extensions() {
        assert_eq!(derive_prefix(Path::new("/data/sample.fastq.gz")), "sample");
        assert_eq!(derive_prefix(Path::new("run1.fq")), "run1");
        assert_eq!(derive_prefix(Path::new("plain.fastq")), "plain");
    }
}
