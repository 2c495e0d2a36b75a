use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::aggregate::output::{self, OutputOptions};
use crate::aggregate::{self, FinalizeOptions, PipelineState};
use crate::fileformat::shard;
use crate::log_info;
use crate::tags::{Engine, EngineConfig, MatchOptions, TagFileSpec};

use super::count::DEFAULT_ANCHOR_SIZE;

///////////////////////////////
/// Commandline option: merge shard artifacts and run the final analyses
#[derive(Args)]
pub struct ReduceCMD {
    #[arg(
        short = 'i',
        long = "input",
        num_args = 1..,
        value_delimiter = ',',
        help = "Shard .allTags files (comma-separated); matching .log files are found by suffix"
    )]
    pub shard_tags: Vec<PathBuf>,

    #[arg(
        short = 't',
        long = "tags",
        num_args = 1..,
        value_delimiter = ',',
        help = "Tag table files, as given to the shard workers"
    )]
    pub tag_files: Vec<String>,

    #[arg(short = 'H', long = "head-pieces", num_args = 1.., value_delimiter = ',')]
    pub head_pieces: Vec<String>,

    #[arg(short = 'o', long = "overhangs", num_args = 1.., value_delimiter = ',')]
    pub overhangs: Vec<String>,

    #[arg(short = 'p', long = "closing-primers", num_args = 1.., value_delimiter = ',')]
    pub closing_primers: Vec<String>,

    #[arg(short = 'a', long = "anchor-size", default_value_t = DEFAULT_ANCHOR_SIZE)]
    pub anchor_size: usize,

    #[arg(long = "reverse-cycles")]
    pub reverse_cycles: bool,

    #[arg(short = 'N', long = "no-umi")]
    pub no_umi: bool,

    #[arg(short = 'O', long = "no-overrep")]
    pub no_overrep: bool,

    #[arg(short = 'D', long = "no-umi-cleanup")]
    pub no_umi_cleanup: bool,

    #[arg(short = 'v', long = "valid")]
    pub valid: Vec<String>,

    #[arg(short = 'V', long = "invalid")]
    pub invalid: Vec<String>,

    #[arg(short = 'W', long = "expected-only")]
    pub expected_only: bool,

    #[arg(short = 'd', long = "dump-umi")]
    pub dump_umi: Option<String>,

    #[arg(short = 'L', long = "write-lengths")]
    pub write_lengths: bool,

    #[arg(short = 'E', long = "write-errors")]
    pub write_errors: bool,

    #[arg(short = 'c', long = "write-tagcounts")]
    pub write_tagcounts: bool,

    #[arg(short = 'e', long = "write-existingtags")]
    pub write_existing: bool,

    #[arg(short = 'w', long = "write-expected")]
    pub write_expected: bool,

    #[arg(long = "out-dir", default_value = ".")]
    pub out_dir: PathBuf,

    #[arg(long = "prefix", default_value = "merged")]
    pub prefix: String,
}

impl ReduceCMD {
    pub fn try_execute(&mut self) -> Result<()> {
        let engine = Engine::build(&EngineConfig {
            tag_files: self.tag_files.iter().map(|s| TagFileSpec::parse(s)).collect(),
            reverse_cycles: self.reverse_cycles,
            head_pieces: self.head_pieces.clone(),
            overhangs: self.overhangs.clone(),
            closing_primers: self.closing_primers.clone(),
            anchor_size: self.anchor_size,
            valid_rules: self.valid.clone(),
            invalid_rules: self.invalid.clone(),
            options: MatchOptions {
                no_umi: self.no_umi,
                ..Default::default()
            },
        })?;

        let mut state = PipelineState::default();
        for tags_path in &self.shard_tags {
            log_info!("Merging shard"; "path" => %tags_path.display());
            shard::read_shard_tags(tags_path, &mut state)?;
            shard::read_shard_log(&shard::log_path_for(tags_path), &mut state)?;
        }
        log_info!(
            "Merged shards";
            "shards" => self.shard_tags.len(),
            "total" => state.counters.total,
            "compounds" => state.compounds.len()
        );

        let finalized = aggregate::finalize(
            state,
            &engine,
            &FinalizeOptions {
                no_umi: self.no_umi,
                no_umi_cleanup: self.no_umi_cleanup,
                no_overrep: self.no_overrep,
                dump_umi: self.dump_umi.clone(),
            },
        );

        output::write_outputs(
            &finalized,
            &engine,
            &OutputOptions {
                out_dir: self.out_dir.clone(),
                prefix: self.prefix.clone(),
                with_overrep: !self.no_overrep,
                expected_only: self.expected_only,
                write_lengths: self.write_lengths,
                write_errors: self.write_errors,
                write_tagcounts: self.write_tagcounts,
                write_existing: self.write_existing,
                write_expected: self.write_expected,
            },
        )?;

        log_info!(
            "Reduce finished";
            "matched" => finalized.counters.matched,
            "compounds" => finalized.rows.len()
        );
        Ok(())
    }
}
