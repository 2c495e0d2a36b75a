pub mod classify;
pub mod inventory;
pub mod matcher;
pub mod primer;

pub use classify::{MatchEvent, Orientation, ReadClassifier};
pub use inventory::{ClosingPrimerId, InventoryLoader, TagCode, TagInventory, TagRule};
pub use matcher::TagMatcher;
pub use primer::{AnchorMatcher, ClosingPrimer, CompiledPrimers, HeadPiece};

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub(crate) const BASE_OPTS: [u8; 4] = [b'A', b'C', b'G', b'T'];

///////////////////////////////
/// Geometry of the tag region: per-cycle tag lengths and the overhangs
/// between them (with a trailing empty overhang for indexing convenience)
#[derive(Debug, Clone)]
pub struct TagSchema {
    pub cycle_lens: Vec<usize>,
    pub overhangs: Vec<Vec<u8>>,
    pub total_len: usize,
}

impl TagSchema {
    pub fn build(inventory: &TagInventory, overhangs: &[String]) -> Result<TagSchema> {
        let cycle_lens: Vec<usize> = inventory.cycles.iter().map(|c| c.tag_len).collect();
        if cycle_lens.is_empty() {
            bail!("tag inventory contains no cycles");
        }
        if !overhangs.is_empty() && overhangs.len() != cycle_lens.len() - 1 {
            bail!(
                "expected {} overhangs for {} cycles, got {}",
                cycle_lens.len() - 1,
                cycle_lens.len(),
                overhangs.len()
            );
        }

        let mut oh: Vec<Vec<u8>> = overhangs
            .iter()
            .map(|o| o.trim().to_uppercase().into_bytes())
            .collect();
        while oh.len() < cycle_lens.len() {
            oh.push(Vec::new());
        }

        let total_len = cycle_lens.iter().sum::<usize>() + oh.iter().map(Vec::len).sum::<usize>();
        Ok(TagSchema {
            cycle_lens,
            overhangs: oh,
            total_len,
        })
    }
}

///////////////////////////////
/// Per-run matching options
#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    pub similar: bool,
    pub similar_strict: bool,
    pub left_anchored: bool,
    pub recovery: bool,
    pub min_base_quality: u8,
    pub restrict_valid: bool,
    pub no_umi: bool,
}

///////////////////////////////
/// One tag-table input, optionally restricted to a set of library columns
#[derive(Debug, Clone)]
pub struct TagFileSpec {
    pub path: PathBuf,
    pub libraries: Vec<String>,
}

impl TagFileSpec {
    /// Parses `file` or `file:libA:libB`.
    pub fn parse(spec: &str) -> TagFileSpec {
        let mut parts = spec.split(':');
        let path = PathBuf::from(parts.next().unwrap_or_default());
        let libraries = parts.map(str::to_string).collect();
        TagFileSpec { path, libraries }
    }
}

///////////////////////////////
/// Everything needed to assemble the read-processing engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub tag_files: Vec<TagFileSpec>,
    pub reverse_cycles: bool,
    pub head_pieces: Vec<String>,
    pub overhangs: Vec<String>,
    pub closing_primers: Vec<String>,
    pub anchor_size: usize,
    pub valid_rules: Vec<String>,
    pub invalid_rules: Vec<String>,
    pub options: MatchOptions,
}

///////////////////////////////
/// Read-only state shared by all workers: inventory, compiled primers,
/// tag-region geometry and the matching options
pub struct Engine {
    pub inventory: TagInventory,
    pub primers: CompiledPrimers,
    pub schema: TagSchema,
    pub options: MatchOptions,
}

impl Engine {
    pub fn build(cfg: &EngineConfig) -> Result<Engine> {
        if cfg.tag_files.is_empty() {
            bail!("no tag files given");
        }
        if cfg.head_pieces.is_empty() {
            bail!("no head pieces given");
        }
        if cfg.closing_primers.is_empty() {
            bail!("no closing primers given");
        }

        let mut loader = InventoryLoader::new(cfg.reverse_cycles);
        for spec in &cfg.tag_files {
            loader
                .load_path(&spec.path, &spec.libraries)
                .with_context(|| format!("loading tag table {}", spec.path.display()))?;
        }
        let mut inventory = loader.finish()?;

        let heads: Vec<HeadPiece> = cfg
            .head_pieces
            .iter()
            .map(|h| HeadPiece::parse(h))
            .collect::<Result<_>>()?;
        let closers: Vec<ClosingPrimer> = cfg
            .closing_primers
            .iter()
            .map(|p| ClosingPrimer::parse(p))
            .collect::<Result<_>>()?;

        let primers = CompiledPrimers::compile(heads, closers, cfg.anchor_size)?;
        let schema = TagSchema::build(&inventory, &cfg.overhangs)?;

        inventory.bind_closing_primers(&primers.closers)?;

        let valid: Vec<TagRule> = cfg
            .valid_rules
            .iter()
            .map(|r| TagRule::parse(r))
            .collect::<Result<_>>()?;
        let invalid: Vec<TagRule> = cfg
            .invalid_rules
            .iter()
            .map(|r| TagRule::parse(r))
            .collect::<Result<_>>()?;
        inventory.apply_rules(&valid, &invalid);
        inventory.finalize_library_sizes();

        let mut options = cfg.options.clone();
        if options.similar_strict {
            options.similar = true;
        }
        options.restrict_valid = !cfg.valid_rules.is_empty() || !cfg.invalid_rules.is_empty();

        Ok(Engine {
            inventory,
            primers,
            schema,
            options,
        })
    }

    pub fn classifier(&self) -> ReadClassifier<'_> {
        ReadClassifier::new(self)
    }

    pub fn closer_by_id(&self, cp_id: &str) -> Option<&ClosingPrimer> {
        self.primers.closers.iter().find(|c| c.id == cp_id)
    }

    pub fn library_size(&self, cp_id: &str) -> u64 {
        self.inventory.library_size(cp_id)
    }
}
