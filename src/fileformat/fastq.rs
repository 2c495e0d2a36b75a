use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use seq_io::fastq::Reader as FastqReader;

pub type DynFastqReader = FastqReader<Box<dyn std::io::Read>>;

/// Open a FASTQ file for reading, transparently handling gzip and other
/// compression formats. The reader is only ever advanced on the calling
/// thread; workers receive owned records.
pub fn open_fastq(path: &Path) -> Result<DynFastqReader> {
    let handle =
        File::open(path).with_context(|| format!("could not open fastq file {}", path.display()))?;

    let (reader, _compression) = niffler::get_reader(Box::new(handle))
        .with_context(|| format!("could not open fastq file {}", path.display()))?;

    Ok(FastqReader::new(reader))
}
