//! End-to-end scenarios: tag tables and FASTQ files on disk, through
//! `Count::run`, asserting on the finalized state and the output files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use delcount::aggregate::output::OutputOptions;
use delcount::aggregate::FinalizeOptions;
use delcount::command::{Count, CountParams};
use delcount::tags::{EngineConfig, MatchOptions, TagFileSpec};
use delcount::utils::revcomp;

const TABLE_A: &str = "\
#ID\tSEQUENCE\tlibA
CPL\tCCAGCA\t1
1.001\tAAA\t1
1.002\tGGG\t1
2.001\tCCC\t1
2.002\tTTT\t1
";

const TABLE_B: &str = "\
#ID\tSEQUENCE\tlibA
CPL\tCCNNNNCA\t1
1.001\tAAA\t1
1.002\tGGG\t1
2.001\tTGT\t1
2.002\tTTT\t1
";

fn write_table(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("tags.tsv");
    fs::write(&path, content).unwrap();
    path
}

fn write_fastq(dir: &Path, reads: &[Vec<u8>]) -> PathBuf {
    let path = dir.join("reads.fastq");
    let mut f = fs::File::create(&path).unwrap();
    for (i, seq) in reads.iter().enumerate() {
        writeln!(f, "@read{}", i).unwrap();
        f.write_all(seq).unwrap();
        writeln!(f).unwrap();
        writeln!(f, "+").unwrap();
        writeln!(f, "{}", "I".repeat(seq.len())).unwrap();
    }
    path
}

fn params(
    dir: &Path,
    fastq: PathBuf,
    table: PathBuf,
    closing_primer: &str,
    anchor_size: usize,
    options: MatchOptions,
) -> CountParams {
    CountParams {
        fastq,
        engine: EngineConfig {
            tag_files: vec![TagFileSpec {
                path: table,
                libraries: vec![],
            }],
            reverse_cycles: false,
            head_pieces: vec!["CAGGTCAG".to_string()],
            overhangs: vec![],
            closing_primers: vec![closing_primer.to_string()],
            anchor_size,
            valid_rules: vec![],
            invalid_rules: vec![],
            options,
        },
        finalize: FinalizeOptions::default(),
        output: OutputOptions {
            out_dir: dir.to_path_buf(),
            prefix: "reads".to_string(),
            with_overrep: true,
            ..Default::default()
        },
        shards: 1,
        max_reads: None,
        write_invalid: false,
        write_chimeras: false,
        recovery_log: false,
    }
}

#[test]
fn scenario_single_exact_read() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    let fastq = write_fastq(dir.path(), &[b"GTCAGAAACCCCCAGCA".to_vec()]);
    let p = params(dir.path(), fastq, table, "CCAGCA", 5, MatchOptions::default());

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.counters.total, 1);
    assert_eq!(fin.counters.matched, 1);
    assert_eq!(fin.counters.forward, 1);
    assert_eq!(fin.counters.valid, 1);

    assert_eq!(fin.rows.len(), 1);
    let row = &fin.rows[0];
    assert_eq!(row.key.cp_id, "");
    assert_eq!(row.key.tags, vec!["1.001".to_string(), "2.001".to_string()]);
    assert_eq!(row.raw, 1);
    assert_eq!(row.dedup, 1);
    assert!((row.strand_bias - 1.0).abs() < 1e-9);
    assert!(row.expected);

    let all_tags = fs::read_to_string(dir.path().join("tags_reads.allTags")).unwrap();
    let mut lines = all_tags.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("TAG1\tTAG2\tCP\tRAW\tDEDUP\tSTRANDBIAS"));
    let row_line = lines.next().unwrap();
    assert!(row_line.starts_with("1.001\t2.001\t\t1\t1\t1.000"));
    assert!(dir.path().join("tags_reads.log").exists());
}

#[test]
fn scenario_reverse_strand() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    let fastq = write_fastq(dir.path(), &[revcomp(b"GTCAGAAACCCCCAGCA")]);
    let p = params(dir.path(), fastq, table, "CCAGCA", 5, MatchOptions::default());

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.counters.matched, 1);
    assert_eq!(fin.counters.reverse, 1);
    let row = &fin.rows[0];
    assert_eq!(row.key.tags, vec!["1.001".to_string(), "2.001".to_string()]);
    assert!((row.strand_bias - 1.0).abs() < 1e-9);
}

#[test]
fn scenario_one_indel_with_similar_search() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    // tag-string AACCC: one base short of L = 6
    let fastq = write_fastq(dir.path(), &[b"GTCAGAACCCCCAGCA".to_vec()]);
    let p = params(
        dir.path(),
        fastq,
        table,
        "CCAGCA",
        5,
        MatchOptions {
            similar: true,
            ..Default::default()
        },
    );

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.counters.matched, 1);
    assert_eq!(fin.counters.similar, 1);
    assert_eq!(fin.rows[0].key.tags, vec!["1.001".to_string(), "2.001".to_string()]);
}

#[test]
fn scenario_umi_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_B);
    // three reads of the same compound: UMIs AAAA, AAAA, AAAT
    let reads = vec![
        b"AGAAATGTCCAAAACA".to_vec(),
        b"AGAAATGTCCAAAACA".to_vec(),
        b"AGAAATGTCCAAATCA".to_vec(),
    ];
    let fastq = write_fastq(dir.path(), &reads);
    let p = params(dir.path(), fastq, table, "CCNNNNCA", 2, MatchOptions::default());

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.counters.matched, 3);
    assert_eq!(fin.rows.len(), 1);
    let row = &fin.rows[0];
    assert_eq!(row.key.cp_id, "CC");
    assert_eq!(row.raw, 3);
    // AAAT is a singleton and never below the collapse threshold
    assert_eq!(row.dedup, 2);
}

#[test]
fn scenario_umi_dump() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_B);
    let reads = vec![
        b"AGAAATGTCCAAAACA".to_vec(),
        b"AGAAATGTCCAAAACA".to_vec(),
        b"AGAAATGTCCAAATCA".to_vec(),
    ];
    let fastq = write_fastq(dir.path(), &reads);
    let mut p = params(dir.path(), fastq, table, "CCNNNNCA", 2, MatchOptions::default());
    p.finalize.dump_umi = Some("CC:1.001+2.001".to_string());

    let fin = Count::run(&p).unwrap();
    let (key, umis) = fin.degen_dump.as_ref().unwrap();
    assert_eq!(key.cp_id, "CC");
    assert_eq!(umis[0], (b"AAAA".to_vec(), 2));
    assert_eq!(umis[1], (b"AAAT".to_vec(), 1));

    let degen = fs::read_to_string(dir.path().join("tags_reads.degen")).unwrap();
    assert!(degen.contains("AAAA\t2"));
}

#[test]
fn scenario_chimera() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    // tag-string AAACCCCCC: the cycle-2 tag CCC occurs more than once
    let fastq = write_fastq(dir.path(), &[b"GTCAGAAACCCCCCCCAGCA".to_vec()]);
    let p = params(dir.path(), fastq, table, "CCAGCA", 5, MatchOptions::default());

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.counters.chimera, 1);
    assert_eq!(fin.counters.matched, 0);
    assert!(fin.rows.is_empty());
}

#[test]
fn scenario_shard_equivalence() {
    let _guard =
        slog_scope::set_global_logger(slog::Logger::root(slog::Discard, slog::o!()));

    // a mixed pile of reads over two compounds, with UMIs and some junk
    let mut reads: Vec<Vec<u8>> = Vec::new();
    for umi in [b"AAAA", b"AAAA", b"AATA", b"GGCC"] {
        let mut read = b"AGAAATGTCC".to_vec();
        read.extend_from_slice(umi);
        read.extend_from_slice(b"CA");
        reads.push(read);
    }
    for umi in [b"TTTT", b"TTTA"] {
        let mut read = b"AGGGGTTTCC".to_vec();
        read.extend_from_slice(umi);
        read.extend_from_slice(b"CA");
        reads.push(read);
    }
    reads.push(b"CACACACACACACACACACA".to_vec()); // invalid
    reads.push(revcomp(b"AGAAATGTCCTTGACA")); // reverse strand

    let run = |shards: usize| {
        let dir = tempfile::tempdir().unwrap();
        let table = write_table(dir.path(), TABLE_B);
        let fastq = write_fastq(dir.path(), &reads);
        let mut p = params(dir.path(), fastq, table, "CCNNNNCA", 2, MatchOptions::default());
        p.shards = shards;
        let fin = Count::run(&p).unwrap();
        let all_tags = fs::read_to_string(dir.path().join("tags_reads.allTags")).unwrap();
        let log = fs::read_to_string(dir.path().join("tags_reads.log")).unwrap();
        if shards > 1 {
            for i in 0..shards {
                assert!(dir.path().join(format!("shard_{}.allTags", i)).exists());
                assert!(dir.path().join(format!("shard_{}.log", i)).exists());
            }
        }
        (fin, all_tags, log)
    };

    let (fin1, tags1, log1) = run(1);
    let (fin4, tags4, log4) = run(4);

    assert_eq!(fin1.counters, fin4.counters);
    assert_eq!(tags1, tags4);
    assert_eq!(log1, log4);
    assert_eq!(fin1.counters.matched, 6);
    assert_eq!(fin1.counters.invalid, 1);
}

#[test]
fn expected_only_filters_rows() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    let fastq = write_fastq(
        dir.path(),
        &[
            b"GTCAGAAACCCCCAGCA".to_vec(),
            b"GTCAGGGGTTTCCAGCA".to_vec(),
        ],
    );
    let mut p = params(dir.path(), fastq, table, "CCAGCA", 5, MatchOptions::default());
    p.engine.invalid_rules = vec![r"^2\.002$".to_string()];
    p.output.expected_only = true;

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.rows.len(), 2);
    let unexpected: Vec<_> = fin.rows.iter().filter(|r| !r.expected).collect();
    assert_eq!(unexpected.len(), 1);
    assert_eq!(unexpected[0].key.tags[1], "2.002");

    // the unexpected row is withheld from the table
    let all_tags = fs::read_to_string(dir.path().join("tags_reads.allTags")).unwrap();
    assert!(all_tags.contains("1.001\t2.001"));
    assert!(!all_tags.contains("2.002"));
}

#[test]
fn diagnostics_outputs_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    let fastq = write_fastq(
        dir.path(),
        &[
            b"GTCAGAAACCCCCAGCA".to_vec(),
            b"CACACACACACACACACACA".to_vec(),
            b"GTCAGAAACCCCCCCCAGCA".to_vec(),
        ],
    );
    let mut p = params(dir.path(), fastq, table, "CCAGCA", 5, MatchOptions::default());
    p.write_invalid = true;
    p.write_chimeras = true;
    p.output.write_lengths = true;
    p.output.write_errors = true;
    p.output.write_tagcounts = true;
    p.output.write_existing = true;
    p.output.write_expected = true;

    Count::run(&p).unwrap();

    let invalid = fs::read_to_string(dir.path().join("tags_reads.invalid")).unwrap();
    assert!(invalid.contains("CACACACACACACACACACA"));
    let chimeras = fs::read_to_string(dir.path().join("tags_reads.chimeras")).unwrap();
    assert!(chimeras.contains("AAACCCCCC"));
    let lengths = fs::read_to_string(dir.path().join("tags_reads.lengths")).unwrap();
    assert!(lengths.contains("6\t1"));
    let tagcounts = fs::read_to_string(dir.path().join("tags_reads.tagcounts")).unwrap();
    assert!(tagcounts.contains("1\t1.001\t1"));
    let existing = fs::read_to_string(dir.path().join("tags_reads.existingtags")).unwrap();
    assert!(existing.contains("2.001"));
    let expected = fs::read_to_string(dir.path().join("tags_reads.expected")).unwrap();
    assert!(expected.contains("\t1.002"));
}

#[test]
fn max_reads_truncates_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_table(dir.path(), TABLE_A);
    let fastq = write_fastq(
        dir.path(),
        &[
            b"GTCAGAAACCCCCAGCA".to_vec(),
            b"GTCAGAAACCCCCAGCA".to_vec(),
            b"GTCAGAAACCCCCAGCA".to_vec(),
        ],
    );
    let mut p = params(dir.path(), fastq, table, "CCAGCA", 5, MatchOptions::default());
    p.max_reads = Some(2);

    let fin = Count::run(&p).unwrap();
    assert_eq!(fin.counters.total, 2);
    assert_eq!(fin.rows[0].raw, 2);
}
