pub mod glob;
pub mod levenshtein;
pub mod seq;

pub use glob::glob_match;
pub use levenshtein::{levenshtein, min_seq_ld};
pub use seq::revcomp;
