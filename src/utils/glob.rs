/// Shell-style wildcard matching for config record selection.
/// Supports `*` (any run, possibly empty) and `?` (any single character).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    matches(pattern.as_bytes(), text.as_bytes())
}

fn matches(pat: &[u8], text: &[u8]) -> bool {
    match pat.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => {
            (0..=text.len()).any(|skip| matches(rest, &text[skip..]))
        }
        Some((b'?', rest)) => match text.split_first() {
            Some((_, t)) => matches(rest, t),
            None => false,
        },
        Some((&c, rest)) => match text.split_first() {
            Some((&t, tr)) if t == c => matches(rest, tr),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_star() {
        assert!(glob_match("reads.fastq", "reads.fastq"));
        assert!(glob_match("*.fastq", "reads.fastq"));
        assert!(glob_match("reads*", "reads_1.fastq.gz"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("*.fastq", "reads.fq"));
    }

    #[test]
    fn question_mark() {
        assert!(glob_match("shard_?.allTags", "shard_3.allTags"));
        assert!(!glob_match("shard_?.allTags", "shard_12.allTags"));
    }
}
