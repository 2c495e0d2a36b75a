use crate::tags::primer::ClosingPrimer;
use crate::tags::Orientation;
use crate::utils::revcomp;

/// Pull the degenerate window out of a matched read. The window trails the
/// tag region: on the forward strand the compiled pattern is applied to the
/// read from one base before the tag region's end, on the reverse strand to
/// the reverse complement of everything before the tag region.
pub fn extract_umi(
    cp: &ClosingPrimer,
    seq: &[u8],
    tag_start: usize,
    total_tag_len: usize,
    orientation: Orientation,
) -> Option<Vec<u8>> {
    let pattern = cp.umi_pattern.as_ref()?;

    let region: Vec<u8> = match orientation {
        Orientation::Forward => {
            let start = (tag_start + total_tag_len).saturating_sub(1);
            if start >= seq.len() {
                return None;
            }
            seq[start..].to_vec()
        }
        Orientation::Reverse => revcomp(&seq[..tag_start]),
    };

    pattern
        .captures(&region)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_bytes().to_vec())
}
