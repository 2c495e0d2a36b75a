use std::collections::HashMap;

use crate::utils::levenshtein;

use super::MAX_DEGEN_ERRORS;

///////////////////////////////
/// Calibrated per-base error probability, indexed by edit distance.
/// `rate(e)` is the probability that a degenerate window carries `e`
/// errors, per base
#[derive(Debug, Clone, Default)]
pub struct BaseError {
    rates: Vec<Option<f64>>,
}

impl BaseError {
    pub fn rate(&self, e: usize) -> Option<f64> {
        self.rates.get(e).copied().flatten()
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.rates
            .iter()
            .enumerate()
            .filter_map(|(e, r)| r.map(|r| (e, r)))
    }

    #[cfg(test)]
    pub fn from_rates(rates: Vec<Option<f64>>) -> BaseError {
        BaseError { rates }
    }
}

///////////////////////////////
/// Observation multisets of the static closing-primer region, keyed by the
/// expected static sequence. Collected while the stream runs, turned into
/// per-distance error rates once it ends
#[derive(Debug, Clone, Default)]
pub struct ErrorModel {
    observations: HashMap<Vec<u8>, HashMap<Vec<u8>, u64>>,
}

impl ErrorModel {
    pub fn record(&mut self, static_seq: &[u8], observed: &[u8]) {
        self.record_n(static_seq, observed, 1);
    }

    pub fn record_n(&mut self, static_seq: &[u8], observed: &[u8], count: u64) {
        *self
            .observations
            .entry(static_seq.to_vec())
            .or_default()
            .entry(observed.to_vec())
            .or_insert(0) += count;
    }

    pub fn merge(&mut self, other: &ErrorModel) {
        for (static_seq, windows) in &other.observations {
            for (observed, count) in windows {
                self.record_n(static_seq, observed, *count);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Observation rows for the shard log.
    pub fn iter_observations(&self) -> impl Iterator<Item = (&[u8], &[u8], u64)> + '_ {
        self.observations.iter().flat_map(|(s, windows)| {
            windows
                .iter()
                .map(move |(o, &c)| (s.as_slice(), o.as_slice(), c))
        })
    }

    /// `baseError[e] = observations at distance e / (total × |staticSeq|)`,
    /// maximum over static sequences when several exist.
    pub fn base_error(&self) -> BaseError {
        let mut rates: Vec<Option<f64>> = vec![None; MAX_DEGEN_ERRORS + 1];

        for (static_seq, windows) in &self.observations {
            let total: u64 = windows.values().sum();
            if total == 0 || static_seq.is_empty() {
                continue;
            }
            let mut at_distance = vec![0u64; MAX_DEGEN_ERRORS + 1];
            for (observed, count) in windows {
                let e = levenshtein(observed, static_seq);
                if (1..=MAX_DEGEN_ERRORS).contains(&e) {
                    at_distance[e] += count;
                }
            }
            let denom = total as f64 * static_seq.len() as f64;
            for e in 1..=MAX_DEGEN_ERRORS {
                if at_distance[e] > 0 {
                    let rate = at_distance[e] as f64 / denom;
                    rates[e] = Some(rates[e].map_or(rate, |r: f64| r.max(rate)));
                }
            }
        }

        BaseError { rates }
    }
}
