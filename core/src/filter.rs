use crate::config::FilterConfig;
use crate::external::{Candidate, ConfidenceFilter};
use crate::ranked::{Hit, RankedList};
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

lazy_static! {
    static ref COMMAND_RE: Regex = Regex::new(r"\\[A-Za-z]+").expect("valid regex");
}

/// Rough structural complexity of a query in [0, 1].
///
/// `\frac` and `\sqrt` add 0.1 each, `\int`, `\sum`, `\lim` and `\prod` add
/// 0.15 each, a matrix or array environment adds 0.3 and length adds
/// `len / 100` up to 0.3.
pub fn query_complexity(latex: &str) -> f64 {
    let mut score = 0.0;
    for m in COMMAND_RE.find_iter(latex) {
        score += match m.as_str() {
            "\\frac" | "\\sqrt" => 0.1,
            "\\int" | "\\sum" | "\\lim" | "\\prod" => 0.15,
            _ => 0.0,
        };
    }
    if latex.contains("matrix") || latex.contains("array") {
        score += 0.3;
    }
    score += (latex.chars().count() as f64 / 100.0).min(0.3);
    score.min(1.0)
}

/// Simple queries get a stricter threshold: `threshold + 0.1 * (1 - complexity)`.
pub fn effective_threshold(query_latex: &str, config: &FilterConfig) -> f64 {
    if !config.adaptive {
        return config.threshold;
    }
    (config.threshold + 0.1 * (1.0 - query_complexity(query_latex))).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub list: RankedList,
    pub threshold: f64,
    /// Candidates at or above the threshold, counted even when bypassed.
    pub kept: usize,
    pub dropped: usize,
    /// The filter would have dropped too much; `list` is the unfiltered input.
    pub bypassed: bool,
}

/// Keeps candidates whose confidence reaches the effective threshold,
/// preserving fused order and scores.
///
/// When more than `max_drop_fraction` of the candidates would go, or when
/// nothing would survive, the input list is returned unchanged.
pub fn apply_filter<'s, L>(
    query_latex: &str,
    fused: RankedList,
    filter: &dyn ConfidenceFilter,
    config: &FilterConfig,
    latex_of: L,
) -> FilterOutcome
where
    L: Fn(&str) -> Option<&'s str> + Sync,
{
    let threshold = effective_threshold(query_latex, config);
    let total = fused.len();
    if total == 0 {
        return FilterOutcome { list: fused, threshold, kept: 0, dropped: 0, bypassed: false };
    }

    let keep: Vec<bool> = fused
        .hits()
        .par_iter()
        .map(|hit| {
            let candidate = Candidate { id: hit.id.as_str(), latex: latex_of(hit.id.as_str()), fused_score: hit.score };
            let confidence = filter.score(query_latex, &candidate);
            let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
            confidence >= threshold
        })
        .collect();

    let kept = keep.iter().filter(|k| **k).count();
    let dropped = total - kept;
    let drop_fraction = dropped as f64 / total as f64;
    if kept == 0 || drop_fraction > config.max_drop_fraction {
        warn!(total, kept, threshold, "confidence filter would drop too much, bypassing");
        return FilterOutcome { list: fused, threshold, kept, dropped, bypassed: true };
    }

    let list = RankedList::from_ordered(
        fused
            .into_hits()
            .into_iter()
            .zip(keep)
            .filter(|(_, k)| *k)
            .map(|(Hit { id, score }, _)| (id, score)),
    );
    debug!(total, kept, threshold, "confidence filter applied");
    FilterOutcome { list, threshold, kept, dropped, bypassed: false }
}
