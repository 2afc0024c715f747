//! Candidate Generator: grows longer event-name sequences from counted ones.
//!
//! Growth rules whose inputs simply don't combine yield no candidates. Only
//! frontier growth and repetition segmentation reject malformed input with a
//! [`CandidateError`].

use crate::pattern::{EventNames, Pattern};
use motif_core::UserAndEventsInfo;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateError {
    #[error("Frontier base must have length 2, got {0}")]
    BaseLength(usize),

    #[error("Start candidate [{0}] must be a length-2 pattern opening with {1}")]
    BadStartCandidate(String, String),

    #[error("End candidate [{0}] must be a length-2 pattern closing with {1}")]
    BadEndCandidate(String, String),

    #[error("Repetition segmentation needs at least one pattern")]
    EmptyInput,

    #[error("Repetition segmentation only takes single-event patterns, got [{0}]")]
    MultiEventPattern(String),
}

fn names<S: AsRef<str>>(items: &[S]) -> EventNames {
    items.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Index of the single position where `a` and `b` differ, if exactly one does.
fn single_difference<S: AsRef<str>, T: AsRef<str>>(a: &[S], b: &[T]) -> Option<usize> {
    if a.len() != b.len() {
        return None;
    }
    let mut diffs = (0..a.len()).filter(|&i| a[i].as_ref() != b[i].as_ref());
    let first = diffs.next()?;
    diffs.next().is_none().then_some(first)
}

fn interleave<S: AsRef<str>, T: AsRef<str>>(a: &[S], b: &[T], at: usize) -> Vec<EventNames> {
    let (x, y) = (a[at].as_ref(), b[at].as_ref());
    let build = |first: &str, second: &str| -> EventNames {
        let mut out = EventNames::with_capacity(a.len() + 1);
        out.extend(a[..at].iter().map(|s| s.as_ref().to_string()));
        out.push(first.to_string());
        out.push(second.to_string());
        out.extend(a[at + 1..].iter().map(|s| s.as_ref().to_string()));
        out
    };
    vec![build(x, y), build(y, x)]
}

/// Two length-k sequences differing in exactly one position give the two
/// length-(k+1) sequences holding both differing events at that position.
pub fn pairwise_growth<S: AsRef<str>, T: AsRef<str>>(a: &[S], b: &[T]) -> Vec<EventNames> {
    match single_difference(a, b) {
        Some(at) => interleave(a, b, at),
        None => Vec::new(),
    }
}

/// Like [`pairwise_growth`], but both inputs must end with the same goal event
/// and differ before it.
pub fn goal_convergent_growth<S: AsRef<str>, T: AsRef<str>>(a: &[S], b: &[T]) -> Vec<EventNames> {
    if a.is_empty() || a.len() != b.len() || a[a.len() - 1].as_ref() != b[b.len() - 1].as_ref() {
        return Vec::new();
    }
    match single_difference(a, b) {
        Some(at) if at + 1 < a.len() => interleave(a, b, at),
        _ => Vec::new(),
    }
}

/// Grow `[X, Z]` into `[X, m, Z]` for every `m` opening a start candidate
/// `[X, m]` and closing an end candidate `[m, Z]`.
///
/// Candidates are ranked by `min(start.per_user_count, end.per_user_count)`
/// descending, ties broken by `m`, and capped at `max_candidates`. Unless
/// `cyclic`, `m` may not be `X` or `Z`.
pub fn frontier_growth(
    base: &Pattern,
    starts: &[Pattern],
    ends: &[Pattern],
    max_candidates: usize,
    cyclic: bool,
) -> Result<Vec<EventNames>, CandidateError> {
    if base.len() != 2 {
        return Err(CandidateError::BaseLength(base.len()));
    }
    let (x, z) = (base.first_event(), base.last_event());

    let mut opening: FxHashMap<&str, u64> = FxHashMap::default();
    for start in starts {
        if start.len() != 2 || start.first_event() != x {
            return Err(CandidateError::BadStartCandidate(start.key(), x.to_string()));
        }
        let entry = opening.entry(start.last_event()).or_insert(0);
        *entry = (*entry).max(start.per_user_count());
    }

    let mut ranked: FxHashMap<&str, u64> = FxHashMap::default();
    for end in ends {
        if end.len() != 2 || end.last_event() != z {
            return Err(CandidateError::BadEndCandidate(end.key(), z.to_string()));
        }
        let middle = end.first_event();
        if !cyclic && (middle == x || middle == z) {
            continue;
        }
        if let Some(&start_count) = opening.get(middle) {
            let score = start_count.min(end.per_user_count());
            let entry = ranked.entry(middle).or_insert(0);
            *entry = (*entry).max(score);
        }
    }

    let mut ranked: Vec<(&str, u64)> = ranked.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    Ok(ranked
        .into_iter()
        .take(max_candidates)
        .map(|(m, _)| names(&[x, m, z]))
        .collect())
}

/// `[A]` becomes `[A, A]` for every single-event pattern whose event is in `repeated`.
pub fn repetition_segmentation<S: AsRef<str>>(
    patterns: &[Pattern],
    repeated: &[S],
) -> Result<Vec<EventNames>, CandidateError> {
    if patterns.is_empty() {
        return Err(CandidateError::EmptyInput);
    }
    if let Some(multi) = patterns.iter().find(|p| p.len() != 1) {
        return Err(CandidateError::MultiEventPattern(multi.key()));
    }
    Ok(patterns
        .iter()
        .map(|p| p.first_event())
        .filter(|e| repeated.iter().any(|r| r.as_ref() == *e))
        .map(|e| names(&[e, e]))
        .collect())
}

/// One length-1 sequence per known event name, sorted.
pub fn single_event_candidates(schema: &UserAndEventsInfo) -> Vec<EventNames> {
    schema.event_names().map(|e| names(&[e])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramLimits;

    fn seq(items: &[&str]) -> EventNames {
        names(items)
    }

    #[test]
    fn test_pairwise_growth() {
        let out = pairwise_growth(&["A", "B", "D"], &["A", "C", "D"]);
        assert_eq!(out, vec![seq(&["A", "B", "C", "D"]), seq(&["A", "C", "B", "D"])]);
    }

    #[test]
    fn test_pairwise_growth_rejects() {
        assert!(pairwise_growth(&["A", "B"], &["A", "B", "C"]).is_empty());
        assert!(pairwise_growth(&["A", "B"], &["A", "B"]).is_empty());
        assert!(pairwise_growth(&["A", "B"], &["C", "D"]).is_empty());
    }

    #[test]
    fn test_goal_convergent_growth() {
        let out = goal_convergent_growth(&["S", "A", "G"], &["S", "B", "G"]);
        assert_eq!(out, vec![seq(&["S", "A", "B", "G"]), seq(&["S", "B", "A", "G"])]);

        assert!(goal_convergent_growth(&["A", "G"], &["A", "H"]).is_empty());
        assert!(goal_convergent_growth(&["A", "G"], &["A", "G"]).is_empty());
        assert!(goal_convergent_growth(&["A", "B", "G"], &["C", "D", "G"]).is_empty());
        let empty: [&str; 0] = [];
        assert!(goal_convergent_growth(&empty, &empty).is_empty());
    }

    fn counted(names: &[&str], per_user: u64) -> Pattern {
        Pattern::new(names, &UserAndEventsInfo::new(), HistogramLimits::default())
            .unwrap()
            .with_counts(per_user, per_user, 0)
    }

    #[test]
    fn test_frontier_growth_caps_and_ranks() {
        let base = counted(&["X", "Z"], 0);
        let starts = vec![
            counted(&["X", "a"], 10),
            counted(&["X", "b"], 4),
            counted(&["X", "c"], 7),
            counted(&["X", "d"], 9),
            counted(&["X", "e"], 1),
        ];
        let ends = vec![
            counted(&["a", "Z"], 2),
            counted(&["b", "Z"], 8),
            counted(&["c", "Z"], 7),
            counted(&["q", "Z"], 50),
        ];
        let out = frontier_growth(&base, &starts, &ends, 3, false).unwrap();
        assert_eq!(
            out,
            vec![seq(&["X", "c", "Z"]), seq(&["X", "b", "Z"]), seq(&["X", "a", "Z"])]
        );

        let out = frontier_growth(&base, &starts, &ends, 2, false).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_frontier_growth_cyclic() {
        let base = counted(&["X", "Z"], 0);
        let starts = vec![counted(&["X", "X"], 3), counted(&["X", "m"], 3)];
        let ends = vec![counted(&["X", "Z"], 5), counted(&["m", "Z"], 1)];
        let plain = frontier_growth(&base, &starts, &ends, 10, false).unwrap();
        assert_eq!(plain, vec![seq(&["X", "m", "Z"])]);
        let cyclic = frontier_growth(&base, &starts, &ends, 10, true).unwrap();
        assert_eq!(cyclic, vec![seq(&["X", "X", "Z"]), seq(&["X", "m", "Z"])]);
    }

    #[test]
    fn test_frontier_growth_rejects_bad_input() {
        let base = counted(&["X", "Z"], 0);
        assert_eq!(
            frontier_growth(&counted(&["X"], 0), &[], &[], 3, false),
            Err(CandidateError::BaseLength(1))
        );
        assert!(matches!(
            frontier_growth(&base, &[counted(&["Y", "a"], 1)], &[], 3, false),
            Err(CandidateError::BadStartCandidate(..))
        ));
        assert!(matches!(
            frontier_growth(&base, &[], &[counted(&["a", "b", "Z"], 1)], 3, false),
            Err(CandidateError::BadEndCandidate(..))
        ));
    }

    #[test]
    fn test_repetition_segmentation() {
        let singles = vec![counted(&["A"], 1), counted(&["B"], 1), counted(&["C"], 1)];
        let out = repetition_segmentation(&singles, &["C", "A"]).unwrap();
        assert_eq!(out, vec![seq(&["A", "A"]), seq(&["C", "C"])]);

        let none: [&str; 0] = [];
        assert_eq!(repetition_segmentation(&[], &none), Err(CandidateError::EmptyInput));
        assert!(matches!(
            repetition_segmentation(&[counted(&["A", "B"], 1)], &["A"]),
            Err(CandidateError::MultiEventPattern(_))
        ));
    }

    #[test]
    fn test_single_event_candidates() {
        let mut schema = UserAndEventsInfo::new();
        schema.ensure_event("view");
        schema.ensure_event("add_to_cart");
        assert_eq!(
            single_event_candidates(&schema),
            vec![seq(&["add_to_cart"]), seq(&["view"])]
        );
    }
}
