//! Statistic key addressing.
//!
//! Every per-position statistic is addressed as `"<position>.<propertyKey>"`
//! with 1-based positions. Generic alignment statistics use `$`-prefixed
//! property names so they never collide with user supplied keys.

/// Occurrence index of the first-seen (canonical) alignment.
pub const FIRST_SEEN_OCCURRENCE: &str = "$fSeenOccurrence";
/// Occurrence index of the last-seen alignment.
pub const LAST_SEEN_OCCURRENCE: &str = "$lSeenOccurrence";
/// Seconds between user join and the first-seen event.
pub const FIRST_SEEN_SINCE_JOIN: &str = "$fSeenSinceJoin";
/// Seconds between user join and the last-seen event.
pub const LAST_SEEN_SINCE_JOIN: &str = "$lSeenSinceJoin";
/// Pattern-level user join timestamp.
pub const JOIN_TIME: &str = "$joinTime";

/// Per-position generic keys, in histogram dimension order.
pub const GENERIC_POSITION_KEYS: [&str; 4] = [
    FIRST_SEEN_OCCURRENCE,
    LAST_SEEN_OCCURRENCE,
    FIRST_SEEN_SINCE_JOIN,
    LAST_SEEN_SINCE_JOIN,
];

/// Build `"<position>.<key>"` for a 1-based position.
pub fn position_key(position: usize, key: &str) -> String {
    format!("{}.{}", position, key)
}

/// Split `"<position>.<key>"` into its parts. The key may itself contain dots.
pub fn split_position_key(key: &str) -> Option<(usize, &str)> {
    let (pos, rest) = key.split_once('.')?;
    let pos: usize = pos.parse().ok()?;
    if pos == 0 || rest.is_empty() {
        return None;
    }
    Some((pos, rest))
}

/// Dimensions of the generic histogram for a pattern of `len` positions.
pub fn generic_dimensions(len: usize) -> Vec<String> {
    let mut dims = Vec::with_capacity(len * GENERIC_POSITION_KEYS.len() + 1);
    for pos in 1..=len {
        for key in GENERIC_POSITION_KEYS {
            dims.push(position_key(pos, key));
        }
    }
    dims.push(JOIN_TIME.to_string());
    dims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_key_roundtrip() {
        let key = position_key(2, "page.url");
        assert_eq!(key, "2.page.url");
        assert_eq!(split_position_key(&key), Some((2, "page.url")));
    }

    #[test]
    fn test_split_rejects_malformed() {
        assert_eq!(split_position_key("amount"), None);
        assert_eq!(split_position_key("0.amount"), None);
        assert_eq!(split_position_key("x.amount"), None);
        assert_eq!(split_position_key("3."), None);
    }

    #[test]
    fn test_generic_dimensions() {
        let dims = generic_dimensions(2);
        assert_eq!(dims.len(), 9);
        assert_eq!(dims[0], "1.$fSeenOccurrence");
        assert_eq!(dims[7], "2.$lSeenSinceJoin");
        assert_eq!(dims[8], JOIN_TIME);
    }
}
