//! Topic names, topic filters and the matching rules between them.
//!
//! Levels are separated by `/`. In a filter, `+` stands for exactly one
//! non-empty level and `#`, allowed only as the whole last level, for every
//! remaining level including none. Topics whose first level starts with `$`
//! belong to the broker and are only reachable through a literal first level.

use super::MAX_TOPIC_LEN;
use super::error::FilterError;

/// Level separator.
pub const SEPARATOR: char = '/';
/// Single-level wildcard.
pub const SINGLE_LEVEL: &str = "+";
/// Multi-level wildcard.
pub const MULTI_LEVEL: &str = "#";

/// Check topic filter syntax.
///
/// # Examples
///
/// ```rust
/// use libmqtt::mqtt::topic::validate_filter;
/// use libmqtt::mqtt::FilterError;
///
/// assert!(validate_filter("sensors/+/temperature").is_ok());
/// assert!(validate_filter("sensors/#").is_ok());
/// assert_eq!(
///     validate_filter("a/+/#/b"),
///     Err(FilterError::MisplacedMultiLevelWildcard)
/// );
/// ```
pub fn validate_filter(filter: &str) -> Result<(), FilterError> {
    if filter.is_empty() {
        return Err(FilterError::Empty);
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(FilterError::TooLong);
    }
    if filter.contains('\0') {
        return Err(FilterError::NullCharacter);
    }

    let mut levels = filter.split(SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != MULTI_LEVEL || levels.peek().is_some()) {
            return Err(FilterError::MisplacedMultiLevelWildcard);
        }
        if level.contains('+') && level != SINGLE_LEVEL {
            return Err(FilterError::MisplacedSingleLevelWildcard);
        }
    }
    Ok(())
}

/// `true` when `filter` passes [`validate_filter`].
pub fn is_valid_filter(filter: &str) -> bool {
    validate_filter(filter).is_ok()
}

/// `true` for a concrete topic name a client may publish to.
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && !topic.contains(['+', '#', '\0'])
}

/// Match a concrete topic name against a validated filter.
///
/// Matching walks both level sequences once and stops at the first mismatch.
///
/// # Examples
///
/// ```rust
/// use libmqtt::mqtt::topic::matches;
///
/// assert!(matches("a/b/c", "a/+/c"));
/// assert!(matches("a/b/c", "a/#"));
/// assert!(!matches("a/b/c", "a/b"));
/// assert!(!matches("$SYS/status", "#"));
/// assert!(matches("$SYS/status", "$SYS/status"));
/// ```
pub fn matches(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') {
        let first = filter.split(SEPARATOR).next();
        if first == Some(SINGLE_LEVEL) || first == Some(MULTI_LEVEL) {
            return false;
        }
    }

    let mut levels = topic.split(SEPARATOR);
    for pattern in filter.split(SEPARATOR) {
        match pattern {
            MULTI_LEVEL => return true,
            SINGLE_LEVEL => match levels.next() {
                Some(level) if !level.is_empty() => {}
                _ => return false,
            },
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}
