//! Strong validators and conditional-request evaluation.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use http::HeaderMap;
use http::header::{IF_MATCH, IF_NONE_MATCH, IF_RANGE, RANGE};

/// A strong entity tag, stored with its surrounding quotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityTag(String);

impl EntityTag {
    /// Derive the tag for a file from its last-write time.
    ///
    /// The timestamp is taken as nanoseconds since the Unix epoch and
    /// rendered as the lowercase hex of its 8 little-endian bytes.
    pub fn from_modified(modified: SystemTime) -> Self {
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(format!("\"{}\"", hex::encode(nanos.to_le_bytes())))
    }

    /// The quoted header form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed `If-Match` / `If-None-Match` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagList {
    /// `*`
    Any,
    /// Strong tags in header order. Weak tags are dropped while parsing.
    Tags(Vec<String>),
}

impl TagList {
    /// Parse a comma-separated tag list.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "*" {
            return TagList::Any;
        }
        let tags = value
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.starts_with("W/"))
            .map(str::to_string)
            .collect();
        TagList::Tags(tags)
    }

    /// Strong comparison against the current tag.
    pub fn matches(&self, current: &EntityTag) -> bool {
        match self {
            TagList::Any => true,
            TagList::Tags(tags) => tags.iter().any(|t| t == current.as_str()),
        }
    }

    /// Returns true if at least one strong tag or `*` was supplied.
    pub fn is_usable(&self) -> bool {
        match self {
            TagList::Any => true,
            TagList::Tags(tags) => !tags.is_empty(),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: http::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Parsed `If-Match` header, or `None` when absent.
///
/// A header naming only weak tags cannot satisfy a strong comparison and is
/// treated as absent.
pub fn if_match(headers: &HeaderMap) -> Option<TagList> {
    header_str(headers, IF_MATCH)
        .map(TagList::parse)
        .filter(TagList::is_usable)
}

/// True iff `If-None-Match` is present and lists the current tag (or `*`).
pub fn is_if_none_match_request(headers: &HeaderMap, current: &EntityTag) -> bool {
    header_str(headers, IF_NONE_MATCH)
        .map(|v| TagList::parse(v).matches(current))
        .unwrap_or(false)
}

/// True iff `Range` is present and `If-Range` is absent or names the current tag.
pub fn is_range_request(headers: &HeaderMap, current: &EntityTag) -> bool {
    if !headers.contains_key(RANGE) {
        return false;
    }
    match header_str(headers, IF_RANGE) {
        None if headers.contains_key(IF_RANGE) => false,
        None => true,
        Some(value) => value.trim() == current.as_str(),
    }
}

/// Outcome of evaluating a `Range` header against an entity length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Inclusive byte range to serve.
    Satisfiable { start: u64, end: u64 },
    /// Well-formed but outside the entity.
    Unsatisfiable,
    /// Malformed or multi-range; serve the full entity.
    Ignored,
}

impl ByteRange {
    /// Evaluate a single `bytes=` range.
    pub fn parse(value: &str, len: u64) -> Self {
        let Some(set) = value.trim().strip_prefix("bytes=") else {
            return ByteRange::Ignored;
        };
        if set.contains(',') {
            return ByteRange::Ignored;
        }
        let Some((start, end)) = set.trim().split_once('-') else {
            return ByteRange::Ignored;
        };

        let (start, end) = match (start.trim(), end.trim()) {
            ("", "") => return ByteRange::Ignored,
            ("", suffix) => {
                let Ok(suffix) = suffix.parse::<u64>() else {
                    return ByteRange::Ignored;
                };
                if suffix == 0 || len == 0 {
                    return ByteRange::Unsatisfiable;
                }
                (len.saturating_sub(suffix), len - 1)
            }
            (start, "") => {
                let Ok(start) = start.parse::<u64>() else {
                    return ByteRange::Ignored;
                };
                (start, len.saturating_sub(1))
            }
            (start, end) => {
                let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
                    return ByteRange::Ignored;
                };
                if start > end {
                    return ByteRange::Ignored;
                }
                (start, end.min(len.saturating_sub(1)))
            }
        };

        if len == 0 || start >= len {
            return ByteRange::Unsatisfiable;
        }
        ByteRange::Satisfiable { start, end }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::time::Duration;

    fn tag_at(nanos: u64) -> EntityTag {
        EntityTag::from_modified(UNIX_EPOCH + Duration::from_nanos(nanos))
    }

    fn headers(pairs: &[(http::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_tag_format() {
        assert_eq!(tag_at(1).as_str(), "\"0100000000000000\"");
        assert_eq!(tag_at(0xff).to_string(), "\"ff00000000000000\"");
        assert_eq!(tag_at(42), tag_at(42));
        assert_ne!(tag_at(42), tag_at(43));

        // Past year 2554 the nanosecond count no longer fits in 64 bits.
        let far = EntityTag::from_modified(UNIX_EPOCH + Duration::from_secs(20_000_000_000));
        assert_eq!(far.as_str(), "\"ffffffffffffffff\"");
    }

    #[test]
    fn test_tag_list_parsing() {
        assert_eq!(TagList::parse(" * "), TagList::Any);
        assert_eq!(
            TagList::parse("\"a\", W/\"b\" ,\"c\""),
            TagList::Tags(vec!["\"a\"".into(), "\"c\"".into()])
        );
        assert!(!TagList::parse("W/\"weak\"").is_usable());
    }

    #[test]
    fn test_if_match() {
        let current = tag_at(7);
        assert!(if_match(&HeaderMap::new()).is_none());

        let h = headers(&[(IF_MATCH, "*")]);
        assert!(if_match(&h).unwrap().matches(&current));

        let h = headers(&[(IF_MATCH, &format!("\"zz\", {current}"))]);
        assert!(if_match(&h).unwrap().matches(&current));

        let h = headers(&[(IF_MATCH, &format!("W/{current}"))]);
        assert!(if_match(&h).is_none());

        let h = headers(&[(IF_MATCH, &format!("W/\"old\", {current}"))]);
        assert!(if_match(&h).unwrap().matches(&current));
    }

    #[test]
    fn test_if_none_match() {
        let current = tag_at(9);
        assert!(!is_if_none_match_request(&HeaderMap::new(), &current));
        let h = headers(&[(IF_NONE_MATCH, current.as_str())]);
        assert!(is_if_none_match_request(&h, &current));
        let h = headers(&[(IF_NONE_MATCH, "\"other\"")]);
        assert!(!is_if_none_match_request(&h, &current));
    }

    #[test]
    fn test_range_request() {
        let current = tag_at(11);
        assert!(!is_range_request(&HeaderMap::new(), &current));

        let h = headers(&[(RANGE, "bytes=0-1")]);
        assert!(is_range_request(&h, &current));

        let h = headers(&[(RANGE, "bytes=0-1"), (IF_RANGE, current.as_str())]);
        assert!(is_range_request(&h, &current));

        let h = headers(&[(RANGE, "bytes=0-1"), (IF_RANGE, "\"stale\"")]);
        assert!(!is_range_request(&h, &current));
    }

    #[test]
    fn test_byte_range() {
        assert_eq!(
            ByteRange::parse("bytes=0-1", 5),
            ByteRange::Satisfiable { start: 0, end: 1 }
        );
        assert_eq!(
            ByteRange::parse("bytes=2-", 5),
            ByteRange::Satisfiable { start: 2, end: 4 }
        );
        assert_eq!(
            ByteRange::parse("bytes=-2", 5),
            ByteRange::Satisfiable { start: 3, end: 4 }
        );
        assert_eq!(
            ByteRange::parse("bytes=1-100", 5),
            ByteRange::Satisfiable { start: 1, end: 4 }
        );
        assert_eq!(ByteRange::parse("bytes=5-9", 5), ByteRange::Unsatisfiable);
        assert_eq!(ByteRange::parse("bytes=0-0", 0), ByteRange::Unsatisfiable);
        assert_eq!(ByteRange::parse("bytes=0-1,3-4", 5), ByteRange::Ignored);
        assert_eq!(ByteRange::parse("items=0-1", 5), ByteRange::Ignored);
        assert_eq!(ByteRange::parse("bytes=3-1", 5), ByteRange::Ignored);
    }
}
