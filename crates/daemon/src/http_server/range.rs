use http::header::{HeaderMap, IF_NONE_MATCH, RANGE};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use common::prelude::ChangeToken;

/// A single satisfiable byte range, `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub stop: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    /// `Content-Range` value for a body of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.stop - 1, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable `Range` header: serve everything.
    Full,
    Partial(ByteRange),
    Unsatisfiable,
}

/// Interpret the `Range` header against a body of `length` bytes.
///
/// Only single `bytes=` ranges are honored. Anything else, multi-range
/// included, falls back to the full body.
pub fn parse_range(headers: &HeaderMap, length: u64) -> RangeRequest {
    let Some(value) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return RangeRequest::Full;
    };
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    let parsed = match (first.is_empty(), last.is_empty()) {
        // bytes=-n, the final n bytes
        (true, false) => match last.parse::<u64>() {
            Ok(0) => return RangeRequest::Unsatisfiable,
            Ok(n) => Some((length.saturating_sub(n), length)),
            Err(_) => None,
        },
        // bytes=a-
        (false, true) => first.parse::<u64>().ok().map(|a| (a, length)),
        (false, false) => match (first.parse::<u64>(), last.parse::<u64>()) {
            (Ok(a), Ok(b)) if a <= b => Some((a, b.saturating_add(1).min(length))),
            _ => None,
        },
        (true, true) => None,
    };
    match parsed {
        None => RangeRequest::Full,
        Some((start, stop)) if start >= length || start >= stop => RangeRequest::Unsatisfiable,
        Some((start, stop)) => RangeRequest::Partial(ByteRange { start, stop }),
    }
}

/// Strong validator for the current state of an object.
pub fn etag(id: Uuid, token: &ChangeToken) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(token.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("\"{}\"", &digest[..32])
}

/// Whether `If-None-Match` already names `etag`.
pub fn not_modified(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == "*" || candidate == etag)
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn range(value: &str, length: u64) -> RangeRequest {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_str(value).unwrap());
        parse_range(&headers, length)
    }

    fn partial(start: u64, stop: u64) -> RangeRequest {
        RangeRequest::Partial(ByteRange { start, stop })
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(&HeaderMap::new(), 64), RangeRequest::Full);
        assert_eq!(range("bytes=5-34", 64), partial(5, 35));
        assert_eq!(range("bytes=60-", 64), partial(60, 64));
        assert_eq!(range("bytes=-4", 64), partial(60, 64));
        assert_eq!(range("bytes=-100", 64), partial(0, 64));
        assert_eq!(range("bytes=10-1000", 64), partial(10, 64));
        assert_eq!(range("bytes=64-", 64), RangeRequest::Unsatisfiable);
        assert_eq!(range("bytes=-0", 64), RangeRequest::Unsatisfiable);
        assert_eq!(range("bytes=0-1,4-5", 64), RangeRequest::Full);
        assert_eq!(range("items=0-1", 64), RangeRequest::Full);
        assert_eq!(range("bytes=9-2", 64), RangeRequest::Full);
        assert_eq!(range("bytes=0-", 0), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn test_content_range() {
        let r = ByteRange { start: 5, stop: 35 };
        assert_eq!(r.len(), 30);
        assert_eq!(r.content_range(64), "bytes 5-34/64");
    }

    #[test]
    fn test_etag_tracks_change_token() {
        let id = Uuid::new_v4();
        let token = ChangeToken::generate();
        let tag = etag(id, &token);
        assert_eq!(tag, etag(id, &token));
        assert_ne!(tag, etag(id, &ChangeToken::generate()));
        assert_ne!(tag, etag(Uuid::new_v4(), &token));

        let mut headers = HeaderMap::new();
        assert!(!not_modified(&headers, &tag));
        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(&format!("\"other\", W/{tag}")).unwrap(),
        );
        assert!(not_modified(&headers, &tag));
    }
}
