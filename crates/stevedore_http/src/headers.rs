use axum::http::header::{HeaderMap, RANGE};
use headers::{Header, HeaderName, HeaderValue};

use stevedore_core::registry::ByteRange;

/// The chunk boundaries a PATCH declares: `Content-Range: <start>-<end>`.
///
/// This is the distribution protocol's bare form, not the RFC 7233
/// `bytes a-b/len` form, which is why the stock typed header does not fit.
#[derive(Debug)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
}

static CONTENT_RANGE_NAME: HeaderName = HeaderName::from_static("content-range");

impl Header for ContentRange {
    fn name() -> &'static HeaderName {
        &CONTENT_RANGE_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        let (start, end) = s.split_once('-').ok_or_else(headers::Error::invalid)?;
        let start = start.parse::<u64>().map_err(|_| headers::Error::invalid())?;
        let end = end.parse::<u64>().map_err(|_| headers::Error::invalid())?;
        if end < start {
            return Err(headers::Error::invalid());
        }
        Ok(ContentRange { start, end })
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = HeaderValue::from_str(&format!("{}-{}", self.start, self.end))
            .expect("formatted range is always a valid header value");
        values.extend(std::iter::once(value))
    }
}

impl ContentRange {
    /// Number of bytes the declared range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Render the `Range` response header for an upload at `size` bytes:
/// inclusive, and `0-0` for an empty session.
pub fn upload_range(size: u64) -> String {
    format!("0-{}", size.saturating_sub(1))
}

/// Parse a standard HTTP `Range` request header on a blob GET.
///
/// Only the single-range forms `bytes=a-b` and `bytes=a-` are served;
/// anything else is ignored and the full blob is returned.
pub fn blob_byte_range(headers: &HeaderMap) -> Option<ByteRange> {
    let value = headers.get(RANGE)?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start = start.parse::<u64>().ok()?;
    let end = match end {
        "" => None,
        e => {
            let e = e.parse::<u64>().ok()?;
            if e < start {
                return None;
            }
            Some(e)
        }
    };
    Some(ByteRange { start, end })
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::bounded("bytes=0-4", Some((0, Some(4))))]
    #[case::open_ended("bytes=5-", Some((5, None)))]
    #[case::not_bytes("items=0-4", None)]
    #[case::multi_range("bytes=0-1,3-4", None)]
    #[case::inverted("bytes=4-2", None)]
    #[case::garbage("bytes=a-b", None)]
    fn parse_blob_range(#[case] value: &str, #[case] expected: Option<(u64, Option<u64>)>) {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_str(value).unwrap());
        let parsed = blob_byte_range(&headers).map(|r| (r.start, r.end));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn upload_range_is_inclusive() {
        assert_eq!(upload_range(0), "0-0");
        assert_eq!(upload_range(5), "0-4");
    }

    #[test]
    fn content_range_decodes_strictly() {
        let decode = |s: &str| {
            let value = HeaderValue::from_str(s).unwrap();
            ContentRange::decode(&mut std::iter::once(&value))
        };
        let range = decode("0-4").unwrap();
        assert_eq!((range.start, range.end, range.len()), (0, 4, 5));
        assert!(decode("4-0").is_err());
        assert!(decode("0").is_err());
        assert!(decode("a-b").is_err());
    }
}
