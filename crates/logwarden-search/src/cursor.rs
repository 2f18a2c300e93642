use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::{Error, Result};

/// Cursors are opaque to clients: a versioned `(ts_ms, id)` pair naming the
/// last row of the previous page in `(ts DESC, id DESC)` order.
pub fn encode_cursor(ts_ms: i64, id: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("1:{}:{}", ts_ms, id))
}

pub fn decode_cursor(cursor: &str) -> Result<(i64, i64)> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| Error::BadCursor("not base64".to_string()))?;
    let text =
        String::from_utf8(raw).map_err(|_| Error::BadCursor("not utf-8".to_string()))?;

    let mut parts = text.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("1"), Some(ts), Some(id), None) => {
            let ts = ts
                .parse()
                .map_err(|_| Error::BadCursor("bad timestamp".to_string()))?;
            let id = id
                .parse()
                .map_err(|_| Error::BadCursor("bad id".to_string()))?;
            Ok((ts, id))
        }
        (Some(version), ..) if version != "1" => {
            Err(Error::BadCursor(format!("unsupported version {}", version)))
        }
        _ => Err(Error::BadCursor("wrong shape".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let c = encode_cursor(1_700_000_000_123, 42);
        assert_eq!(decode_cursor(&c).unwrap(), (1_700_000_000_123, 42));
    }

    #[test]
    fn garbage_is_bad_cursor() {
        assert!(matches!(decode_cursor("???"), Err(Error::BadCursor(_))));
        assert!(matches!(decode_cursor("aGVsbG8"), Err(Error::BadCursor(_))));
    }

    #[test]
    fn future_version_rejected() {
        let c = URL_SAFE_NO_PAD.encode("2:1:1");
        assert!(matches!(decode_cursor(&c), Err(Error::BadCursor(_))));
    }
}
