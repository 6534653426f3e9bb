//! Camera ids from sample identifiers.
//!
//! Identifiers look like `<anything>_<integer>`; the camera id is the last
//! underscore-delimited token.

use crate::{Error, Result};

const SEPARATOR: char = '_';

/// Parse the camera id from one raw identifier.
pub fn parse_camera_id(raw: &str) -> Result<i64> {
    // No separator means the whole string is the token, as with a plain "3".
    let token = match raw.rfind(SEPARATOR) {
        Some(pos) => &raw[pos + SEPARATOR.len_utf8()..],
        None => raw,
    };
    if token.is_empty() {
        return Err(Error::Parse {
            raw: raw.to_owned(),
            reason: "missing camera token after final separator".to_owned(),
        });
    }
    token.trim().parse::<i64>().map_err(|e| Error::Parse {
        raw: raw.to_owned(),
        reason: e.to_string(),
    })
}

/// Parse camera ids for a whole batch.
pub fn parse_camera_ids<S: AsRef<str>>(raw: &[S]) -> Result<Vec<i64>> {
    raw.iter().map(|s| parse_camera_id(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_last_token() {
        assert_eq!(parse_camera_id("id_0").unwrap(), 0);
        assert_eq!(parse_camera_id("0001_c3_s1_7").unwrap(), 7);
        assert_eq!(parse_camera_id("12").unwrap(), 12);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(parse_camera_id("id_"), Err(Error::Parse { .. })));
        assert!(matches!(parse_camera_id("id_cam"), Err(Error::Parse { .. })));
        assert!(matches!(parse_camera_id(""), Err(Error::Parse { .. })));
    }

    #[test]
    fn batch_parse_fails_on_first_bad_entry() {
        assert_eq!(parse_camera_ids(&["a_1", "b_2"]).unwrap(), vec![1, 2]);
        assert!(parse_camera_ids(&["a_1", "b_x"]).is_err());
    }
}
