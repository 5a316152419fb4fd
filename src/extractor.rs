use std::io::{Cursor, Read};

use serde_json::Value;
use thiserror::Error;
use zip::{result::ZipError, ZipArchive};

use crate::{
    types::CaptureMetadata,
    utils::{INDEX_CANDIDATES, MAIN_PAGE_URL_FIELD, MANIFEST_ENTRY},
};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("corrupt_archive: {0}")]
    CorruptArchive(ZipError),
    #[error("manifest_missing: archive has no {}", MANIFEST_ENTRY)]
    ManifestMissing,
    #[error("manifest_invalid: {0}")]
    ManifestInvalid(String),
    #[error("index_missing: archive has none of {:?}", INDEX_CANDIDATES)]
    IndexMissing,
    #[error("index_invalid: {path}: {reason}")]
    IndexInvalid { path: String, reason: String },
    #[error("no_matching_record: no index record for {0}")]
    NoMatchingRecord(String),
}

/// One line of a CDX(J) index: `<sort key> <timestamp> <json block>`.
#[derive(Debug)]
struct IndexRecord<'a> {
    timestamp: &'a str,
    block: Value,
}

impl<'a> IndexRecord<'a> {
    // Only the first two spaces separate fields; the block itself may contain spaces.
    fn parse(line: &'a str) -> Result<Self, String> {
        let mut parts = line.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_sort_key), Some(timestamp), Some(block)) => {
                let block = serde_json::from_str(block).map_err(|e| e.to_string())?;
                Ok(IndexRecord { timestamp, block })
            }
            _ => Err("expected `<key> <timestamp> <json>`".into()),
        }
    }

    fn url(&self) -> Option<&str> {
        self.block.get("url").and_then(Value::as_str)
    }
}

/// Pulls the capture metadata of the page of record out of a WACZ archive.
///
/// The manifest names the main page url; the result is the first index record
/// whose `url` is exactly that string. There is no fuzzy fallback.
pub fn extract_metadata(archive: &[u8]) -> Result<CaptureMetadata, ExtractionError> {
    let mut zip =
        ZipArchive::new(Cursor::new(archive)).map_err(ExtractionError::CorruptArchive)?;

    let main_page_url = read_main_page_url(&mut zip)?;
    debug!("manifest main page url: {}", main_page_url);

    let (path, index) = read_index(&mut zip)?;
    debug!("reading index {}", path);

    for (n, line) in split_lines(&index).into_iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = IndexRecord::parse(line).map_err(|reason| ExtractionError::IndexInvalid {
            path: path.into(),
            reason: format!("line {}: {}", n + 1, reason),
        })?;
        if record.url() == Some(main_page_url.as_str()) {
            return Ok(CaptureMetadata {
                timestamp: record.timestamp.into(),
                captured_url: main_page_url,
            });
        }
    }

    Err(ExtractionError::NoMatchingRecord(main_page_url))
}

/// Splits on `\n`, `\r\n` and a lone `\r`, each counting as one line break.
fn split_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = vec![];
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn read_main_page_url(zip: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, ExtractionError> {
    let mut entry = match zip.by_name(MANIFEST_ENTRY) {
        Ok(e) => e,
        Err(ZipError::FileNotFound) => return Err(ExtractionError::ManifestMissing),
        Err(e) => return Err(ExtractionError::CorruptArchive(e)),
    };

    let mut data = String::new();
    entry
        .read_to_string(&mut data)
        .map_err(|e| ExtractionError::ManifestInvalid(format!("unreadable: {}", e)))?;

    let manifest: Value = serde_json::from_str(&data)
        .map_err(|e| ExtractionError::ManifestInvalid(format!("not json: {}", e)))?;

    match manifest.get(MAIN_PAGE_URL_FIELD).and_then(Value::as_str) {
        Some(url) => Ok(url.into()),
        None => Err(ExtractionError::ManifestInvalid(format!(
            "no string field {}",
            MAIN_PAGE_URL_FIELD
        ))),
    }
}

fn read_index(
    zip: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<(&'static str, String), ExtractionError> {
    for path in INDEX_CANDIDATES {
        let mut entry = match zip.by_name(path) {
            Ok(e) => e,
            Err(ZipError::FileNotFound) => continue,
            Err(e) => return Err(ExtractionError::CorruptArchive(e)),
        };
        let mut data = String::new();
        entry
            .read_to_string(&mut data)
            .map_err(|e| ExtractionError::IndexInvalid {
                path: path.into(),
                reason: e.to_string(),
            })?;
        return Ok((path, data));
    }
    Err(ExtractionError::IndexMissing)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    const MANIFEST: &str = r#"{"profile": "data-package", "mainPageUrl": "https://example.com/", "mainPageDate": "2024-01-01T00:00:00Z"}"#;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            w.start_file(*name, FileOptions::default()).unwrap();
            w.write_all(content.as_bytes()).unwrap();
        }
        w.finish().unwrap().into_inner()
    }

    #[test]
    fn finds_main_page_record() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/ 20240101000000 {\"url\":\"https://example.com/\"}\n",
            ),
        ]);
        let m = extract_metadata(&a).unwrap();
        assert_eq!(m.timestamp, "20240101000000");
        assert_eq!(m.captured_url, "https://example.com/");
    }

    #[test]
    fn skips_other_records_and_blank_lines() {
        let index = "com,example)/style.css 20240101000001 {\"url\":\"https://example.com/style.css\", \"mime\": \"text/css\"}\r\n\
                     \r\n\
                     com,example)/ 20240101000002 {\"url\": \"https://example.com/\", \"status\": \"200\"}\r\n\
                     com,example)/ 20240101000003 {\"url\": \"https://example.com/\"}\r\n";
        let a = archive(&[(MANIFEST_ENTRY, MANIFEST), ("indexes/index.cdx", index)]);
        let m = extract_metadata(&a).unwrap();
        assert_eq!(m.timestamp, "20240101000002");
    }

    #[test]
    fn url_must_match_exactly() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/ 20240101000000 {\"url\":\"https://example.com\"}\n\
                 com,example)/ 20240101000000 {\"url\":\"http://example.com/\"}\n",
            ),
        ]);
        match extract_metadata(&a) {
            Err(ExtractionError::NoMatchingRecord(url)) => assert_eq!(url, "https://example.com/"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn records_without_url_do_not_match() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            ("indexes/index.cdx", "com,example)/ 20240101000000 {\"mime\":\"text/html\"}\n"),
        ]);
        assert!(matches!(
            extract_metadata(&a),
            Err(ExtractionError::NoMatchingRecord(_))
        ));
    }

    #[test]
    fn cdx_is_preferred_over_cdxj() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdxj",
                "com,example)/ 20230101000000 {\"url\":\"https://example.com/\"}\n",
            ),
            (
                "indexes/index.cdx",
                "com,example)/ 20240101000000 {\"url\":\"https://example.com/\"}\n",
            ),
        ]);
        assert_eq!(extract_metadata(&a).unwrap().timestamp, "20240101000000");
    }

    #[test]
    fn falls_back_to_cdxj() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdxj",
                "com,example)/ 20230101000000 {\"url\":\"https://example.com/\"}\n",
            ),
        ]);
        assert_eq!(extract_metadata(&a).unwrap().timestamp, "20230101000000");
    }

    #[test]
    fn not_a_zip() {
        assert!(matches!(
            extract_metadata(b"<html>definitely not a zip</html>"),
            Err(ExtractionError::CorruptArchive(_))
        ));
    }

    #[test]
    fn manifest_missing_wins_over_index_missing() {
        let a = archive(&[("pages/pages.jsonl", "{}")]);
        assert!(matches!(
            extract_metadata(&a),
            Err(ExtractionError::ManifestMissing)
        ));
    }

    #[test]
    fn manifest_must_be_nested_at_root() {
        let a = archive(&[
            ("archive/datapackage.json", MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/ 20240101000000 {\"url\":\"https://example.com/\"}\n",
            ),
        ]);
        assert!(matches!(
            extract_metadata(&a),
            Err(ExtractionError::ManifestMissing)
        ));
    }

    #[test]
    fn manifest_invalid() {
        let not_json = archive(&[(MANIFEST_ENTRY, "mainPageUrl: https://example.com/")]);
        assert!(matches!(
            extract_metadata(&not_json),
            Err(ExtractionError::ManifestInvalid(_))
        ));

        let no_field = archive(&[(MANIFEST_ENTRY, r#"{"profile": "data-package"}"#)]);
        assert!(matches!(
            extract_metadata(&no_field),
            Err(ExtractionError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn index_missing() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            ("indexes/index.idx", "!meta 0 {}\n"),
        ]);
        assert!(matches!(
            extract_metadata(&a),
            Err(ExtractionError::IndexMissing)
        ));
    }

    #[test]
    fn malformed_line_before_match_fails() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/a 20240101000000 {broken\n\
                 com,example)/ 20240101000000 {\"url\":\"https://example.com/\"}\n",
            ),
        ]);
        match extract_metadata(&a) {
            Err(ExtractionError::IndexInvalid { path, reason }) => {
                assert_eq!(path, "indexes/index.cdx");
                assert!(reason.starts_with("line 1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_line_after_match_is_never_reached() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/ 20240101000000 {\"url\":\"https://example.com/\"}\n\
                 garbage\n",
            ),
        ]);
        assert!(extract_metadata(&a).is_ok());
    }

    #[test]
    fn line_breaks_of_any_kind_count_once() {
        assert_eq!(split_lines("a\r\nb\nc\rd"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines("a\r\n\r\nb\r\n"), vec!["a", "", "b"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn crlf_index_reports_the_right_line() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/a 20240101000000 {\"url\":\"https://example.com/a\"}\r\n\
                 com,example)/b 20240101000000 {\"url\":\"https://example.com/b\"}\r\n\
                 com,example)/c 20240101000000 {broken\r\n",
            ),
        ]);
        match extract_metadata(&a) {
            Err(ExtractionError::IndexInvalid { reason, .. }) => {
                assert!(reason.starts_with("line 3:"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lone_carriage_returns_separate_records() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/a 20240101000001 {\"url\":\"https://example.com/a\"}\r\
                 com,example)/ 20240101000002 {\"url\":\"https://example.com/\"}\r",
            ),
        ]);
        assert_eq!(extract_metadata(&a).unwrap().timestamp, "20240101000002");
    }

    #[test]
    fn short_line_is_invalid() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            ("indexes/index.cdx", "com,example)/ 20240101000000\n"),
        ]);
        assert!(matches!(
            extract_metadata(&a),
            Err(ExtractionError::IndexInvalid { .. })
        ));
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = archive(&[
            (MANIFEST_ENTRY, MANIFEST),
            (
                "indexes/index.cdx",
                "com,example)/ 20240101000000 {\"url\":\"https://example.com/\"}\n",
            ),
        ]);
        assert_eq!(extract_metadata(&a).unwrap(), extract_metadata(&a).unwrap());
    }
}
