use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::time::Duration;

pub const REQUEST_QUEUE_KEY: &str = "queue:requests";
pub const RESULT_QUEUE_KEY: &str = "queue:results";

pub const ARCHIVE_EXTENSION: &str = "wacz";
pub const MANIFEST_ENTRY: &str = "datapackage.json";
pub const MAIN_PAGE_URL_FIELD: &str = "mainPageUrl";
// tried in order, the first one present wins
pub const INDEX_CANDIDATES: [&str; 2] = ["indexes/index.cdx", "indexes/index.cdxj"];

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_CAPTURE_COMMAND: &str = "scoop";
pub const DEFAULT_VALKEY_ADDR: &str = "localhost";
pub const DEFAULT_VALKEY_PORT: &str = "6379";

pub fn jitter(duration: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let rndm = rng.gen_range(1.0..2.0);
    duration.mul_f64(rndm)
}

pub fn get_random_string(len: i32) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}

/// `captureTimeout` -> `capture-timeout`
pub fn to_kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '_' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

/// A shadow id is used verbatim as a filename stem, so it must not be able to
/// leave the output directory.
pub fn is_safe_file_stem(stem: &str) -> bool {
    !stem.is_empty()
        && stem != "."
        && stem != ".."
        && !stem.contains(&['/', '\\', '\0'][..])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kebab_case_conversion() {
        assert_eq!(to_kebab_case("captureTimeout"), "capture-timeout");
        assert_eq!(to_kebab_case("headless"), "headless");
        assert_eq!(to_kebab_case("captureWindowX"), "capture-window-x");
        assert_eq!(to_kebab_case("log_level"), "log-level");
    }

    #[test]
    fn file_stems() {
        assert!(is_safe_file_stem("a1b2c3"));
        assert!(is_safe_file_stem("seed.v2"));
        assert!(!is_safe_file_stem(""));
        assert!(!is_safe_file_stem(".."));
        assert!(!is_safe_file_stem("../etc/passwd"));
        assert!(!is_safe_file_stem("a\\b"));
    }

    #[test]
    fn jitter_never_shrinks() {
        let d = Duration::from_millis(100);
        for _ in 0..20 {
            let j = jitter(d);
            assert!(j >= d && j < d * 2);
        }
    }
}
