use std::sync::OnceLock;

use regex::Regex;

use crate::store::ShardKey;

fn archive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/(?:audio2|audio)/(\d+)\.tar").expect("archive pattern is valid")
    })
}

/// Extract the shard key from an archive locator such as
/// `https://host/audio/000123.tar`.
pub fn shard_key_from_locator(locator: &str) -> Option<ShardKey> {
    archive_pattern()
        .captures(locator)
        .and_then(|caps| caps.get(1))
        .and_then(|m| ShardKey::parse(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_audio_locator() {
        let key = shard_key_from_locator("https://example.org/data/audio/123.tar").unwrap();
        assert_eq!(key.as_str(), "000123");
    }

    #[test]
    fn test_parse_audio2_locator() {
        let key = shard_key_from_locator("pipe:curl -s https://h/audio2/004567.tar").unwrap();
        assert_eq!(key.as_str(), "004567");
    }

    #[test]
    fn test_unparseable_locator() {
        assert!(shard_key_from_locator("https://example.org/video/123.tar").is_none());
        assert!(shard_key_from_locator("https://example.org/audio/abc.tar").is_none());
        assert!(shard_key_from_locator("").is_none());
    }
}
