use regex::Regex;

/// Pulls stable identifiers out of scanned filenames. All extractors are
/// pure: same input, same output, no state — reconciliation depends on
/// re-deriving identical tokens run after run.
///
/// Patterns are compiled once at construction; pass the extractor around
/// instead of re-compiling per call. Token boundaries are checked
/// manually because filenames separate tokens with `_`, which regex `\b`
/// treats as a word character.
pub struct TokenExtractor {
    fastfoto: Regex,
    img: Regex,
    hex: Regex,
    uuid: Regex,
    pro4k: Regex,
}

/// True when the `[start, end)` slice is not flanked by alphanumerics.
fn is_bounded(name: &str, start: usize, end: usize) -> bool {
    let before = name[..start].chars().next_back();
    let after = name[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_alphanumeric())
        && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

impl TokenExtractor {
    pub fn new() -> Self {
        Self {
            // Digit run captured wide, then length-checked: the regex
            // crate has no lookahead, and a 7+ digit run after the marker
            // is not a FastFoto id.
            fastfoto: Regex::new(r"(?i)fastfoto[_-]?(\d+)").unwrap(),
            img: Regex::new(r"(?i)img(\d{8})[-_](\d{4,})(?:\((\d+)\)|__(\d+))?").unwrap(),
            hex: Regex::new(r"[0-9a-fA-F]{8,16}").unwrap(),
            uuid: Regex::new(
                r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            )
            .unwrap(),
            pro4k: Regex::new(r"(?i)pro[-_]?4k[-_]?(\d+)").unwrap(),
        }
    }

    /// FastFoto scanner id: 3-6 digits after a `fastfoto` marker, with an
    /// optional `_`/`-` separator. Leading zeros are significant.
    pub fn fastfoto(&self, name: &str) -> Option<String> {
        let caps = self.fastfoto.captures(name)?;
        let digits = caps.get(1)?.as_str();
        if (3..=6).contains(&digits.len()) {
            Some(digits.to_string())
        } else {
            None
        }
    }

    /// Capture ids of the form `IMG<8 digits><sep><4+ digits>`, normalized
    /// to lowercase with `_` separators. Duplicate-scan suffixes `(N)` and
    /// `__NNN` fold into a trailing `__N` with leading zeros stripped.
    pub fn img(&self, name: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for caps in self.img.captures_iter(name) {
            let Some(whole) = caps.get(0) else { continue };
            let prev = name[..whole.start()].chars().next_back();
            if prev.is_some_and(|c| c.is_ascii_alphanumeric()) {
                continue;
            }
            let date = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let seq = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let suffix = caps.get(3).or_else(|| caps.get(4)).map(|m| m.as_str());

            let mut token = format!("img{}_{}", date, seq);
            if let Some(raw) = suffix {
                let n = raw.trim_start_matches('0');
                let n = if n.is_empty() { "0" } else { n };
                token.push_str("__");
                token.push_str(n);
            }
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }

    /// Token-bounded hex runs of 8-16 characters, lowercased. Longer runs
    /// never match: every candidate slice inside them fails the boundary
    /// check.
    pub fn hex_tokens(&self, name: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for m in self.hex.find_iter(name) {
            if !is_bounded(name, m.start(), m.end()) {
                continue;
            }
            let token = m.as_str().to_lowercase();
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }

    /// Standard 8-4-4-4-12 UUID, lowercased with `-` normalized to `_` so
    /// the result is a single filename-safe token.
    pub fn uuid(&self, name: &str) -> Option<String> {
        self.uuid
            .find_iter(name)
            .find(|m| is_bounded(name, m.start(), m.end()))
            .map(|m| m.as_str().to_lowercase().replace('-', "_"))
    }

    /// AI-batch id after a `pro4k` / `pro_4k` / `pro-4k` marker.
    pub fn pro4k(&self, name: &str) -> Option<String> {
        for caps in self.pro4k.captures_iter(name) {
            let Some(whole) = caps.get(0) else { continue };
            let prev = name[..whole.start()].chars().next_back();
            if prev.is_some_and(|c| c.is_ascii_alphanumeric()) {
                continue;
            }
            if let Some(digits) = caps.get(1) {
                return Some(digits.as_str().to_string());
            }
        }
        None
    }
}

impl Default for TokenExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastfoto_extraction() {
        let ext = TokenExtractor::new();
        assert_eq!(ext.fastfoto("FastFoto_001234.tif").as_deref(), Some("001234"));
        assert_eq!(ext.fastfoto("fastfoto-987.jpg").as_deref(), Some("987"));
        assert_eq!(ext.fastfoto("FASTFOTO4711_b.tif").as_deref(), Some("4711"));
        // Too short / too long digit runs are not ids.
        assert_eq!(ext.fastfoto("fastfoto_12.tif"), None);
        assert_eq!(ext.fastfoto("fastfoto_1234567.tif"), None);
        assert_eq!(ext.fastfoto("holiday_1234.tif"), None);
    }

    #[test]
    fn test_img_extraction() {
        let ext = TokenExtractor::new();
        assert_eq!(
            ext.img("IMG20230101_1234.jpg"),
            vec!["img20230101_1234".to_string()]
        );
        // Separator normalization.
        assert_eq!(
            ext.img("scan_IMG20230101-1234.jpg"),
            vec!["img20230101_1234".to_string()]
        );
        // Copy suffixes fold to a trailing __N.
        assert_eq!(
            ext.img("IMG20230101_1234(2).jpg"),
            vec!["img20230101_1234__2".to_string()]
        );
        assert_eq!(
            ext.img("IMG20230101_1234__003.jpg"),
            vec!["img20230101_1234__3".to_string()]
        );
        // Multiple ids in one name all surface.
        let tokens = ext.img("IMG20230101_1234_vs_IMG20230102_5678.jpg");
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains(&"img20230102_5678".to_string()));
        // Short date part is not a capture id; neither is an embedded run.
        assert!(ext.img("IMG2023_1234.jpg").is_empty());
        assert!(ext.img("KIMG20230101_1234.jpg").is_empty());
    }

    #[test]
    fn test_hex_token_bounds() {
        let ext = TokenExtractor::new();
        assert_eq!(
            ext.hex_tokens("scan_AABBCCDD.tif"),
            vec!["aabbccdd".to_string()]
        );
        assert_eq!(
            ext.hex_tokens("photo_aabbccddeeff0011.tif"),
            vec!["aabbccddeeff0011".to_string()]
        );
        // 7 chars: too short. 17 chars: never a token.
        assert!(ext.hex_tokens("x_abcdef0_y").is_empty());
        assert!(ext.hex_tokens("x_aabbccddeeff00112_y").is_empty());
        // Two separated tokens both surface.
        assert_eq!(
            ext.hex_tokens("aabbccdd_eeff0011.jpg"),
            vec!["aabbccdd".to_string(), "eeff0011".to_string()]
        );
    }

    #[test]
    fn test_uuid_extraction() {
        let ext = TokenExtractor::new();
        assert_eq!(
            ext.uuid("export_550E8400-E29B-41D4-A716-446655440000.png"),
            Some("550e8400_e29b_41d4_a716_446655440000".to_string())
        );
        assert_eq!(ext.uuid("not_a_uuid_550e8400.png"), None);
    }

    #[test]
    fn test_pro4k_extraction() {
        let ext = TokenExtractor::new();
        assert_eq!(ext.pro4k("PRO4K12345.jpg").as_deref(), Some("12345"));
        assert_eq!(ext.pro4k("pro-4k-77.jpg").as_deref(), Some("77"));
        assert_eq!(ext.pro4k("scan_pro_4k_8.jpg").as_deref(), Some("8"));
        assert_eq!(ext.pro4k("gopro4k123.jpg"), None);
    }

    #[test]
    fn test_extractors_are_independent() {
        let ext = TokenExtractor::new();
        // One name can carry several token kinds at once; each extractor
        // reports its own view and callers choose what to trust.
        let name = "FastFoto_001234_IMG20230101_5678_aabbccdd.tif";
        assert!(ext.fastfoto(name).is_some());
        assert_eq!(ext.img(name), vec!["img20230101_5678".to_string()]);
        assert!(ext.hex_tokens(name).contains(&"aabbccdd".to_string()));
    }
}
