use regex::Regex;

/// Regex-driven cleanup that makes extracted book text friendlier to a
/// TTS engine and to sentence-based chunking.
pub struct TextProcessor {
    hyphenation: Regex,
    cleanup_regex: Vec<(Regex, &'static str)>,
    abbreviations: Vec<(Regex, &'static str)>,
    sentence_spacing: Regex,
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextProcessor {
    pub fn new() -> Self {
        let cleanup_patterns = [
            // HTML entities left behind by extraction
            (r"&[a-zA-Z0-9#]+;", " "),
            (r"\s+", " "),
            (r"[“”„‟]", "\""),
            (r"[‘’‚‛`]", "'"),
            (r"[–—]", "-"),
            (r"\.{4,}", "..."),
            // No space before punctuation, exactly one after
            (r"\s+([,.!?;:])", "$1"),
            (r"([,.!?;:])\s+", "$1 "),
        ];

        // Expanded so their periods are not taken for sentence ends.
        let abbreviations = [
            ("Mr.", "Mister"),
            ("Mrs.", "Missus"),
            ("Ms.", "Miz"),
            ("Dr.", "Doctor"),
            ("Prof.", "Professor"),
            ("St.", "Saint"),
            ("vs.", "versus"),
            ("etc.", "etcetera"),
            ("i.e.", "that is"),
            ("e.g.", "for example"),
        ];

        Self {
            hyphenation: Regex::new(r"(\w+)-[ \t]*\r?\n\s*(\w+)").expect("hyphenation pattern"),
            cleanup_regex: cleanup_patterns
                .into_iter()
                .map(|(pattern, replacement)| {
                    (Regex::new(pattern).expect("cleanup pattern"), replacement)
                })
                .collect(),
            abbreviations: abbreviations
                .into_iter()
                .map(|(abbrev, expansion)| {
                    let pattern = format!(r"\b{}", regex::escape(abbrev));
                    (Regex::new(&pattern).expect("abbreviation pattern"), expansion)
                })
                .collect(),
            sentence_spacing: Regex::new(r"([.!?])([A-Z])").expect("sentence spacing pattern"),
        }
    }

    pub fn clean_text(&self, text: &str, aggressive: bool) -> String {
        // Line structure is still intact here; the whitespace pass below flattens it.
        let mut cleaned = self.hyphenation.replace_all(text, "$1$2").into_owned();

        for (regex, replacement) in &self.cleanup_regex {
            cleaned = regex.replace_all(&cleaned, *replacement).into_owned();
        }

        if aggressive {
            for (regex, expansion) in &self.abbreviations {
                cleaned = regex.replace_all(&cleaned, *expansion).into_owned();
            }
            cleaned = self
                .sentence_spacing
                .replace_all(&cleaned, "$1 $2")
                .into_owned();
        }

        cleaned.trim().to_string()
    }
}
