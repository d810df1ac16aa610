//! Review text normalization.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(https?://|www\.)\S+").unwrap());
// Anything that is not a Latin letter (French accents included), digit or whitespace.
static DISALLOWED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zàâäéèêëîïôöùûüç0-9\s]").unwrap());
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "le", "de", "et", "à", "un", "il", "être", "en", "avoir", "que", "pour", "dans", "ce",
        "son", "une", "sur", "avec", "ne", "se", "pas", "tout", "plus", "par", "grand", "les",
        "des", "du", "la", "au", "aux", "ces", "ses", "nos", "vos", "leurs", "est", "sont",
        "était", "ont", "cette", "mais", "très", "sans", "peut", "fait", "faire", "voir",
        "deux", "comme", "aussi", "the", "and", "for", "are", "was", "this", "that", "with",
    ]
    .into_iter()
    .collect()
});

/// Lowercases, strips URLs, emoji and punctuation, then drops stopwords
/// and words of two characters or fewer.
pub fn clean_text(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let without_urls = URL_RE.replace_all(&lowered, "");
    // Apostrophes and other ASCII punctuation glue words together ("j'adore" -> "jadore").
    let without_punct: String = without_urls
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    let letters_only = DISALLOWED_RE.replace_all(&without_punct, " ");

    let kept: Vec<&str> = letters_only
        .split_whitespace()
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(w))
        .collect();

    SPACES_RE.replace_all(&kept.join(" "), " ").trim().to_string()
}
