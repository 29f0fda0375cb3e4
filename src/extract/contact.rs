use std::sync::LazyLock;

use regex::Regex;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:my\s+name\s+is|i\s+am|i'm|this\s+is)\s+([A-Za-zÀ-ÿ'-]+(?:\s+[A-Za-zÀ-ÿ'-]+)?)")
        .expect("valid regex")
});
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]*\d").expect("valid regex"));

// words that follow "I'm ..." without introducing a name
const NOT_NAMES: &[&str] = &[
    "looking", "trying", "hoping", "calling", "wondering", "interested", "available", "free",
    "here", "good", "fine", "sorry", "not", "sure", "a", "an", "the", "just", "so", "very",
    "going", "thinking", "new", "booked", "busy", "afraid", "ready", "and", "but", "from",
];

/// Captures a self-introduced name ("my name is Ana", "I'm John Smith").
/// One or two words; anything that reads like a sentence continuation is
/// left unmatched rather than guessed at.
pub fn extract_name(text: &str) -> Option<String> {
    let caps = NAME_RE.captures(text)?;
    let candidate = caps.get(1)?.as_str().trim().trim_end_matches(['.', ',', '!']);

    let mut words = candidate.split_whitespace();
    let first = words.next()?;
    if NOT_NAMES.contains(&first.to_lowercase().as_str()) {
        return None;
    }
    // keep a second word only when it doesn't read like the sentence going on
    match words.next().filter(|w| !NOT_NAMES.contains(&w.to_lowercase().as_str())) {
        Some(second) => Some(format!("{first} {second}")),
        None => Some(first.to_string()),
    }
}

/// Finds a digit run of plausible phone length and normalizes it to
/// digits-only. Dates and clock times never qualify: their separators
/// split the run below the minimum length.
pub fn extract_phone(text: &str) -> Option<String> {
    for m in PHONE_RE.find_iter(text) {
        let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if (8..=15).contains(&digits.len()) {
            return Some(digits);
        }
    }
    None
}
