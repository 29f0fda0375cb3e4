use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse intent of one inbound utterance. Deliberately keyword-driven:
/// the extractors fill in the details, this only routes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Book,
    Reschedule,
    Cancel,
    Confirm,
    Decline,
    Change,
    Other,
}

static CANCEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cancel\w*|call\s+(it\s+)?off|can.?t\s+make\s+it)\b").expect("valid regex")
});
static RESCHEDULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(re-?schedul\w*|move\s+(my|the|our)\s+appointment|change\s+(my|the|our)\s+(appointment|booking))\b")
        .expect("valid regex")
});
static CHANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(change|another\s+(time|slot|day)|different\s+(time|slot|day)|other\s+(time|slot)|something\s+else|pick\s+another)\b")
        .expect("valid regex")
});
static CONFIRM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(yes|yep|yeah|yup|ok(ay)?|sure|confirm(ed)?|sounds\s+good|that\s+works|works\s+for\s+me|perfect|great|deal)\b")
        .expect("valid regex")
});
static DECLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(no|nope|nah|not\s+really|doesn.?t\s+work|that\s+won.?t\s+work)\b")
        .expect("valid regex")
});
static BOOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(book\w*|schedul\w*|appointment|reserv\w*|availab\w*|slot|opening|free\s+time)\b")
        .expect("valid regex")
});

/// Most specific intent wins: cancel and reschedule outrank generic booking
/// words, and short yes/no replies outrank everything they can appear in.
pub fn classify(text: &str) -> Intent {
    if CANCEL_RE.is_match(text) {
        Intent::Cancel
    } else if RESCHEDULE_RE.is_match(text) {
        Intent::Reschedule
    } else if CHANGE_RE.is_match(text) {
        Intent::Change
    } else if CONFIRM_RE.is_match(text) {
        Intent::Confirm
    } else if DECLINE_RE.is_match(text) {
        Intent::Decline
    } else if BOOK_RE.is_match(text) {
        Intent::Book
    } else {
        Intent::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_phrases() {
        assert_eq!(classify("I'd like to book a haircut"), Intent::Book);
        assert_eq!(classify("do you have any openings tomorrow?"), Intent::Book);
        assert_eq!(classify("what's your availability?"), Intent::Book);
    }

    #[test]
    fn test_cancel_phrases() {
        assert_eq!(classify("I need to cancel my appointment"), Intent::Cancel);
        assert_eq!(classify("sorry, can't make it"), Intent::Cancel);
        assert_eq!(classify("please call it off"), Intent::Cancel);
    }

    #[test]
    fn test_cancel_outranks_book() {
        assert_eq!(classify("cancel my booking please"), Intent::Cancel);
    }

    #[test]
    fn test_reschedule_phrases() {
        assert_eq!(classify("can we reschedule?"), Intent::Reschedule);
        assert_eq!(classify("I want to move my appointment"), Intent::Reschedule);
        assert_eq!(
            classify("I'd like to change my appointment to Friday"),
            Intent::Reschedule
        );
    }

    #[test]
    fn test_confirm_phrases() {
        assert_eq!(classify("yes"), Intent::Confirm);
        assert_eq!(classify("  Sounds good!"), Intent::Confirm);
        assert_eq!(classify("that works for me"), Intent::Confirm);
    }

    #[test]
    fn test_decline_phrases() {
        assert_eq!(classify("no"), Intent::Decline);
        assert_eq!(classify("that won't work"), Intent::Decline);
    }

    #[test]
    fn test_decline_with_cancel_word_is_cancel() {
        assert_eq!(classify("no, cancel it"), Intent::Cancel);
    }

    #[test]
    fn test_change_phrases() {
        assert_eq!(classify("can I pick another time?"), Intent::Change);
        assert_eq!(classify("a different slot would be better"), Intent::Change);
    }

    #[test]
    fn test_other() {
        assert_eq!(classify("hello there"), Intent::Other);
        assert_eq!(classify("how much is a haircut?"), Intent::Other);
    }

    #[test]
    fn test_yes_mid_sentence_is_not_confirm() {
        // anchored at the start: "yes" buried in a sentence doesn't commit
        assert_eq!(classify("I said yes to my wife about dinner"), Intent::Other);
    }
}
