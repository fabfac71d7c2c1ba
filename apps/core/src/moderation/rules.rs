//! Rule-based checks that run before any model call.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://").expect("URL pattern is a valid regex"));

/// Minimum run length of one repeated character that counts as spam ("aaaaa").
const REPEAT_RUN: usize = 5;

/// Scores `text` for spam on a 0.0..=1.0 scale.
///
/// | rule                                    | weight |
/// |-----------------------------------------|--------|
/// | more than one `http://`/`https://` link | 0.4    |
/// | a character repeated 5+ times in a row  | 0.3    |
/// | entirely upper-case                     | 0.2    |
/// | any word repeated (case-insensitive)    | 0.1    |
///
/// Weights are summed in tenths and capped at 1.0, so the result is exact and does
/// not depend on the order the rules are evaluated in.
pub fn rule_based_spam_score(text: &str) -> f32 {
    let mut tenths: u32 = 0;

    if URL_PATTERN.find_iter(text).count() > 1 {
        tenths += 4;
    }
    if has_repeated_run(text, REPEAT_RUN) {
        tenths += 3;
    }
    if is_all_upper(text) {
        tenths += 2;
    }
    if has_duplicate_words(text) {
        tenths += 1;
    }

    tenths.min(10) as f32 / 10.0
}

/// Case-insensitive substring match against the configured word list.
pub fn contains_profanity(text: &str, bad_words: &[String]) -> bool {
    let lowered = text.to_lowercase();
    bad_words
        .iter()
        .any(|word| !word.is_empty() && lowered.contains(&word.to_lowercase()))
}

// The regex crate has no backreferences, so runs are counted by hand.
fn has_repeated_run(text: &str, run: usize) -> bool {
    let mut previous: Option<char> = None;
    let mut length = 0;
    for c in text.chars() {
        if c != '\n' && Some(c) == previous {
            length += 1;
        } else {
            length = 1;
        }
        if length >= run {
            return true;
        }
        previous = Some(c);
    }
    false
}

/// True when the text has cased letters and none of them are lower-case.
fn is_all_upper(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}

fn has_duplicate_words(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    lowered.split_whitespace().any(|word| !seen.insert(word))
}
