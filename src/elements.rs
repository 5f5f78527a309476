//! Best-effort tracking of characters, items and places mentioned in the
//! story.
//!
//! This is keyword spotting, not parsing. It misses plenty and now and then
//! records something odd ("a place called Ravenholm" becomes a character).
//! Callers should treat the lists as hints for the player, never as game
//! state the story depends on.

use serde::{Deserialize, Serialize};

const MAX_NAME_TOKENS: usize = 4;

const NPC_KEYWORDS: &[&str] = &[
    "named ",
    "called ",
    "introduces himself as ",
    "introduces herself as ",
    "introduces themselves as ",
    "known as ",
    "name is ",
];

const ITEM_KEYWORDS: &[&str] = &[
    "you pick up ",
    "you picked up ",
    "you take ",
    "you grab ",
    "you find ",
    "you found ",
    "you obtain ",
    "you receive ",
    "you acquire ",
    "you pocket ",
    "hands you ",
    "gives you ",
];

const LOCATION_KEYWORDS: &[&str] = &[
    "you enter ",
    "you arrive at ",
    "you arrive in ",
    "you reach ",
    "you step into ",
    "you walk into ",
    "you find yourself in ",
    "welcome to ",
];

const ARTICLES: &[&str] = &["a", "an", "the", "some", "your"];

/// First words that mean the phrase is not a thing at all.
const NOT_A_THING: &[&str] = &[
    "yourself", "it", "that", "this", "nothing", "no", "them", "him", "her", "what", "out", "up",
    "back", "time", "a", "an", "the", "to",
];

/// Words that end an item or place phrase.
const PHRASE_BREAKS: &[&str] = &[
    "and", "as", "at", "by", "for", "from", "in", "into", "of", "on", "that", "to", "which",
    "while", "with", "where", "who",
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementTracker {
    pub npcs: Vec<String>,
    pub inventory: Vec<String>,
    pub locations: Vec<String>,
}

/// What a single scan added.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementUpdate {
    pub npcs: Vec<String>,
    pub inventory: Vec<String>,
    pub locations: Vec<String>,
}

impl ElementUpdate {
    pub fn is_empty(&self) -> bool {
        self.npcs.is_empty() && self.inventory.is_empty() && self.locations.is_empty()
    }
}

impl ElementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans a reply and records anything new.
    pub fn scan(&mut self, text: &str) -> ElementUpdate {
        let mut update = ElementUpdate::default();

        for name in find_after(text, NPC_KEYWORDS, capitalized_name) {
            if record(&mut self.npcs, &name) {
                update.npcs.push(name);
            }
        }
        for item in find_after(text, ITEM_KEYWORDS, noun_phrase) {
            if record(&mut self.inventory, &item) {
                update.inventory.push(item);
            }
        }
        for place in find_after(text, LOCATION_KEYWORDS, noun_phrase) {
            if record(&mut self.locations, &place) {
                update.locations.push(place);
            }
        }

        update
    }

    pub fn clear(&mut self) {
        self.npcs.clear();
        self.inventory.clear();
        self.locations.clear();
    }
}

fn record(list: &mut Vec<String>, candidate: &str) -> bool {
    if list.iter().any(|known| known.eq_ignore_ascii_case(candidate)) {
        return false;
    }
    list.push(candidate.to_string());
    true
}

/// Runs `extract` on the text following every keyword hit. ASCII lowercasing
/// keeps byte offsets aligned with the original text.
fn find_after(
    text: &str,
    keywords: &[&str],
    extract: fn(&str) -> Option<String>,
) -> Vec<String> {
    let lower = text.to_ascii_lowercase();
    let mut hits: Vec<(usize, String)> = Vec::new();

    for keyword in keywords {
        for (idx, _) in lower.match_indices(keyword) {
            let starts_word = lower[..idx]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
            if !starts_word {
                continue;
            }
            if let Some(found) = extract(&text[idx + keyword.len()..]) {
                hits.push((idx, found));
            }
        }
    }

    hits.sort_by_key(|(idx, _)| *idx);
    hits.into_iter().map(|(_, found)| found).collect()
}

fn clean_token(token: &str) -> (&str, bool) {
    let ends_clause = token.ends_with(['.', ',', ';', ':', '!', '?', ')']);
    let cleaned = token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .trim_matches('\'');
    let cleaned = cleaned.strip_suffix("'s").unwrap_or(cleaned);
    (cleaned, ends_clause)
}

/// Consecutive capitalized words, at most four.
fn capitalized_name(rest: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for token in rest.split_whitespace().take(MAX_NAME_TOKENS) {
        let (word, ends_clause) = clean_token(token);
        if !word.chars().next().is_some_and(char::is_uppercase) {
            break;
        }
        parts.push(word);
        if ends_clause {
            break;
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Up to four words after an optional leading article, cut at punctuation or
/// a connecting word.
fn noun_phrase(rest: &str) -> Option<String> {
    let mut tokens = rest.split_whitespace().peekable();
    if let Some(first) = tokens.peek() {
        let (word, ends_clause) = clean_token(first);
        if ARTICLES.iter().any(|a| word.eq_ignore_ascii_case(a)) && !ends_clause {
            tokens.next();
        }
    }

    let mut parts: Vec<&str> = Vec::new();
    for token in tokens.take(MAX_NAME_TOKENS) {
        let (word, ends_clause) = clean_token(token);
        if word.is_empty() {
            break;
        }
        let lower = word.to_ascii_lowercase();
        if parts.is_empty() && NOT_A_THING.contains(&lower.as_str()) {
            return None;
        }
        if !parts.is_empty() && PHRASE_BREAKS.contains(&lower.as_str()) {
            break;
        }
        parts.push(word);
        if ends_clause {
            break;
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
