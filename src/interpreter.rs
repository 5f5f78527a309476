//! Splits a model reply into narrative prose and a list of next actions.
//!
//! The model is asked to end every reply with an `ACTIONS: a | b | c` line,
//! but local models drift, so numbered and bolded lists are picked up too.

use crate::types::ParsedTurn;
use once_cell::sync::Lazy;
use regex::Regex;

/// Actions at or above this many characters are prose, not choices.
pub const MAX_ACTION_CHARS: usize = 80;

/// Offered whenever a reply contains no usable actions.
pub const FALLBACK_ACTIONS: [&str; 4] = [
    "Look around",
    "Explore further",
    "Check your inventory",
    "Wait and listen",
];

/// Phrases that introduce a list of choices.
const LIST_HEADERS: &[&str] = &[
    "what do you do",
    "what will you do",
    "what would you like to do",
    "what do you want to do",
    "your options",
    "your choices",
    "possible actions",
    "available actions",
    "choose your action",
    "you could:",
    "you can:",
];

/// Instruction text some models echo back instead of playing the game.
const PROMPT_LEAKAGE: &[&str] = &[
    "as an ai",
    "language model",
    "system prompt",
    "game master instructions",
    "format your response",
    "end your response with",
    "end each response with",
    "respond in the following format",
    "actions line",
    "pipe-separated",
    "i will act as",
    "i'll act as the game master",
];

static BOLD_NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[.)]\s*\*\*(.+?)\*\*").expect("bold list regex"));

static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[.)]\s+(.+)$").expect("numbered list regex"));

static TRAILING_PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^()]*\)\s*$").expect("parenthetical regex"));

/// Parses a raw reply. First match wins per line: an `ACTIONS:` line, a
/// numbered bold item, a plain numbered item, a list header, then narrative.
///
/// A list header switches list mode on, hiding unnumbered lines. It ends at a
/// blank line once an item has been seen, or at the first prose line after a
/// blank line when no item ever followed the header.
pub fn parse_response(raw: &str) -> ParsedTurn {
    let mut narrative: Vec<&str> = Vec::new();
    let mut hidden_in_list: Vec<&str> = Vec::new();
    let mut detected: Vec<String> = Vec::new();
    let mut explicit: Option<Vec<String>> = None;
    let mut in_list = false;
    let mut list_items = 0usize;
    let mut blank_in_list = false;

    for line in raw.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if in_list && list_items > 0 {
                in_list = false;
                list_items = 0;
            }
            if in_list {
                blank_in_list = true;
            } else {
                narrative.push("");
            }
            continue;
        }

        if let Some(rest) = strip_actions_marker(trimmed) {
            let actions = split_explicit_actions(rest);
            if !actions.is_empty() {
                explicit = Some(actions);
            }
            continue;
        }

        if let Some(caps) = BOLD_NUMBERED.captures(trimmed) {
            if let Some(action) = accept_action(caps[1].trim()) {
                detected.push(action);
            }
            list_items += 1;
            continue;
        }

        if let Some(caps) = NUMBERED.captures(trimmed) {
            if let Some(action) = clean_numbered_item(&caps[1]) {
                detected.push(action);
            }
            list_items += 1;
            continue;
        }

        let lower = trimmed.to_lowercase();
        if LIST_HEADERS.iter().any(|header| lower.contains(header)) {
            in_list = true;
            list_items = 0;
            blank_in_list = false;
            continue;
        }

        if PROMPT_LEAKAGE.iter().any(|phrase| lower.contains(phrase)) {
            continue;
        }

        if in_list && list_items == 0 && blank_in_list {
            in_list = false;
            narrative.push("");
        }
        if in_list {
            hidden_in_list.push(line.trim_end());
            continue;
        }

        narrative.push(line.trim_end());
    }

    let actions = match explicit {
        Some(actions) => actions,
        None if !detected.is_empty() => detected,
        None => fallback_actions(),
    };

    let mut narrative = collapse_blank_lines(&narrative);
    if narrative.is_empty() {
        narrative = collapse_blank_lines(&hidden_in_list);
    }

    ParsedTurn { narrative, actions }
}

/// Whether one line reads as story text on its own. Streaming front ends use
/// this to hold back choice lists before the whole reply has arrived.
pub fn is_story_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    if strip_actions_marker(trimmed).is_some()
        || BOLD_NUMBERED.is_match(trimmed)
        || NUMBERED.is_match(trimmed)
    {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !LIST_HEADERS.iter().any(|header| lower.contains(header))
        && !PROMPT_LEAKAGE.iter().any(|phrase| lower.contains(phrase))
}

pub fn fallback_actions() -> Vec<String> {
    FALLBACK_ACTIONS.iter().map(|a| a.to_string()).collect()
}

fn strip_actions_marker(line: &str) -> Option<&str> {
    let line = line.trim_start_matches(['*', '#', ' ']);
    let head = line.get(..8)?;
    if head.eq_ignore_ascii_case("actions:") {
        Some(line[8..].trim_start_matches('*'))
    } else {
        None
    }
}

fn split_explicit_actions(rest: &str) -> Vec<String> {
    rest.split('|')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strips a trailing parenthetical, then everything from the first colon.
/// The colon cut also shortens items like "Ask about: the crown".
fn clean_numbered_item(item: &str) -> Option<String> {
    let without_paren = TRAILING_PARENTHETICAL.replace(item, "");
    let head = match without_paren.split_once(':') {
        Some((head, _)) => head,
        None => without_paren.as_ref(),
    };
    accept_action(head.replace("**", "").trim_matches(['*', ' ', '-']))
}

fn accept_action(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() >= MAX_ACTION_CHARS {
        None
    } else {
        Some(text.to_string())
    }
}

fn collapse_blank_lines(lines: &[&str]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.is_empty() && out.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last() == Some(&"") {
        out.pop();
    }
    out.join("\n")
}
