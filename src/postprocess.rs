//! Cleanup of raw model output before it is stored and returned.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LABEL_PREFIX: Regex = Regex::new(r"\[.*?\]:\s*").unwrap();
    static ref NUMBERED_LINE: Regex = Regex::new(r"(?m)^\d+\s*$").unwrap();
    static ref NUMBER_THEN_HEADER: Regex = Regex::new(r"(\d+)\s*\n\s*([A-Z][^\n:]+):").unwrap();
    static ref BARE_NUMBER: Regex = Regex::new(r"(\d+)\s").unwrap();
    static ref ITEM_HEAD: Regex = Regex::new(r"\d+\.\s\*\*").unwrap();
    static ref ITEM_BOUNDARY: Regex = Regex::new(r"\d+\.\s").unwrap();
    static ref NEWLINE_RUN: Regex = Regex::new(r"\n+").unwrap();
    static ref BLANK_LINE_RUN: Regex = Regex::new(r"\n{2,}").unwrap();
    static ref CODE_HINT: Regex = Regex::new(
        r"(?:^|\n)(?:def |class |import |print\(|for |while )"
    ).unwrap();

    static ref LOWER_UPPER: Regex = Regex::new(r"([a-z])([A-Z])").unwrap();
    static ref LETTER_DIGIT: Regex = Regex::new(r"([a-zA-Z])(\d)").unwrap();
    static ref DIGIT_LETTER: Regex = Regex::new(r"(\d)([a-zA-Z])").unwrap();
    static ref PUNCTUATION: Regex = Regex::new(r"\s*([,!?])\s*").unwrap();
    static ref SENTENCE_GLUE: Regex = Regex::new(r"([.!?])([A-Z])").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s+").unwrap();
}

/// Removes `[Label]:` prefixes the model echoes back from the prompt.
pub fn clean_response_text(text: &str) -> String {
    LABEL_PREFIX.replace_all(text, "").trim().to_string()
}

/// Normalizes line breaks for Markdown rendering.
///
/// Text with three or more bare numbered lines is rebuilt as a numbered list
/// with bold headers; anything else gets blank-line runs collapsed and single
/// line breaks turned into hard breaks. Code-looking text without a fence is
/// wrapped in one.
pub fn format_response_for_markdown(text: &str) -> String {
    let text = text.replace("\r\n", "\n");

    let text = if NUMBERED_LINE.find_iter(&text).count() >= 3 {
        let text = NUMBER_THEN_HEADER.replace_all(&text, "${1}. **${2}:**");
        let text = BARE_NUMBER.replace_all(&text, "${1}. ");
        join_list_items(&text)
    } else {
        let text = BLANK_LINE_RUN.replace_all(&text, "\n\n");
        hard_line_breaks(&text)
    };

    let text = if CODE_HINT.is_match(&text) && !text.contains("```") {
        format!("```python\n{}\n```", text)
    } else {
        text
    };

    text.trim().to_string()
}

/// Label stripping followed by Markdown formatting.
pub fn postprocess_reply(raw: &str) -> String {
    format_response_for_markdown(&clean_response_text(raw))
}

/// Collapses line breaks inside each `N. **` item up to the next `N. `.
fn join_list_items(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(head) = ITEM_HEAD.find_at(text, pos) {
        out.push_str(&text[pos..head.start()]);
        let end = ITEM_BOUNDARY.find_at(text, head.end())
            .map(|m| m.start())
            .unwrap_or(text.len());
        out.push_str(&NEWLINE_RUN.replace_all(&text[head.start()..end], " "));
        pos = end;
    }
    out.push_str(&text[pos..]);
    out
}

/// Turns every isolated `\n` into a Markdown hard break; blank lines stay.
fn hard_line_breaks(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for (idx, _) in text.match_indices('\n') {
        let prev_newline = idx > 0 && bytes[idx - 1] == b'\n';
        let next_newline = bytes.get(idx + 1) == Some(&b'\n');
        if !prev_newline && !next_newline {
            out.push_str(&text[last..idx]);
            out.push_str("  \n");
            last = idx + 1;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Light cleaner for streamed replies: restores spacing lost around case,
/// digit and punctuation boundaries and flattens whitespace.
pub fn clean_generated_text(text: &str) -> String {
    let text = LOWER_UPPER.replace_all(text, "${1} ${2}");
    let text = LETTER_DIGIT.replace_all(&text, "${1} ${2}");
    let text = DIGIT_LETTER.replace_all(&text, "${1} ${2}");
    let text = PUNCTUATION.replace_all(&text, "${1} ");
    let text = SENTENCE_GLUE.replace_all(&text, "${1} ${2}");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Splits after sentence-ending punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // keep the punctuation, drop the whitespace
        sentences.push(text[start..m.start() + 1].to_string());
        start = m.end();
    }
    sentences.push(text[start..].to_string());
    sentences.retain(|s| !s.trim().is_empty());
    sentences
}
