//! Java `.properties` grammar: a composable line-oriented state machine with
//! escape handling and comment capture for round-trip `store`. Follows the
//! same framing style as the MAVLink decoder: chew one logical line at a
//! time, accumulate escapes into a scratch buffer, and hand the caller a
//! finished record.

use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyValue {
    raw: String,
}

impl PropertyValue {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parses like `strtoll`: optional sign, `0x`/`0X` hex prefix, else
    /// decimal.
    pub fn as_i64(&self) -> Option<i64> {
        let s = self.raw.trim();
        let (sign, rest) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s.strip_prefix('+').unwrap_or(s)),
        };
        if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok().map(|v| v * sign)
        } else {
            rest.parse::<i64>().ok().map(|v| v * sign)
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.raw.trim().parse().ok()
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue { raw: s.to_string() }
    }
}

impl From<String> for PropertyValue {
    fn from(raw: String) -> Self {
        PropertyValue { raw }
    }
}

#[derive(Debug, Clone, Default)]
struct Entry {
    value: PropertyValue,
    comment: Option<String>,
    order: usize,
}

/// An ordered, comment-preserving key/value store parsed from `.properties`
/// source text.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: BTreeMap<String, Entry>,
    next_order: usize,
}

enum State {
    LineStart,
    Comment,
    Key,
    KeyEscape,
    BetweenKeyAndValue,
    Value,
    ValueEscape,
    ValueUnicodeEscape,
}

impl Properties {
    pub fn new() -> Self {
        Properties::default()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        let order = self.next_order;
        self.next_order += 1;
        self.entries.entry(key.to_string()).and_modify(|e| e.value = value.into()).or_insert_with(|| Entry {
            value: value.into(),
            comment: None,
            order,
        });
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates entries in file/insertion order (not lexical key order).
    pub fn entries(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        let mut items: Vec<_> = self.entries.iter().collect();
        items.sort_by_key(|(_, e)| e.order);
        items.into_iter().map(|(k, e)| (k, &e.value))
    }

    pub fn comment_for(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|e| e.comment.as_deref())
    }

    /// Parses `.properties` source text. Implements the grammar's
    /// initial/comment/key/value/escape states directly rather than via
    /// regex, since escapes and line continuations are stateful across
    /// character boundaries.
    pub fn parse(source: &str) -> Properties {
        let mut props = Properties::new();
        let mut pending_comment: Vec<String> = Vec::new();
        let mut chars = source.chars().peekable();
        let mut state = State::LineStart;
        let mut key = String::new();
        let mut value = String::new();
        let mut unicode_digits = String::new();

        while let Some(c) = chars.next() {
            match state {
                State::LineStart => match c {
                    ' ' | '\t' | '\u{0C}' => {}
                    '\n' | '\r' => {}
                    '#' | '!' => {
                        state = State::Comment;
                        value.clear();
                    }
                    _ => {
                        key.clear();
                        key.push(c);
                        state = State::Key;
                    }
                },
                State::Comment => {
                    if c == '\n' {
                        pending_comment.push(value.clone());
                        value.clear();
                        state = State::LineStart;
                    } else if c != '\r' {
                        value.push(c);
                    }
                }
                State::Key => match c {
                    '\\' => state = State::KeyEscape,
                    '=' | ':' => state = State::BetweenKeyAndValue,
                    ' ' | '\t' => state = State::BetweenKeyAndValue,
                    '\n' => {
                        finish_property(&mut props, &key, "", &mut pending_comment);
                        key.clear();
                        state = State::LineStart;
                    }
                    _ => key.push(c),
                },
                State::KeyEscape => {
                    push_simple_escape(&mut key, c);
                    state = State::Key;
                }
                State::BetweenKeyAndValue => match c {
                    ' ' | '\t' => {}
                    '=' | ':' => {}
                    '\n' => {
                        finish_property(&mut props, &key, "", &mut pending_comment);
                        key.clear();
                        state = State::LineStart;
                    }
                    _ => {
                        value.clear();
                        value.push(c);
                        state = State::Value;
                    }
                },
                State::Value => match c {
                    '\\' => {
                        if chars.peek() == Some(&'\n') || chars.peek() == Some(&'\r') {
                            // Line continuation: consume to the next non-whitespace.
                            chars.next();
                            while matches!(chars.peek(), Some(' ') | Some('\t')) {
                                chars.next();
                            }
                        } else {
                            state = State::ValueEscape;
                        }
                    }
                    '\n' => {
                        finish_property(&mut props, &key, &value, &mut pending_comment);
                        key.clear();
                        state = State::LineStart;
                    }
                    '\r' => {}
                    _ => value.push(c),
                },
                State::ValueEscape => {
                    if c == 'u' {
                        unicode_digits.clear();
                        state = State::ValueUnicodeEscape;
                    } else {
                        push_simple_escape(&mut value, c);
                        state = State::Value;
                    }
                }
                State::ValueUnicodeEscape => {
                    unicode_digits.push(c);
                    if unicode_digits.len() == 4 {
                        if let Ok(code) = u32::from_str_radix(&unicode_digits, 16) {
                            if let Some(ch) = char::from_u32(code) {
                                value.push(ch);
                            }
                        }
                        state = State::Value;
                    }
                }
            }
        }

        // Flush a final key=value pair not terminated by a trailing newline.
        match state {
            State::Value | State::ValueEscape | State::ValueUnicodeEscape => {
                finish_property(&mut props, &key, &value, &mut pending_comment);
            }
            State::Key | State::KeyEscape | State::BetweenKeyAndValue => {
                finish_property(&mut props, &key, "", &mut pending_comment);
            }
            _ => {}
        }

        props
    }

    /// Renders back to `.properties` text, in insertion order, with each
    /// entry's captured comment block restored immediately above it.
    pub fn store(&self) -> String {
        let mut out = String::new();
        let mut items: Vec<_> = self.entries.iter().collect();
        items.sort_by_key(|(_, e)| e.order);
        for (key, entry) in items {
            if let Some(comment) = &entry.comment {
                for line in comment.lines() {
                    let _ = writeln!(out, "#{line}");
                }
            }
            let _ = writeln!(out, "{key}={}", escape_value(entry.value.as_str()));
        }
        out
    }
}

fn push_simple_escape(buf: &mut String, c: char) {
    match c {
        'n' => buf.push('\n'),
        'r' => buf.push('\r'),
        't' => buf.push('\t'),
        'f' => buf.push('\u{0C}'),
        other => buf.push(other),
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\:"),
            '=' => out.push_str("\\="),
            other => out.push(other),
        }
    }
    out
}

fn finish_property(props: &mut Properties, key: &str, value: &str, pending_comment: &mut Vec<String>) {
    if key.is_empty() {
        pending_comment.clear();
        return;
    }
    let order = props.next_order;
    props.next_order += 1;
    let comment = if pending_comment.is_empty() { None } else { Some(pending_comment.join("\n")) };
    pending_comment.clear();
    props.entries.insert(key.to_string(), Entry { value: value.into(), comment, order });
}
