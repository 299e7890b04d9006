//! Template document scanning.
//!
//! The workout-template dataset is hand-written source text (TypeScript or
//! JSON-like object literals). Exercise entries are the `{ ... }` objects that
//! carry the configured id property. Only string literals and `null` are
//! accepted as field values; anything computed is reported per entry and the
//! entry is left untouched.

use std::fmt;
use std::iter::Peekable;
use std::ops::Range;
use std::str::CharIndices;

use anyhow::{Result, bail};
use serde::Serialize;

pub const NULL_SENTINEL: &str = "null";

/// Property names of the four mutable fields of an exercise entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFieldKeys {
    pub id: String,
    pub name: String,
    pub media_url: String,
    pub thumbnail_url: String,
}

impl Default for TemplateFieldKeys {
    fn default() -> Self {
        Self {
            id: "exerciseId".to_string(),
            name: "name".to_string(),
            media_url: "mediaUrl".to_string(),
            thumbnail_url: "thumbnailUrl".to_string(),
        }
    }
}

/// Where a field's value lives in the document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSlot {
    /// A quoted literal; `raw` is the exact source text including quotes.
    Literal {
        range: Range<usize>,
        raw: String,
        quote: char,
    },
    /// The null-sentinel token; `quote` is the entry's id quote, used for the
    /// replacement literal.
    Null { range: Range<usize>, quote: char },
    /// The property is missing; a new one is inserted at `insert_at`.
    /// `key_quote` mirrors how the id key is written (`"id":` in JSON).
    Absent {
        insert_at: usize,
        key: String,
        key_quote: Option<char>,
        quote: char,
    },
}

impl FieldSlot {
    pub fn is_null_sentinel(&self) -> bool {
        matches!(self, Self::Null { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub id: FieldSlot,
    pub name: FieldSlot,
    pub media_url: FieldSlot,
    pub thumbnail_url: FieldSlot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateExerciseReference {
    /// Position among the parsed entries, in document order.
    pub ordinal: usize,
    /// 1-based line of the id literal.
    pub line: usize,
    pub current_id: String,
    pub current_name: String,
    pub current_media_url: Option<String>,
    pub current_thumbnail_url: Option<String>,
    pub source_span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseIssue {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTemplate {
    pub references: Vec<TemplateExerciseReference>,
    pub issues: Vec<ParseIssue>,
}

/// Extract every exercise entry from `source`.
///
/// Fails only when the document cannot be tokenized at all (unterminated
/// string or comment, unbalanced brackets); malformed entries become issues.
pub fn parse_template_document(source: &str, keys: &TemplateFieldKeys) -> Result<ParsedTemplate> {
    let lines = LineIndex::new(source);
    let tokens = tokenize(source, &lines)?;

    let mut stack: Vec<Frame> = Vec::new();
    let mut references = Vec::new();
    let mut issues = Vec::new();

    for token in tokens {
        match &token.kind {
            TokenKind::Punct(open @ ('{' | '[' | '(')) => {
                if let Some(frame) = stack.last_mut() {
                    frame.accept_nested();
                }
                stack.push(Frame::new(*open, token.start));
            }
            TokenKind::Punct(close @ ('}' | ']' | ')')) => {
                let Some(mut frame) = stack.pop() else {
                    bail!(
                        "unbalanced `{close}` at line {}",
                        lines.line_of(token.start)
                    );
                };
                if frame.closer() != *close {
                    bail!(
                        "`{close}` at line {} closes `{}` opened at line {}",
                        lines.line_of(token.start),
                        frame.opener,
                        lines.line_of(frame.open_offset)
                    );
                }
                if frame.opener == '{' {
                    frame.finish_property();
                    match build_reference(&frame.properties, keys, &lines) {
                        Some(Ok(reference)) => references.push(reference),
                        Some(Err(issue)) => issues.push(issue),
                        None => {}
                    }
                }
            }
            _ => {
                if let Some(frame) = stack.last_mut() {
                    frame.accept(&token);
                }
            }
        }
    }

    if let Some(frame) = stack.last() {
        bail!(
            "`{}` opened at line {} is never closed",
            frame.opener,
            lines.line_of(frame.open_offset)
        );
    }

    references.sort_by_key(|reference| slot_start(&reference.source_span.id));
    for (ordinal, reference) in references.iter_mut().enumerate() {
        reference.ordinal = ordinal;
    }
    issues.sort_by_key(|issue| issue.line);

    Ok(ParsedTemplate { references, issues })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Punct(char),
    /// `valid` is false when an escape sequence could not be decoded.
    Str {
        value: String,
        quote: char,
        valid: bool,
    },
    Word(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

fn tokenize(source: &str, lines: &LineIndex) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if ch.is_whitespace() {
            continue;
        }

        if ch == '/' {
            match chars.peek().map(|(_, next)| *next) {
                Some('/') => {
                    for (_, skipped) in chars.by_ref() {
                        if skipped == '\n' {
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut previous = '\0';
                    let mut closed = false;
                    for (_, skipped) in chars.by_ref() {
                        if previous == '*' && skipped == '/' {
                            closed = true;
                            break;
                        }
                        previous = skipped;
                    }
                    if !closed {
                        bail!("unterminated block comment starting at line {}", lines.line_of(start));
                    }
                    continue;
                }
                _ => {}
            }
        }

        if matches!(ch, '"' | '\'' | '`') {
            let mut value = String::new();
            let mut valid = true;
            let mut end = None;
            while let Some((offset, next)) = chars.next() {
                if next == ch {
                    end = Some(offset + next.len_utf8());
                    break;
                }
                if next == '\n' && ch != '`' {
                    break;
                }
                if next == '\\' {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match decode_escape(escaped, &mut chars) {
                        Escape::Char(decoded) => value.push(decoded),
                        Escape::Continuation => {}
                        Escape::Invalid => valid = false,
                    }
                    continue;
                }
                value.push(next);
            }
            let Some(end) = end else {
                bail!("unterminated string literal at line {}", lines.line_of(start));
            };
            tokens.push(Token {
                kind: TokenKind::Str {
                    value,
                    quote: ch,
                    valid,
                },
                start,
                end,
            });
            continue;
        }

        if is_word_char(ch) {
            let mut end = start + ch.len_utf8();
            while let Some((offset, next)) = chars.peek().copied() {
                if !is_word_char(next) {
                    break;
                }
                end = offset + next.len_utf8();
                chars.next();
            }
            tokens.push(Token {
                kind: TokenKind::Word(source[start..end].to_string()),
                start,
                end,
            });
            continue;
        }

        tokens.push(Token {
            kind: TokenKind::Punct(ch),
            start,
            end: start + ch.len_utf8(),
        });
    }

    Ok(tokens)
}

enum Escape {
    Char(char),
    Continuation,
    Invalid,
}

/// Decode the escape sequence after a backslash. Only hex digits are consumed,
/// so a broken escape never swallows the closing quote.
fn decode_escape(escaped: char, chars: &mut Peekable<CharIndices<'_>>) -> Escape {
    let decoded = match escaped {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '\r' => {
            if chars.peek().is_some_and(|(_, next)| *next == '\n') {
                chars.next();
            }
            return Escape::Continuation;
        }
        '\n' | '\u{2028}' | '\u{2029}' => return Escape::Continuation,
        'b' => '\u{8}',
        'f' => '\u{c}',
        'v' => '\u{b}',
        '0' if !chars.peek().is_some_and(|(_, next)| next.is_ascii_digit()) => '\0',
        '1'..='9' | '0' => return Escape::Invalid,
        'x' => return scalar(read_hex(chars, 2, 2)),
        'u' => return decode_unicode_escape(chars),
        other => other,
    };
    Escape::Char(decoded)
}

fn decode_unicode_escape(chars: &mut Peekable<CharIndices<'_>>) -> Escape {
    if chars.peek().is_some_and(|(_, next)| *next == '{') {
        chars.next();
        let code = read_hex(chars, 1, 6);
        if !chars.peek().is_some_and(|(_, next)| *next == '}') {
            return Escape::Invalid;
        }
        chars.next();
        return scalar(code);
    }

    let Some(unit) = read_hex(chars, 4, 4) else {
        return Escape::Invalid;
    };
    if !(0xD800..=0xDBFF).contains(&unit) {
        return scalar(Some(unit));
    }

    // High surrogate: only valid when a `\uXXXX` low surrogate follows.
    let mut ahead = chars.clone();
    let low = match (ahead.next(), ahead.next()) {
        (Some((_, '\\')), Some((_, 'u'))) => read_hex(&mut ahead, 4, 4),
        _ => None,
    };
    match low {
        Some(low) if (0xDC00..=0xDFFF).contains(&low) => {
            *chars = ahead;
            scalar(Some(0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00)))
        }
        _ => Escape::Invalid,
    }
}

fn read_hex(chars: &mut Peekable<CharIndices<'_>>, min: usize, max: usize) -> Option<u32> {
    let mut code = 0u32;
    let mut digits = 0;
    while digits < max {
        let Some(digit) = chars.peek().and_then(|(_, next)| next.to_digit(16)) else {
            break;
        };
        chars.next();
        code = code * 16 + digit;
        digits += 1;
    }
    (digits >= min).then_some(code)
}

fn scalar(code: Option<u32>) -> Escape {
    code.and_then(char::from_u32)
        .map_or(Escape::Invalid, Escape::Char)
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '$' | '.')
}

#[derive(Debug, Clone)]
enum PropertyValue {
    Str {
        value: String,
        quote: char,
        range: Range<usize>,
    },
    Null {
        range: Range<usize>,
    },
    BadEscape,
    Other,
}

#[derive(Debug, Clone)]
struct Property {
    key: String,
    key_quote: Option<char>,
    key_offset: usize,
    value: PropertyValue,
}

#[derive(Debug, Clone)]
enum SlotState {
    Key,
    Colon {
        key: String,
        key_quote: Option<char>,
        key_offset: usize,
    },
    Value {
        key: String,
        key_quote: Option<char>,
        key_offset: usize,
    },
    /// Past the value (or not a property at all); waiting for `,`.
    Rest { property: Option<usize> },
}

#[derive(Debug)]
struct Frame {
    opener: char,
    open_offset: usize,
    state: SlotState,
    properties: Vec<Property>,
}

impl Frame {
    fn new(opener: char, open_offset: usize) -> Self {
        Self {
            opener,
            open_offset,
            state: SlotState::Key,
            properties: Vec::new(),
        }
    }

    fn closer(&self) -> char {
        match self.opener {
            '{' => '}',
            '[' => ']',
            _ => ')',
        }
    }

    fn accept_nested(&mut self) {
        if self.opener != '{' {
            return;
        }
        let state = std::mem::replace(&mut self.state, SlotState::Rest { property: None });
        self.state = match state {
            SlotState::Value {
                key,
                key_quote,
                key_offset,
            } => {
                self.properties.push(Property {
                    key,
                    key_quote,
                    key_offset,
                    value: PropertyValue::Other,
                });
                SlotState::Rest { property: None }
            }
            SlotState::Rest { property } => {
                self.taint(property);
                SlotState::Rest { property: None }
            }
            _ => SlotState::Rest { property: None },
        };
    }

    fn accept(&mut self, token: &Token) {
        if self.opener != '{' {
            return;
        }
        if token.kind == TokenKind::Punct(',') {
            self.finish_property();
            self.state = SlotState::Key;
            return;
        }

        let state = std::mem::replace(&mut self.state, SlotState::Rest { property: None });
        self.state = match (state, &token.kind) {
            (SlotState::Key, TokenKind::Str { value, quote, .. }) => SlotState::Colon {
                key: value.clone(),
                key_quote: Some(*quote),
                key_offset: token.start,
            },
            (SlotState::Key, TokenKind::Word(word)) => SlotState::Colon {
                key: word.clone(),
                key_quote: None,
                key_offset: token.start,
            },
            (
                SlotState::Colon {
                    key,
                    key_quote,
                    key_offset,
                },
                TokenKind::Punct(':'),
            ) => SlotState::Value {
                key,
                key_quote,
                key_offset,
            },
            (
                SlotState::Value {
                    key,
                    key_quote,
                    key_offset,
                },
                kind,
            ) => {
                let value = match kind {
                    TokenKind::Str { valid: false, .. } => PropertyValue::BadEscape,
                    TokenKind::Str { value, quote, .. } => PropertyValue::Str {
                        value: value.clone(),
                        quote: *quote,
                        range: token.start..token.end,
                    },
                    TokenKind::Word(word) if word == NULL_SENTINEL => PropertyValue::Null {
                        range: token.start..token.end,
                    },
                    _ => PropertyValue::Other,
                };
                self.properties.push(Property {
                    key,
                    key_quote,
                    key_offset,
                    value,
                });
                SlotState::Rest {
                    property: Some(self.properties.len() - 1),
                }
            }
            (SlotState::Rest { property }, _) => {
                self.taint(property);
                SlotState::Rest { property: None }
            }
            _ => SlotState::Rest { property: None },
        };
    }

    /// A key with no `:` is a shorthand property; its value is never a literal.
    fn finish_property(&mut self) {
        if let SlotState::Colon {
            key,
            key_quote,
            key_offset,
        } = std::mem::replace(&mut self.state, SlotState::Key)
        {
            self.properties.push(Property {
                key,
                key_quote,
                key_offset,
                value: PropertyValue::Other,
            });
        }
    }

    // A literal followed by more tokens is an expression, not a plain value.
    fn taint(&mut self, property: Option<usize>) {
        if let Some(position) = property
            && let Some(entry) = self.properties.get_mut(position)
        {
            entry.value = PropertyValue::Other;
        }
    }
}

fn build_reference(
    properties: &[Property],
    keys: &TemplateFieldKeys,
    lines: &LineIndex,
) -> Option<Result<TemplateExerciseReference, ParseIssue>> {
    let ids: Vec<&Property> = properties.iter().filter(|p| p.key == keys.id).collect();
    let first = ids.first()?;
    Some(build_entry(first, ids.len(), properties, keys, lines))
}

fn build_entry(
    id_property: &Property,
    id_count: usize,
    properties: &[Property],
    keys: &TemplateFieldKeys,
    lines: &LineIndex,
) -> Result<TemplateExerciseReference, ParseIssue> {
    let PropertyValue::Str {
        value: id_value,
        quote: id_quote,
        range: id_range,
    } = &id_property.value
    else {
        let message = match id_property.value {
            PropertyValue::BadEscape => format!("`{}` has an invalid escape sequence", keys.id),
            _ => format!("`{}` is not a string literal", keys.id),
        };
        return Err(ParseIssue {
            line: lines.line_of(id_property.key_offset),
            message,
        });
    };

    let line = lines.line_of(id_range.start);
    let issue = |message: String| ParseIssue { line, message };

    if id_count > 1 {
        return Err(issue(format!("duplicate `{}` property", keys.id)));
    }
    if id_value.trim().is_empty() {
        return Err(issue(format!("`{}` is empty", keys.id)));
    }
    if *id_quote == '`' && id_value.contains("${") {
        return Err(issue(format!("`{}` is an interpolated template literal", keys.id)));
    }

    let insert_at = id_range.end;
    let field = |key: &str| -> Result<(Option<String>, FieldSlot), ParseIssue> {
        let matches: Vec<&Property> = properties.iter().filter(|p| p.key == key).collect();
        match matches.as_slice() {
            [] => Ok((
                None,
                FieldSlot::Absent {
                    insert_at,
                    key: key.to_string(),
                    key_quote: id_property.key_quote,
                    quote: *id_quote,
                },
            )),
            [property] => match &property.value {
                PropertyValue::Str { quote: '`', value, .. } if value.contains("${") => Err(issue(
                    format!("`{key}` is an interpolated template literal"),
                )),
                PropertyValue::Str {
                    value,
                    quote,
                    range,
                } => Ok((
                    Some(value.clone()),
                    FieldSlot::Literal {
                        range: range.clone(),
                        raw: lines.source[range.clone()].to_string(),
                        quote: *quote,
                    },
                )),
                PropertyValue::Null { range } => Ok((
                    None,
                    FieldSlot::Null {
                        range: range.clone(),
                        quote: *id_quote,
                    },
                )),
                PropertyValue::BadEscape => {
                    Err(issue(format!("`{key}` has an invalid escape sequence")))
                }
                PropertyValue::Other => Err(issue(format!(
                    "`{key}` is neither a string literal nor {NULL_SENTINEL}"
                ))),
            },
            _ => Err(issue(format!("duplicate `{key}` property"))),
        }
    };

    let (name, name_slot) = field(&keys.name)?;
    let (media_url, media_slot) = field(&keys.media_url)?;
    let (thumbnail_url, thumbnail_slot) = field(&keys.thumbnail_url)?;

    Ok(TemplateExerciseReference {
        ordinal: 0,
        line,
        current_id: id_value.clone(),
        current_name: name.unwrap_or_default(),
        current_media_url: media_url,
        current_thumbnail_url: thumbnail_url,
        source_span: SourceSpan {
            id: FieldSlot::Literal {
                range: id_range.clone(),
                raw: lines.source[id_range.clone()].to_string(),
                quote: *id_quote,
            },
            name: name_slot,
            media_url: media_slot,
            thumbnail_url: thumbnail_slot,
        },
    })
}

pub(crate) fn slot_start(slot: &FieldSlot) -> usize {
    match slot {
        FieldSlot::Literal { range, .. } | FieldSlot::Null { range, .. } => range.start,
        FieldSlot::Absent { insert_at, .. } => *insert_at,
    }
}

struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .char_indices()
                .filter(|(_, ch)| *ch == '\n')
                .map(|(offset, _)| offset + 1),
        );
        Self { source, starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(line) => line + 1,
            Err(line) => line,
        }
    }
}
