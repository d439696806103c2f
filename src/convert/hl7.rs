//! convert::hl7
//!
//! Pipe-delimited clinical message parsing.
//!
//! # Format
//!
//! A message is a sequence of segments separated by carriage returns (line
//! feeds are tolerated). Every segment starts with a three character id. The
//! first segment must be `MSH`, which declares the delimiters:
//!
//! ```text
//! MSH|^~\&|SENDING_APP|...
//!    ^^^^^
//!    |||||
//!    ||||+- subcomponent separator
//!    |||+-- escape character
//!    ||+--- repetition separator
//!    |+---- component separator
//!    +----- field separator (MSH-1)
//! ```
//!
//! Field numbers are 1-based. In `MSH` the field separator itself is field 1
//! and the encoding characters are field 2, so the raw split is shifted by
//! one relative to every other segment.
//!
//! Only the first repetition of a repeating field is addressable.

use thiserror::Error;

/// Errors from message parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("message is empty")]
    Empty,

    #[error("message must start with an MSH segment")]
    MissingHeader,

    #[error("MSH segment is too short to declare delimiters")]
    InvalidDelimiters,

    #[error("invalid segment id '{id}' on line {line}")]
    InvalidSegment { id: String, line: usize },
}

/// Delimiters declared by the MSH segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

/// One segment: its id and its raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    fields: Vec<String>,
}

/// Coordinates of a value inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Segment id, e.g. `PID`
    pub segment: String,
    /// 1-based occurrence of the segment
    pub occurrence: usize,
    /// 1-based field number
    pub field: usize,
    /// 1-based component number
    pub component: Option<usize>,
    /// 1-based subcomponent number
    pub subcomponent: Option<usize>,
}

/// Result of looking a locator up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The segment exists; the value may be empty.
    Value {
        /// Index of the segment within the message
        segment_index: usize,
        /// Decoded value
        value: String,
    },
    /// No such segment occurrence in the message.
    MissingSegment,
}

/// A parsed message.
#[derive(Debug, Clone)]
pub struct Message {
    delimiters: Delimiters,
    segments: Vec<Segment>,
}

impl Message {
    /// Parse message text.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let lines: Vec<(usize, &str)> = text
            .split(['\r', '\n'])
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim_end()))
            .filter(|(_, line)| !line.is_empty())
            .collect();

        let (_, header) = lines.first().ok_or(ParseError::Empty)?;
        if !header.starts_with("MSH") {
            return Err(ParseError::MissingHeader);
        }
        let delimiters = parse_delimiters(header)?;

        let mut segments = Vec::with_capacity(lines.len());
        for (line_no, line) in lines {
            let id: String = line.chars().take(3).collect();
            let valid = id.len() == 3
                && id
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
                && id.starts_with(|c: char| c.is_ascii_uppercase())
                && line[3..].chars().next().map_or(true, |c| c == delimiters.field);
            if !valid {
                return Err(ParseError::InvalidSegment { id, line: line_no });
            }

            let fields = line
                .split(delimiters.field)
                .skip(1)
                .map(str::to_string)
                .collect();
            segments.push(Segment { id, fields });
        }

        Ok(Self {
            delimiters,
            segments,
        })
    }

    pub fn delimiters(&self) -> Delimiters {
        self.delimiters
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Look up a value.
    pub fn lookup(&self, locator: &Locator) -> Lookup {
        let found = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.id == locator.segment)
            .nth(locator.occurrence.saturating_sub(1));

        let (segment_index, segment) = match found {
            Some(found) => found,
            None => return Lookup::MissingSegment,
        };

        Lookup::Value {
            segment_index,
            value: self.field_value(segment, locator),
        }
    }

    fn field_value(&self, segment: &Segment, locator: &Locator) -> String {
        let d = &self.delimiters;
        let is_header = segment.id == "MSH";

        if is_header && locator.field == 1 {
            return d.field.to_string();
        }
        if is_header && locator.field == 2 {
            return segment.fields.first().cloned().unwrap_or_default();
        }

        let index = match (is_header, locator.field) {
            (_, 0) => return String::new(),
            (true, n) => n - 2,
            (false, n) => n - 1,
        };
        let raw = match segment.fields.get(index) {
            Some(raw) => raw.as_str(),
            None => return String::new(),
        };

        let repetition = raw.split(d.repetition).next().unwrap_or("");
        let component = match locator.component {
            Some(c) => match nth_part(repetition, d.component, c) {
                Some(part) => part,
                None => return String::new(),
            },
            None => repetition,
        };
        let value = match locator.subcomponent {
            Some(s) => match nth_part(component, d.subcomponent, s) {
                Some(part) => part,
                None => return String::new(),
            },
            None => component,
        };

        self.unescape(value)
    }

    /// Decode escape sequences. Unknown sequences are kept verbatim.
    pub fn unescape(&self, value: &str) -> String {
        let d = &self.delimiters;
        if !value.contains(d.escape) {
            return value.to_string();
        }

        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find(d.escape) {
            out.push_str(&rest[..start]);
            let after = &rest[start + d.escape.len_utf8()..];
            let end = match after.find(d.escape) {
                Some(end) => end,
                None => {
                    out.push_str(&rest[start..]);
                    return out;
                }
            };
            let decoded = match &after[..end] {
                "F" => Some(d.field),
                "S" => Some(d.component),
                "T" => Some(d.subcomponent),
                "R" => Some(d.repetition),
                "E" => Some(d.escape),
                _ => None,
            };
            match decoded {
                Some(c) => out.push(c),
                None => {
                    out.push(d.escape);
                    out.push_str(&after[..end]);
                    out.push(d.escape);
                }
            }
            rest = &after[end + d.escape.len_utf8()..];
        }
        out.push_str(rest);
        out
    }
}

fn nth_part(value: &str, separator: char, n: usize) -> Option<&str> {
    if n == 0 {
        return None;
    }
    value.split(separator).nth(n - 1)
}

fn parse_delimiters(header: &str) -> Result<Delimiters, ParseError> {
    let mut chars = header.chars().skip(3);
    let field = chars.next().ok_or(ParseError::InvalidDelimiters)?;
    let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();
    if encoding.is_empty() {
        return Err(ParseError::InvalidDelimiters);
    }

    let defaults = Delimiters::default();
    Ok(Delimiters {
        field,
        component: encoding.first().copied().unwrap_or(defaults.component),
        repetition: encoding.get(1).copied().unwrap_or(defaults.repetition),
        escape: encoding.get(2).copied().unwrap_or(defaults.escape),
        subcomponent: encoding.get(3).copied().unwrap_or(defaults.subcomponent),
    })
}
