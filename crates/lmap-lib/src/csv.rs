//! Delimiter-separated record codec for result artefacts
//!
//! The `.meta` sidecars and `.data` tables use an RFC-4180-derived format
//! with `;` as the delimiter: a field is quoted iff it contains the
//! delimiter, a quote or whitespace, embedded quotes are doubled, and a
//! record ends with a newline. Meta records are key/value shaped (key first,
//! remaining fields are the values). All reads return owned strings and
//! fields are unbounded in size.

use std::io::{self, BufRead, Write};

/// The field delimiter used by all artefact files.
pub const DELIMITER: char = ';';

const QUOTE: char = '"';

fn needs_quoting(field: &str) -> bool {
    field
        .chars()
        .any(|c| c == DELIMITER || c == QUOTE || c.is_whitespace())
}

fn write_field<W: Write>(out: &mut W, field: &str) -> io::Result<()> {
    if !needs_quoting(field) {
        return out.write_all(field.as_bytes());
    }
    let mut quoted = String::with_capacity(field.len() + 2);
    quoted.push(QUOTE);
    for c in field.chars() {
        quoted.push(c);
        if c == QUOTE {
            quoted.push(QUOTE);
        }
    }
    quoted.push(QUOTE);
    out.write_all(quoted.as_bytes())
}

/// Writes one record, quoting fields as needed.
pub fn write_record<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            write!(out, "{DELIMITER}")?;
        }
        write_field(out, field)?;
    }
    writeln!(out)
}

/// Writes a two-field key/value record.
pub fn write_key_value<W: Write>(out: &mut W, key: &str, value: &str) -> io::Result<()> {
    write_record(out, &[key, value])
}

/// Parses one line into its fields.
///
/// Leading whitespace of a field is skipped, a leading quote switches the
/// field into quoted mode where doubled quotes collapse into one. Newlines
/// terminate the record even inside quotes, so line-based splitting is
/// exact.
fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        // skip field-leading whitespace
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut field = String::new();
        let quoted = matches!(chars.peek(), Some(&QUOTE));
        if quoted {
            chars.next();
        }

        // saw_delimiter records whether this field was terminated by the
        // delimiter (more fields follow) or by the end of the line.
        let mut saw_delimiter = false;
        while let Some(c) = chars.next() {
            if quoted {
                if c == QUOTE {
                    match chars.peek() {
                        Some(&QUOTE) => {
                            chars.next();
                            field.push(QUOTE);
                        }
                        _ => {
                            // closing quote: skip to the delimiter or the
                            // end of the line
                            for next in chars.by_ref() {
                                if next == DELIMITER {
                                    saw_delimiter = true;
                                    break;
                                }
                            }
                            break;
                        }
                    }
                } else {
                    field.push(c);
                }
            } else if c == DELIMITER {
                saw_delimiter = true;
                break;
            } else {
                field.push(c);
            }
        }

        fields.push(field);
        if !saw_delimiter {
            break;
        }
        if chars.peek().is_none() {
            // trailing delimiter yields one final empty field
            fields.push(String::new());
            break;
        }
    }

    fields
}

/// Streaming reader over delimiter-separated records.
pub struct RecordReader<R: BufRead> {
    input: R,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Reads the next record; `None` at end of input. Blank lines are
    /// skipped.
    pub fn next_record(&mut self) -> io::Result<Option<Vec<String>>> {
        loop {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() {
                continue;
            }
            return Ok(Some(parse_line(trimmed)));
        }
    }

    /// Reads the next record as a key plus values.
    pub fn next_key_value(&mut self) -> io::Result<Option<(String, Vec<String>)>> {
        match self.next_record()? {
            None => Ok(None),
            Some(mut fields) => {
                if fields.is_empty() {
                    return Ok(None);
                }
                let key = fields.remove(0);
                Ok(Some((key, fields)))
            }
        }
    }
}
