use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern has no {{name:FORMAT}} timestamp field")]
    MissingTimeField,

    #[error("pattern has more than one timestamp field")]
    MultipleTimeFields,

    #[error("timestamp field is not closed with '}}'")]
    Unterminated,

    #[error("unsupported time directive '%{0}'")]
    UnsupportedDirective(char),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Literal text with `*`/`?` wildcards and exactly one `{name:FORMAT}`
/// field, e.g. `tle-{time:%Y%m%d%H%M}.txt`
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    raw: String,
    regex: Regex,
    time_format: String,
}

impl FilenamePattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut expression = String::from("^");
        let mut time_format = None;
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    if !closed {
                        return Err(PatternError::Unterminated);
                    }
                    if time_format.is_some() {
                        return Err(PatternError::MultipleTimeFields);
                    }

                    let format = field.split_once(':').map_or(field.as_str(), |(_, f)| f);
                    expression.push_str("(?P<time>");
                    expression.push_str(&format_to_regex(format)?);
                    expression.push(')');
                    time_format = Some(format.to_string());
                }
                '*' => expression.push_str(".*"),
                '?' => expression.push('.'),
                other => expression.push_str(&regex::escape(&other.to_string())),
            }
        }
        expression.push('$');

        let time_format = time_format.ok_or(PatternError::MissingTimeField)?;
        Ok(Self {
            raw: raw.to_string(),
            regex: Regex::new(&expression)?,
            time_format,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_match(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }

    /// Reference time embedded in `filename`.
    ///
    /// `None` if the name does not have the pattern's shape or carries an
    /// impossible date. Missing time-of-day components default to zero.
    pub fn parse_time(&self, filename: &str) -> Option<DateTime<Utc>> {
        let captures = self.regex.captures(filename)?;
        let mut text = captures.name("time")?.as_str().to_string();
        let mut format = self.time_format.clone();

        // NaiveDateTime needs at least hour and minute
        if !format.contains("%H") {
            text.push_str(" 00");
            format.push_str(" %H");
        }
        if !format.contains("%M") {
            text.push_str(" 00");
            format.push_str(" %M");
        }

        NaiveDateTime::parse_from_str(&text, &format)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn format_to_regex(format: &str) -> Result<String, PatternError> {
    let mut expression = String::new();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            expression.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        let piece = match chars.next() {
            Some('Y') => r"\d{4}",
            Some('y') | Some('m') | Some('d') | Some('H') | Some('M') | Some('S') => r"\d{2}",
            Some('j') => r"\d{3}",
            Some('%') => "%",
            Some(other) => return Err(PatternError::UnsupportedDirective(other)),
            None => return Err(PatternError::UnsupportedDirective(' ')),
        };
        expression.push_str(piece);
    }

    Ok(expression)
}
