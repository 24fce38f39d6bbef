//! Hierarchical key segments.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::store::KeyPattern;

pub(crate) const DELIMITER: char = ':';

/// A colon-delimited position of a document within a schema.
///
/// A location is a non-empty sequence of segments; the segments themselves
/// never contain `:`. `render` and `from_string` are inverses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    segments: Vec<String>,
}

impl Location {
    /// Builds a location from explicit string segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(Error::invalid("location needs at least one segment"));
        }
        if let Some(bad) = segments.iter().find(|s| s.contains(DELIMITER)) {
            return Err(Error::invalid(format!(
                "location segment {bad:?} contains '{DELIMITER}'"
            )));
        }
        Ok(Self { segments })
    }

    /// Builds a location from integer indices, each rendered in decimal.
    pub fn from_indices<I>(indices: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = i64>,
    {
        Self::from_segments(indices.into_iter().map(|i| i.to_string()))
    }

    /// Parses a rendered location such as `"United States:NY:Rochester"`.
    pub fn from_string(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(Error::invalid("location string is empty"));
        }
        Ok(Self {
            segments: s.split(DELIMITER).map(str::to_owned).collect(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn render(&self) -> String {
        self.segments.join(":")
    }

    /// Whether this location matches `pattern` segment by segment.
    ///
    /// A `*` in a pattern segment matches any run of characters inside that
    /// segment (never across a `:`); every other character matches itself.
    pub fn matches(&self, pattern: &Location) -> bool {
        LocationPattern::new(pattern).is_ok_and(|pattern| pattern.matches(self))
    }

    /// Renders the location as a Redis glob where only `*` is special.
    pub(crate) fn scan_pattern(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            push_escaped(&mut out, segment);
        }
        out
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

/// Checks a schema id before it is used as a key prefix.
pub(crate) fn validate_schema(schema_id: &str) -> Result<(), Error> {
    if schema_id.is_empty() {
        return Err(Error::invalid("schema id is empty"));
    }
    if schema_id.contains(DELIMITER) {
        return Err(Error::invalid(format!(
            "schema id {schema_id:?} contains '{DELIMITER}'"
        )));
    }
    Ok(())
}

/// Appends `text` with the Redis glob metacharacters other than `*` escaped.
fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// The glob handed to `SCAN` for a Find under `schema_id`. The schema part
/// matches verbatim.
pub(crate) fn scan_pattern(schema_id: &str, pattern: &Location) -> Result<String, Error> {
    validate_schema(schema_id)?;
    let mut out = String::new();
    for c in schema_id.chars() {
        if c == '*' {
            out.push('\\');
            out.push(c);
        } else {
            push_escaped(&mut out, c.encode_utf8(&mut [0; 4]));
        }
    }
    out.push(DELIMITER);
    out.push_str(&pattern.scan_pattern());
    Ok(out)
}

/// `schemaId:location`, the key a document is stored under.
pub(crate) fn document_key(schema_id: &str, location: &Location) -> Result<String, Error> {
    validate_schema(schema_id)?;
    Ok(format!("{schema_id}{DELIMITER}{location}"))
}

/// A Find pattern compiled once, one matcher per segment.
pub(crate) struct LocationPattern {
    segments: Vec<KeyPattern>,
}

impl LocationPattern {
    pub(crate) fn new(pattern: &Location) -> Result<Self, Error> {
        let segments = pattern
            .segments
            .iter()
            .map(|segment| {
                let mut glob = String::with_capacity(segment.len());
                push_escaped(&mut glob, segment);
                KeyPattern::new(&glob)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { segments })
    }

    pub(crate) fn matches(&self, location: &Location) -> bool {
        self.segments.len() == location.depth()
            && self
                .segments
                .iter()
                .zip(&location.segments)
                .all(|(pattern, segment)| pattern.is_match(segment))
    }
}
