//! Just enough InfluxDB line protocol to write float measurements.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

const MEASUREMENT_DELIMITERS: &[char] = &[',', ' '];
const KEY_DELIMITERS: &[char] = &[',', '=', ' '];

/// A single point: measurement, tags, float fields and an optional
/// timestamp in nanoseconds since the UNIX epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    // Keeping the tags sorted improves performance on the server side
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, f64>,
    timestamp: Option<i64>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Sets a tag, replacing any existing tag of the same name.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets a field, replacing any existing field of the same name.
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn timestamp(mut self, nanos: i64) -> Self {
        self.timestamp = Some(nanos);
        self
    }
}

struct Escaped<'a>(&'a str, &'static [char]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Line breaks and tabs are written as two-character escapes so a
        // value can never end the line early.
        for c in self.0.chars() {
            match c {
                '\n' => f.write_str(r"\n")?,
                '\r' => f.write_str(r"\r")?,
                '\t' => f.write_str(r"\t")?,
                c if self.1.contains(&c) => write!(f, r"\{c}")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Escaped(&self.measurement, MEASUREMENT_DELIMITERS))?;

        // Empty tag values are not allowed by the protocol.
        for (k, v) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            write!(
                f,
                ",{}={}",
                Escaped(k, KEY_DELIMITERS),
                Escaped(v, KEY_DELIMITERS)
            )?;
        }

        for (i, (k, v)) in self.fields.iter().enumerate() {
            let d = if i == 0 { " " } else { "," };
            write!(f, "{}{}={}", d, Escaped(k, KEY_DELIMITERS), v)?;
        }

        if let Some(ts) = self.timestamp {
            write!(f, " {ts}")?;
        }

        Ok(())
    }
}
