//! Key/value text to column table.
//!
//! GEO SOFT and series-matrix files are line oriented: a line starting with
//! `!` carries a metadata key followed by one value per sample, and the
//! `ID_REF` header line names the data columns. Everything else (entity
//! lines, data rows, comments) has no key and is skipped.
//!
//! Keys repeat freely in these files, so a repeated key is renamed
//! `key-2`, `key-3`, ... in the order it was seen. Short rows are padded by
//! repeating their first value, which turns single-value metadata into a
//! per-sample column. That padding is lossy for genuinely sparse rows.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use serde::ser::{Serialize, SerializeMap, Serializer};

pub const ID_REF: &str = "ID_REF";
const KEY_MARKER: char = '!';
const DELIMITER: char = '\t';
const SOFT_ASSIGN: &str = " = ";

/// Column name to values, in first-seen column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedRecord {
    columns: Vec<(String, Vec<String>)>,
}

impl NormalizedRecord {
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Length of the longest column.
    pub fn row_count(&self) -> usize {
        self.columns
            .iter()
            .map(|(_, values)| values.len())
            .max()
            .unwrap_or(0)
    }
}

impl Serialize for NormalizedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, values) in &self.columns {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// One text blob or several, normalized as a single pass.
#[derive(Debug, Clone)]
pub enum RawTexts<'a> {
    One(Cow<'a, str>),
    Many(Vec<Cow<'a, str>>),
}

impl<'a> RawTexts<'a> {
    fn blobs(&self) -> Vec<&str> {
        match self {
            RawTexts::One(text) => vec![text.as_ref()],
            RawTexts::Many(texts) => texts.iter().map(|t| t.as_ref()).collect(),
        }
    }
}

impl<'a> From<&'a str> for RawTexts<'a> {
    fn from(value: &'a str) -> Self {
        RawTexts::One(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a String> for RawTexts<'a> {
    fn from(value: &'a String) -> Self {
        RawTexts::One(Cow::Borrowed(value.as_str()))
    }
}

impl From<String> for RawTexts<'static> {
    fn from(value: String) -> Self {
        RawTexts::One(Cow::Owned(value))
    }
}

impl From<Vec<String>> for RawTexts<'static> {
    fn from(value: Vec<String>) -> Self {
        RawTexts::Many(value.into_iter().map(Cow::Owned).collect())
    }
}

impl<'a> From<Vec<&'a str>> for RawTexts<'a> {
    fn from(value: Vec<&'a str>) -> Self {
        RawTexts::Many(value.into_iter().map(Cow::Borrowed).collect())
    }
}

impl<'a> From<&'a [&'a str]> for RawTexts<'a> {
    fn from(value: &'a [&'a str]) -> Self {
        RawTexts::Many(value.iter().map(|t| Cow::Borrowed(*t)).collect())
    }
}

impl<'a> From<&'a [String]> for RawTexts<'a> {
    fn from(value: &'a [String]) -> Self {
        RawTexts::Many(value.iter().map(|t| Cow::Borrowed(t.as_str())).collect())
    }
}

/// Builds a record from one or many raw text blobs.
pub fn normalize<'a>(input: impl Into<RawTexts<'a>>, pad_short_rows: bool) -> NormalizedRecord {
    let input = input.into();
    let mut builder = RecordBuilder::default();
    for blob in input.blobs() {
        for line in blob.lines().filter(|line| !line.trim().is_empty()) {
            let cells: Vec<&str> = line.split(DELIMITER).collect();
            builder.accept(&cells);
        }
    }
    builder.finish(pad_short_rows)
}

/// Builds a record from rows that are already split into cells.
pub fn normalize_rows<I, R, S>(rows: I, pad_short_rows: bool) -> NormalizedRecord
where
    I: IntoIterator<Item = R>,
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    let mut builder = RecordBuilder::default();
    for row in rows {
        let cells: Vec<&str> = row.as_ref().iter().map(|c| c.as_ref()).collect();
        builder.accept(&cells);
    }
    builder.finish(pad_short_rows)
}

/// Splits a row into its column name and values. Rows without a key give `None`.
pub fn extract_key(cells: &[&str]) -> Option<(String, Vec<String>)> {
    let (first, rest) = cells.split_first()?;
    let first = clean_cell(first);
    let mut values: Vec<String> = rest.iter().map(|cell| clean_cell(cell).to_string()).collect();

    let name = if let Some(key) = first.strip_prefix(KEY_MARKER) {
        // SOFT attribute lines carry their value inline: `!Sample_title = foo`.
        match key.split_once(SOFT_ASSIGN) {
            Some((key, inline)) => {
                values.insert(0, clean_cell(inline).to_string());
                key.trim().to_string()
            }
            None => key.trim().to_string(),
        }
    } else if first.eq_ignore_ascii_case(ID_REF) {
        ID_REF.to_string()
    } else {
        return None;
    };

    if name.is_empty() {
        return None;
    }
    Some((name, values))
}

fn clean_cell(cell: &str) -> &str {
    let trimmed = cell.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

#[derive(Default)]
struct RecordBuilder {
    columns: Vec<(String, Vec<String>)>,
    taken: HashSet<String>,
    collisions: HashMap<String, usize>,
    max_len: usize,
}

impl RecordBuilder {
    fn accept(&mut self, cells: &[&str]) {
        let Some((name, values)) = extract_key(cells) else {
            return;
        };
        if values.iter().all(|value| value.is_empty()) {
            return;
        }
        let name = self.unique_name(name);
        self.max_len = self.max_len.max(values.len());
        self.columns.push((name, values));
    }

    fn unique_name(&mut self, name: String) -> String {
        if self.taken.insert(name.clone()) {
            return name;
        }
        let counter = self.collisions.entry(name.clone()).or_insert(1);
        loop {
            *counter += 1;
            let candidate = format!("{name}-{counter}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn finish(mut self, pad_short_rows: bool) -> NormalizedRecord {
        if pad_short_rows {
            let target = self.max_len;
            for (_, values) in &mut self.columns {
                if let Some(first) = values.first().cloned() {
                    values.resize(target, first);
                }
            }
        }
        NormalizedRecord {
            columns: self.columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_extraction_rules() {
        let (name, values) = extract_key(&["!Sample_title", "\"a\"", "\"b\""]).unwrap();
        assert_eq!(name, "Sample_title");
        assert_eq!(values, vec!["a", "b"]);

        let (name, _) = extract_key(&["id_ref", "GSM1"]).unwrap();
        assert_eq!(name, "ID_REF");

        assert!(extract_key(&["1007_s_at", "5.1"]).is_none());
        assert!(extract_key(&["^SAMPLE = GSM1"]).is_none());
    }

    #[test]
    fn soft_attribute_line() {
        let (name, values) = extract_key(&["!Sample_title = liver rep1"]).unwrap();
        assert_eq!(name, "Sample_title");
        assert_eq!(values, vec!["liver rep1"]);
    }

    #[test]
    fn collision_counter_skips_existing_names() {
        let text = "!a\tx\n!a-2\ty\n!a\tz\n";
        let record = normalize(text, false);
        let names: Vec<&str> = record.column_names().collect();
        assert_eq!(names, vec!["a", "a-2", "a-3"]);
    }
}
