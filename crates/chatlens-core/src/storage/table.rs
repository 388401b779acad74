//! Delimited tabular outputs shared between stages and the reporting layer.

use std::fs;
use std::path::Path;

use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Serialize;

use crate::error::CoreError;

/// Captures the field list a derived `Deserialize` impl asks for.
struct FieldCollector<'a> {
    fields: &'a mut Option<&'static [&'static str]>,
}

impl<'de> Deserializer<'de> for FieldCollector<'_> {
    type Error = de::value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(de::Error::custom("row type is not a struct"))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        *self.fields = Some(fields);
        Err(de::Error::custom("fields collected"))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

/// Column names of a struct row type.
fn column_names<T: DeserializeOwned>() -> Option<&'static [&'static str]> {
    let mut fields = None;
    // Always errors; only the captured field list matters.
    let _ = T::deserialize(FieldCollector {
        fields: &mut fields,
    });
    fields
}

/// Write `rows` as a headed CSV file, replacing any previous file.
///
/// An empty slice still writes the header row, so every table keeps its
/// column set; [`read_rows`] reads it back as zero rows.
pub fn write_rows<T>(path: &Path, rows: &[T]) -> Result<usize, CoreError>
where
    T: Serialize + DeserializeOwned,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    if rows.is_empty() {
        if let Some(columns) = column_names::<T>() {
            writer.write_record(columns)?;
        }
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "Wrote table");
    Ok(rows.len())
}

/// Read every row of a headed CSV file written by [`write_rows`].
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    if !path.exists() {
        return Err(CoreError::MissingTable(path.display().to_string()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: f64,
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rows.csv");
        let rows = vec![
            Row {
                name: "a, with comma".into(),
                value: 0.1,
            },
            Row {
                name: "b".into(),
                value: 2.0,
            },
        ];
        assert_eq!(write_rows(&path, &rows).unwrap(), 2);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("name,value\n"));
        assert_eq!(read_rows::<Row>(&path).unwrap(), rows);
    }

    #[test]
    fn test_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_rows::<Row>(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, CoreError::MissingTable(_)));
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        assert_eq!(write_rows::<Row>(&path, &[]).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "name,value\n");

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, ["name", "value"]);
        assert!(read_rows::<Row>(&path).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let rows = vec![Row {
            name: "x".into(),
            value: 1.0 / 3.0,
        }];
        write_rows(&path, &rows).unwrap();
        let first = fs::read(&path).unwrap();
        write_rows(&path, &rows).unwrap();
        assert_eq!(first, fs::read(&path).unwrap());
    }
}
