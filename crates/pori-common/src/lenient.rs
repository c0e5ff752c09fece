//! Lenient deserializers for tabular input
//!
//! Variant rows are usually exported from spreadsheets or data frames, so numbers
//! may arrive as strings, booleans as `"True"`, and blank cells as empty strings.
//! Every helper here must be paired with `#[serde(default)]` so missing columns work.

use serde::{Deserialize, Deserializer, de::Error};
use serde_json::Value;

/// `null` becomes the type's default value
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Strings, numbers and booleans are accepted; blank cells become `None`
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(D::Error::custom(format!(
                "expected a string value, got {}",
                other
            )));
        }
    })
}

/// Like [`opt_string`] but blank becomes the empty string
pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string(deserializer)?.unwrap_or_default())
}

/// Integers, whole floats (`5.0`) and numeric strings are accepted
pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(Some(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
                _ => Err(D::Error::custom(format!("expected an integer, got {}", n))),
            }
        }
        Some(Value::String(s)) => parse_int(&s).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!(
            "expected an integer, got {}",
            other
        ))),
    }
}

/// Booleans, `"true"`/`"false"` style strings and `0`/`1` are accepted
pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(D::Error::custom(format!("expected a boolean, got {}", n))),
        },
        Some(Value::String(s)) => parse_bool(&s).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!(
            "expected a boolean, got {}",
            other
        ))),
    }
}

/// Parse a spreadsheet cell as an integer, `""` is `None`
pub fn parse_int(raw: &str) -> Result<Option<i64>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Some(i));
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
        _ => Err(format!("expected an integer, got '{}'", raw)),
    }
}

/// Parse a spreadsheet cell as a boolean, `""` is `None`
pub fn parse_bool(raw: &str) -> Result<Option<bool>, String> {
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "true" | "t" | "yes" | "y" | "1" => Ok(Some(true)),
        "false" | "f" | "no" | "n" | "0" => Ok(Some(false)),
        _ => Err(format!("expected a boolean, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(default, deserialize_with = "opt_i64")]
        exon: Option<i64>,
        #[serde(default, deserialize_with = "opt_bool")]
        germline: Option<bool>,
        #[serde(default, deserialize_with = "opt_string")]
        chromosome: Option<String>,
        #[serde(default, deserialize_with = "string")]
        gene: String,
    }

    #[test]
    fn test_spreadsheet_cells() {
        let row: Row = serde_json::from_value(json!({
            "exon": "5.0",
            "germline": "True",
            "chromosome": 7,
            "gene": null,
        }))
        .unwrap();
        assert_eq!(row.exon, Some(5));
        assert_eq!(row.germline, Some(true));
        assert_eq!(row.chromosome.as_deref(), Some("7"));
        assert_eq!(row.gene, "");
    }

    #[test]
    fn test_blank_cells_and_missing_columns() {
        let row: Row = serde_json::from_value(json!({"exon": "", "germline": ""})).unwrap();
        assert_eq!(row.exon, None);
        assert_eq!(row.germline, None);
        assert_eq!(row.chromosome, None);
    }

    #[test]
    fn test_rejects_fractional_integer() {
        let result: Result<Row, _> = serde_json::from_value(json!({"exon": 2.5}));
        assert!(result.is_err());
        assert!(parse_int("abc").is_err());
        assert!(parse_bool("maybe").is_err());
    }
}
