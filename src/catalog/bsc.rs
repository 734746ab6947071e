//! Bright Star Catalogue records in JSON form.
//!
//! Each record is an object with string fields: `HR` (catalog number), `N` (proper
//! name, optional), `RA` (`"10h 22m 19.7s"`), `Dec` (`"+41° 29′ 58″"`), `V` (visual
//! magnitude). Numeric `HR`/`V` values and decimal-degree `RA`/`Dec` are accepted too.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::CatalogStar;

#[derive(Deserialize)]
struct BscRecord {
    #[serde(rename = "HR")]
    hr: Option<Value>,
    #[serde(rename = "N")]
    name: Option<String>,
    #[serde(rename = "RA")]
    ra: Option<Value>,
    #[serde(rename = "Dec")]
    dec: Option<Value>,
    #[serde(rename = "V")]
    magnitude: Option<Value>,
}

/// Parse a JSON array of BSC records. Malformed records are skipped with a warning.
pub fn parse_bsc_json(json: &str) -> Result<Vec<CatalogStar>> {
    let records: Vec<Value> =
        serde_json::from_str(json).context("Catalog is not a JSON array of records")?;

    let mut stars = Vec::with_capacity(records.len());
    for (i, raw) in records.into_iter().enumerate() {
        match parse_record(raw) {
            Ok(star) => stars.push(star),
            Err(e) => warn!(record = i, "Skipping catalog record: {:#}", e),
        }
    }
    debug!(stars = stars.len(), "Parsed BSC catalog");
    Ok(stars)
}

/// Read and parse a BSC JSON file.
pub fn load_bsc_json<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogStar>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    parse_bsc_json(&json).with_context(|| format!("Failed to parse catalog {}", path.display()))
}

fn parse_record(raw: Value) -> Result<CatalogStar> {
    let rec: BscRecord = serde_json::from_value(raw).context("Unexpected record shape")?;

    let id = match rec.hr {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .and_then(|n| u32::try_from(n).ok())
    .ok_or_else(|| anyhow!("missing or invalid HR number"))?;

    let ra_deg = match rec.ra {
        Some(Value::String(s)) => sexagesimal(&s)? * 15.0,
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("invalid RA"))?,
        _ => bail!("HR {}: missing RA", id),
    };
    let dec_deg = match rec.dec {
        Some(Value::String(s)) => sexagesimal(&s)?,
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("invalid Dec"))?,
        _ => bail!("HR {}: missing Dec", id),
    };
    if !(0.0..360.0).contains(&ra_deg) || !(-90.0..=90.0).contains(&dec_deg) {
        bail!("HR {}: coordinates out of range ({}, {})", id, ra_deg, dec_deg);
    }

    let magnitude = match rec.magnitude {
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
    .filter(|m| m.is_finite())
    .ok_or_else(|| anyhow!("HR {}: missing or invalid magnitude", id))?;

    let name = rec
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("HR {}", id));

    Ok(CatalogStar {
        id,
        name,
        ra: ra_deg.to_radians(),
        dec: dec_deg.to_radians(),
        magnitude,
    })
}

/// `"10h 22m 19.7s"` → 10.372..., `"-05° 30′ 00″"` → -5.5.
fn sexagesimal(s: &str) -> Result<f64> {
    let trimmed = s.trim_start();
    let negative = trimmed.starts_with('-') || trimmed.starts_with('\u{2212}');

    let mut parts = [0.0_f64; 3];
    let mut count = 0;
    for token in trimmed
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|t| !t.is_empty())
    {
        if count == parts.len() {
            bail!("too many fields in {:?}", s);
        }
        parts[count] = token
            .parse::<f64>()
            .with_context(|| format!("bad number {:?} in {:?}", token, s))?;
        count += 1;
    }
    if count == 0 {
        bail!("no numeric fields in {:?}", s);
    }
    if parts[1] >= 60.0 || parts[2] >= 60.0 {
        bail!("minutes/seconds out of range in {:?}", s);
    }

    let value = parts[0] + parts[1] / 60.0 + parts[2] / 3600.0;
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sexagesimal() {
        assert_relative_eq!(sexagesimal("10h 22m 19.7s").unwrap(), 10.0 + 22.0 / 60.0 + 19.7 / 3600.0);
        assert_relative_eq!(sexagesimal("+41° 29′ 58″").unwrap(), 41.0 + 29.0 / 60.0 + 58.0 / 3600.0);
        assert_relative_eq!(sexagesimal("-05 30 00").unwrap(), -5.5);
        assert_relative_eq!(sexagesimal("\u{2212}00° 30′ 00″").unwrap(), -0.5);
        assert!(sexagesimal("north").is_err());
        assert!(sexagesimal("10h 75m 0s").is_err());
    }

    #[test]
    fn test_parse_fixture() {
        let stars = parse_bsc_json(crate::test_utils::URSA_MAJOR_JSON).unwrap();
        assert_eq!(stars.len(), 14);

        let dubhe = stars.iter().find(|s| s.id == 4301).unwrap();
        assert_eq!(dubhe.name, "Dubhe");
        assert_relative_eq!(dubhe.magnitude, 1.79);
        assert_relative_eq!(
            dubhe.ra.to_degrees(),
            (11.0 + 3.0 / 60.0 + 43.7 / 3600.0) * 15.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            dubhe.dec.to_degrees(),
            61.0 + 45.0 / 60.0 + 3.0 / 3600.0,
            epsilon = 1e-9
        );

        // No proper name in the record
        let unnamed = stars.iter().find(|s| s.id == 3757).unwrap();
        assert_eq!(unnamed.name, "HR 3757");
    }

    #[test]
    fn test_malformed_records_skipped() {
        let json = r#"[
            { "HR": 1, "N": "Good", "RA": "00h 05m 09.9s", "Dec": "+45° 13′ 45″", "V": "6.70" },
            { "HR": "2", "RA": "garbage", "Dec": "+45° 13′ 45″", "V": "6.70" },
            { "N": "No number", "RA": "00h 05m 09.9s", "Dec": "+45° 13′ 45″", "V": "6.70" },
            { "HR": "4", "RA": "00h 05m 09.9s", "Dec": "-00° 30′ 00″", "V": 5.5 },
            "not an object"
        ]"#;
        let stars = parse_bsc_json(json).unwrap();
        assert_eq!(stars.len(), 2);
        assert_eq!(stars[0].id, 1);
        assert_eq!(stars[1].name, "HR 4");
        assert_relative_eq!(stars[1].dec.to_degrees(), -0.5, epsilon = 1e-12);
        assert_relative_eq!(stars[1].magnitude, 5.5);
    }

    #[test]
    fn test_not_an_array() {
        assert!(parse_bsc_json("{\"HR\": 1}").is_err());
    }
}
