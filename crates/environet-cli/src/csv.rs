//! `time,value` series files.
//!
//! One observation per line. Blank lines and lines starting with `#` are
//! skipped, as is a leading `time,value` header.

use anyhow::{Context, Result, bail};
use environet_core::upload::DataPoint;

pub fn parse_series(src: &str) -> Result<Vec<DataPoint>> {
  let mut points = Vec::new();
  for (idx, line) in src.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    if points.is_empty() && line.eq_ignore_ascii_case("time,value") {
      continue;
    }
    let Some((time, value)) = line.split_once(',') else {
      bail!("line {}: expected `time,value`, got {line:?}", idx + 1);
    };
    let point = DataPoint::parse(time.trim(), value.trim())
      .with_context(|| format!("line {}", idx + 1))?;
    points.push(point);
  }
  Ok(points)
}

/// Split a `--series symbol=path` argument.
pub fn series_arg(arg: &str) -> Result<(&str, &str)> {
  match arg.split_once('=') {
    Some((symbol, path)) if !symbol.is_empty() && !path.is_empty() => Ok((symbol, path)),
    _ => bail!("expected SYMBOL=FILE, got {arg:?}"),
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  #[test]
  fn reads_points_and_skips_noise() {
    let src = "time,value\n# gauge H001\n\n2024-01-01T00:00:00Z, 12.5\n2024-01-01T01:00:00+01:00,13\n";
    let points = parse_series(src).unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(points, vec![DataPoint::new(t0, 12.5), DataPoint::new(t0, 13.0)]);
  }

  #[test]
  fn reports_the_offending_line() {
    let err = parse_series("2024-01-01T00:00:00Z,1\nnot a row\n").unwrap_err();
    assert!(err.to_string().starts_with("line 2"), "{err}");

    let err = parse_series("2024-01-01T00:00:00Z,abc\n").unwrap_err();
    assert!(err.to_string().starts_with("line 1"), "{err}");
  }

  #[test]
  fn splits_series_arguments() {
    assert_eq!(series_arg("h=level.csv").unwrap(), ("h", "level.csv"));
    assert!(series_arg("h").is_err());
    assert!(series_arg("=level.csv").is_err());
  }
}
