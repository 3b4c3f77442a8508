//! Semantic resolution of national codes and property symbols.
//!
//! Plain synchronous functions over a [`rusqlite::Connection`] so the same
//! lookups serve both the read-only trait methods and the upload transaction,
//! where they run on the transaction's connection.

use environet_core::monitoring::DatasetFamily;
use rusqlite::{Connection, OptionalExtension as _};

use crate::{
  encode::{RawPoint, RawProperty},
  family::tables,
};

/// Find a point by national code, trying each family in resolution order.
/// The first family holding the code wins.
pub(crate) fn find_point(conn: &Connection, ncd: &str) -> rusqlite::Result<Option<RawPoint>> {
  for family in DatasetFamily::RESOLUTION_ORDER {
    let t = tables(family);
    let found = conn
      .query_row(
        &format!("SELECT {} FROM {} WHERE ncd = ?1", RawPoint::COLUMNS, t.points),
        rusqlite::params![ncd],
        |row| RawPoint::from_row(family, row),
      )
      .optional()?;
    if found.is_some() {
      return Ok(found);
    }
  }
  Ok(None)
}

/// Find a property by symbol through the point's allow-list. A symbol that
/// exists in the family but is not linked to the point is not found.
pub(crate) fn find_point_property(
  conn: &Connection,
  family: DatasetFamily,
  point_id: i64,
  symbol: &str,
) -> rusqlite::Result<Option<RawProperty>> {
  let t = tables(family);
  conn
    .query_row(
      &format!(
        "SELECT p.id, p.symbol, p.description, p.unit, p.kind
         FROM {properties} p
         JOIN {links} l ON l.observed_property_id = p.id
         WHERE l.{fk} = ?1 AND p.symbol = ?2",
        properties = t.properties,
        links = t.point_properties,
        fk = t.point_fk,
      ),
      rusqlite::params![point_id, symbol],
      |row| RawProperty::from_row(family, row),
    )
    .optional()
}
