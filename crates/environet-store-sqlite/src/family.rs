//! Table layout per dataset family.
//!
//! Hydro and meteo data live in structurally identical table sets. Every
//! query that touches family data is written once against a
//! [`FamilyTables`] descriptor instead of once per family.

use environet_core::monitoring::DatasetFamily;

/// Table and column names of one dataset family.
///
/// All names are compile-time constants, so interpolating them into SQL text
/// is safe.
#[derive(Debug)]
pub(crate) struct FamilyTables {
  pub family:           DatasetFamily,
  /// Monitoring points, keyed by national code.
  pub points:           &'static str,
  /// Observed properties, keyed by symbol.
  pub properties:       &'static str,
  /// Allow-list linking points to the properties they may report.
  pub point_properties: &'static str,
  pub time_series:      &'static str,
  pub results:          &'static str,
  /// Column referencing `points.id` from the link and series tables.
  pub point_fk:         &'static str,
}

pub(crate) const HYDRO: FamilyTables = FamilyTables {
  family:           DatasetFamily::Hydro,
  points:           "hydropoint",
  properties:       "hydro_observed_property",
  point_properties: "hydropoint_observed_property",
  time_series:      "hydro_time_series",
  results:          "hydro_result",
  point_fk:         "mpoint_id",
};

pub(crate) const METEO: FamilyTables = FamilyTables {
  family:           DatasetFamily::Meteo,
  points:           "meteopoint",
  properties:       "meteo_observed_property",
  point_properties: "meteopoint_observed_property",
  time_series:      "meteo_time_series",
  results:          "meteo_result",
  point_fk:         "meteopoint_id",
};

pub(crate) fn tables(family: DatasetFamily) -> &'static FamilyTables {
  match family {
    DatasetFamily::Hydro => &HYDRO,
    DatasetFamily::Meteo => &METEO,
  }
}
