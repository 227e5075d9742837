//! Helper functions for deserializing external types.

use std::{path::PathBuf, str::FromStr};

use log::LevelFilter;
use serde::{Deserialize, Deserializer, de};

//------------ LevelFilter ---------------------------------------------------

pub fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//------------ Module Path ---------------------------------------------------

/// Deserializes an optional module path, treating an empty string as unset.
pub fn de_module_path<'de, D>(d: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let string = Option::<String>::deserialize(d)?;
    Ok(string.filter(|s| !s.is_empty()).map(PathBuf::from))
}
