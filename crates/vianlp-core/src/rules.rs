//! Domain rule table for wind-farm permitting documents
//!
//! Three named pattern groups: geographic coordinates, turbine equipment and
//! environmental impact phrases.

use crate::matcher::{Matcher, TokenPattern, TokenSpec};
use anyhow::Result;

pub const COORD: &str = "COORD";
pub const TURBINE: &str = "TURBINE";
pub const ENVIRONMENTAL: &str = "ENVIRONMENTAL";

const LATITUDE_WORDS: &[&str] = &["lat", "latitude", "latitudine"];
const TURBINE_MAKERS: &[&str] = &["vestas", "siemens", "gamesa", "nordex"];
const POWER_UNITS: &[&str] = &["mw", "kw"];
const IMPACT_HEADS: &[&str] = &["impatto", "ambientale", "mitigazione"];
const IMPACT_SUBJECTS: &[&str] = &["ambiente", "flora", "fauna", "acustico"];

fn coordinate_patterns() -> Result<Vec<TokenPattern>> {
    Ok(vec![vec![
        TokenSpec::text_regex(r#"\d{1,3}°\d{1,2}'\d{1,2}"[NS]"#)?,
        TokenSpec::lower_in(LATITUDE_WORDS).optional(),
        TokenSpec::text_regex(r#"\d{1,3}°\d{1,2}'\d{1,2}"[EW]"#)?,
    ]])
}

fn turbine_patterns() -> Result<Vec<TokenPattern>> {
    Ok(vec![
        // Manufacturer with optional model code: "Vestas V136"
        vec![
            TokenSpec::lower_in(TURBINE_MAKERS),
            TokenSpec::text_regex(r"[A-Z]\d+")?.optional(),
        ],
        // Rated power: "4.2 MW turbine"
        vec![
            TokenSpec::text_regex(r"\d+(?:\.\d+)?")?,
            TokenSpec::lower_in(POWER_UNITS),
            TokenSpec::lower_eq("turbine").optional(),
        ],
    ])
}

fn environmental_patterns() -> Vec<TokenPattern> {
    vec![vec![
        TokenSpec::lower_in(IMPACT_HEADS),
        TokenSpec::lower_in(IMPACT_SUBJECTS).optional(),
    ]]
}

/// Build the matcher with every rule group registered
pub fn default_matcher() -> Result<Matcher> {
    let mut matcher = Matcher::new();
    matcher.add(COORD, coordinate_patterns()?);
    matcher.add(TURBINE, turbine_patterns()?);
    matcher.add(ENVIRONMENTAL, environmental_patterns());
    Ok(matcher)
}
