//! Item sources for a run

use crate::error::{Error, Result};
use std::path::Path;

/// Items fetched when none are given
pub const DEFAULT_ITEMS: &[&str] = &[
    "bulbasaur",
    "ivysaur",
    "venusaur",
    "charmander",
    "charmeleon",
    "charizard",
    "squirtle",
    "wartortle",
    "blastoise",
    "pikachu",
];

/// The built-in item list
pub fn default_items() -> Vec<String> {
    DEFAULT_ITEMS.iter().map(|s| (*s).to_string()).collect()
}

/// Parse an items list: one id per line, `#` starts a comment
///
/// Surrounding whitespace is trimmed and blank lines are skipped. Ids are not
/// validated here; invalid ones fail individually during the run.
pub fn parse_items(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split_once('#').map_or(line, |(before, _)| before).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read an items file
pub fn load_items_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read items file '{}': {}", path.display(), e),
        ))
    })?;
    Ok(parse_items(&content))
}
