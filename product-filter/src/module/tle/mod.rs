mod elements;
mod pattern;
mod selector;

pub use elements::{TwoLineElements, find_elements, read_elements};
pub use pattern::{FilenamePattern, PatternError};
pub use selector::{TleError, TleFile, TleSelection, closest_tle, discover_tle_files, select_tle};
