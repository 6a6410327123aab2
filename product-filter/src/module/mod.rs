pub mod area;
pub mod coverage;
pub mod filter;
pub mod orbit;
pub mod registry;
pub mod routing;
pub mod tle;
