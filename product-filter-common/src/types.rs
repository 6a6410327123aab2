use std::convert::Infallible;

/// Satellite platform named in a granule notification.
///
/// Only the Metop series carries the single-letter code used in output
/// filenames. Any other code is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    MetopA,
    MetopB,
    MetopC,
    Other(String),
}

impl Platform {
    /// Resolve a raw satellite code from a message ("METOPB", "metopb", "Metop-B")
    pub fn resolve(code: &str) -> Self {
        let normalized: String = code
            .chars()
            .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "metopa" => Platform::MetopA,
            "metopb" => Platform::MetopB,
            "metopc" => Platform::MetopC,
            _ => Platform::Other(code.to_string()),
        }
    }

    /// Canonical platform name, as it appears in TLE files (case aside)
    pub fn name(&self) -> &str {
        match self {
            Platform::MetopA => "Metop-A",
            Platform::MetopB => "Metop-B",
            Platform::MetopC => "Metop-C",
            Platform::Other(name) => name,
        }
    }

    /// Letter used in canonical output filenames
    pub fn short_code(&self) -> Option<char> {
        match self {
            Platform::MetopA => Some('a'),
            Platform::MetopB => Some('b'),
            Platform::MetopC => Some('c'),
            Platform::Other(_) => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Platform {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Platform::resolve(s))
    }
}

/// Instrument that produced a granule.
///
/// Iasi and Ascat have fixed output filename templates; everything else
/// keeps its source filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instrument {
    Iasi,
    Ascat,
    Other(String),
}

impl Instrument {
    pub fn as_str(&self) -> &str {
        match self {
            Instrument::Iasi => "iasi",
            Instrument::Ascat => "ascat",
            Instrument::Other(name) => name,
        }
    }

    /// Nominal granule length, used when a message carries no end time
    pub fn default_pass_seconds(&self) -> i64 {
        match self {
            Instrument::Iasi => 3 * 60,
            Instrument::Ascat => 15 * 60,
            Instrument::Other(_) => 3 * 60,
        }
    }

    /// Case-insensitive identity check against a raw identifier
    pub fn matches(&self, raw: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(raw.trim())
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Instrument {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Ok(match lowered.as_str() {
            "iasi" => Instrument::Iasi,
            "ascat" => Instrument::Ascat,
            _ => Instrument::Other(lowered),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_aliases() {
        assert_eq!(Platform::resolve("METOPA"), Platform::MetopA);
        assert_eq!(Platform::resolve("metopb"), Platform::MetopB);
        assert_eq!(Platform::resolve("Metop-C"), Platform::MetopC);
        assert_eq!(Platform::resolve("METOPB").name(), "Metop-B");
        assert_eq!(Platform::resolve("metopc").short_code(), Some('c'));
    }

    #[test]
    fn test_platform_passthrough() {
        let platform = Platform::resolve("NOAA-20");
        assert_eq!(platform, Platform::Other("NOAA-20".to_string()));
        assert_eq!(platform.name(), "NOAA-20");
        assert_eq!(platform.short_code(), None);
    }

    #[test]
    fn test_instrument_parse() {
        assert_eq!("IASI".parse::<Instrument>().unwrap(), Instrument::Iasi);
        assert_eq!("ascat".parse::<Instrument>().unwrap(), Instrument::Ascat);
        assert_eq!(
            "AVHRR".parse::<Instrument>().unwrap(),
            Instrument::Other("avhrr".to_string())
        );
        assert!(Instrument::Iasi.matches(" Iasi "));
        assert!(!Instrument::Iasi.matches("avhrr"));
    }

    #[test]
    fn test_default_pass_seconds() {
        assert_eq!(Instrument::Iasi.default_pass_seconds(), 180);
        assert_eq!(Instrument::Ascat.default_pass_seconds(), 900);
    }
}
