//! `CityKey` is the cache identifier of a city

use std::fmt::{Display, Formatter};

/// every weather entry lives under this namespace
pub const KEY_PREFIX: &str = "weather";

/// container for the cache key
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CityKey {
    city: String,
}

impl CityKey {
    /// surrounding whitespace is trimmed and the name is lowercased,
    /// so "London", " LONDON " and "london" share one entry.
    /// Inner whitespace and accents are kept as they are.
    #[must_use]
    pub fn new(city: &str) -> Self {
        Self {
            city: city.trim().to_lowercase(),
        }
    }

    /// the folded city name
    #[must_use]
    pub fn city(&self) -> &str {
        &self.city
    }

    /// the main purpose of the `CityKey` is to provide this string.
    #[must_use]
    pub fn format(&self) -> String {
        format!("{KEY_PREFIX}:{}", self.city)
    }
}

impl Display for CityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{KEY_PREFIX}:{}", self.city)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let k = CityKey::new("London");

        assert_eq!(k.format(), "weather:london".to_string());
        assert_eq!(k.to_string(), k.format());
    }

    #[test]
    fn test_case_folds_to_same_key() {
        let names = ["London", "LONDON", "london", "lOnDoN"];

        for name in names {
            assert_eq!(CityKey::new(name), CityKey::new("london"), "{name}");
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        assert_eq!(CityKey::new("  Paris "), CityKey::new("paris"));
        assert_eq!(CityKey::new("Paris\t").format(), "weather:paris");
    }

    #[test]
    fn test_inner_whitespace_is_kept() {
        assert_eq!(CityKey::new("New York").format(), "weather:new york");
        assert_ne!(CityKey::new("New  York"), CityKey::new("New York"));
    }
}
