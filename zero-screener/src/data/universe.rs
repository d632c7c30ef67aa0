//! Candidate instrument universe.
//!
//! Built statically from exchange board prefixes; no listing endpoint is
//! consulted. Codes that are not actually listed simply get no quote.

/// Shanghai main board and STAR market prefixes.
pub const SSE_PREFIXES: &[&str] = &["600", "601", "602", "603", "605", "688"];

/// Shenzhen main board, SME and ChiNext prefixes.
pub const SZSE_PREFIXES: &[&str] = &["000", "001", "002", "003", "300", "301"];

/// Ordered, duplicate-free list of bare instrument codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Universe {
    codes: Vec<String>,
}

impl Universe {
    /// Every `<prefix>000..=<prefix>999` code for the given prefixes.
    pub fn from_prefixes(prefixes: &[&str]) -> Self {
        Self::from_codes(
            prefixes
                .iter()
                .flat_map(|prefix| (0..1000).map(move |n| format!("{prefix}{n:03}"))),
        )
    }

    /// Full A-share universe (SSE + SZSE), 12,000 codes.
    pub fn a_share() -> Self {
        let prefixes: Vec<&str> = SSE_PREFIXES.iter().chain(SZSE_PREFIXES).copied().collect();
        Self::from_prefixes(&prefixes)
    }

    /// Universe from explicit codes, keeping first occurrence order.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = std::collections::HashSet::new();
        let codes = codes
            .into_iter()
            .map(Into::into)
            .filter(|code: &String| !code.is_empty() && seen.insert(code.clone()))
            .collect();
        Self { codes }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a_share_universe_size() {
        let universe = Universe::a_share();
        assert_eq!(universe.len(), 12_000);
        assert_eq!(universe.codes()[0], "600000");
        assert!(universe.codes().contains(&"688981".to_string()));
        assert!(universe.codes().contains(&"300750".to_string()));
        assert_eq!(universe.codes().last().map(String::as_str), Some("301999"));
    }

    #[test]
    fn test_from_prefixes() {
        let universe = Universe::from_prefixes(&["605"]);
        assert_eq!(universe.len(), 1000);
        assert!(universe.codes().iter().all(|c| c.len() == 6 && c.starts_with("605")));
    }

    #[test]
    fn test_from_codes_dedup() {
        let universe = Universe::from_codes(["A", "B", "A", "", "C"]);
        assert_eq!(universe.codes(), &["A", "B", "C"]);
    }
}
