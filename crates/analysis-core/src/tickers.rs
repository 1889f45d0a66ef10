use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// Currency pairs covered by the default universe.
pub const MAJOR_PAIRS: [&str; 8] = [
    "EUR_USD", "GBP_USD", "USD_JPY", "USD_CHF", "AUD_USD", "USD_CAD", "NZD_USD", "EUR_GBP",
];

/// A tradable instrument in all of its representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// `EUR_USD`
    pub canonical: String,
    /// `EUR/USD`
    pub display: String,
    /// `EURUSD`
    pub raw: String,
    pub base: String,
    pub quote: String,
    /// Decimal places quoted by the venue (5 for most pairs, 3 for JPY quotes)
    pub precision: u32,
}

impl Instrument {
    fn from_parts(base: &str, quote: &str) -> Self {
        let precision = if quote == "JPY" { 3 } else { 5 };
        Self {
            canonical: format!("{base}_{quote}"),
            display: format!("{base}/{quote}"),
            raw: format!("{base}{quote}"),
            base: base.to_string(),
            quote: quote.to_string(),
            precision,
        }
    }

    /// Price distance of one pip.
    pub fn pip_size(&self) -> f64 {
        if self.quote == "JPY" {
            0.01
        } else {
            0.0001
        }
    }

    pub fn price_to_pips(&self, distance: f64) -> f64 {
        distance / self.pip_size()
    }

    pub fn pips_to_price(&self, pips: f64) -> f64 {
        pips * self.pip_size()
    }
}

/// Split a pair identifier in any accepted form into (base, quote).
///
/// Accepts `EUR_USD`, `EUR/USD`, `EURUSD` (case-insensitive). Anything that
/// is not six ASCII letters with an optional single separator is rejected.
pub fn parse_pair(pair: &str) -> Result<(String, String), AnalysisError> {
    let upper = pair.trim().to_ascii_uppercase();
    if !upper.is_ascii() {
        return Err(AnalysisError::InvalidPairFormat(pair.to_string()));
    }
    let letters: String = match upper.len() {
        7 => {
            let sep = upper.as_bytes()[3];
            if sep != b'_' && sep != b'/' {
                return Err(AnalysisError::InvalidPairFormat(pair.to_string()));
            }
            format!("{}{}", &upper[..3], &upper[4..])
        }
        6 => upper,
        _ => return Err(AnalysisError::InvalidPairFormat(pair.to_string())),
    };

    if !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AnalysisError::InvalidPairFormat(pair.to_string()));
    }

    Ok((letters[..3].to_string(), letters[3..].to_string()))
}

/// Maps instrument identifiers between display, canonical, and raw forms.
///
/// Pure lookup over a fixed universe; no state beyond construction.
#[derive(Debug, Clone)]
pub struct TickerResolver {
    instruments: HashMap<String, Instrument>,
}

impl Default for TickerResolver {
    fn default() -> Self {
        Self::new(MAJOR_PAIRS.iter().copied())
    }
}

impl TickerResolver {
    /// Build a resolver over the given canonical pairs. Malformed entries are skipped.
    pub fn new<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Self {
        let instruments = pairs
            .into_iter()
            .filter_map(|p| parse_pair(p).ok())
            .map(|(base, quote)| {
                let inst = Instrument::from_parts(&base, &quote);
                (inst.canonical.clone(), inst)
            })
            .collect();
        Self { instruments }
    }

    /// Resolve a pair in any accepted form. `Ok(None)` means well-formed but not tradable.
    pub fn resolve(&self, pair: &str) -> Result<Option<Instrument>, AnalysisError> {
        let (base, quote) = parse_pair(pair)?;
        Ok(self.instruments.get(&format!("{base}_{quote}")).cloned())
    }

    pub fn to_canonical(&self, pair: &str) -> Result<String, AnalysisError> {
        let (base, quote) = parse_pair(pair)?;
        Ok(format!("{base}_{quote}"))
    }

    pub fn to_display(&self, pair: &str) -> Result<String, AnalysisError> {
        let (base, quote) = parse_pair(pair)?;
        Ok(format!("{base}/{quote}"))
    }

    pub fn to_raw(&self, pair: &str) -> Result<String, AnalysisError> {
        let (base, quote) = parse_pair(pair)?;
        Ok(format!("{base}{quote}"))
    }

    /// Canonical names of every tradable instrument, sorted.
    pub fn canonical_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.instruments.keys().cloned().collect();
        pairs.sort();
        pairs
    }
}
