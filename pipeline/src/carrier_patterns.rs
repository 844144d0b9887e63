//! Consolidated per-carrier pattern registry: one `CarrierPatternSet` per
//! carrier, registered in a static table so classification's subject
//! markers and extraction's body field regexes both read from the same
//! place instead of keeping two independent tables that happen to agree
//! about which carrier owns which regex.

use std::sync::LazyLock;

use regex::Regex;

/// A carrier's regex fingerprints: the booking-number shape it uses in body
/// text, and (when distinctive enough to stand alone) a subject-line marker
/// that identifies one of its booking confirmations without needing the
/// sender domain at all.
pub struct CarrierPatternSet {
    pub carrier_code: &'static str,
    pub domain_fragment: &'static str,
    pub booking_number_regexes: Vec<Regex>,
    pub subject_marker: Option<Regex>,
}

/// Shared behavior classification and extraction both need from a carrier's
/// pattern set, so either module can walk the registry generically instead
/// of hardcoding a carrier's regexes inline.
pub trait CarrierExtractor {
    fn carrier_code(&self) -> &'static str;
    fn matches_domain(&self, domain: &str) -> bool;
    fn booking_number_regexes(&self) -> &[Regex];
    fn subject_marker(&self) -> Option<&Regex>;
}

impl CarrierExtractor for CarrierPatternSet {
    fn carrier_code(&self) -> &'static str {
        self.carrier_code
    }

    fn matches_domain(&self, domain: &str) -> bool {
        domain.contains(self.domain_fragment)
    }

    fn booking_number_regexes(&self) -> &[Regex] {
        &self.booking_number_regexes
    }

    fn subject_marker(&self) -> Option<&Regex> {
        self.subject_marker.as_ref()
    }
}

pub static CARRIER_REGISTRY: LazyLock<Vec<CarrierPatternSet>> = LazyLock::new(|| {
    vec![
        CarrierPatternSet {
            carrier_code: "maersk",
            domain_fragment: "maersk",
            booking_number_regexes: vec![
                Regex::new(r"\b26\d{7}\b").unwrap(),
                Regex::new(r"\bMAEU\d{9}\b").unwrap(),
            ],
            subject_marker: None,
        },
        CarrierPatternSet {
            carrier_code: "hlag",
            domain_fragment: "hlag",
            booking_number_regexes: vec![Regex::new(r"\bHLCU\d{7,10}\b").unwrap()],
            subject_marker: Some(Regex::new(r"(?i)HLCU\d{7}|HL-?\d{8}").unwrap()),
        },
        CarrierPatternSet {
            carrier_code: "cma-cgm",
            domain_fragment: "cma-cgm",
            booking_number_regexes: vec![Regex::new(r"\b(CEI|AMC|CAD)\d{7}\b").unwrap()],
            subject_marker: Some(Regex::new(r"(?i)cma\s*cgm.*booking\s+confirmation").unwrap()),
        },
        CarrierPatternSet {
            carrier_code: "cosco",
            domain_fragment: "cosco",
            booking_number_regexes: vec![Regex::new(r"\bCOSU\d{10}\b").unwrap()],
            subject_marker: None,
        },
    ]
});

/// Flatten the registry into `(domain_fragment, regex)` pairs, in registry
/// order, for extraction's carrier-specific booking-number bucket.
pub fn booking_number_patterns() -> Vec<(&'static str, &'static Regex)> {
    CARRIER_REGISTRY
        .iter()
        .flat_map(|set| {
            set.booking_number_regexes
                .iter()
                .map(move |re| (set.domain_fragment, re))
        })
        .collect()
}

/// Subject-line markers distinctive enough to identify a carrier's booking
/// confirmation without a domain match, in registry order.
pub fn subject_markers() -> Vec<&'static Regex> {
    CARRIER_REGISTRY
        .iter()
        .filter_map(|set| set.subject_marker.as_ref())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_carries_one_entry_per_known_carrier() {
        let codes: Vec<&str> = CARRIER_REGISTRY.iter().map(|s| s.carrier_code()).collect();
        assert_eq!(codes, vec!["maersk", "hlag", "cma-cgm", "cosco"]);
    }

    #[test]
    fn hlag_pattern_set_matches_the_real_domain() {
        let hlag = CARRIER_REGISTRY.iter().find(|s| s.carrier_code() == "hlag").unwrap();
        assert!(hlag.matches_domain("hlag.com"));
        assert!(hlag.booking_number_regexes()[0].is_match("HLCU22970937"));
    }

    #[test]
    fn subject_markers_cover_carriers_with_a_distinctive_subject_shape() {
        let markers = subject_markers();
        assert_eq!(markers.len(), 2);
        assert!(markers[0].is_match("HL-22970937 USSAV RESILIENT"));
    }
}
