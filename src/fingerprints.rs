/// Registry of fingerprints belonging to default/placeholder icons
use std::collections::BTreeMap;

use crate::favicon_meta::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintVariant {
    Normalized,
    SemiTransparent,
}

impl FingerprintVariant {
    fn label_prefix(self) -> &'static str {
        match self {
            FingerprintVariant::Normalized => "norm",
            FingerprintVariant::SemiTransparent => "trans",
        }
    }
}

/// Fingerprints of icons that never identify a real site.
///
/// Built once during initialisation and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultFingerprints {
    by_label: BTreeMap<String, Fingerprint>,
}

impl DefaultFingerprints {
    pub fn builder() -> DefaultFingerprintsBuilder {
        DefaultFingerprintsBuilder::default()
    }

    /// Label of the first registered default matching `fingerprint`
    pub fn find_match(&self, fingerprint: &Fingerprint) -> Option<&str> {
        self.by_label
            .iter()
            .find(|(_, known)| *known == fingerprint)
            .map(|(label, _)| label.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.by_label.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DefaultFingerprintsBuilder {
    by_label: BTreeMap<String, Fingerprint>,
}

impl DefaultFingerprintsBuilder {
    pub fn insert(&mut self, id: &str, variant: FingerprintVariant, fingerprint: Fingerprint) -> &mut Self {
        self.by_label
            .insert(format!("{}_{}", variant.label_prefix(), id), fingerprint);
        self
    }

    pub fn build(self) -> DefaultFingerprints {
        DefaultFingerprints {
            by_label: self.by_label,
        }
    }
}
