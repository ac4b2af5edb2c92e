use std::collections::BTreeMap;

/// Expected measurement registers identifying the enclave image that is
/// allowed to receive key material.
///
/// This comparison is the sole authorization boundary: every code path that
/// releases key material routes through [`MeasurementPolicy::matches`] and
/// fails closed on any verification error upstream.
#[derive(Debug, Clone, Default)]
pub struct MeasurementPolicy {
    expected: BTreeMap<usize, Vec<u8>>,
}

impl MeasurementPolicy {
    /// Policy from expected register values, keyed by PCR index. Only the
    /// indices present here are checked; others are ignored.
    pub fn new(expected: BTreeMap<usize, Vec<u8>>) -> Self {
        Self { expected }
    }

    /// A policy with no expectations; matches every document.
    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    /// Pure, side-effect-free comparison of presented registers against the
    /// expected set.
    ///
    /// Every expected index must be present and byte-equal. Registers the
    /// hypervisor left unpopulated are all-zero, so they can never match a
    /// non-zero expectation.
    pub fn matches(&self, pcrs: &BTreeMap<usize, Vec<u8>>) -> bool {
        self.expected.iter().all(|(idx, expected)| {
            matches!(pcrs.get(idx), Some(actual) if actual == expected)
        })
    }
}
