//! Change detection for exported device configuration.

/// Whether a device's configuration differs from the last stored export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    Changed,
    Unchanged,
}

impl ChangeDecision {
    pub fn is_changed(self) -> bool {
        self == ChangeDecision::Changed
    }
}

/// Compare a freshly computed export checksum against the stored one.
///
/// A missing remote checksum (first run, or metadata never recorded) counts as
/// changed. So does a missing local checksum, since there is nothing to match.
pub fn decide(local: Option<&str>, remote: Option<&str>) -> ChangeDecision {
    match (local, remote) {
        (Some(local), Some(remote)) if local == remote => ChangeDecision::Unchanged,
        _ => ChangeDecision::Changed,
    }
}
