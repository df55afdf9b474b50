//! Scan findings and the verdict derived from them.

use super::catalogue::MarkerCategory;
use serde::Serialize;
use std::fmt;

/// Why an upload was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Buffer does not start with the `%PDF-` signature.
    InvalidFormat,
    /// Active content, embedded files, or any other catalogue marker.
    HighRisk,
    /// Encryption or interactive forms.
    MediumRisk,
}

impl RejectReason {
    /// Machine-readable reason code.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidFormat => "invalid-format",
            RejectReason::HighRisk => "high-risk",
            RejectReason::MediumRisk => "medium-risk",
        }
    }

    /// Message shown to the uploader.
    pub fn message(self) -> &'static str {
        match self {
            RejectReason::InvalidFormat => "Invalid PDF format",
            RejectReason::HighRisk => "PDF security check failed: High-risk content detected",
            RejectReason::MediumRisk => "PDF security check failed: Medium-risk content detected",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scanning one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    /// Safe to forward.
    Allowed,
    /// Must not be forwarded.
    Rejected { reason: RejectReason },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Allowed => None,
            Verdict::Rejected { reason } => Some(*reason),
        }
    }
}

/// What a single scan found. Built fresh for every buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanFindings {
    pub has_active_content: bool,
    pub has_embedded_resource: bool,
    pub has_form: bool,
    pub has_encryption: bool,
    /// Every catalogue token found, in catalogue order. Not deduplicated.
    pub markers: Vec<&'static str>,
}

impl ScanFindings {
    /// Record a matched catalogue token.
    pub(crate) fn record(&mut self, category: MarkerCategory, token: &'static str) {
        match category {
            MarkerCategory::ActiveContent => self.has_active_content = true,
            MarkerCategory::EmbeddedResource => self.has_embedded_resource = true,
            MarkerCategory::Form => self.has_form = true,
            MarkerCategory::OtherDangerous => {}
        }
        self.markers.push(token);
    }

    /// Any matched marker counts as high risk, whatever its category.
    pub fn is_high_risk(&self) -> bool {
        self.has_active_content || self.has_embedded_resource || !self.markers.is_empty()
    }

    pub fn is_medium_risk(&self) -> bool {
        self.has_encryption || self.has_form
    }

    /// Map findings to a verdict. High risk wins over medium risk.
    pub fn classify(&self) -> Verdict {
        if self.is_high_risk() {
            Verdict::Rejected {
                reason: RejectReason::HighRisk,
            }
        } else if self.is_medium_risk() {
            Verdict::Rejected {
                reason: RejectReason::MediumRisk,
            }
        } else {
            Verdict::Allowed
        }
    }
}
