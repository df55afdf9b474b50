//! PDF structural risk scanner.
//!
//! A shallow pre-filter, not a parser: after the `%PDF-` signature check the
//! whole buffer is searched for catalogue tokens as raw substrings. A token
//! inside a comment or a compressed stream still counts, so false positives
//! are expected. No object graph is built and no stream is decoded.
//!
//! The scan is a pure function of its input. It never fails: anything that is
//! not a PDF is an `invalid-format` rejection.

mod catalogue;
mod header;
mod verdict;

pub use catalogue::{category_of, MarkerCategory, MarkerGroup, CATALOGUE, ENCRYPTION_MARKER};
pub use header::{has_pdf_signature, PDF_SIGNATURE};
pub use verdict::{RejectReason, ScanFindings, Verdict};

use memchr::memmem;
use serde::Serialize;

/// One uploaded file awaiting a verdict.
///
/// The filename is carried along for forwarding and never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanInput {
    pub data: Vec<u8>,
    pub filename: String,
}

impl ScanInput {
    pub fn new(data: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            data,
            filename: filename.into(),
        }
    }

    /// Scan the file content.
    pub fn inspect(&self) -> ScanReport {
        inspect(&self.data)
    }
}

/// Verdict plus the findings behind it, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub verdict: Verdict,
    /// `None` when the header check failed and no marker scan ran.
    pub findings: Option<ScanFindings>,
}

impl ScanReport {
    /// Markers found, empty when nothing matched or no scan ran.
    pub fn markers(&self) -> &[&'static str] {
        self.findings
            .as_ref()
            .map(|f| f.markers.as_slice())
            .unwrap_or(&[])
    }
}

/// Scan a buffer and return only the verdict.
pub fn scan(data: &[u8]) -> Verdict {
    inspect(data).verdict
}

/// Scan a buffer and keep the findings.
pub fn inspect(data: &[u8]) -> ScanReport {
    if !has_pdf_signature(data) {
        return ScanReport {
            verdict: Verdict::Rejected {
                reason: RejectReason::InvalidFormat,
            },
            findings: None,
        };
    }

    let findings = collect_findings(data);
    ScanReport {
        verdict: findings.classify(),
        findings: Some(findings),
    }
}

/// Run the marker search over a buffer that already passed the header check.
fn collect_findings(data: &[u8]) -> ScanFindings {
    let mut findings = ScanFindings::default();

    for group in CATALOGUE {
        for token in group.tokens {
            if contains(data, token) {
                findings.record(group.category, token);
            }
        }
    }

    findings.has_encryption = contains(data, ENCRYPTION_MARKER);
    findings
}

#[inline]
fn contains(haystack: &[u8], token: &str) -> bool {
    memmem::find(haystack, token.as_bytes()).is_some()
}
