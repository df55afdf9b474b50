//! PDF signature check.

/// File signature every accepted upload must start with.
pub const PDF_SIGNATURE: &[u8; 5] = b"%PDF-";

/// Check whether `data` starts with the `%PDF-` signature.
///
/// Only the first five bytes are looked at. Shorter buffers simply fail the
/// check.
#[inline]
pub fn has_pdf_signature(data: &[u8]) -> bool {
    match data.get(..PDF_SIGNATURE.len()) {
        Some(head) => head == PDF_SIGNATURE,
        None => false,
    }
}
