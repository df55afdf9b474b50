//! Minimal `multipart/form-data` reader for the upload endpoint.
//!
//! Only what the gateway needs: find one named file part and return its raw
//! bytes with the declared filename and content type. Nested multiparts and
//! transfer encodings are not supported.

use memchr::memmem;

/// A file part pulled out of a form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Form field name.
    pub name: String,
    /// Original filename as sent by the client.
    pub filename: String,
    /// Declared content type of the part.
    pub content_type: Option<String>,
    /// Raw part body.
    pub data: Vec<u8>,
}

/// Error while reading a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    /// Request is not multipart or has no boundary parameter.
    MissingBoundary,
    /// Body does not follow the multipart framing.
    Malformed(&'static str),
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MultipartError::MissingBoundary => write!(f, "Missing multipart boundary"),
            MultipartError::Malformed(msg) => write!(f, "Malformed multipart body: {}", msg),
        }
    }
}

impl std::error::Error for MultipartError {}

/// Extract the boundary from a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let media_type = content_type.split(';').next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    header_params(content_type)
        .into_iter()
        .find(|(key, _)| key == "boundary")
        .map(|(_, value)| value)
        .filter(|b| !b.is_empty())
}

/// Find the first file part named `field` in a multipart body.
///
/// Parts without a `filename` are form values, not files, and are skipped.
pub fn find_file_part(
    body: &[u8],
    boundary: &str,
    field: &str,
) -> Result<Option<FilePart>, MultipartError> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let next_delimiter = format!("\r\n--{}", boundary);
    let next_delimiter = next_delimiter.as_bytes();

    let mut pos = memmem::find(body, delimiter)
        .ok_or(MultipartError::Malformed("no opening boundary"))?
        + delimiter.len();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(None);
        }
        let rest = rest
            .strip_prefix(b"\r\n")
            .ok_or(MultipartError::Malformed("boundary not followed by CRLF"))?;

        let header_end = memmem::find(rest, b"\r\n\r\n")
            .ok_or(MultipartError::Malformed("unterminated part headers"))?;
        let headers = std::str::from_utf8(&rest[..header_end])
            .map_err(|_| MultipartError::Malformed("part headers are not UTF-8"))?;
        let content = &rest[header_end + 4..];

        let content_end = memmem::find(content, next_delimiter)
            .ok_or(MultipartError::Malformed("no closing boundary"))?;

        let part = parse_part_headers(headers);
        if let (Some(name), Some(filename)) = (part.name, part.filename) {
            if name == field {
                return Ok(Some(FilePart {
                    name,
                    filename,
                    content_type: part.content_type,
                    data: content[..content_end].to_vec(),
                }));
            }
        }

        // Advance past the part body and the CRLF + delimiter that closes it
        let consumed = body.len() - content.len() + content_end + next_delimiter.len();
        pos = consumed;
    }
}

#[derive(Debug, Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(headers: &str) -> PartHeaders {
    let mut part = PartHeaders::default();

    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key.eq_ignore_ascii_case("content-disposition") {
            for (k, v) in header_params(value) {
                match k.as_str() {
                    "name" => part.name = Some(v),
                    "filename" => part.filename = Some(v),
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.to_string());
        }
    }

    part
}

/// Parse the `key=value` parameters following the first `;` of a header
/// value. Keys are lowercased. Quoted values may contain `;` and `=`, and
/// `\"` / `\\` inside quotes are unescaped. Parameters without `=` are dropped.
fn header_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();

    // Skip the media type or disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }

    while chars.peek().is_some() {
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ';' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            continue;
        }

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut val = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                        if let Some(escaped) = chars.next() {
                            val.push(escaped);
                        }
                    }
                    _ => val.push(c),
                }
            }
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                val.push(c);
            }
            val = val.trim_end().to_string();
        }

        let key = key.trim().to_ascii_lowercase();
        if !key.is_empty() {
            params.push((key, val));
        }
    }

    params
}
