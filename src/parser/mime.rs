//! MIME body extraction and HTML-to-text conversion.

use mail_parser::{MessageParser, MimeHeaders, PartType};

/// Readable body text selected from a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyText {
    pub text: String,
    /// No text-bearing part could be decoded; `text` is best-effort raw content.
    pub fallback: bool,
}

/// Extract the readable body of a complete raw message (headers + body).
///
/// The first text-bearing part in document order wins: `text/plain` is used
/// as-is, `text/html` is converted to text. Attachments, nested messages, and
/// binary parts are never looked at.
pub fn extract_body(raw_message: &[u8]) -> BodyText {
    let Some(msg) = MessageParser::default().parse(raw_message) else {
        return BodyText {
            text: body_after_headers(raw_message).trim().to_string(),
            fallback: true,
        };
    };

    for part in &msg.parts {
        if is_attachment(part) {
            continue;
        }
        match &part.body {
            PartType::Text(text) => {
                return BodyText {
                    text: text.trim().to_string(),
                    fallback: false,
                };
            }
            PartType::Html(html) => {
                return BodyText {
                    text: html_to_text(html),
                    fallback: false,
                };
            }
            _ => {}
        }
    }

    let boundary = msg
        .parts
        .first()
        .and_then(|root| root.content_type())
        .and_then(|ct| ct.attribute("boundary"))
        .map(str::to_string);

    let text = match boundary {
        Some(boundary) => first_raw_part(raw_message, &boundary),
        // Single-part message with a non-text body: nothing readable to keep
        None => String::new(),
    };

    BodyText {
        text,
        fallback: true,
    }
}

fn is_attachment(part: &mail_parser::MessagePart<'_>) -> bool {
    part.content_disposition()
        .map(|d| d.ctype().eq_ignore_ascii_case("attachment"))
        .unwrap_or(false)
}

/// Everything after the first blank line.
fn body_after_headers(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if let Some(pos) = text.find("\n\n") {
        text[pos + 2..].to_string()
    } else if let Some(pos) = text.find("\r\n\r\n") {
        text[pos + 4..].to_string()
    } else {
        String::new()
    }
}

/// Raw text of the first part of a multipart body, part headers removed.
fn first_raw_part(data: &[u8], boundary: &str) -> String {
    let body = body_after_headers(data);
    let delimiter = format!("--{boundary}");

    let mut lines = body.lines();
    if !lines.any(|l| l.trim_end().starts_with(&delimiter)) {
        return String::new();
    }

    let mut part = String::new();
    for line in lines {
        if line.trim_end().starts_with(&delimiter) {
            break;
        }
        part.push_str(line);
        part.push('\n');
    }

    let (head, content) = super::header::split_message(&part);
    let content = if head.is_empty() { part.as_str() } else { content };
    content.trim().to_string()
}

/// Convert HTML to plain text for indexing.
///
/// - Block elements (`<p>`, `<div>`, `<br>`, `<li>`, `<tr>`, headings) become line breaks
/// - `<script>` and `<style>` contents are dropped
/// - Common HTML entities are decoded
/// - Runs of blank lines collapse to one
pub fn html_to_text(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        if !starts_tag(after) {
            // Loose `<` in text, e.g. `3 < 5`
            result.push('<');
            rest = after;
            continue;
        }
        let Some(close) = after.find('>') else {
            // Unterminated tag, drop the remainder
            rest = "";
            break;
        };

        let tag = &after[..close];
        let name = tag_name(tag);
        rest = &after[close + 1..];

        if !tag.starts_with('/') && (name == "script" || name == "style") {
            let end_tag = format!("</{name}");
            rest = match find_ignore_case(rest, &end_tag) {
                Some(pos) => {
                    let tail = &rest[pos..];
                    tail.find('>').map(|gt| &tail[gt + 1..]).unwrap_or("")
                }
                None => "",
            };
            continue;
        }

        if is_block_tag(&name) {
            result.push('\n');
        }
    }
    result.push_str(rest);

    let decoded = decode_entities(&result);

    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(decoded.len());
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// A tag opens with a letter, `/`, `!` or `?` right after the `<`.
fn starts_tag(after_lt: &str) -> bool {
    after_lt
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

/// Lowercase element name of a tag body such as `/P class="x"` → `p`.
fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_block_tag(name: &str) -> bool {
    matches!(
        name,
        "br" | "p" | "div" | "tr" | "li" | "table" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.to_ascii_lowercase();
    haystack.to_ascii_lowercase().find(&needle)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_body() {
        let raw = b"Subject: Hi\nFrom: a@b.com\n\n  Hello there.\n\n";
        let body = extract_body(raw);
        assert_eq!(body.text, "Hello there.");
        assert!(!body.fallback);
    }

    #[test]
    fn test_multipart_prefers_first_text_part_and_drops_attachment() {
        let raw = b"From: a@b.com\n\
Subject: Report\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\n\
\n\
--XYZ\n\
Content-Type: text/html; charset=utf-8\n\
\n\
<html><body><p>Quarterly <b>numbers</b></p><script>var x=1;</script></body></html>\n\
--XYZ\n\
Content-Type: application/octet-stream\n\
Content-Disposition: attachment; filename=\"data.bin\"\n\
Content-Transfer-Encoding: base64\n\
\n\
AAECAwQFBgcICQ==\n\
--XYZ--\n";
        let body = extract_body(raw);
        assert!(!body.fallback);
        assert_eq!(body.text, "Quarterly numbers");
        assert!(!body.text.contains("AAECAwQ"));
        assert!(!body.text.contains("var x"));
    }

    #[test]
    fn test_multipart_without_text_falls_back_to_first_part() {
        let raw = b"From: a@b.com\n\
Subject: Binary only\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"B1\"\n\
\n\
--B1\n\
Content-Type: application/octet-stream\n\
\n\
raw first part\n\
--B1\n\
Content-Type: image/png\n\
\n\
PNGDATA\n\
--B1--\n";
        let body = extract_body(raw);
        assert!(body.fallback);
        assert_eq!(body.text, "raw first part");
    }

    #[test]
    fn test_attachment_disposition_text_is_skipped() {
        let raw = b"Subject: x\n\
Content-Type: multipart/mixed; boundary=\"Q\"\n\
\n\
--Q\n\
Content-Type: text/plain\n\
Content-Disposition: attachment; filename=\"notes.txt\"\n\
\n\
secret attachment text\n\
--Q\n\
Content-Type: text/plain\n\
\n\
visible body\n\
--Q--\n";
        let body = extract_body(raw);
        assert_eq!(body.text, "visible body");
    }

    #[test]
    fn test_html_to_text_basic() {
        let text = html_to_text("<p>Hello <b>world</b></p><P class=\"x\">Second paragraph</P>");
        assert_eq!(text, "Hello world\n\nSecond paragraph");
    }

    #[test]
    fn test_html_to_text_entities() {
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
        assert_eq!(html_to_text("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_html_to_text_keeps_loose_angle_brackets() {
        let text = html_to_text("<p>price is 3 < 5 and margin 7 > 2 today</p><!-- note -->");
        assert_eq!(text, "price is 3 < 5 and margin 7 > 2 today");
        assert_eq!(html_to_text("a <= b<br/>c"), "a <= b\nc");
    }

    #[test]
    fn test_html_to_text_removes_scripts_and_styles() {
        let text = html_to_text("Before<SCRIPT>alert('x')</SCRIPT><style>p{}</style>After");
        assert_eq!(text, "BeforeAfter");
    }

    #[test]
    fn test_first_raw_part_strips_part_headers() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n--b\nContent-Type: x/y\n\nline one\nline two\n--b--\n";
        assert_eq!(first_raw_part(raw, "b"), "line one\nline two");
    }
}
