//! RFC 5322 header block parsing: splitting, folding, encoded-words, and dates.
//!
//! Headers are parsed by hand so that a malformed block degrades to empty
//! values instead of failing the whole record.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

/// Header values extracted for indexing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderFields {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub message_id: String,
    pub date: Option<DateTime<Utc>>,
    /// Set when the block was malformed or lacked both `From` and `Subject`.
    pub degraded: bool,
}

/// Split a raw message into its header block and body at the first blank line.
///
/// A message whose first line is not a header has no header block at all.
pub fn split_message(raw: &str) -> (&str, &str) {
    let first_line = raw.lines().next().unwrap_or("");
    if !looks_like_header(first_line) {
        return ("", raw);
    }

    let lf = raw.find("\n\n").map(|pos| (pos, 2));
    let crlf = raw.find("\r\n\r\n").map(|pos| (pos, 4));
    let split = match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((pos, sep)) => (&raw[..pos], &raw[pos + sep..]),
        None => (raw, ""),
    }
}

/// Extract the indexed header values from a header block.
pub fn parse_header_block(block: &str) -> HeaderFields {
    let (headers, junk_lines) = unfold_headers(block);

    let subject = get_header(&headers, "subject")
        .map(|s| decode_encoded_words(&s))
        .unwrap_or_default();
    let sender = get_header(&headers, "from")
        .map(|s| decode_encoded_words(&s))
        .unwrap_or_default();
    let recipients = get_header(&headers, "to")
        .map(|s| split_address_list(&decode_encoded_words(&s)))
        .unwrap_or_default();
    let message_id = get_header(&headers, "message-id")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let date = get_header(&headers, "date").and_then(|s| parse_date(&s));

    let has_from = headers.iter().any(|(k, _)| k == "from");
    let has_subject = headers.iter().any(|(k, _)| k == "subject");
    let degraded = headers.is_empty() || junk_lines > 0 || (!has_from && !has_subject);

    if degraded {
        debug!(
            headers = headers.len(),
            junk_lines, "Header block degraded, missing values default to empty"
        );
    }

    HeaderFields {
        subject,
        sender,
        recipients,
        message_id,
        date,
        degraded,
    }
}

/// Whether a line has the `Name: value` shape of a header field.
fn looks_like_header(line: &str) -> bool {
    match line.find(':') {
        Some(pos) if pos > 0 => line[..pos]
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':'),
        _ => false,
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns `(lowercase_name, value)` pairs and the number of lines that were
/// neither a header nor a continuation.
fn unfold_headers(block: &str) -> (Vec<(String, String)>, usize) {
    let mut result: Vec<(String, String)> = Vec::new();
    let mut junk = 0;

    for line in block.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            match result.last_mut() {
                Some(last) => {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
                None => junk += 1,
            }
        } else if looks_like_header(line) {
            if let Some((name, value)) = line.split_once(':') {
                result.push((name.trim().to_lowercase(), value.trim().to_string()));
            }
        } else if !line.trim().is_empty() {
            junk += 1;
        }
    }

    (result, junk)
}

/// Get the first value for a header name (already lowercase).
fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

/// Split a comma-separated address list, honouring quotes and angle brackets.
///
/// `"Last, First" <a@b.com>, c@d.com` yields two entries.
pub fn split_address_list(raw: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for ch in raw.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                push_address(&mut results, &current);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push_address(&mut results, &current);

    results
}

fn push_address(results: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        results.push(trimmed.to_string());
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Values without encoded words pass through untouched; if decoding fails the
/// original text is kept.
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    // Let mail-parser do the charset work on a one-header message
    let fake_msg = format!("Subject: {input}\n\n");
    mail_parser::MessageParser::default()
        .parse(fake_msg.as_bytes())
        .and_then(|msg| msg.subject().map(str::to_string))
        .unwrap_or_else(|| input.to_string())
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822 (with trailing `(PDT)`-style comments), ISO 8601, and
/// several broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = strip_comment(date_str.trim());
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [no_dow.to_string(), replace_named_tz(no_dow)];

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M %z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];

    for candidate in &candidates {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Drop a trailing parenthesised comment such as `(PDT)`.
fn strip_comment(s: &str) -> &str {
    match s.rfind('(') {
        Some(pos) if s.ends_with(')') => s[..pos].trim_end(),
        _ => s,
    }
}

/// Strip a leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim_start();
        }
    }
    s
}

/// Replace a trailing timezone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 11] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENRON_HEADERS: &str = "Message-ID: <18782981.1075855378110.JavaMail.evans@thyme>\n\
Date: Mon, 14 May 2001 16:39:00 -0700 (PDT)\n\
From: phillip.allen@enron.com\n\
To: tim.belden@enron.com, \n\
\tjohn.lavorato@enron.com\n\
Subject: Forecast\n\
X-From: Phillip K Allen";

    #[test]
    fn test_parse_enron_block() {
        let h = parse_header_block(ENRON_HEADERS);
        assert_eq!(h.subject, "Forecast");
        assert_eq!(h.sender, "phillip.allen@enron.com");
        assert_eq!(
            h.recipients,
            vec!["tim.belden@enron.com", "john.lavorato@enron.com"]
        );
        assert_eq!(
            h.message_id,
            "<18782981.1075855378110.JavaMail.evans@thyme>"
        );
        let date = h.date.expect("date parses");
        assert_eq!(date.format("%Y-%m-%d %H:%M").to_string(), "2001-05-14 23:39");
        assert!(!h.degraded);
    }

    #[test]
    fn test_missing_headers_default_to_empty() {
        let h = parse_header_block("Subject: only a subject");
        assert_eq!(h.subject, "only a subject");
        assert_eq!(h.sender, "");
        assert!(h.recipients.is_empty());
        assert!(h.date.is_none());
        assert!(!h.degraded);
    }

    #[test]
    fn test_junk_line_marks_degraded() {
        let h = parse_header_block("From: a@b.com\nthis is not a header\nSubject: x");
        assert!(h.degraded);
        assert_eq!(h.sender, "a@b.com");
        assert_eq!(h.subject, "x");
    }

    #[test]
    fn test_split_message() {
        let (head, body) = split_message("Subject: Hi\nFrom: a@b\n\nBody line\n\nMore");
        assert_eq!(head, "Subject: Hi\nFrom: a@b");
        assert_eq!(body, "Body line\n\nMore");

        let (head, body) = split_message("Subject: Hi\r\n\r\nBody");
        assert_eq!(head, "Subject: Hi");
        assert_eq!(body, "Body");
    }

    #[test]
    fn test_split_message_without_headers() {
        let (head, body) = split_message("Just some text\n\nand more");
        assert_eq!(head, "");
        assert_eq!(body, "Just some text\n\nand more");
        assert!(parse_header_block(head).degraded);
    }

    #[test]
    fn test_split_address_list_with_quoted_comma() {
        let list = split_address_list("\"Last, First\" <a@b.com>, other@c.com,, ");
        assert_eq!(list, vec!["\"Last, First\" <a@b.com>", "other@c.com"]);
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_plain_passthrough() {
        assert_eq!(decode_encoded_words("Re: budget"), "Re: budget");
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_date("04 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_parse_date_named_tz_offset() {
        let dt = parse_date("04 Jan 2024 10:00:00 PST").unwrap();
        assert_eq!(dt.format("%H").to_string(), "18");
    }
}
