// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parser turning raw syslog frames into [`MessageRecord`]s.
//!
//! Both the BSD format (RFC 3164) and the structured format (RFC 5424) are
//! accepted. The parser is lenient the way most syslog servers are: anything
//! that does not look like a header is treated as message text, and missing
//! timestamps fall back to the time the frame was received.
//!
//! ```text
//! <34>Oct 11 22:14:15 mymachine su: 'su root' failed for lonvick
//! <165>1 2003-10-11T22:14:15.003Z mymachine evntslog - ID47 [sd@1 a="b"] msg
//! ```

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime};

use crate::constants::DEFAULT_PRIORITY;
use crate::errors::ParseError;
use crate::message::{Facility, MessageRecord, Severity};
use tracing::trace;

const NIL_VALUE: &str = "-";
const BOM: char = '\u{feff}';
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parses one syslog frame received at `received_at`.
///
/// Trailing NUL, CR and LF bytes are ignored. Invalid UTF-8 sequences are
/// replaced rather than rejected.
pub fn parse(buf: &[u8], received_at: DateTime<FixedOffset>) -> Result<MessageRecord, ParseError> {
    let end = buf
        .iter()
        .rposition(|b| !matches!(b, b'\0' | b'\r' | b'\n'))
        .map_or(0, |idx| idx + 1);
    if end == 0 {
        return Err(ParseError::Empty);
    }
    let text = String::from_utf8_lossy(&buf[..end]);

    let Some((priority, rest)) = parse_priority(&text)? else {
        let (tag, content) = split_tag(&text);
        return Ok(build(DEFAULT_PRIORITY, tag, "", content, received_at));
    };

    // A BSD message may start with "1 " too; it only counts as RFC 5424 when
    // the whole header parses.
    if let Some(header) = rest.strip_prefix("1 ") {
        match parse_rfc5424(priority, header, received_at) {
            Ok(record) => return Ok(record),
            Err(e) => trace!("Not an RFC 5424 header, reading as RFC 3164: {}", e),
        }
    }

    let (timestamp, hostname, msg) = match parse_rfc3164_header(rest, received_at) {
        Some((timestamp, hostname, msg)) => (timestamp, hostname, msg),
        None => (received_at, "", rest),
    };
    let (tag, content) = split_tag(msg);
    Ok(build(priority, tag, hostname, content, timestamp))
}

fn build(
    priority: u8,
    tag: &str,
    hostname: &str,
    content: &str,
    timestamp: DateTime<FixedOffset>,
) -> MessageRecord {
    // priority is at most 191 here, so the facility always decodes
    let facility = Facility::from_priority(priority).unwrap_or(Facility::User);
    MessageRecord::new(tag, hostname, content, timestamp)
        .with_priority(Severity::from_priority(priority), facility)
}

/// Reads a leading `<N>`. Returns `Ok(None)` when the input has no
/// well-formed priority, in which case the whole input is message text.
fn parse_priority(input: &str) -> Result<Option<(u8, &str)>, ParseError> {
    let Some(rest) = input.strip_prefix('<') else {
        return Ok(None);
    };
    let Some(end) = rest.find('>') else {
        return Ok(None);
    };
    let digits = &rest[..end];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let Ok(value) = digits.parse::<u32>() else {
        return Ok(None);
    };
    let priority = u8::try_from(value)
        .ok()
        .filter(|p| Facility::from_priority(*p).is_some())
        .ok_or(ParseError::BadPriority(value))?;
    Ok(Some((priority, &rest[end + 1..])))
}

/// `Mmm dd hh:mm:ss HOSTNAME ` header. The year and UTC offset are not part
/// of the format and are taken from the receive time.
fn parse_rfc3164_header(
    input: &str,
    received_at: DateTime<FixedOffset>,
) -> Option<(DateTime<FixedOffset>, &str, &str)> {
    if input.as_bytes().get(15) != Some(&b' ') {
        return None;
    }
    let timestamp = parse_bsd_timestamp(input.get(..15)?, received_at)?;
    let rest = &input[16..];
    let (hostname, msg) = rest.split_once(' ')?;
    if hostname.is_empty() {
        return None;
    }
    Some((timestamp, hostname, msg))
}

fn parse_bsd_timestamp(
    input: &str,
    received_at: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let mut parts = input.split_whitespace();
    let month_name = parts.next()?;
    let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;
    let day: u32 = parts.next()?.parse().ok()?;
    let time = NaiveTime::parse_from_str(parts.next()?, "%H:%M:%S").ok()?;
    if parts.next().is_some() {
        return None;
    }

    let offset = *received_at.offset();
    let at_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_time(time)
            .and_local_timezone(offset)
            .single()
    };
    let timestamp = at_year(received_at.year())?;
    // A December message received in early January belongs to last year.
    if timestamp > received_at + Duration::days(1) {
        return at_year(received_at.year() - 1);
    }
    Some(timestamp)
}

/// `TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA [MSG]`
fn parse_rfc5424(
    priority: u8,
    input: &str,
    received_at: DateTime<FixedOffset>,
) -> Result<MessageRecord, ParseError> {
    let mut rest = input;
    let timestamp = take_field(&mut rest, "timestamp")?;
    let hostname = take_field(&mut rest, "hostname")?;
    let app_name = take_field(&mut rest, "app-name")?;
    let _proc_id = take_field(&mut rest, "procid")?;
    let _msg_id = take_field(&mut rest, "msgid")?;
    let msg = skip_structured_data(rest)?;
    let msg = msg.strip_prefix(' ').unwrap_or(msg);
    let msg = msg.strip_prefix(BOM).unwrap_or(msg);

    let timestamp = match timestamp {
        NIL_VALUE => received_at,
        value => DateTime::parse_from_rfc3339(value)
            .map_err(|_| ParseError::BadTimestamp(value.to_string()))?,
    };

    Ok(build(
        priority,
        nil_to_empty(app_name),
        nil_to_empty(hostname),
        msg,
        timestamp,
    ))
}

fn take_field<'a>(rest: &mut &'a str, name: &'static str) -> Result<&'a str, ParseError> {
    let (field, remainder) = rest
        .split_once(' ')
        .ok_or(ParseError::UnexpectedEndOfInput(name))?;
    *rest = remainder;
    Ok(field)
}

fn nil_to_empty(value: &str) -> &str {
    if value == NIL_VALUE {
        ""
    } else {
        value
    }
}

/// Skips `-` or a run of `[...]` elements and returns what follows.
fn skip_structured_data(input: &str) -> Result<&str, ParseError> {
    if let Some(rest) = input.strip_prefix(NIL_VALUE) {
        return Ok(rest);
    }
    if input.is_empty() {
        return Err(ParseError::UnexpectedEndOfInput("structured data"));
    }
    if !input.starts_with('[') {
        return Err(ParseError::MalformedStructuredData);
    }

    let mut rest = input;
    while rest.starts_with('[') {
        let mut in_value = false;
        let mut escaped = false;
        let mut end = None;
        for (idx, ch) in rest.char_indices().skip(1) {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_value => escaped = true,
                '"' => in_value = !in_value,
                ']' if !in_value => {
                    end = Some(idx);
                    break;
                }
                _ => {}
            }
        }
        let end = end.ok_or(ParseError::MalformedStructuredData)?;
        rest = &rest[end + 1..];
    }
    Ok(rest)
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

/// Splits `tag[pid]: content`. Without a `:` or `[pid]` after the leading
/// word there is no tag and the whole input is content.
fn split_tag(msg: &str) -> (&str, &str) {
    let end = msg.find(|c: char| !is_tag_char(c)).unwrap_or(msg.len());
    let (tag, rest) = msg.split_at(end);
    if tag.is_empty() {
        return ("", msg);
    }

    let (has_pid, rest) = match rest.strip_prefix('[') {
        Some(pid) => match pid.find(']') {
            Some(close) => (true, &pid[close + 1..]),
            None => return ("", msg),
        },
        None => (false, rest),
    };
    match rest.strip_prefix(':') {
        Some(content) => (tag, content.trim_start()),
        None if has_pid => (tag, rest.trim_start()),
        None => ("", msg),
    }
}
