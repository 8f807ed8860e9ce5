/// Status code reported when the status line cannot be parsed.
pub const MALFORMED_STATUS: u16 = 500;

/// Response headers in arrival order.
///
/// Names keep their original spelling; lookups ignore ASCII case and return
/// the first match. A repeated header with the exact same name replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(String, String)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if `name` is present with exactly `value`, ignoring ASCII case.
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get(name).is_some_and(|v| v.eq_ignore_ascii_case(value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// How the response body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Chunked,
    Length(u64),
    None,
}

impl BodyFraming {
    pub fn from_headers(headers: &ResponseHeaders) -> Self {
        if headers.has_value("Transfer-Encoding", "chunked") {
            return BodyFraming::Chunked;
        }
        match headers.get("Content-Length").and_then(|v| v.parse::<i64>().ok()) {
            Some(len) if len > 0 => BodyFraming::Length(len as u64),
            _ => BodyFraming::None,
        }
    }
}

/// Second space-separated field of the status line, or 500.
pub fn parse_status_line(line: &str) -> u16 {
    line.splitn(3, ' ')
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(MALFORMED_STATUS)
}

/// Split `Name: value` at the first colon. Lines without a name or a value
/// are ignored.
pub fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

/// Hexadecimal chunk size line.
pub fn parse_chunk_size(line: &str) -> Option<u64> {
    let digits = line.trim();
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
