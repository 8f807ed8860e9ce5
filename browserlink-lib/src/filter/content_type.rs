const HTML_CONTENT_TYPE: &str = "text/html";
const XHTML_CONTENT_TYPE: &str = "application/xhtml+xml";

/// Tag openers that mark a body as HTML when they lead the content.
const HTML_PATTERNS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

const HTML_EXTENSIONS: &[&str] = &[".htm", ".html", ".xhtml"];

/// True for `text/html` and `application/xhtml+xml`, parameters ignored.
pub fn is_supported_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    if content_type.is_empty() {
        return false;
    }

    let media_type = content_type.split(';').next().unwrap_or("").trim();
    media_type.eq_ignore_ascii_case(HTML_CONTENT_TYPE) || media_type.eq_ignore_ascii_case(XHTML_CONTENT_TYPE)
}

/// Sniff whether a response body is HTML from its first `window` bytes.
///
/// The request path is only consulted when there is no data to look at.
pub fn is_html(request_path: Option<&str>, data: &[u8], window: usize) -> bool {
    let data = &data[..data.len().min(window)];
    if data.is_empty() {
        return request_path.is_some_and(has_html_extension);
    }
    sniff_html(data)
}

fn sniff_html(data: &[u8]) -> bool {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    let data = &data[start..];

    HTML_PATTERNS.iter().any(|pattern| {
        data.len() > pattern.len()
            && data[..pattern.len()].eq_ignore_ascii_case(pattern)
            && matches!(data[pattern.len()], b' ' | b'>')
    })
}

fn has_html_extension(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    HTML_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_content_types() {
        for ct in [
            "text/html",
            "TEXT/hTmL",
            "text/html; charset=utf-8",
            "text/html; any parameter",
            "application/xhtml+xml",
            " Application/XHTML+XML ;q=1",
        ] {
            assert!(is_supported_content_type(Some(ct)), "{}", ct);
        }
    }

    #[test]
    fn test_unsupported_content_types() {
        for ct in ["text/htmlx", "text/html charset=utf-8", "", "text/htm", "text/css", "application/json"] {
            assert!(!is_supported_content_type(Some(ct)), "{}", ct);
        }
        assert!(!is_supported_content_type(None));
    }

    #[test]
    fn test_sniff_detects_html() {
        assert!(is_html(Some("default.html"), b"<html><head></head><body></body></html>", 512));
        assert!(is_html(None, b"\r\n  <!DOCTYPE html>\n<html>", 512));
        assert!(is_html(None, b"\xEF\xBB\xBF<div class=\"x\">", 512));
        assert!(is_html(None, b"<!-- comment -->", 512));
        assert!(is_html(None, b"<p>hello</p>", 512));
    }

    #[test]
    fn test_sniff_rejects_non_html() {
        assert!(!is_html(Some("default.html"), b"var j = 10;", 512));
        assert!(!is_html(None, b"{\"html\": true}", 512));
        assert!(!is_html(None, b"<html", 512), "tag must be terminated");
        assert!(!is_html(None, b"<applet>", 512));
        assert!(!is_html(None, b"<?xml version=\"1.0\"?>", 512));
    }

    #[test]
    fn test_sniff_window_limits_inspection() {
        let mut data = vec![b' '; 600];
        data.extend_from_slice(b"<html>");
        assert!(!is_html(None, &data, 512));
        assert!(is_html(None, &data, 1024));
    }

    #[test]
    fn test_empty_data_uses_extension() {
        assert!(is_html(Some("/site/Default.HTML"), b"", 512));
        assert!(is_html(Some("/page.htm?x=1.js"), b"", 512));
        assert!(!is_html(Some("/app.js"), b"", 512));
        assert!(!is_html(Some("/dir.html/"), b"", 512));
        assert!(!is_html(None, b"", 512));
    }
}
