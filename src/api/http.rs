//! Minimal HTTP/1.1 plumbing: request reading, form bodies, responses.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Outcome of reading a request off the socket.
pub(crate) enum ReadOutcome {
    Request(HttpRequest),
    /// Declared body exceeds the configured cap; the body was not read.
    TooLarge(usize),
}

pub(crate) fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<ReadOutcome> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n", 0) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > max_body {
        return Ok(ReadOutcome::TooLarge(content_length));
    }

    let mut body = data[header_end + 4..].to_vec();
    body.truncate(content_length);
    while body.len() < content_length {
        let want = (content_length - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!(
                "connection closed after {} of {} body bytes",
                body.len(),
                content_length
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(ReadOutcome::Request(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    }))
}

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

impl HttpRequest {
    fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Parts of a multipart body; empty when the body is not multipart.
    pub fn multipart(&self) -> Result<Vec<FormPart>> {
        let content_type = self.content_type();
        let (mime, params) = content_type.split_once(';').unwrap_or((content_type, ""));
        if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
            return Ok(Vec::new());
        }
        let boundary = header_params(params)
            .remove("boundary")
            .ok_or_else(|| anyhow!("multipart body without boundary"))?;
        parse_multipart(&self.body, &boundary)
    }

    /// A text field from either an urlencoded or a multipart form.
    pub fn form_field(&self, name: &str) -> Result<Option<String>> {
        let content_type = self.content_type().to_ascii_lowercase();
        if content_type.starts_with("application/x-www-form-urlencoded") {
            return Ok(url::form_urlencoded::parse(&self.body)
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned()));
        }
        Ok(self
            .multipart()?
            .into_iter()
            .find(|part| part.name == name && part.filename.is_none())
            .map(|part| String::from_utf8_lossy(&part.data).into_owned()))
    }
}

pub(crate) fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();
    let mut cursor =
        find(body, &delimiter, 0).ok_or_else(|| anyhow!("multipart boundary not found"))?;

    loop {
        let start = cursor + delimiter.len();
        if body[start..].starts_with(b"--") {
            break;
        }
        let next = find(body, &delimiter, start)
            .ok_or_else(|| anyhow!("unterminated multipart body"))?;
        let section = body[start..next]
            .strip_prefix(b"\r\n")
            .unwrap_or(&body[start..next]);
        let section = section.strip_suffix(b"\r\n").unwrap_or(section);

        let header_end =
            find(section, b"\r\n\r\n", 0).ok_or_else(|| anyhow!("multipart part without headers"))?;
        let header_text = String::from_utf8_lossy(&section[..header_end]);
        let mut name = None;
        let mut filename = None;
        for line in header_text.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if !key.trim().eq_ignore_ascii_case("content-disposition") {
                continue;
            }
            let params = value.split_once(';').map(|(_, p)| p).unwrap_or("");
            let mut params = header_params(params);
            name = params.remove("name");
            filename = params.remove("filename");
        }

        if let Some(name) = name {
            parts.push(FormPart {
                name,
                filename,
                data: section[header_end + 4..].to_vec(),
            });
        }
        cursor = next;
    }
    Ok(parts)
}

/// `key=value` parameters of a header value, lower-cased keys.
///
/// Quoted values may contain `;` and `\"` escapes.
fn header_params(params: &str) -> HashMap<String, String> {
    split_unquoted(params, ';')
        .into_iter()
        .filter_map(|param| param.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), unquote(v.trim())))
        .collect()
}

fn split_unquoted(text: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if in_quotes && c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            pieces.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    pieces.push(&text[start..]);
    pieces
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .map(|rest| rest.strip_suffix('"').unwrap_or(rest))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// A response ready to be written.
#[derive(Debug)]
pub(crate) struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub attachment: Option<&'static str>,
}

impl Response {
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
            attachment: None,
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    pub fn bytes(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type,
            body,
            attachment: None,
        }
    }

    pub fn as_attachment(mut self, filename: &'static str) -> Self {
        self.attachment = Some(filename);
        self
    }
}

pub(crate) fn write_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let disposition = response
        .attachment
        .map(|name| format!("Content-Disposition: attachment; filename=\"{}\"\r\n", name))
        .unwrap_or_default();
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
         {disposition}Cache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = response.content_type,
        len = response.body.len(),
        disposition = disposition,
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content_type: &str, body: &[u8]) -> HttpRequest {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        HttpRequest {
            method: "POST".to_string(),
            path: "/".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn parses_file_and_text_parts() -> Result<()> {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"truck photo.jpg\"\r\n\
Content-Type: image/jpeg\r\n\r\n\
\x00\x01\r\n\x02\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"rtsp_url\"\r\n\r\n\
rtsp://cam/1\r\n\
--XyZ--\r\n";
        let req = request("multipart/form-data; boundary=XyZ", body);

        let parts = req.multipart()?;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "file");
        assert_eq!(parts[0].filename.as_deref(), Some("truck photo.jpg"));
        assert_eq!(parts[0].data, b"\x00\x01\r\n\x02".to_vec());
        assert_eq!(req.form_field("rtsp_url")?.as_deref(), Some("rtsp://cam/1"));
        assert_eq!(req.form_field("file")?, None);
        Ok(())
    }

    #[test]
    fn reads_urlencoded_fields() -> Result<()> {
        let req = request(
            "application/x-www-form-urlencoded",
            b"rtsp_url=rtsp%3A%2F%2Fuser%40cam%2Fs&x=1",
        );
        assert_eq!(req.form_field("rtsp_url")?.as_deref(), Some("rtsp://user@cam/s"));
        assert!(req.multipart()?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_multipart_without_boundary() {
        let req = request("multipart/form-data", b"--a\r\n");
        assert!(req.multipart().is_err());
    }

    #[test]
    fn quoted_filename_may_contain_semicolons() -> Result<()> {
        let body = b"--b\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"yard;cam \\\"east\\\".jpg\"\r\n\r\n\
abc\r\n\
--b--\r\n";
        let parts = parse_multipart(body, "b")?;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "file");
        assert_eq!(parts[0].filename.as_deref(), Some("yard;cam \"east\".jpg"));
        assert_eq!(parts[0].data, b"abc".to_vec());
        Ok(())
    }

    #[test]
    fn header_params_split_outside_quotes_only() {
        let params = header_params(" boundary=\"a;b\"; charset=utf-8");
        assert_eq!(params.get("boundary").map(String::as_str), Some("a;b"));
        assert_eq!(params.get("charset").map(String::as_str), Some("utf-8"));
    }

    #[test]
    fn unterminated_multipart_is_an_error() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc";
        assert!(parse_multipart(body, "b").is_err());
    }
}
