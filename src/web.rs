//! Web tools: fetch pages, call HTTP APIs and strip HTML to text

use crate::error::{OrcliError, Result};
use regex::RegexBuilder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Default request timeout for web commands
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse and check an http(s) URL
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| OrcliError::validation(format!("invalid URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(OrcliError::validation(format!("URL '{}' has no host", raw))),
        other => Err(OrcliError::validation(format!(
            "unsupported URL scheme '{}' (use http or https)",
            other
        ))),
    }
}

/// Body of a fetched page
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FetchBody {
    Json(Value),
    Text(String),
}

/// Result of [`WebClient::fetch`]
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub content_length: usize,
    pub headers: BTreeMap<String, String>,
    pub body: FetchBody,
    /// Plain text of an HTML page, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

impl FetchResult {
    /// Text to save for `--save-to`: extracted text, else the raw body
    pub fn saveable_text(&self) -> String {
        if let Some(text) = &self.extracted_text {
            return text.clone();
        }
        match &self.body {
            FetchBody::Text(text) => text.clone(),
            FetchBody::Json(value) => serde_json::to_string_pretty(value).unwrap_or_default(),
        }
    }
}

/// Result of [`WebClient::api_request`]
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub success: bool,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    pub data: Value,
}

/// Blocking HTTP client for the web commands
#[derive(Debug, Clone)]
pub struct WebClient {
    client: Client,
}

impl WebClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("orcli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OrcliError::remote(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// GET a URL; non-2xx statuses are errors
    #[instrument(skip(self))]
    pub fn fetch(&self, raw_url: &str, extract: bool) -> Result<FetchResult> {
        let url = validate_url(raw_url)?;
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrcliError::remote(format!("HTTP {} from {}", status, url)));
        }

        let headers = header_map(response.headers());
        let content_type = content_type(response.headers());
        let bytes = response.bytes()?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let body = if content_type.contains("application/json") {
            serde_json::from_str(&text)
                .map(FetchBody::Json)
                .unwrap_or(FetchBody::Text(text))
        } else {
            FetchBody::Text(text)
        };
        let extracted_text = match (&body, extract) {
            (FetchBody::Text(text), true) if content_type.contains("html") => Some(extract_text(text)),
            _ => None,
        };

        debug!("Fetched {} ({} bytes, {})", url, bytes.len(), content_type);
        Ok(FetchResult {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            content_length: bytes.len(),
            headers,
            body,
            extracted_text,
        })
    }

    /// Send an arbitrary request
    ///
    /// `data` is sent as JSON when it parses as JSON, raw otherwise. `headers`
    /// must be a JSON object of strings. A non-2xx answer is returned with
    /// `success == false` rather than as an error.
    #[instrument(skip(self, data, headers))]
    pub fn api_request(
        &self,
        raw_url: &str,
        method: &str,
        data: Option<&str>,
        headers: Option<&str>,
    ) -> Result<ApiResponse> {
        let url = validate_url(raw_url)?;
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| OrcliError::validation(format!("invalid HTTP method '{}'", method)))?;

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json")
            .headers(parse_headers(headers)?);

        if let Some(data) = data {
            request = match serde_json::from_str::<Value>(data) {
                Ok(json) => request.json(&json),
                Err(_) => request.body(data.to_string()),
            };
        }

        let response = request.send()?;
        let status = response.status();
        let headers = header_map(response.headers());
        let content_type = content_type(response.headers());
        let text = response.text()?;
        let data = if content_type.starts_with("application/json") {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(ApiResponse {
            url: url.to_string(),
            method: method.to_string(),
            status: status.as_u16(),
            success: status.is_success(),
            content_type,
            headers,
            data,
        })
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Parse `{"Name": "value"}` into request headers
pub fn parse_headers(raw: Option<&str>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    let Some(raw) = raw else {
        return Ok(map);
    };
    let object: BTreeMap<String, String> = serde_json::from_str(raw)
        .map_err(|e| OrcliError::validation(format!("headers must be a JSON object of strings: {}", e)))?;
    for (name, value) in object {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| OrcliError::validation(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| OrcliError::validation(format!("invalid value for header '{}'", name)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Strip an HTML document down to readable text
///
/// Script and style blocks are dropped, tags removed, common entities decoded
/// and whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let patterns = [
        r"<script[^>]*>.*?</script>",
        r"<style[^>]*>.*?</style>",
        r"<!--.*?-->",
        r"<[^>]+>",
    ];

    let mut text = html.to_string();
    for pattern in patterns {
        if let Ok(re) = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
        {
            text = re.replace_all(&text, " ").into_owned();
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned HTTP response on a random local port
    fn serve_once(status: &str, content_type: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        );
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/a?b=c").is_ok());
        assert!(matches!(validate_url("example.com"), Err(OrcliError::Validation(_))));
        assert!(matches!(validate_url("ftp://example.com"), Err(OrcliError::Validation(_))));
    }

    #[test]
    fn test_extract_text() {
        let html = r#"<html><head><style>body { color: red; }</style>
            <script type="text/javascript">alert("x");</script></head>
            <body><!-- hidden --><h1>Title</h1><p>Fish &amp; chips&nbsp;here</p></body></html>"#;
        assert_eq!(extract_text(html), "Title Fish & chips here");
    }

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(Some(r#"{"X-Token": "abc"}"#)).unwrap();
        assert_eq!(headers.get("x-token").unwrap(), "abc");
        assert!(parse_headers(Some("not json")).is_err());
        assert!(parse_headers(None).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_html_with_extraction() {
        let url = serve_once("200 OK", "text/html; charset=utf-8", "<p>Hello <b>web</b></p>");
        let client = WebClient::new(Duration::from_secs(5)).unwrap();

        let result = client.fetch(&url, true).unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.extracted_text.as_deref(), Some("Hello web"));
        assert_eq!(result.saveable_text(), "Hello web");
    }

    #[test]
    fn test_fetch_error_status_is_remote_error() {
        let url = serve_once("404 Not Found", "text/plain", "nope");
        let client = WebClient::new(Duration::from_secs(5)).unwrap();
        assert!(matches!(client.fetch(&url, false), Err(OrcliError::RemoteCall(_))));
    }

    #[test]
    fn test_api_request_parses_json() {
        let url = serve_once("201 Created", "application/json", r#"{"id": 7}"#);
        let client = WebClient::new(Duration::from_secs(5)).unwrap();

        let response = client
            .api_request(&url, "post", Some(r#"{"name": "x"}"#), None)
            .unwrap();
        assert!(response.success);
        assert_eq!(response.method, "POST");
        assert_eq!(response.data["id"], 7);

        assert!(matches!(
            client.api_request(&url, "not a method", None, None),
            Err(OrcliError::Validation(_))
        ));
    }
}
