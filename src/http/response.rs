//! Response handed to spider callbacks

use crate::http::Request;
use std::collections::BTreeMap;

/// Raw reply produced by a transport for a single attempt
///
/// The fetcher pairs it with the request it owns to build a `Response`.
#[derive(Debug, Clone, Default)]
pub struct ResponseParts {
    /// HTTP status code
    pub status: u16,
    /// Final URL after redirects
    pub url: String,
    /// Response headers (lower-case names)
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

/// A successfully fetched response together with its originating request
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    status: u16,
    url: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(request: Request, parts: ResponseParts) -> Self {
        Self {
            request,
            status: parts.status,
            url: parts.url,
            headers: parts.headers,
            body: parts.body,
        }
    }

    /// The request that produced this response
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Consumes the response and returns its request
    pub fn into_request(self) -> Request {
        self.request
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Final URL after redirects
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Looks up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_response(status: u16, body: &str) -> Response {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        Response::new(
            Request::get("https://example.com/"),
            ResponseParts {
                status,
                url: "https://example.com/".to_string(),
                headers,
                body: body.as_bytes().to_vec(),
            },
        )
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = create_test_response(200, "");
        assert_eq!(response.header("Content-Type"), Some("text/html"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_text_and_json() {
        let response = create_test_response(200, r#"{"count": 3}"#);
        assert!(response.text().contains("count"));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_is_success() {
        assert!(create_test_response(204, "").is_success());
        assert!(!create_test_response(404, "").is_success());
    }
}
