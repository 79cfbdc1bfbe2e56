// API client module: a small blocking HTTP client that talks to the OTX
// DirectConnect API. One call, one GET; pagination lives in `paginate`.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;

/// Header carrying the raw API key on every request (`X-OTX-API-KEY`;
/// header names are case-insensitive and `http` stores them lowercased).
pub const AUTH_HEADER: &str = "x-otx-api-key";

/// Decoded body of one API response together with its HTTP status.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

/// Anything able to GET a path on the API and decode the JSON body.
///
/// `path` is everything after the host, query string included. The
/// pagination layer only depends on this trait so it can be driven by
/// a canned implementation in tests.
pub trait Fetch {
    fn get(&self, path: &str) -> Result<Response>;
}

/// Blocking client bound to one API host and key.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Build the client from the run configuration. The key is installed
    /// as a default header so every request carries it.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder().default_headers(Self::auth_headers(&config.api_key));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(ApiClient {
            client: builder.build()?,
            base_url: config.base_url.clone(),
        })
    }

    fn auth_headers(api_key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(api_key) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(HeaderName::from_static(AUTH_HEADER), value);
            }
            Err(_) => warn!("API key contains characters not allowed in a header; sending without it"),
        }
        headers
    }
}

impl Fetch for ApiClient {
    /// Issue one GET. A non-200 status is logged, not raised: OTX error
    /// bodies are still JSON and the caller decides what to do with them.
    fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        info!("Issuing request for: {url}");

        let res = self.client.get(&url).send()?;
        let status = res.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "OTX returned {status} for {url}");
        }
        let body: Value = serde_json::from_slice(&res.bytes()?)?;
        Ok(Response {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Serve one canned HTTP response on a loopback port. The handle
    /// yields the raw request head the client sent.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let base_url = format!("http://{}/", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).expect("read request");
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write response");
            String::from_utf8_lossy(&head).into_owned()
        });
        (base_url, handle)
    }

    #[test]
    fn auth_header_carries_raw_key() {
        let headers = ApiClient::auth_headers("abc123");
        let value = headers.get(AUTH_HEADER).expect("auth header");
        assert_eq!(value.to_str().unwrap(), "abc123");
        assert!(value.is_sensitive());
        assert!(headers.get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn error_status_still_returns_decoded_body() {
        let (base_url, server) = serve_once("403 Forbidden", r#"{"detail":"nope"}"#);
        let client = ApiClient::new(&Config::new(base_url, "k-123")).unwrap();

        let response = client.get("/api/v1/indicators/cve/CVE-2021-44228/general").unwrap();

        assert_eq!(response.status, 403);
        assert_eq!(response.body, serde_json::json!({ "detail": "nope" }));

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /api/v1/indicators/cve/CVE-2021-44228/general HTTP/1.1\r\n"));
        let lowered = request.to_ascii_lowercase();
        assert!(lowered.contains("\r\nx-otx-api-key: k-123\r\n"));
        assert!(!lowered.contains("authorization:"));
    }

    #[test]
    fn non_json_body_is_a_decode_error() {
        let (base_url, server) = serve_once("200 OK", "<html>maintenance</html>");
        let client = ApiClient::new(&Config::new(base_url, "k-123")).unwrap();

        let err = client.get("/api/v1/pulses/abc/indicators").unwrap_err();

        assert!(matches!(err, Error::Decode(_)));
        server.join().unwrap();
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let config = Config::new("http://127.0.0.1:9", "key");
        let client = ApiClient::new(&config).unwrap();
        let err = client.get("/api/v1/pulses/x/indicators").unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
