//! Static authentication schemes: Basic, Bearer, API key, arbitrary headers.

use async_trait::async_trait;
use base64::Engine;

use super::Authenticator;
use crate::error::IoError;

/// HTTP Basic authentication (RFC 7617).
pub struct BasicAuth {
    header_value: String,
}

impl BasicAuth {
    pub fn new(username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let raw = format!("{}:{}", username.as_ref(), password.as_ref());
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        Self {
            header_value: format!("Basic {encoded}"),
        }
    }
}

#[async_trait]
impl Authenticator for BasicAuth {
    async fn authenticate(
        &self,
        _client: &reqwest::Client,
        _method: &reqwest::Method,
        _url: &reqwest::Url,
    ) -> Result<Vec<(String, String)>, IoError> {
        Ok(vec![("Authorization".to_string(), self.header_value.clone())])
    }
}

/// Bearer token authentication.
pub struct BearerAuth {
    header_value: String,
}

impl BearerAuth {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self {
            header_value: format!("Bearer {}", token.as_ref()),
        }
    }
}

#[async_trait]
impl Authenticator for BearerAuth {
    async fn authenticate(
        &self,
        _client: &reqwest::Client,
        _method: &reqwest::Method,
        _url: &reqwest::Url,
    ) -> Result<Vec<(String, String)>, IoError> {
        Ok(vec![("Authorization".to_string(), self.header_value.clone())])
    }
}

/// API key sent as a header, with an optional value prefix (e.g. `"Token "`).
pub struct ApiKeyAuth {
    header_name: String,
    header_value: String,
}

impl ApiKeyAuth {
    pub fn new(header_name: impl Into<String>, key: impl AsRef<str>, prefix: Option<&str>) -> Self {
        let header_value = match prefix {
            Some(p) => format!("{p}{}", key.as_ref()),
            None => key.as_ref().to_string(),
        };
        Self {
            header_name: header_name.into(),
            header_value,
        }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuth {
    async fn authenticate(
        &self,
        _client: &reqwest::Client,
        _method: &reqwest::Method,
        _url: &reqwest::Url,
    ) -> Result<Vec<(String, String)>, IoError> {
        Ok(vec![(self.header_name.clone(), self.header_value.clone())])
    }
}

/// An arbitrary fixed set of headers, for backends whose auth scheme this
/// crate has no dedicated type for.
pub struct HeaderMapAuth {
    headers: Vec<(String, String)>,
}

impl HeaderMapAuth {
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl Authenticator for HeaderMapAuth {
    async fn authenticate(
        &self,
        _client: &reqwest::Client,
        _method: &reqwest::Method,
        _url: &reqwest::Url,
    ) -> Result<Vec<(String, String)>, IoError> {
        Ok(self.headers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_auth_encodes_credentials() {
        let auth = BasicAuth::new("alice", "secret");
        let client = reqwest::Client::new();
        let url = reqwest::Url::parse("https://example.com").unwrap();
        let headers = auth
            .authenticate(&client, &reqwest::Method::GET, &url)
            .await
            .unwrap();
        assert_eq!(headers[0].0, "Authorization");
        assert!(headers[0].1.starts_with("Basic "));
    }

    #[tokio::test]
    async fn bearer_auth_formats_token() {
        let auth = BearerAuth::new("tok123");
        let client = reqwest::Client::new();
        let url = reqwest::Url::parse("https://example.com").unwrap();
        let headers = auth
            .authenticate(&client, &reqwest::Method::GET, &url)
            .await
            .unwrap();
        assert_eq!(headers[0].1, "Bearer tok123");
    }

    #[tokio::test]
    async fn api_key_auth_applies_prefix() {
        let auth = ApiKeyAuth::new("X-Api-Key", "abc", Some("Token "));
        let client = reqwest::Client::new();
        let url = reqwest::Url::parse("https://example.com").unwrap();
        let headers = auth
            .authenticate(&client, &reqwest::Method::GET, &url)
            .await
            .unwrap();
        assert_eq!(headers[0], ("X-Api-Key".to_string(), "Token abc".to_string()));
    }
}
