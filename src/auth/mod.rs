//! Authentication plug-in surface (C9, §4.9).
//!
//! An [`Authenticator`] decorates an outgoing `reqwest::RequestBuilder` with
//! whatever `Authorization` header its scheme requires. Implementations are
//! immutable after construction (I9) and safe to share across requests.

mod basic;
mod digest;

pub use basic::{ApiKeyAuth, BasicAuth, BearerAuth, HeaderMapAuth};
pub use digest::DigestAuth;

use async_trait::async_trait;

use crate::error::IoError;

/// Decorates an outgoing request with credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Given the method and URL about to be requested, return the headers
    /// to attach (as `(name, value)` pairs). Implementations that need to
    /// issue a probe request (Digest) do so internally and cache the
    /// result; this method otherwise performs no I/O.
    async fn authenticate(
        &self,
        client: &reqwest::Client,
        method: &reqwest::Method,
        url: &reqwest::Url,
    ) -> Result<Vec<(String, String)>, IoError>;
}

/// Apply an optional authenticator to a request builder.
pub async fn apply(
    auth: Option<&(dyn Authenticator)>,
    client: &reqwest::Client,
    method: reqwest::Method,
    url: reqwest::Url,
    mut builder: reqwest::RequestBuilder,
) -> Result<reqwest::RequestBuilder, IoError> {
    if let Some(auth) = auth {
        for (name, value) in auth.authenticate(client, &method, &url).await? {
            builder = builder.header(name, value);
        }
    }
    Ok(builder)
}
