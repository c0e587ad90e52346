//! RFC 2617 / RFC 7616 Digest access authentication.
//!
//! On first use against a given origin, issues a HEAD probe to read the
//! `WWW-Authenticate` challenge, caches it, then recomputes the `response`
//! hash on every subsequent request against that origin with a monotonic
//! nonce counter and (when `qop` is present) a fresh client nonce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest as _, Sha256};

use super::Authenticator;
use crate::error::IoError;

#[derive(Clone)]
struct Challenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    qop: Option<String>,
    algorithm: String,
}

/// Digest authenticator for a single set of credentials, usable against any
/// number of origins (each gets its own cached challenge, per §4.9/§5).
pub struct DigestAuth {
    username: String,
    password: String,
    challenges: DashMap<String, Challenge>,
    nonce_count: AtomicU64,
}

impl DigestAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            challenges: DashMap::new(),
            nonce_count: AtomicU64::new(0),
        }
    }

    async fn probe_challenge(
        &self,
        client: &reqwest::Client,
        url: &reqwest::Url,
    ) -> Option<Challenge> {
        let resp = client.head(url.clone()).send().await.ok()?;
        let header = resp
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)?
            .to_str()
            .ok()?;
        parse_challenge(header)
    }

    fn digest(algorithm: &str, input: &str) -> String {
        if algorithm.eq_ignore_ascii_case("sha-256") || algorithm.eq_ignore_ascii_case("sha256") {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            hex::encode(hasher.finalize())
        } else {
            format!("{:x}", md5::compute(input.as_bytes()))
        }
    }
}

#[async_trait]
impl Authenticator for DigestAuth {
    async fn authenticate(
        &self,
        client: &reqwest::Client,
        method: &reqwest::Method,
        url: &reqwest::Url,
    ) -> Result<Vec<(String, String)>, IoError> {
        let origin = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or_default()
        );

        let challenge = match self.challenges.get(&origin) {
            Some(c) => c.clone(),
            None => match self.probe_challenge(client, url).await {
                Some(c) => {
                    self.challenges.insert(origin, c.clone());
                    c
                }
                // Bootstrap failure: fall through unauthenticated; the
                // server will then surface PermissionDenied (§7).
                None => return Ok(Vec::new()),
            },
        };

        let nc = self.nonce_count.fetch_add(1, Ordering::SeqCst) + 1;
        let nc_str = format!("{nc:08x}");
        let cnonce: String = {
            let mut rng = rand::thread_rng();
            (0..16).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
        };

        let uri = url.path();
        let ha1 = Self::digest(
            &challenge.algorithm,
            &format!("{}:{}:{}", self.username, challenge.realm, self.password),
        );
        let ha2 = Self::digest(&challenge.algorithm, &format!("{}:{}", method.as_str(), uri));

        let response = match &challenge.qop {
            Some(qop) => Self::digest(
                &challenge.algorithm,
                &format!(
                    "{}:{}:{}:{}:{}:{}",
                    ha1, challenge.nonce, nc_str, cnonce, qop, ha2
                ),
            ),
            None => Self::digest(&challenge.algorithm, &format!("{}:{}:{}", ha1, challenge.nonce, ha2)),
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            self.username, challenge.realm, challenge.nonce, uri, response, challenge.algorithm
        );
        if let Some(qop) = &challenge.qop {
            header.push_str(&format!(", qop={qop}, nc={nc_str}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }

        Ok(vec![("Authorization".to_string(), header)])
    }
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let rest = header.strip_prefix("Digest ")?;
    let mut fields: HashMap<String, String> = HashMap::new();
    for part in split_params(rest) {
        if let Some((k, v)) = part.split_once('=') {
            let v = v.trim().trim_matches('"');
            fields.insert(k.trim().to_lowercase(), v.to_string());
        }
    }
    Some(Challenge {
        realm: fields.get("realm")?.clone(),
        nonce: fields.get("nonce")?.clone(),
        opaque: fields.get("opaque").cloned(),
        qop: fields.get("qop").cloned(),
        algorithm: fields.get("algorithm").cloned().unwrap_or_else(|| "MD5".to_string()),
    })
}

/// Split a comma-separated parameter list, respecting quoted commas.
fn split_params(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_challenge() {
        let header = r#"Digest realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;
        let c = parse_challenge(header).unwrap();
        assert_eq!(c.realm, "testrealm@host.com");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.algorithm, "MD5");
        assert!(c.opaque.is_some());
    }

    #[test]
    fn parses_challenge_without_qop() {
        let header = r#"Digest realm="r", nonce="n""#;
        let c = parse_challenge(header).unwrap();
        assert!(c.qop.is_none());
    }

    #[test]
    fn md5_digest_matches_rfc2617_example() {
        // HA1 for Mufasa:testrealm@host.com:Circle Of Life
        let ha1 = DigestAuth::digest("MD5", "Mufasa:testrealm@host.com:Circle Of Life");
        assert_eq!(ha1, "939e7578ed9e3c518a452acee763bce9");
    }
}
