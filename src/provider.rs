//! Provider SPI and configuration (C8, §4.8).
//!
//! [`Configuration`] is a flat property bag rooted at [`KEY_PREFIX`],
//! following the same "builder replaced by a plain struct plus a fallible
//! `build`-time validation" shape the rest of this crate uses (§9, §4.10).
//! [`Provider`] is the plug-in point; [`ProviderRegistry::resolve`]
//! implements the five-step dispatch algorithm from §4.8.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, ProviderError};
use crate::memory_cache::MemoryCacheConfig;
use crate::range_reader::RangeReader;

/// Stable key prefix for the flat property representation of a
/// [`Configuration`] (§6 "Configuration surface").
pub const KEY_PREFIX: &str = "io.tileverse.rangereader";

const KEY_URI: &str = "uri";
const KEY_PROVIDER: &str = "provider";
const KEY_CACHING_ENABLED: &str = "caching.enabled";
const KEY_CACHING_BLOCKALIGNED: &str = "caching.blockaligned";
const KEY_CACHING_BLOCKSIZE: &str = "caching.blocksize";

const DEFAULT_BLOCK_SIZE: u64 = 65536;

/// The type a [`Parameter`]'s value takes (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Boolean,
    Integer,
    String,
    Uri,
}

/// A typed value for a [`Parameter`], as held in a [`Configuration`] or
/// listed in its `enumeration`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    Uri(Url),
}

impl ParameterValue {
    fn to_flat(&self) -> String {
        match self {
            ParameterValue::Boolean(b) => b.to_string(),
            ParameterValue::Integer(n) => n.to_string(),
            ParameterValue::String(s) => s.clone(),
            ParameterValue::Uri(u) => u.to_string(),
        }
    }
}

/// A declared, typed configuration knob a [`Provider`] accepts (§4.8).
#[derive(Debug, Clone)]
pub struct Parameter {
    pub key: String,
    pub title: String,
    pub description: String,
    pub param_type: ParameterType,
    pub default: Option<ParameterValue>,
    pub enumeration: Option<Vec<ParameterValue>>,
    pub group: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, param_type: ParameterType, group: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: String::new(),
            description: String::new(),
            param_type,
            default: None,
            enumeration: None,
            group: group.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: ParameterValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enumeration(mut self, values: Vec<ParameterValue>) -> Self {
        self.enumeration = Some(values);
        self
    }
}

/// A resource URI plus a flat key→value map of parameter values (§4.8,
/// §3 "CacheKey" uses the resource URI indirectly via a reader's identity,
/// but a `Configuration` itself is purely descriptive — it names what to
/// build, not a built reader).
///
/// Serializes losslessly to/from the flat property set described in §6:
/// `*.uri`, `*.provider` are reserved; `*.caching.*` keys are interpreted
/// directly by [`ProviderRegistry::resolve`]; everything else passes
/// through to the chosen provider unchanged.
#[derive(Debug, Clone)]
pub struct Configuration {
    uri: Url,
    forced_provider: Option<String>,
    values: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            forced_provider: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with_forced_provider(mut self, id: impl Into<String>) -> Self {
        self.forced_provider = Some(id.into());
        self
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn forced_provider(&self) -> Option<&str> {
        self.forced_provider.as_deref()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    fn caching_enabled(&self) -> bool {
        self.get_bool(KEY_CACHING_ENABLED, true)
    }

    fn caching_block_aligned(&self) -> bool {
        self.get_bool(KEY_CACHING_BLOCKALIGNED, true)
    }

    fn caching_block_size(&self) -> u64 {
        self.get_i64(KEY_CACHING_BLOCKSIZE, DEFAULT_BLOCK_SIZE as i64).max(1) as u64
    }

    /// Parse a flat `io.tileverse.rangereader.*`-rooted property set into a
    /// `Configuration`. Keys outside the prefix are ignored; `*.uri` is
    /// required.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let dotted_prefix = format!("{KEY_PREFIX}.");
        let mut local: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in props {
            if let Some(rest) = k.strip_prefix(&dotted_prefix) {
                local.insert(rest.to_string(), v.clone());
            }
        }

        let uri_str = local.remove(KEY_URI).ok_or(ConfigError::MissingKey("uri"))?;
        let uri = Url::parse(&uri_str).map_err(|e| ConfigError::InvalidValue {
            key: "uri",
            message: e.to_string(),
        })?;
        let forced_provider = local.remove(KEY_PROVIDER);

        Ok(Self {
            uri,
            forced_provider,
            values: local,
        })
    }

    /// Flatten back to a `io.tileverse.rangereader.*`-rooted property set,
    /// losslessly round-tripping through [`Configuration::from_properties`].
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(format!("{KEY_PREFIX}.{KEY_URI}"), self.uri.to_string());
        if let Some(id) = &self.forced_provider {
            out.insert(format!("{KEY_PREFIX}.{KEY_PROVIDER}"), id.clone());
        }
        for (k, v) in &self.values {
            out.insert(format!("{KEY_PREFIX}.{k}"), v.clone());
        }
        out
    }
}

/// A pluggable backend factory: maps a URI (plus configuration) to a
/// concrete [`RangeReader`] (§4.8).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable short identifier, e.g. `"file"`, `"s3"`.
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Cheap environment check (e.g. "an HTTP client can be constructed").
    /// Does not perform I/O against the target resource.
    fn is_available(&self) -> bool {
        true
    }

    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    /// Lower runs first when disambiguating among several matching
    /// providers (§4.8 step 3).
    fn order(&self) -> i32 {
        0
    }

    /// Static check based only on URI scheme and hostname shape — no I/O.
    fn can_process(&self, config: &Configuration) -> bool;

    /// Called only to disambiguate among multiple HTTP-scheme candidates,
    /// after one HEAD/probe request. Default: never claims a match.
    fn can_process_headers(&self, _uri: &Url, _response_headers: &HeaderMap) -> bool {
        false
    }

    async fn create(&self, config: &Configuration) -> Result<Arc<dyn RangeReader>, ProviderError>;

    /// `<provider-id>.enabled` as an environment variable (§6 "Environment
    /// toggles"); absent means enabled.
    fn is_enabled(&self) -> bool {
        match std::env::var(format!("{}.enabled", self.id())) {
            Ok(v) => v.parse::<bool>().unwrap_or(true),
            Err(_) => true,
        }
    }
}

/// Holds the registered providers and implements the dispatch algorithm
/// (§4.8 "Dispatch algorithm").
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    probe_client: reqwest::Client,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            probe_client: reqwest::Client::new(),
        }
    }

    /// A registry with the five built-in providers (file, http/https, s3,
    /// azure, gcs) already registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for provider in builtin::all() {
            registry.register(provider);
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    fn enabled_and_available(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| p.is_enabled() && p.is_available())
    }

    /// Run the §4.8 dispatch algorithm and build the resulting reader,
    /// wrapping it in a memory cache per the `*.caching.*` keys unless
    /// disabled (§4.8 step 5).
    pub async fn resolve(&self, config: &Configuration) -> Result<Arc<dyn RangeReader>, ProviderError> {
        let provider = self.select_provider(config).await?;
        let reader = provider.create(config).await?;

        if config.caching_enabled() {
            let cfg = MemoryCacheConfig {
                block_aligned: config
                    .caching_block_aligned()
                    .then(|| config.caching_block_size()),
                ..Default::default()
            };
            let wrapped = cfg.build(reader)?;
            Ok(Arc::new(wrapped))
        } else {
            Ok(reader)
        }
    }

    async fn select_provider(&self, config: &Configuration) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(id) = config.forced_provider() {
            return self
                .providers
                .iter()
                .find(|p| p.id() == id)
                .cloned()
                .ok_or_else(|| ProviderError::ProviderNotFound(id.to_string()));
        }

        let candidates: Vec<Arc<dyn Provider>> = self
            .enabled_and_available()
            .filter(|p| p.can_process(config))
            .cloned()
            .collect();

        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }
        if candidates.is_empty() {
            return Err(ProviderError::NoProvider(config.uri().to_string()));
        }

        let scheme = config.uri().scheme();
        if scheme == "http" || scheme == "https" {
            if let Ok(resp) = self.probe_client.head(config.uri().clone()).send().await {
                let headers = resp.headers().clone();
                let mut ordered = candidates.clone();
                ordered.sort_by_key(|p| p.order());
                for p in &ordered {
                    if p.can_process_headers(config.uri(), &headers) {
                        return Ok(p.clone());
                    }
                }
            }
        }

        debug!(
            uri = %config.uri(),
            candidates = candidates.len(),
            "provider dispatch falling back to lowest-order candidate"
        );
        let mut ordered = candidates;
        ordered.sort_by_key(|p| p.order());
        Ok(ordered.into_iter().next().expect("candidates non-empty"))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

pub mod builtin;
