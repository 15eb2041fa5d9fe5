// Consul KV over HTTP
// GET /v1/kv/<prefix>?recurse lists, PUT /v1/kv/<key> writes

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::errors::{JsonContext, KvTreeError, Result};
use crate::store::{FlatRecord, StoreReader, StoreWriter};

const DEFAULT_ADDR: &str = "http://127.0.0.1:8500";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for a Consul agent
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    pub address: String,
    pub token: Option<String>,
    pub datacenter: Option<String>,
    pub timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        ConsulConfig {
            address: DEFAULT_ADDR.to_string(),
            token: None,
            datacenter: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    value: Option<String>,
}

/// Blocking Consul KV client
#[derive(Debug)]
pub struct ConsulStore {
    config: ConsulConfig,
    base: Url,
    client: Client,
}

impl ConsulStore {
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let base = parse_address(&config.address)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KvTreeError::Http {
                context: "building HTTP client".to_string(),
                source: e,
            })?;

        Ok(ConsulStore { config, base, client })
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    fn kv_url(&self, key: &str) -> Url {
        kv_url(&self.base, key)
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        let builder = match &self.config.datacenter {
            Some(dc) => builder.query(&[("dc", dc)]),
            None => builder,
        };
        match &self.config.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }
}

fn parse_address(address: &str) -> Result<Url> {
    let invalid = |reason: String| KvTreeError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("not a hierarchical URL".to_string()));
    }
    Ok(url)
}

/// `{base}/v1/kv/{key}` with every key segment percent-encoded, so `?`, `#`
/// and `%` stay part of the key.
fn kv_url(base: &Url, key: &str) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    // parse_address rejects cannot-be-a-base URLs
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(["v1", "kv"])
            .extend(key.trim_start_matches('/').split('/'));
    }
    url
}

/// Decodes the body of a recursive listing. Keys without a value (folders)
/// come back as empty byte strings.
fn decode_listing(body: &[u8]) -> Result<Vec<FlatRecord>> {
    let pairs: Vec<KvPair> = serde_json::from_slice(body).json_context("decoding KV listing")?;

    pairs
        .into_iter()
        .map(|pair| {
            let value = match pair.value {
                Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    KvTreeError::ReadFailed {
                        prefix: pair.key.clone(),
                        reason: format!("value is not valid base64: {}", e),
                    }
                })?,
                None => Vec::new(),
            };
            Ok(FlatRecord::new(pair.key, value))
        })
        .collect()
}

impl StoreReader for ConsulStore {
    fn list(&self, prefix: &str) -> Result<Vec<FlatRecord>> {
        let url = self.kv_url(prefix);
        debug!(%url, "listing prefix");

        let response = self
            .request(self.client.get(url.clone()).query(&[("recurse", "true")]))
            .send()
            .map_err(|e| KvTreeError::Http {
                context: format!("listing '{}'", prefix),
                source: e,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let body = response.bytes().map_err(|e| KvTreeError::Http {
                    context: format!("reading listing of '{}'", prefix),
                    source: e,
                })?;
                let records = decode_listing(&body)?;
                debug!(prefix, keys = records.len(), "listed prefix");
                Ok(records)
            }
            status => Err(KvTreeError::ReadFailed {
                prefix: prefix.to_string(),
                reason: format!("agent answered {}", status),
            }),
        }
    }
}

impl StoreWriter for ConsulStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_failed = |reason: String| KvTreeError::WriteFailed {
            key: key.to_string(),
            reason,
        };

        let response = self
            .request(self.client.put(self.kv_url(key)).body(value.to_vec()))
            .send()
            .map_err(|e| write_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(write_failed(format!("agent answered {}", status)));
        }

        let body = response.text().map_err(|e| write_failed(e.to_string()))?;
        if body.trim() != "true" {
            return Err(write_failed(format!("agent refused the write ({})", body.trim())));
        }

        trace!(key, bytes = value.len(), "wrote key");
        Ok(())
    }
}
