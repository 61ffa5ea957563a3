//! Content-addressed replay cache for provider completions.
//!
//! Each request is fingerprinted by the SHA-1 of its serialised,
//! secret-redacted conversation. Replies are recorded redacted, so secrets
//! never reach disk; replaying substitutes the current secret values back
//! in. `serde_json` keeps object keys ordered, which makes the serialised
//! form canonical and the fingerprints stable across runs.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::AgentError;
use crate::models::message::Conversation;
use crate::providers::base::{Completion, ModelOptions, Provider};

/// When set, every request goes to the provider even on a cache hit
pub const NO_CACHE_ENV: &str = "LOWIRE_NO_CACHE";

/// When set, a cache miss is an error instead of a provider call
pub const FORCE_CACHE_ENV: &str = "LOWIRE_FORCE_CACHE";

pub type SecretMap = BTreeMap<String, String>;

/// Fingerprint-to-completion map, persisted as a single JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayCache(BTreeMap<String, Completion>);

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Completion> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: String, completion: Completion) {
        self.0.insert(key, completion);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Conventional location of a recorded cache file:
/// `<root>/__cache__/<provider>/<name>.json`, with the name reduced to
/// filesystem-safe characters
pub fn cache_path(root: &Path, provider: &str, name: &str) -> PathBuf {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    root.join("__cache__")
        .join(provider)
        .join(format!("{sanitized}.json"))
}

/// Previously recorded completions (`input`), the set being recorded now
/// (`output`), and the secrets to redact on the way in and out
#[derive(Debug, Clone, Default)]
pub struct ReplayCaches {
    pub input: ReplayCache,
    pub output: ReplayCache,
    pub secrets: SecretMap,
}

impl ReplayCaches {
    pub fn new(input: ReplayCache, secrets: SecretMap) -> Self {
        Self {
            input,
            output: ReplayCache::new(),
            secrets,
        }
    }
}

fn substitute<'a>(
    value: &Value,
    pairs: impl Iterator<Item = (&'a String, &'a String)>,
    to_placeholder: bool,
) -> Result<Value> {
    let mut text = serde_json::to_string(value)?;
    for (name, secret) in pairs {
        let placeholder = format!("<{name}>");
        if to_placeholder {
            text = text.replace(secret.as_str(), &placeholder);
        } else {
            text = text.replace(&placeholder, secret.as_str());
        }
    }
    Ok(serde_json::from_str(&text)?)
}

/// Replace every secret value with its `<NAME>` placeholder
pub fn redact(value: &Value, secrets: &SecretMap) -> Result<Value> {
    substitute(value, secrets.iter(), true)
}

/// Replace every `<NAME>` placeholder with its secret value
pub fn unredact(value: &Value, secrets: &SecretMap) -> Result<Value> {
    substitute(value, secrets.iter(), false)
}

fn redact_completion(completion: &Completion, secrets: &SecretMap) -> Result<Completion> {
    Ok(serde_json::from_value(redact(
        &serde_json::to_value(completion)?,
        secrets,
    )?)?)
}

fn unredact_completion(completion: &Completion, secrets: &SecretMap) -> Result<Completion> {
    Ok(serde_json::from_value(unredact(
        &serde_json::to_value(completion)?,
        secrets,
    )?)?)
}

/// Hex SHA-1 of the canonical serialisation
pub fn fingerprint(value: &Value) -> String {
    let digest = Sha1::digest(value.to_string().as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// `Provider::complete` with replay: look the redacted conversation up in
/// the recorded caches first, and record the redacted reply on a miss
pub async fn cached_complete(
    provider: &dyn Provider,
    conversation: &Conversation,
    caches: Option<&mut ReplayCaches>,
    options: &ModelOptions,
) -> Result<Completion> {
    let Some(caches) = caches else {
        return provider.complete(conversation, options).await;
    };

    let redacted = redact(&serde_json::to_value(conversation)?, &caches.secrets)?;
    let key = fingerprint(&redacted);

    if env::var(NO_CACHE_ENV).is_err() {
        if let Some(entry) = caches.input.get(&key).cloned() {
            debug!(key = %key, "replaying recorded completion");
            caches.output.insert(key, entry.clone());
            return unredact_completion(&entry, &caches.secrets);
        }
        if let Some(entry) = caches.output.get(&key).cloned() {
            debug!(key = %key, "replaying completion recorded this run");
            return unredact_completion(&entry, &caches.secrets);
        }
    }

    if env::var(FORCE_CACHE_ENV).is_ok() {
        return Err(AgentError::CacheMissing.into());
    }

    let completion = provider.complete(conversation, options).await?;
    caches
        .output
        .insert(key, redact_completion(&completion, &caches.secrets)?);
    Ok(completion)
}
