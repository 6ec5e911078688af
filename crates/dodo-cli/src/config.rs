//! Config loading and plan assembly
//!
//! A config file may live on disk or behind an http(s) URL and may be
//! JSON or YAML (`.json` extension or a JSON content type selects JSON).
//! Command-line flags always override file values; list-valued fields
//! (params, headers, cookies, body, proxies) are appended after the
//! file's own entries so both sources contribute.

use crate::args::{parse_duration, Args};
use anyhow::{bail, Context, Result};
use dodo_core::{KeyValueSpec, RequestPlan};
use serde::Deserialize;

/// The on-disk config model. Everything is optional; validation happens
/// when the merged plan is compiled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub url: Option<String>,
    pub method: Option<String>,
    /// Duration string, e.g. "2s" or "500ms".
    pub timeout: Option<String>,
    pub dodos: Option<u64>,
    pub requests: Option<u64>,
    /// Duration string, e.g. "1m".
    pub duration: Option<String>,
    #[serde(default)]
    pub params: Vec<KeyValueSpec>,
    #[serde(default)]
    pub headers: Vec<KeyValueSpec>,
    #[serde(default)]
    pub cookies: Vec<KeyValueSpec>,
    #[serde(default)]
    pub body: Vec<String>,
    #[serde(default)]
    pub proxies: Vec<String>,
    pub skip_verify: Option<bool>,
    pub no_proxy_check: Option<bool>,
    pub seed: Option<u64>,
}

/// Load a config from a local path or a remote http(s) URL.
pub async fn load(source: &str) -> Result<FileConfig> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source)
            .await
            .with_context(|| format!("failed to fetch config from {source}"))?
            .error_for_status()
            .with_context(|| format!("config fetch from {source} failed"))?;
        let is_json = source.ends_with(".json")
            || response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("json"));
        let text = response.text().await?;
        parse(&text, is_json)
    } else {
        let text = std::fs::read_to_string(source)
            .with_context(|| format!("failed to read config file {source}"))?;
        parse(&text, source.ends_with(".json"))
    }
}

fn parse(text: &str, is_json: bool) -> Result<FileConfig> {
    if is_json {
        serde_json::from_str(text).context("invalid JSON config")
    } else {
        serde_yaml::from_str(text).context("invalid YAML config")
    }
}

/// Merge CLI arguments over an optional file config into a plan.
pub fn build_plan(args: &Args, file: Option<FileConfig>) -> Result<RequestPlan> {
    let file = file.unwrap_or_default();

    let url = args.url.clone().or(file.url).ok_or(dodo_core::DodoError::MissingUrl)?;
    let mut plan = RequestPlan::new(&url)?;

    if let Some(method) = args.method.as_ref().or(file.method.as_ref()) {
        plan.method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| dodo_core::DodoError::InvalidMethod(method.clone()))?;
    }
    if let Some(timeout) = args.timeout {
        plan.timeout = timeout;
    } else if let Some(raw) = &file.timeout {
        plan.timeout = parse_duration(raw).map_err(anyhow::Error::msg)?;
    }
    if let Some(dodos) = args.dodos.or(file.dodos) {
        plan.dodo_count = dodos;
    }
    if let Some(requests) = args.requests.or(file.requests) {
        plan.request_count = requests;
    }
    if let Some(duration) = args.duration {
        plan.duration = Some(duration);
    } else if let Some(raw) = &file.duration {
        plan.duration = Some(parse_duration(raw).map_err(anyhow::Error::msg)?);
    }

    plan.params = file.params;
    plan.params.extend(parse_kv_args(&args.params, "param")?);
    plan.headers = file.headers;
    plan.headers.extend(parse_kv_args(&args.headers, "header")?);
    plan.cookies = file.cookies;
    plan.cookies.extend(parse_kv_args(&args.cookies, "cookie")?);
    plan.body = file.body;
    plan.body.extend(args.body.iter().cloned());

    let mut proxies = file.proxies;
    proxies.extend(args.proxies.iter().cloned());
    for raw in proxies {
        match raw.parse() {
            Ok(proxy) => plan.proxies.push(proxy),
            // Unparseable proxies are dropped, not fatal.
            Err(err) => tracing::warn!(proxy = %raw, error = %err, "dropping unparseable proxy"),
        }
    }

    plan.skip_verify = args.skip_verify || file.skip_verify.unwrap_or(false);
    plan.no_proxy_check = args.no_proxy_check || file.no_proxy_check.unwrap_or(false);
    plan.seed = args.seed.or(file.seed).unwrap_or_else(rand::random);

    Ok(plan)
}

fn parse_kv_args(raw: &[String], what: &str) -> Result<Vec<KeyValueSpec>> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Ok(KeyValueSpec::new(key, vec![value.to_string()])),
            None => bail!("invalid {what} `{entry}`: expected key=value"),
        })
        .collect()
}
