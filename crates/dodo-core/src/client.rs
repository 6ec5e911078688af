//! HTTP client pool: one keep-alive client per egress path
//!
//! Built once before workers start. Without proxies the pool holds a
//! single direct client; with proxies it holds one client per usable
//! proxy, optionally after a parallel liveness screening pass. Entries
//! are shared read-only for the whole run.

use crate::error::{DodoError, Result};
use crate::plan::CompiledPlan;
use crate::progress::{Confirm, ProgressListener};
use rand::rngs::StdRng;
use rand::Rng;
use reqwest::{Client, Proxy};
use std::sync::Arc;
use url::Url;

/// Lower bound for the per-host connection pool size.
const POOL_FLOOR: usize = 16;

/// Upper bound on concurrent proxy probes.
const SCREENING_CAP: usize = 32;

/// Liveness probe target; a proxy is kept only if a GET through it
/// returns HTTP 200 within the per-request timeout.
pub const LIVENESS_URL: &str = "https://api.ipify.org";

/// One egress path: a configured client plus its display address.
#[derive(Debug)]
pub struct ClientEntry {
    pub addr: String,
    pub client: Client,
}

/// The ordered set of clients available to workers.
#[derive(Debug)]
pub struct ClientPool {
    entries: Vec<ClientEntry>,
}

impl ClientPool {
    /// Build the pool for `plan`.
    ///
    /// When screening runs, the operator is asked once whether to
    /// continue; the suggested answer is *no* if no proxy survived and
    /// *yes* otherwise. Declining aborts with [`DodoError::Interrupted`]
    /// before any request is made. Accepting with zero survivors falls
    /// back to a direct client.
    pub async fn build(
        plan: &CompiledPlan,
        progress: Arc<dyn ProgressListener>,
        confirm: &dyn Confirm,
    ) -> Result<Self> {
        if plan.proxies.is_empty() {
            return Ok(Self {
                entries: vec![direct_entry(plan)?],
            });
        }

        let survivors = if plan.no_proxy_check {
            plan.proxies.clone()
        } else {
            let survivors = screen_proxies(plan, progress).await;
            let message = format!(
                "{} of {} proxies responded; continue?",
                survivors.len(),
                plan.proxies.len()
            );
            if !confirm.confirm(&message, !survivors.is_empty()) {
                return Err(DodoError::Interrupted);
            }
            survivors
        };

        let mut entries = Vec::with_capacity(survivors.len());
        for proxy in &survivors {
            match proxy_client(plan, proxy) {
                Ok(client) => entries.push(ClientEntry {
                    addr: proxy.to_string(),
                    client,
                }),
                Err(err) => {
                    tracing::warn!(proxy = %proxy, error = %err, "dropping unusable proxy");
                }
            }
        }

        if entries.is_empty() {
            if plan.no_proxy_check {
                return Err(DodoError::NoUsableClient);
            }
            tracing::warn!("no proxies remain; continuing with a direct client");
            entries.push(direct_entry(plan)?);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: usize) -> &ClientEntry {
        &self.entries[idx]
    }

    pub fn client(&self, idx: usize) -> &Client {
        &self.entries[idx].client
    }

    /// A per-worker selection cursor over the pool.
    pub fn cursor(&self, rng: &mut StdRng) -> ClientCursor {
        ClientCursor::new(self.entries.len(), rng)
    }
}

/// Round-robin over the pool from a worker-randomized start, re-randomized
/// after each full cycle so workers do not march through the proxies in
/// lock-step.
#[derive(Debug)]
pub struct ClientCursor {
    len: usize,
    pos: usize,
    left: usize,
}

impl ClientCursor {
    fn new(len: usize, rng: &mut StdRng) -> Self {
        debug_assert!(len > 0);
        let pos = if len > 1 { rng.random_range(0..len) } else { 0 };
        Self { len, pos, left: len }
    }

    pub fn next(&mut self, rng: &mut StdRng) -> usize {
        if self.len == 1 {
            return 0;
        }
        if self.left == 0 {
            self.pos = rng.random_range(0..self.len);
            self.left = self.len;
        }
        let idx = self.pos;
        self.pos = (self.pos + 1) % self.len;
        self.left -= 1;
        idx
    }
}

/// Per-host connection cap: `max(floor, effective workers) * 1.5`,
/// integer arithmetic.
fn pool_limit(effective_dodos: usize) -> usize {
    POOL_FLOOR.max(effective_dodos) * 3 / 2
}

fn base_builder(plan: &CompiledPlan) -> reqwest::ClientBuilder {
    let limit = pool_limit(plan.effective_dodos() as usize);
    let mut builder = Client::builder()
        .pool_max_idle_per_host(limit)
        .pool_idle_timeout(plan.timeout)
        .connect_timeout(plan.timeout)
        .timeout(plan.timeout);
    if plan.skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder
}

fn direct_entry(plan: &CompiledPlan) -> Result<ClientEntry> {
    let client = base_builder(plan).no_proxy().build()?;
    Ok(ClientEntry {
        addr: format!("{}://{}", plan.url.scheme(), plan.host),
        client,
    })
}

/// The proxy scheme picks the dialer: `http` tunnels with CONNECT,
/// `socks5`/`socks5h` speak SOCKS5 (the `h` variant resolves DNS on the
/// proxy). Credentials embedded in the URL are honored.
fn proxy_client(plan: &CompiledPlan, proxy: &Url) -> Result<Client> {
    let proxy = Proxy::all(proxy.as_str())?;
    Ok(base_builder(plan).proxy(proxy).build()?)
}

/// Probe every candidate proxy in parallel and keep the responsive ones,
/// preserving the configured order. Probe completions stream to the
/// progress listener.
async fn screen_proxies(plan: &CompiledPlan, progress: Arc<dyn ProgressListener>) -> Vec<Url> {
    let candidates = &plan.proxies;
    let task_count = (plan.dodo_count as usize)
        .min(candidates.len())
        .min(SCREENING_CAP)
        .max(1);

    progress.start(Some(candidates.len() as u64), "Screening proxies");

    // Build each probe client up front; an unparseable proxy is dropped
    // here the same way it would be at pool construction.
    let mut probes: Vec<(usize, Url, Client)> = Vec::with_capacity(candidates.len());
    for (idx, proxy) in candidates.iter().enumerate() {
        match proxy_client(plan, proxy) {
            Ok(client) => probes.push((idx, proxy.clone(), client)),
            Err(err) => {
                tracing::warn!(proxy = %proxy, error = %err, "dropping unusable proxy");
                progress.increment(1);
            }
        }
    }

    let mut chunks: Vec<Vec<(usize, Url, Client)>> = (0..task_count).map(|_| Vec::new()).collect();
    for (i, probe) in probes.into_iter().enumerate() {
        chunks[i % task_count].push(probe);
    }

    let mut handles = Vec::with_capacity(task_count);
    for chunk in chunks {
        let progress = Arc::clone(&progress);
        handles.push(tokio::spawn(async move {
            let mut alive = Vec::new();
            for (idx, proxy, client) in chunk {
                let ok = match client.get(LIVENESS_URL).send().await {
                    Ok(response) => response.status() == reqwest::StatusCode::OK,
                    Err(err) => {
                        tracing::debug!(proxy = %proxy, error = %err, "proxy probe failed");
                        false
                    }
                };
                if ok {
                    alive.push((idx, proxy));
                }
                progress.increment(1);
            }
            alive
        }));
    }

    let mut alive = Vec::new();
    for handle in handles {
        if let Ok(chunk_alive) = handle.await {
            alive.extend(chunk_alive);
        }
    }
    progress.finish(true);

    alive.sort_by_key(|(idx, _)| *idx);
    alive.into_iter().map(|(_, proxy)| proxy).collect()
}
