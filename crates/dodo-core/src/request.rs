//! Per-request materialization
//!
//! Each worker owns a [`RequestFactory`]; every call to [`RequestFactory::next`]
//! samples one value per multi-valued field with the worker RNG, renders the
//! templates and assembles a concrete HTTP request. The factory is
//! single-threaded per worker; nothing here is shared.

use crate::plan::{CompiledKeyValue, CompiledPlan};
use crate::template::{FunctionRegistry, RenderContext, Template};
use rand::Rng;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use std::sync::Arc;
use url::Url;

/// A fully concrete request, alive from materialization until the exchange
/// completes or aborts.
#[derive(Debug)]
pub struct MaterializedRequest {
    pub method: Method,
    pub url: Url,
    /// Ordered header pairs; duplicate names are preserved.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// True when any field failed to render (the field became the empty
    /// string); the outcome for this request is labelled "template error".
    pub render_failed: bool,
}

impl MaterializedRequest {
    /// Convert into a `reqwest::Request` ready to execute. Header pairs
    /// that do not form valid HTTP header names/values are skipped with a
    /// warning rather than failing the request.
    pub fn into_reqwest(self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method, self.url);
        let headers = request.headers_mut();
        for (name, value) in self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid header"),
            }
        }
        if !self.body.is_empty() {
            *request.body_mut() = Some(self.body.into());
        }
        request
    }
}

/// Produces a freshly materialized request on every call.
pub struct RequestFactory {
    plan: Arc<CompiledPlan>,
    registry: Arc<FunctionRegistry>,
    ctx: RenderContext,
}

impl RequestFactory {
    pub fn new(plan: Arc<CompiledPlan>, registry: Arc<FunctionRegistry>, dodo_id: u64) -> Self {
        let ctx = RenderContext::new(plan.seed ^ dodo_id);
        Self {
            plan,
            registry,
            ctx,
        }
    }

    /// Materialize the next request.
    pub fn next(&mut self) -> MaterializedRequest {
        let mut render_failed = false;

        let query =
            render_pairs(&self.plan.params, &self.registry, &mut self.ctx, &mut render_failed);

        let mut headers =
            render_pairs(&self.plan.headers, &self.registry, &mut self.ctx, &mut render_failed);

        let cookies =
            render_pairs(&self.plan.cookies, &self.registry, &mut self.ctx, &mut render_failed);
        if !cookies.is_empty() {
            let joined = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            headers.push(("Cookie".to_string(), joined));
        }

        let mut body = Vec::new();
        if !self.plan.body.is_empty() {
            let idx = if self.plan.body.len() == 1 {
                0
            } else {
                self.ctx.rng.random_range(0..self.plan.body.len())
            };
            let rendered = render_or_empty(
                &self.plan.body[idx],
                &self.registry,
                &mut self.ctx,
                &mut render_failed,
            );
            body = rendered.into_bytes();
            // Helpers publish synthesized headers (multipart Content-Type)
            // through the side-band; they land after the user's own headers
            // so they never override anything explicitly configured.
            headers.extend(self.ctx.take_trailing_headers());
        }

        let mut url = self.plan.url.clone();
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &query {
                pairs.append_pair(k, v);
            }
        }

        if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("host")) {
            headers.insert(0, ("Host".to_string(), self.host_header()));
        }

        MaterializedRequest {
            method: self.plan.method.clone(),
            url,
            headers,
            body,
            render_failed,
        }
    }

    fn host_header(&self) -> String {
        match self.plan.url.port() {
            Some(port) => format!("{}:{}", self.plan.host, port),
            None => self.plan.host.clone(),
        }
    }
}

/// Render each spec's key once and one uniformly chosen value.
/// Spec order is preserved; duplicate keys stay duplicated.
fn render_pairs(
    specs: &[CompiledKeyValue],
    registry: &FunctionRegistry,
    ctx: &mut RenderContext,
    render_failed: &mut bool,
) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(specs.len());
    for spec in specs {
        let key = render_or_empty(&spec.key, registry, ctx, render_failed);
        let value = match spec.values.len() {
            0 => String::new(),
            1 => render_or_empty(&spec.values[0], registry, ctx, render_failed),
            n => {
                let idx = ctx.rng.random_range(0..n);
                render_or_empty(&spec.values[idx], registry, ctx, render_failed)
            }
        };
        pairs.push((key, value));
    }
    pairs
}

fn render_or_empty(
    template: &Template,
    registry: &FunctionRegistry,
    ctx: &mut RenderContext,
    render_failed: &mut bool,
) -> String {
    match template.render(registry, ctx) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "template render failed");
            *render_failed = true;
            String::new()
        }
    }
}
