//! Template compilation and rendering
//!
//! Templates are strings with embedded `{{ fn arg ... }}` expressions.
//! Every template in a plan is compiled exactly once during validation;
//! compiled templates are immutable and shared across workers, while each
//! render call runs against a worker-local [`RenderContext`] so random
//! output differs per worker and per request.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while compiling or rendering a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated `{{{{` expression starting at byte {0}")]
    Unterminated(usize),

    #[error("empty expression at byte {0}")]
    EmptyExpression(usize),

    #[error("unterminated quoted argument at byte {0}")]
    UnterminatedQuote(usize),

    #[error("unknown function `{name}` at byte {offset}")]
    UnknownFunction { name: String, offset: usize },

    #[error("function `{name}` failed: {message}")]
    Render { name: String, message: String },
}

impl TemplateError {
    /// Shorthand used by helper implementations to report a render failure.
    pub fn render(name: &str, message: impl Into<String>) -> Self {
        Self::Render {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Call { name: String, args: Vec<String> },
}

/// A compiled template: literal text interleaved with function calls.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

/// Worker-local state threaded through every render call.
///
/// The RNG is seeded per worker; compiled templates never own one.
/// `trailing_headers` is the side-band used by body helpers (multipart)
/// to publish synthesized headers, drained by the request factory right
/// after the body render.
#[derive(Debug)]
pub struct RenderContext {
    pub rng: StdRng,
    pub trailing_headers: Vec<(String, String)>,
}

impl RenderContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            trailing_headers: Vec::new(),
        }
    }

    /// Take the headers published by helpers since the last call.
    pub fn take_trailing_headers(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.trailing_headers)
    }
}

/// A template helper: receives the worker context and the call arguments,
/// returns the replacement string.
pub type HelperFn =
    Arc<dyn Fn(&mut RenderContext, &[String]) -> Result<String, TemplateError> + Send + Sync>;

/// Named helper functions available to templates.
///
/// The engine treats the registry as opaque; the built-in catalog lives in
/// [`crate::functions`] and callers may register their own helpers on top.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    helpers: HashMap<String, HelperFn>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a helper under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, helper: F)
    where
        F: Fn(&mut RenderContext, &[String]) -> Result<String, TemplateError>
            + Send
            + Sync
            + 'static,
    {
        self.helpers.insert(name.to_string(), Arc::new(helper));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.helpers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry").field("helpers", &names).finish()
    }
}

impl Template {
    /// Compile `source` eagerly, resolving every function name against
    /// `registry`. Unknown functions and malformed expressions are
    /// compile-time errors so a bad plan is rejected before workers start.
    pub fn compile(source: &str, registry: &FunctionRegistry) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        let mut offset = 0usize;

        while let Some(open) = rest.find("{{") {
            literal.push_str(&rest[..open]);
            let expr_start = offset + open;
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or(TemplateError::Unterminated(expr_start))?;

            let inner = &after_open[..close];
            let (name, args) = parse_expression(inner, expr_start + 2)?;
            if !registry.contains(&name) {
                return Err(TemplateError::UnknownFunction {
                    name,
                    offset: expr_start,
                });
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Call { name, args });

            rest = &after_open[close + 2..];
            offset = expr_start + 2 + close + 2;
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Render against `registry` with the worker-local context.
    pub fn render(
        &self,
        registry: &FunctionRegistry,
        ctx: &mut RenderContext,
    ) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Call { name, args } => {
                    // Presence was checked at compile time; a helper can only
                    // be missing if the registry changed under us.
                    let helper = registry.get(name).ok_or_else(|| TemplateError::UnknownFunction {
                        name: name.clone(),
                        offset: 0,
                    })?;
                    out.push_str(&helper(ctx, args)?);
                }
            }
        }
        Ok(out)
    }
}

/// Split an expression body into a function name and its arguments.
///
/// Arguments are whitespace-separated; single or double quotes group an
/// argument containing spaces.
fn parse_expression(inner: &str, offset: usize) -> Result<(String, Vec<String>), TemplateError> {
    let mut words = Vec::new();
    let mut chars = inner.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' || c == '"' {
            chars.next();
            let mut word = String::new();
            let mut closed = false;
            for (_, qc) in chars.by_ref() {
                if qc == c {
                    closed = true;
                    break;
                }
                word.push(qc);
            }
            if !closed {
                return Err(TemplateError::UnterminatedQuote(offset + i));
            }
            words.push(word);
        } else {
            let mut word = String::new();
            while let Some(&(_, wc)) = chars.peek() {
                if wc.is_whitespace() {
                    break;
                }
                word.push(wc);
                chars.next();
            }
            words.push(word);
        }
    }

    if words.is_empty() {
        return Err(TemplateError::EmptyExpression(offset));
    }
    let name = words.remove(0);
    Ok((name, words))
}
