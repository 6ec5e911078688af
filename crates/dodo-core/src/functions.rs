//! Built-in template helper catalog
//!
//! All randomness is drawn from the worker RNG in the render context, so
//! rendered output is reproducible for a fixed base seed. The `multipart`
//! helper publishes its synthesized `Content-Type` through the render
//! side-band instead of any global state.

use crate::template::{FunctionRegistry, RenderContext, TemplateError};
use rand::distr::Alphanumeric;
use rand::Rng;

/// Registry preloaded with the built-in helpers.
pub fn builtin_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();

    registry.register("uuid", |ctx: &mut RenderContext, _args: &[String]| {
        let bytes: [u8; 16] = ctx.rng.random();
        Ok(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
    });

    registry.register("now", |_ctx: &mut RenderContext, _args: &[String]| {
        Ok(chrono::Utc::now().to_rfc3339())
    });

    registry.register("timestamp", |_ctx: &mut RenderContext, _args: &[String]| {
        Ok(chrono::Utc::now().timestamp().to_string())
    });

    registry.register("rand_int", |ctx: &mut RenderContext, args: &[String]| {
        let (lo, hi) = int_bounds(args, "rand_int")?;
        Ok(ctx.rng.random_range(lo..=hi).to_string())
    });

    registry.register("rand_float", |ctx: &mut RenderContext, args: &[String]| {
        let n: f64 = if args.is_empty() {
            ctx.rng.random()
        } else {
            let lo = parse_f64(&args[0], "rand_float")?;
            let hi = parse_f64(args.get(1).map_or("1", String::as_str), "rand_float")?;
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            ctx.rng.random_range(lo..=hi)
        };
        Ok(format!("{:.6}", n))
    });

    registry.register("rand_str", |ctx: &mut RenderContext, args: &[String]| {
        let len: usize = match args.first() {
            Some(a) => a
                .parse()
                .map_err(|_| TemplateError::render("rand_str", format!("invalid length: {a}")))?,
            None => 8,
        };
        let mut out = String::with_capacity(len);
        for _ in 0..len {
            out.push(ctx.rng.sample(Alphanumeric) as char);
        }
        Ok(out)
    });

    registry.register("choice", |ctx: &mut RenderContext, args: &[String]| {
        if args.is_empty() {
            return Err(TemplateError::render("choice", "at least one argument is required"));
        }
        let idx = ctx.rng.random_range(0..args.len());
        Ok(args[idx].clone())
    });

    registry.register("multipart", |ctx: &mut RenderContext, args: &[String]| {
        if args.is_empty() {
            return Err(TemplateError::render(
                "multipart",
                "at least one name=value field is required",
            ));
        }
        let mut boundary = String::with_capacity(32);
        boundary.push_str("dodo");
        for _ in 0..24 {
            boundary.push(ctx.rng.sample(Alphanumeric) as char);
        }

        let mut body = String::new();
        for field in args {
            let (name, value) = field.split_once('=').ok_or_else(|| {
                TemplateError::render("multipart", format!("expected name=value, got `{field}`"))
            })?;
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));

        ctx.trailing_headers.push((
            "Content-Type".to_string(),
            format!("multipart/form-data; boundary={boundary}"),
        ));
        Ok(body)
    });

    registry
}

fn int_bounds(args: &[String], name: &str) -> Result<(i64, i64), TemplateError> {
    let lo = match args.first() {
        Some(a) => parse_i64(a, name)?,
        None => 0,
    };
    let hi = match args.get(1) {
        Some(a) => parse_i64(a, name)?,
        None => 1_000_000,
    };
    Ok(if lo <= hi { (lo, hi) } else { (hi, lo) })
}

fn parse_i64(arg: &str, name: &str) -> Result<i64, TemplateError> {
    arg.parse()
        .map_err(|_| TemplateError::render(name, format!("invalid integer: {arg}")))
}

fn parse_f64(arg: &str, name: &str) -> Result<f64, TemplateError> {
    arg.parse()
        .map_err(|_| TemplateError::render(name, format!("invalid number: {arg}")))
}
