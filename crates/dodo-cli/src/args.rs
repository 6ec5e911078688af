//! Command-line arguments

use clap::Parser;
use std::time::Duration;

/// dodo — HTTP load generator
#[derive(Debug, Parser)]
#[command(
    name = "dodo",
    version,
    about = "HTTP load generator: concurrent templated requests, proxy screening, latency summary"
)]
pub struct Args {
    /// Config file: local path or http(s) URL, JSON or YAML
    #[arg(short, long)]
    pub config: Option<String>,

    /// Target URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// HTTP method
    #[arg(short, long)]
    pub method: Option<String>,

    /// Number of concurrent workers (dodos)
    #[arg(short, long)]
    pub dodos: Option<u64>,

    /// Total request budget (0 = unlimited, duration-driven)
    #[arg(short, long)]
    pub requests: Option<u64>,

    /// Wall-clock budget, e.g. 30s or 2m; with a request budget, whichever
    /// fires first ends the run
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Per-request timeout, e.g. 500ms or 2s
    #[arg(short, long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Query parameter as key=value; repeat for more (templates allowed)
    #[arg(short = 'p', long = "param")]
    pub params: Vec<String>,

    /// Header as key=value; repeat for more (templates allowed)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookie as key=value; repeat for more (templates allowed)
    #[arg(long = "cookie")]
    pub cookies: Vec<String>,

    /// Body template; repeat to pick one at random per request
    #[arg(short, long = "body")]
    pub body: Vec<String>,

    /// Proxy URL (http, socks5 or socks5h); repeat for more
    #[arg(short = 'x', long = "proxy")]
    pub proxies: Vec<String>,

    /// Disable TLS certificate verification
    #[arg(long)]
    pub skip_verify: bool,

    /// Skip the proxy liveness screening pass
    #[arg(long)]
    pub no_proxy_check: bool,

    /// Base seed for per-worker randomness (default: random)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Answer prompts with their default instead of asking
    #[arg(short, long)]
    pub yes: bool,
}

/// Parse durations like `500ms`, `2s`, `5m`, `1h`, or bare seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let err = || format!("invalid duration: {input}");

    if let Some(value) = input.strip_suffix("ms") {
        return value.trim().parse().map(Duration::from_millis).map_err(|_| err());
    }
    if let Some(value) = input.strip_suffix('h') {
        return value.trim().parse::<u64>().map(|h| Duration::from_secs(h * 3600)).map_err(|_| err());
    }
    if let Some(value) = input.strip_suffix('m') {
        return value.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60)).map_err(|_| err());
    }
    if let Some(value) = input.strip_suffix('s') {
        return value.trim().parse().map(Duration::from_secs).map_err(|_| err());
    }
    input.parse().map(Duration::from_secs).map_err(|_| err())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_duration_suffixes() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn args_parse_a_full_command_line() {
        let args = Args::parse_from([
            "dodo",
            "-u",
            "https://example.com/api",
            "-m",
            "POST",
            "-d",
            "8",
            "-r",
            "1000",
            "-t",
            "2s",
            "-p",
            "q={{ rand_str 4 }}",
            "-H",
            "Authorization=Bearer token",
            "-b",
            "{\"id\": \"{{ uuid }}\"}",
            "-x",
            "socks5://127.0.0.1:1080",
            "--yes",
        ]);
        assert_eq!(args.url.as_deref(), Some("https://example.com/api"));
        assert_eq!(args.dodos, Some(8));
        assert_eq!(args.requests, Some(1000));
        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.params.len(), 1);
        assert_eq!(args.proxies.len(), 1);
        assert!(args.yes);
    }
}
