//! Net effect operations: `httpGet`, `httpPost`, `httpRequest`.
//!
//! All failures come back to the program as `Err(NetError)` values —
//! `Transport`, `DisallowedHost`, `InvalidHeader`, `BodyTooLarge` — never
//! as diagnostics; only a missing `Net` capability aborts the run.
//!
//! The security policy runs entirely before any request I/O:
//! - scheme: `https` always, `http` only with `allow_http`, anything else
//!   rejected;
//! - optional domain allowlist with `*.example.com` wildcards;
//! - the hostname is resolved once and every resulting IP is checked
//!   against loopback/private/link-local/unspecified ranges (unless
//!   `allow_localhost`); the request then dials the *validated* addresses
//!   via a pinned resolver, so a second lookup can never rebind the name;
//! - redirects are followed manually (auto-redirects are off), re-running
//!   the whole validation at each hop and stripping `Authorization` when
//!   the origin changes;
//! - response bodies are read through a counted reader capped at
//!   `max_bytes`.
//!
//! In deterministic mode (`AILANG_SEED`) the network is disabled outright:
//! every op returns `Err(Transport(...))` before any I/O.

use std::{
    collections::BTreeMap,
    io::Read as _,
    net::{IpAddr, SocketAddr, ToSocketAddrs as _},
    rc::Rc,
    time::Duration,
};

use reqwest::{
    Method, Url,
    header::{HeaderName, HeaderValue},
};

use crate::{
    diagnostics::{DiagResult, Diagnostic, ErrorCode},
    value::Value,
};

use super::OpEnv;

/// Network policy from CLI flags, checked before any I/O.
#[derive(Debug, Clone)]
pub struct NetPolicy {
    /// Optional domain allowlist; `*.example.com` matches subdomains.
    pub allow_domains: Option<Vec<String>>,
    pub allow_localhost: bool,
    pub allow_http: bool,
    pub timeout: Duration,
    pub max_bytes: u64,
    pub max_redirects: u32,
}

impl Default for NetPolicy {
    fn default() -> Self {
        Self {
            allow_domains: None,
            allow_localhost: false,
            allow_http: false,
            timeout: Duration::from_secs(30),
            max_bytes: 5 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

/// A policy or transport failure, surfaced as a `NetError` value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NetFailure {
    Transport(String),
    DisallowedHost(String),
    InvalidHeader(String),
    BodyTooLarge(String),
}

impl NetFailure {
    fn ctor(&self) -> &'static str {
        match self {
            Self::Transport(_) => "Transport",
            Self::DisallowedHost(_) => "DisallowedHost",
            Self::InvalidHeader(_) => "InvalidHeader",
            Self::BodyTooLarge(_) => "BodyTooLarge",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Transport(m) | Self::DisallowedHost(m) | Self::InvalidHeader(m) | Self::BodyTooLarge(m) => m,
        }
    }
}

struct HttpOk {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
}

fn ok_value(ok: HttpOk) -> Value {
    let mut fields = BTreeMap::new();
    fields.insert("status".to_owned(), Value::Int(i64::from(ok.status)));
    fields.insert("body".to_owned(), Value::str(ok.body));
    let headers = ok
        .headers
        .into_iter()
        .map(|(name, value)| Value::Tuple(Rc::new(vec![Value::str(name), Value::str(value)])))
        .collect();
    fields.insert("headers".to_owned(), Value::List(Rc::new(headers)));
    Value::tagged("Result", "Ok", vec![Value::Record(Rc::new(fields))])
}

fn err_value(failure: &NetFailure) -> Value {
    let inner = Value::tagged("NetError", failure.ctor(), vec![Value::str(failure.message().to_owned())]);
    Value::tagged("Result", "Err", vec![inner])
}

fn str_arg(args: &[Value], index: usize, what: &str) -> DiagResult<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            format!("{what} expected a string, got {}", other.kind_name()),
        )),
        None => Err(Diagnostic::runtime(
            ErrorCode::RtArity,
            format!("{what} missing an argument"),
        )),
    }
}

fn header_args(args: &[Value], index: usize) -> DiagResult<Vec<(String, String)>> {
    let Some(Value::List(items)) = args.get(index) else {
        return Err(Diagnostic::runtime(
            ErrorCode::RtTypeError,
            "httpRequest expected a header list",
        ));
    };
    let mut headers = Vec::with_capacity(items.len());
    for item in items.iter() {
        let Value::Tuple(pair) = item else {
            return Err(Diagnostic::runtime(
                ErrorCode::RtTypeError,
                "headers must be (string, string) tuples",
            ));
        };
        match (pair.first(), pair.get(1)) {
            (Some(Value::Str(name)), Some(Value::Str(value))) => {
                headers.push((name.to_string(), value.to_string()));
            }
            _ => {
                return Err(Diagnostic::runtime(
                    ErrorCode::RtTypeError,
                    "headers must be (string, string) tuples",
                ));
            }
        }
    }
    Ok(headers)
}

pub(super) fn http_get(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let url = str_arg(args, 0, "httpGet")?;
    Ok(perform(env, "GET", &url, Vec::new(), None))
}

pub(super) fn http_post(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let url = str_arg(args, 0, "httpPost")?;
    let body = str_arg(args, 1, "httpPost")?;
    Ok(perform(env, "POST", &url, Vec::new(), Some(body)))
}

pub(super) fn http_request(env: &mut OpEnv<'_>, args: &[Value]) -> DiagResult<Value> {
    let method = str_arg(args, 0, "httpRequest")?;
    let url = str_arg(args, 1, "httpRequest")?;
    let headers = header_args(args, 2)?;
    let body = str_arg(args, 3, "httpRequest")?;
    Ok(perform(env, &method, &url, headers, Some(body)))
}

fn perform(env: &mut OpEnv<'_>, method: &str, url: &str, headers: Vec<(String, String)>, body: Option<String>) -> Value {
    if env.ctx.deterministic {
        return err_value(&NetFailure::Transport("network disabled in deterministic mode".to_owned()));
    }
    match fetch(&env.ctx.net, method, url, headers, body) {
        Ok(ok) => ok_value(ok),
        Err(failure) => err_value(&failure),
    }
}

/// Hop-by-hop headers a request may never smuggle in, plus `host` and
/// `content-length`, which belong to the transport.
const FORBIDDEN_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn validate_headers(headers: Vec<(String, String)>) -> Result<Vec<(HeaderName, HeaderValue)>, NetFailure> {
    let mut out = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.to_lowercase();
        if FORBIDDEN_HEADERS.contains(&lower.as_str()) {
            return Err(NetFailure::InvalidHeader(format!("header `{name}` is not allowed")));
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| NetFailure::InvalidHeader(format!("invalid header name `{name}`")))?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|_| NetFailure::InvalidHeader(format!("invalid value for `{name}`")))?;
        out.push((header_name, header_value));
    }
    Ok(out)
}

/// `true` for loopback, RFC1918 private, link-local, unspecified, and
/// their IPv6 equivalents (including v4-mapped addresses).
fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_disallowed_ip(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback() || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (first & 0xffc0) == 0xfe80 // link local fe80::/10
        }
    }
}

/// Checks a host against the allowlist: exact match, or a `*.` pattern
/// matching any subdomain.
fn domain_allowed(allowlist: &[String], host: &str) -> bool {
    let host = host.to_lowercase();
    allowlist.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        if let Some(suffix) = pattern.strip_prefix("*.") {
            host.ends_with(&format!(".{suffix}")) || host == suffix
        } else {
            host == pattern
        }
    })
}

/// Runs the full pre-I/O validation for one URL and returns the addresses
/// to dial. DNS resolution happens exactly once, here.
fn validate_target(policy: &NetPolicy, url: &Url) -> Result<Vec<SocketAddr>, NetFailure> {
    match url.scheme() {
        "https" => {}
        "http" => {
            if !policy.allow_http {
                return Err(NetFailure::DisallowedHost(
                    "http scheme requires --net-allow-http".to_owned(),
                ));
            }
        }
        other => return Err(NetFailure::Transport(format!("scheme `{other}` is not supported"))),
    }
    let Some(host) = url.host_str() else {
        return Err(NetFailure::Transport("url has no host".to_owned()));
    };
    if let Some(allowlist) = &policy.allow_domains
        && !domain_allowed(allowlist, host)
    {
        return Err(NetFailure::DisallowedHost(format!("host `{host}` is not on the allowlist")));
    }
    let Some(port) = url.port_or_known_default() else {
        return Err(NetFailure::Transport("url has no usable port".to_owned()));
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<SocketAddr> = if let Ok(ip) = host.parse::<IpAddr>() {
        vec![SocketAddr::new(ip, port)]
    } else {
        (host, port)
            .to_socket_addrs()
            .map_err(|e| NetFailure::Transport(format!("cannot resolve `{host}`: {e}")))?
            .collect()
    };
    if addrs.is_empty() {
        return Err(NetFailure::Transport(format!("`{host}` resolved to no addresses")));
    }
    for addr in &addrs {
        if is_disallowed_ip(addr.ip()) && !policy.allow_localhost {
            return Err(NetFailure::DisallowedHost(format!(
                "host `{host}` resolves to disallowed address {}",
                addr.ip()
            )));
        }
    }
    Ok(addrs)
}

fn origin_of(url: &Url) -> (String, Option<String>, Option<u16>) {
    (
        url.scheme().to_owned(),
        url.host_str().map(str::to_lowercase),
        url.port_or_known_default(),
    )
}

fn fetch(
    policy: &NetPolicy,
    method: &str,
    url: &str,
    headers: Vec<(String, String)>,
    body: Option<String>,
) -> Result<HttpOk, NetFailure> {
    let mut url = Url::parse(url).map_err(|e| NetFailure::Transport(format!("invalid url: {e}")))?;
    let mut headers = validate_headers(headers)?;
    let mut method = Method::from_bytes(method.as_bytes())
        .map_err(|_| NetFailure::Transport(format!("invalid method `{method}`")))?;
    let mut body = body;

    for _hop in 0..=policy.max_redirects {
        let addrs = validate_target(policy, &url)?;
        let host = url.host_str().expect("validated url has a host").to_owned();

        let mut builder = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(policy.timeout);
        if host.parse::<IpAddr>().is_err() {
            // Pin the name to the addresses validated above: the transport
            // never re-resolves, so DNS rebinding cannot swap the target.
            builder = builder.resolve_to_addrs(&host, &addrs);
        }
        let client = builder
            .build()
            .map_err(|e| NetFailure::Transport(format!("client setup failed: {e}")))?;

        let mut request = client.request(method.clone(), url.clone());
        for (name, value) in &headers {
            request = request.header(name.clone(), value.clone());
        }
        if let Some(body_text) = &body {
            request = request.body(body_text.clone());
        }
        let response = request.send().map_err(|e| NetFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_redirection() {
            let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Err(NetFailure::Transport("redirect without a Location header".to_owned()));
            };
            let next = url
                .join(location)
                .map_err(|e| NetFailure::Transport(format!("invalid redirect target: {e}")))?;
            if origin_of(&next) != origin_of(&url) {
                headers.retain(|(name, _)| name != &reqwest::header::AUTHORIZATION);
            }
            if matches!(status.as_u16(), 301 | 302 | 303) {
                method = Method::GET;
                body = None;
            }
            url = next;
            continue;
        }

        return read_response(policy, response);
    }
    Err(NetFailure::Transport(format!(
        "stopped after {} redirects",
        policy.max_redirects
    )))
}

fn read_response(policy: &NetPolicy, response: reqwest::blocking::Response) -> Result<HttpOk, NetFailure> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.to_str().unwrap_or("").to_owned()))
        .collect();
    let mut body = String::new();
    let mut limited = response.take(policy.max_bytes + 1);
    limited
        .read_to_string(&mut body)
        .map_err(|e| NetFailure::Transport(format!("reading body failed: {e}")))?;
    if body.len() as u64 > policy.max_bytes {
        return Err(NetFailure::BodyTooLarge(format!(
            "response body exceeds {} bytes",
            policy.max_bytes
        )));
    }
    Ok(HttpOk { status, body, headers })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn loopback_and_private_ips_are_disallowed() {
        for ip in ["127.0.0.1", "10.1.2.3", "192.168.1.1", "172.16.0.9", "169.254.1.1", "0.0.0.0"] {
            assert!(is_disallowed_ip(ip.parse().unwrap()), "{ip} should be blocked");
        }
        for ip in ["8.8.8.8", "93.184.216.34"] {
            assert!(!is_disallowed_ip(ip.parse().unwrap()), "{ip} should be allowed");
        }
    }

    #[test]
    fn ipv6_loopback_linklocal_and_mapped_are_disallowed() {
        for ip in ["::1", "::", "fe80::1", "fc00::1", "::ffff:127.0.0.1"] {
            assert!(is_disallowed_ip(ip.parse().unwrap()), "{ip} should be blocked");
        }
        assert!(!is_disallowed_ip("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn wildcard_allowlist_matches_subdomains() {
        let allow = vec!["*.example.com".to_owned(), "api.test".to_owned()];
        assert!(domain_allowed(&allow, "sub.example.com"));
        assert!(domain_allowed(&allow, "example.com"));
        assert!(domain_allowed(&allow, "API.TEST"));
        assert!(!domain_allowed(&allow, "evil.com"));
        assert!(!domain_allowed(&allow, "notexample.com"));
    }

    #[test]
    fn localhost_is_blocked_before_any_io() {
        let policy = NetPolicy {
            allow_http: true,
            ..NetPolicy::default()
        };
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        let err = validate_target(&policy, &url).unwrap_err();
        assert!(matches!(err, NetFailure::DisallowedHost(_)), "{err:?}");
    }

    #[test]
    fn localhost_allowed_with_flag() {
        let policy = NetPolicy {
            allow_http: true,
            allow_localhost: true,
            ..NetPolicy::default()
        };
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(
            validate_target(&policy, &url).unwrap(),
            vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn http_without_flag_is_disallowed() {
        let policy = NetPolicy::default();
        let url = Url::parse("http://example.com/").unwrap();
        let err = validate_target(&policy, &url).unwrap_err();
        assert!(matches!(err, NetFailure::DisallowedHost(_)));
    }

    #[test]
    fn unknown_schemes_are_transport_errors() {
        let policy = NetPolicy::default();
        let url = Url::parse("ftp://example.com/").unwrap();
        let err = validate_target(&policy, &url).unwrap_err();
        assert!(matches!(err, NetFailure::Transport(_)));
    }

    #[test]
    fn forbidden_headers_are_rejected() {
        for name in ["Host", "content-length", "Transfer-Encoding", "Connection"] {
            let err = validate_headers(vec![(name.to_owned(), "x".to_owned())]).unwrap_err();
            assert!(matches!(err, NetFailure::InvalidHeader(_)), "{name} should be rejected");
        }
        assert!(validate_headers(vec![("Authorization".to_owned(), "Bearer t".to_owned())]).is_ok());
    }

    #[test]
    fn net_error_values_are_result_tagged() {
        let value = err_value(&NetFailure::DisallowedHost("blocked".to_owned()));
        assert_eq!(value.to_string(), "Err(DisallowedHost(\"blocked\"))");
    }
}
