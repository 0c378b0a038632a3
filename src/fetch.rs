use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const API_KEY_HEADER: &str = "x-apisports-key";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_SECS: u64 = 30;
const DEFAULT_JITTER: f64 = 0.2;
const SNIPPET_CHARS: usize = 220;

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Timeouts, refused or reset connections, truncated bodies.
    #[error("network failure: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    Request(String),
}

/// One HTTP GET against the remote API. Implemented for the blocking reqwest
/// client in `http_client`; tests plug in scripted transports.
pub trait Transport {
    fn request(
        &self,
        url: &str,
        query: &[(String, String)],
        api_key: &str,
    ) -> Result<RawResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn request(
        &self,
        url: &str,
        query: &[(String, String)],
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        (**self).request(url, query, api_key)
    }
}

pub trait Pause {
    fn pause(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Pause for ThreadSleep {
    fn pause(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication rejected by {endpoint} ({}): {message}", status_label(.status))]
    Auth {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
    #[error("api error from {endpoint} ({}): {message}", status_label(.status))]
    Api {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
    #[error("transient failure from {endpoint} ({}): {message}", status_label(.status))]
    Transient {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
    #[error("{endpoint} still failing after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
    #[error("invalid json from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Auth { endpoint, .. }
            | Self::Api { endpoint, .. }
            | Self::Transient { endpoint, .. }
            | Self::Exhausted { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Failures that invalidate the whole run, as opposed to a single lookup.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Exhausted { .. } | Self::Transient { .. }
        )
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("http {code}"),
        None => "no status".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Auth,
    Transient,
    Client,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 | 403 => StatusClass::Auth,
        429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Client,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added on top as uniform jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Delay before retry number `retry` (1-based). `unit` is a sample from
/// `[0, 1)` scaling the jitter; pass 0.0 for the bare exponential delay.
pub fn backoff_delay(policy: &RetryPolicy, retry: u32, unit: f64) -> Duration {
    let exp = retry.saturating_sub(1).min(31);
    let raw = policy.base_delay.saturating_mul(1u32 << exp);
    let capped = raw.min(policy.max_delay);
    let spread = policy.jitter.clamp(0.0, 1.0) * unit.clamp(0.0, 1.0);
    capped + capped.mul_f64(spread)
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. `op` receives the 1-based attempt number.
pub fn retry_with_backoff<T, F, R, P>(
    policy: &RetryPolicy,
    rng: &mut R,
    pause: &P,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Result<T, FetchError>,
    R: Rng,
    P: Pause + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };
        if attempt >= max_attempts {
            return Err(FetchError::Exhausted {
                endpoint: err.endpoint().to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }
        let delay = backoff_delay(policy, attempt, rng.gen_range(0.0..1.0));
        warn!(
            endpoint = err.endpoint(),
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient fetch failure, backing off"
        );
        pause.pause(delay);
        attempt += 1;
    }
}

pub struct ApiFetcher<T, P = ThreadSleep> {
    transport: T,
    pause: P,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl<T: Transport> ApiFetcher<T> {
    pub fn new(transport: T, base_url: &str, api_key: &str, policy: RetryPolicy) -> Self {
        Self {
            transport,
            pause: ThreadSleep,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            policy,
        }
    }
}

impl<T: Transport, P: Pause> ApiFetcher<T, P> {
    pub fn with_pause<Q: Pause>(self, pause: Q) -> ApiFetcher<T, Q> {
        ApiFetcher {
            transport: self.transport,
            pause,
            base_url: self.base_url,
            api_key: self.api_key,
            policy: self.policy,
        }
    }

    pub fn pause(&self) -> &P {
        &self.pause
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// GET `endpoint` with `params` and return the parsed JSON body.
    pub fn fetch(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut rng = rand::thread_rng();
        retry_with_backoff(&self.policy, &mut rng, &self.pause, |attempt| {
            debug!(endpoint, attempt, "GET");
            self.attempt(endpoint, &url, &query)
        })
    }

    fn attempt(
        &self,
        endpoint: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Value, FetchError> {
        let resp = self
            .transport
            .request(url, query, &self.api_key)
            .map_err(|err| match err {
                TransportError::Network(message) => FetchError::Transient {
                    endpoint: endpoint.to_string(),
                    status: None,
                    message,
                },
                TransportError::Request(message) => FetchError::Api {
                    endpoint: endpoint.to_string(),
                    status: None,
                    message,
                },
            })?;
        interpret_response(endpoint, resp)
    }
}

/// Maps an HTTP response onto the error taxonomy, then parses the body.
/// API-FOOTBALL also signals failures with a 200 and a populated `errors`
/// field, so the body is inspected too.
pub fn interpret_response(endpoint: &str, resp: RawResponse) -> Result<Value, FetchError> {
    let status = resp.status;
    let class = classify_status(status);
    if class != StatusClass::Success {
        let endpoint = endpoint.to_string();
        let message = snippet(&resp.body);
        let status = Some(status);
        return Err(match class {
            StatusClass::Auth => FetchError::Auth {
                endpoint,
                status,
                message,
            },
            StatusClass::Transient => FetchError::Transient {
                endpoint,
                status,
                message,
            },
            _ => FetchError::Api {
                endpoint,
                status,
                message,
            },
        });
    }

    let body: Value =
        serde_json::from_str(resp.body.trim()).map_err(|source| FetchError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;
    if let Some(err) = body_error(endpoint, status, &body) {
        return Err(err);
    }
    Ok(body)
}

fn body_error(endpoint: &str, status: u16, body: &Value) -> Option<FetchError> {
    let mut entries: Vec<(String, String)> = Vec::new();
    match body.get("errors")? {
        Value::Object(map) => {
            entries.extend(map.iter().map(|(k, v)| (k.clone(), value_text(v))));
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(map) => {
                        entries.extend(map.iter().map(|(k, v)| (k.clone(), value_text(v))));
                    }
                    other => entries.push((String::new(), value_text(other))),
                }
            }
        }
        Value::String(s) if !s.trim().is_empty() => entries.push((String::new(), s.clone())),
        _ => {}
    }
    if entries.is_empty() {
        return None;
    }

    let message = entries
        .iter()
        .map(|(k, v)| {
            if k.is_empty() {
                v.clone()
            } else {
                format!("{k}: {v}")
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    let has = |key: &str| entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(key));
    let endpoint = endpoint.to_string();
    let status = Some(status);

    Some(if has("token") {
        FetchError::Auth {
            endpoint,
            status,
            message,
        }
    } else if has("ratelimit") {
        FetchError::Transient {
            endpoint,
            status,
            message,
        }
    } else {
        FetchError::Api {
            endpoint,
            status,
            message,
        }
    })
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn snippet(body: &str) -> String {
    body.trim()
        .replace(['\n', '\r'], " ")
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    struct Scripted {
        replies: RefCell<VecDeque<Result<RawResponse, TransportError>>>,
        calls: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Transport for Scripted {
        fn request(
            &self,
            url: &str,
            _query: &[(String, String)],
            _api_key: &str,
        ) -> Result<RawResponse, TransportError> {
            self.calls.borrow_mut().push(url.to_string());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
        }
    }

    #[derive(Default)]
    struct Recorded(RefCell<Vec<Duration>>);

    impl Pause for Recorded {
        fn pause(&self, delay: Duration) {
            self.0.borrow_mut().push(delay);
        }
    }

    fn reply(status: u16, body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status,
            body: body.to_string(),
        })
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    fn fetcher(script: &Scripted) -> ApiFetcher<&Scripted, Recorded> {
        ApiFetcher::new(script, "https://api.test/", "key", no_jitter()).with_pause(Recorded::default())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(500),
            ..no_jitter()
        };
        let delays: Vec<u64> = (1..=5)
            .map(|n| backoff_delay(&policy, n, 0.0).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..no_jitter()
        };
        assert_eq!(backoff_delay(&policy, 2, 0.0), Duration::from_millis(200));
        let top = backoff_delay(&policy, 2, 0.999);
        assert!(top >= Duration::from_millis(200) && top <= Duration::from_millis(240));
    }

    #[test]
    fn success_after_server_errors() {
        let script = Scripted::new(vec![
            reply(500, "oops"),
            reply(429, "slow down"),
            reply(200, r#"{"errors":[],"response":[1]}"#),
        ]);
        let f = fetcher(&script);
        let body = f.fetch("/fixtures", &[("team", "42".into())]).expect("ok");
        assert_eq!(body["response"][0], 1);
        assert_eq!(script.calls(), 3);
        assert_eq!(
            *f.pause().0.borrow(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(script.calls.borrow()[0], "https://api.test/fixtures");
    }

    #[test]
    fn auth_failures_are_not_retried() {
        for status in [401, 403] {
            let script = Scripted::new(vec![reply(status, "forbidden")]);
            let err = fetcher(&script).fetch("/odds", &[]).unwrap_err();
            assert!(err.is_auth(), "{err}");
            assert_eq!(script.calls(), 1);
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let script = Scripted::new(vec![reply(404, "missing")]);
        let err = fetcher(&script).fetch("/odds", &[]).unwrap_err();
        assert!(matches!(err, FetchError::Api { status: Some(404), .. }));
        assert_eq!(script.calls(), 1);
    }

    #[test]
    fn exhaustion_reports_last_error() {
        let script = Scripted::new(vec![
            Err(TransportError::Network("reset".into())),
            reply(503, "a"),
            reply(503, "b"),
            reply(502, "c"),
            Err(TransportError::Network("timed out".into())),
        ]);
        let f = fetcher(&script);
        let err = f.fetch("/fixtures", &[]).unwrap_err();
        match &err {
            FetchError::Exhausted { attempts, last, .. } => {
                assert_eq!(*attempts, 5);
                assert!(last.to_string().contains("timed out"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_run_fatal());
        assert_eq!(script.calls(), 5);
        assert_eq!(f.pause().0.borrow().len(), 4);
    }

    #[test]
    fn body_level_errors_are_classified() {
        let token = interpret_response(
            "/teams",
            RawResponse {
                status: 200,
                body: r#"{"errors":{"token":"Error/Missing application key."}}"#.into(),
            },
        )
        .unwrap_err();
        assert!(token.is_auth());

        let rate = interpret_response(
            "/teams",
            RawResponse {
                status: 200,
                body: r#"{"errors":{"rateLimit":"Too many requests"}}"#.into(),
            },
        )
        .unwrap_err();
        assert!(rate.is_transient());

        let quota = interpret_response(
            "/teams",
            RawResponse {
                status: 200,
                body: r#"{"errors":{"requests":"You have reached the request limit for the day"}}"#
                    .into(),
            },
        )
        .unwrap_err();
        assert!(matches!(quota, FetchError::Api { .. }));
    }

    #[test]
    fn non_json_body_is_decode_error() {
        let err = interpret_response(
            "/odds",
            RawResponse {
                status: 200,
                body: "<html>".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert!(!err.is_run_fatal());
    }

    #[test]
    fn retry_helper_uses_supplied_rng() {
        let policy = RetryPolicy {
            max_attempts: 2,
            jitter: 0.5,
            ..no_jitter()
        };
        let pause = Recorded::default();
        let mut rng = StdRng::seed_from_u64(7);
        let result: Result<(), FetchError> = retry_with_backoff(&policy, &mut rng, &pause, |_| {
            Err(FetchError::Transient {
                endpoint: "/x".into(),
                status: Some(500),
                message: "down".into(),
            })
        });
        assert!(matches!(result, Err(FetchError::Exhausted { attempts: 2, .. })));
        let waited = pause.0.borrow()[0];
        assert!(waited >= Duration::from_millis(100) && waited <= Duration::from_millis(150));
    }
}
