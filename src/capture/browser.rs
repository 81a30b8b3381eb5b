//! One headless-browser capture: subscribe to network traffic, navigate,
//! and take the first GET response whose URL contains the API fragment.
//!
//! The engine sits behind [`RenderEngine`] / [`RenderSession`] so the race
//! logic here does not care whether Chromium or a scripted fake is driving it.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::CaptureError;

const ENABLE_LOGS: bool = true;

/// Upper bound on `RenderSession::close` so a wedged browser cannot hold up the caller.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(20);

use crate::{log_debug, log_info, log_warn};

/// Network traffic as seen by the page, flattened from the engine's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    RequestWillBeSent {
        request_id: String,
        method: String,
        url: String,
    },
    ResponseReceived {
        request_id: String,
        url: String,
    },
    LoadingFinished {
        request_id: String,
    },
    LoadingFailed {
        request_id: String,
        error_text: String,
    },
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Starts an isolated browser with a single blank page.
    async fn launch(&self) -> Result<Box<dyn RenderSession>, CaptureError>;
}

#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Must be called before [`RenderSession::navigate`] so early responses are seen.
    async fn network_events(&self) -> Result<BoxStream<'static, NetworkEvent>, CaptureError>;

    /// Resolves once the DOM is parsed; does not wait for the full load.
    async fn navigate(&self, url: &str) -> Result<(), CaptureError>;

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>, CaptureError>;

    /// Releases the page and the browser process.
    async fn close(self: Box<Self>) -> Result<(), CaptureError>;
}

/// Selects the target API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    fragment: String,
}

impl MatchRule {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
        }
    }

    pub fn matches(&self, url: &str, method: &str) -> bool {
        url.contains(&self.fragment) && method.eq_ignore_ascii_case("GET")
    }
}

#[derive(Debug, Clone)]
pub struct CaptureTarget {
    pub url: String,
    pub rule: MatchRule,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Init,
    Navigating,
    AwaitingMatch,
    Captured,
    TimedOut,
    MatchError,
    Closed,
}

/// Runs one capture session against `engine`.
///
/// The session is closed exactly once whichever way the race ends, and a
/// match arriving after the deadline is dropped with the session.
pub async fn capture(engine: &dyn RenderEngine, target: &CaptureTarget) -> Result<Value, CaptureError> {
    log_debug!("capture session {:?}", SessionPhase::Init);
    let session = engine.launch().await?;
    log_info!("Waiting for API request matching {:?}", target.rule.fragment);

    let started = Instant::now();
    let result = match tokio::time::timeout(target.timeout, drive(session.as_ref(), target)).await {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout(target.timeout)),
    };

    let phase = match &result {
        Ok(_) => SessionPhase::Captured,
        Err(CaptureError::Timeout(_)) => SessionPhase::TimedOut,
        Err(_) => SessionPhase::MatchError,
    };
    log_debug!("capture session ended in {:?} after {}ms", phase, started.elapsed().as_millis());

    match tokio::time::timeout(TEARDOWN_TIMEOUT, session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log_warn!("browser session did not close cleanly: {err}"),
        Err(_) => log_warn!(
            "browser session close exceeded {}s; abandoning it",
            TEARDOWN_TIMEOUT.as_secs()
        ),
    }
    log_debug!("capture session {:?}", SessionPhase::Closed);

    result
}

async fn drive(session: &dyn RenderSession, target: &CaptureTarget) -> Result<Value, CaptureError> {
    let mut events = session.network_events().await?;
    let mut tracker = ResponseTracker::new(&target.rule);

    log_debug!("capture session {:?} to {}", SessionPhase::Navigating, target.url);
    let navigation = session.navigate(&target.url);
    tokio::pin!(navigation);
    let mut navigated = false;

    loop {
        tokio::select! {
            result = &mut navigation, if !navigated => {
                navigated = true;
                result?;
                log_debug!("capture session {:?}", SessionPhase::AwaitingMatch);
            }
            event = events.next() => {
                let Some(event) = event else {
                    return Err(CaptureError::Browser(
                        "network event stream closed before a matching response".into(),
                    ));
                };
                match tracker.observe(event) {
                    Some(Resolution::BodyReady { request_id, url }) => {
                        log_info!("Found target API: {url}");
                        let body = session.response_body(&request_id).await?;
                        return serde_json::from_slice(&body).map_err(CaptureError::MalformedPayload);
                    }
                    Some(Resolution::Failed { url, error_text }) => {
                        return Err(CaptureError::Browser(format!(
                            "matched response {url} failed to load: {error_text}"
                        )));
                    }
                    None => {}
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Resolution {
    BodyReady { request_id: String, url: String },
    Failed { url: String, error_text: String },
}

/// Correlates request, response and loading events that may arrive in any order.
struct ResponseTracker<'a> {
    rule: &'a MatchRule,
    methods: HashMap<String, String>,
    unmatched_responses: HashMap<String, String>,
    finished: HashSet<String>,
    failed: HashMap<String, String>,
    matched: Option<(String, String)>,
}

impl<'a> ResponseTracker<'a> {
    fn new(rule: &'a MatchRule) -> Self {
        Self {
            rule,
            methods: HashMap::new(),
            unmatched_responses: HashMap::new(),
            finished: HashSet::new(),
            failed: HashMap::new(),
            matched: None,
        }
    }

    fn observe(&mut self, event: NetworkEvent) -> Option<Resolution> {
        match event {
            NetworkEvent::RequestWillBeSent {
                request_id, method, ..
            } => {
                self.methods.insert(request_id.clone(), method);
                let url = self.unmatched_responses.remove(&request_id)?;
                self.try_match(request_id, url)
            }
            NetworkEvent::ResponseReceived { request_id, url } => {
                if self.methods.contains_key(&request_id) {
                    self.try_match(request_id, url)
                } else {
                    self.unmatched_responses.insert(request_id, url);
                    None
                }
            }
            NetworkEvent::LoadingFinished { request_id } => {
                if self.is_matched(&request_id) {
                    return self.resolve();
                }
                self.finished.insert(request_id);
                None
            }
            NetworkEvent::LoadingFailed {
                request_id,
                error_text,
            } => {
                if self.is_matched(&request_id) {
                    let (_, url) = self.matched.clone()?;
                    return Some(Resolution::Failed { url, error_text });
                }
                self.failed.insert(request_id, error_text);
                None
            }
        }
    }

    fn is_matched(&self, request_id: &str) -> bool {
        self.matched.as_ref().is_some_and(|(id, _)| id == request_id)
    }

    fn try_match(&mut self, request_id: String, url: String) -> Option<Resolution> {
        if self.matched.is_some() {
            return None;
        }
        let method = self.methods.get(&request_id)?;
        if !self.rule.matches(&url, method) {
            return None;
        }

        self.matched = Some((request_id.clone(), url.clone()));
        if let Some(error_text) = self.failed.remove(&request_id) {
            return Some(Resolution::Failed { url, error_text });
        }
        if self.finished.contains(&request_id) {
            return self.resolve();
        }
        None
    }

    fn resolve(&self) -> Option<Resolution> {
        let (request_id, url) = self.matched.clone()?;
        Some(Resolution::BodyReady { request_id, url })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    const API: &str = "https://api.example/getAirQualityRanklistCountryAndCity?x=1";
    const TIMEOUT: Duration = Duration::from_secs(30);

    fn target() -> CaptureTarget {
        CaptureTarget {
            url: "https://www.example/ranking".into(),
            rule: MatchRule::new("getAirQualityRanklistCountryAndCity"),
            timeout: TIMEOUT,
        }
    }

    #[test]
    fn rule_requires_fragment_and_get() {
        let rule = MatchRule::new("ranklist");
        assert!(rule.matches("https://x/ranklist?a", "GET"));
        assert!(!rule.matches("https://x/ranklist?a", "POST"));
        assert!(!rule.matches("https://x/other", "GET"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_matching_response_is_captured() {
        let mut steps = get_exchange("noise", "https://cdn.example/app.js");
        steps.extend(get_exchange("api-1", API));
        steps.extend(get_exchange("api-2", API));
        let engine = ScriptedEngine::new(steps)
            .with_body("noise", "not json at all")
            .with_body("api-1", r#"{ "first": true }"#)
            .with_body("api-2", r#"{ "first": false }"#);

        let value = capture(&engine, &target()).await.unwrap();

        assert_eq!(value, json!({ "first": true }));
        assert_eq!(engine.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn post_to_api_path_is_ignored() {
        let steps = vec![
            Step::Event(NetworkEvent::RequestWillBeSent {
                request_id: "post".into(),
                method: "POST".into(),
                url: API.into(),
            }),
            Step::Event(NetworkEvent::ResponseReceived {
                request_id: "post".into(),
                url: API.into(),
            }),
            Step::Event(NetworkEvent::LoadingFinished {
                request_id: "post".into(),
            }),
        ];
        let engine = ScriptedEngine::new(steps).with_body("post", "{}");

        let err = capture(&engine, &target()).await.unwrap_err();
        assert!(matches!(err, CaptureError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_events_still_match() {
        let steps = vec![
            Step::Event(NetworkEvent::ResponseReceived {
                request_id: "api".into(),
                url: API.into(),
            }),
            Step::Event(NetworkEvent::LoadingFinished {
                request_id: "api".into(),
            }),
            Step::Event(NetworkEvent::RequestWillBeSent {
                request_id: "api".into(),
                method: "GET".into(),
                url: API.into(),
            }),
        ];
        let engine = ScriptedEngine::new(steps).with_body("api", "[1, 2, 3]");

        assert_eq!(capture(&engine, &target()).await.unwrap(), json!([1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn no_match_times_out_at_deadline() {
        let engine = ScriptedEngine::new(get_exchange("noise", "https://cdn.example/app.js"));
        let started = Instant::now();

        let err = capture(&engine, &target()).await.unwrap_err();

        assert!(matches!(err, CaptureError::Timeout(d) if d == TIMEOUT));
        let elapsed = started.elapsed();
        assert!(elapsed >= TIMEOUT, "resolved early after {elapsed:?}");
        assert!(elapsed < TIMEOUT + Duration::from_millis(50), "resolved late after {elapsed:?}");
        assert_eq!(engine.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_match_after_deadline_is_discarded() {
        let mut steps = vec![Step::Sleep(Duration::from_secs(31))];
        steps.extend(get_exchange("api", API));
        let engine = ScriptedEngine::new(steps).with_body("api", r#"{ "late": true }"#);

        let err = capture(&engine, &target()).await.unwrap_err();

        assert!(matches!(err, CaptureError::Timeout(_)));
        assert_eq!(engine.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_aborts_attempt() {
        let mut steps = get_exchange("api", API);
        steps.extend(get_exchange("api-2", API));
        let engine = ScriptedEngine::new(steps)
            .with_body("api", "<html>oops</html>")
            .with_body("api-2", "{}");

        let err = capture(&engine, &target()).await.unwrap_err();

        assert!(matches!(err, CaptureError::MalformedPayload(_)));
        assert_eq!(engine.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failure_is_reported_and_session_closed() {
        let mut engine = ScriptedEngine::new(Vec::new());
        engine.navigation_error = Some("net::ERR_NAME_NOT_RESOLVED".into());

        let err = capture(&engine, &target()).await.unwrap_err();

        assert!(matches!(err, CaptureError::Navigation(_)));
        assert_eq!(engine.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn response_can_arrive_before_navigation_settles() {
        let mut engine = ScriptedEngine::new(get_exchange("api", API)).with_body("api", r#"{"ok":1}"#);
        engine.navigation_delay = Duration::from_secs(20);
        let started = Instant::now();

        let value = capture(&engine, &target()).await.unwrap();

        assert_eq!(value, json!({ "ok": 1 }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_close_does_not_block_the_result() {
        let mut engine = ScriptedEngine::new(get_exchange("api", API)).with_body("api", r#"{"ok":true}"#);
        engine.close_hangs = true;
        let started = Instant::now();

        let value = capture(&engine, &target()).await.unwrap();

        assert_eq!(value, json!({ "ok": true }));
        assert_eq!(engine.closed(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= TEARDOWN_TIMEOUT && elapsed < TEARDOWN_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_close_after_timeout_still_reports_timeout() {
        let mut engine = ScriptedEngine::new(Vec::new());
        engine.close_hangs = true;

        let err = capture(&engine, &target()).await.unwrap_err();

        assert!(matches!(err, CaptureError::Timeout(_)));
        assert_eq!(engine.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_of_matched_response_is_a_browser_error() {
        let steps = vec![
            Step::Event(NetworkEvent::RequestWillBeSent {
                request_id: "api".into(),
                method: "GET".into(),
                url: API.into(),
            }),
            Step::Event(NetworkEvent::ResponseReceived {
                request_id: "api".into(),
                url: API.into(),
            }),
            Step::Event(NetworkEvent::LoadingFailed {
                request_id: "api".into(),
                error_text: "net::ERR_ABORTED".into(),
            }),
        ];
        let engine = ScriptedEngine::new(steps);

        let err = capture(&engine, &target()).await.unwrap_err();
        assert!(matches!(err, CaptureError::Browser(msg) if msg.contains("ERR_ABORTED")));
    }
}
