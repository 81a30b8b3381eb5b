use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        network::{
            EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
            GetResponseBodyParams, RequestId,
        },
        page::{EventDomContentEventFired, NavigateParams},
    },
    Page,
};
use futures::{stream::BoxStream, StreamExt};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::{error::CaptureError, settings::Settings};

use super::browser::{NetworkEvent, RenderEngine, RenderSession};

const ENABLE_LOGS: bool = true;

/// Budget for each teardown step before the process is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

use crate::{log_debug, log_info, log_warn};

/// Headless Chromium over CDP, one throwaway profile per session.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    executable: Option<PathBuf>,
    no_sandbox: bool,
}

impl ChromiumEngine {
    pub fn new(executable: Option<PathBuf>, no_sandbox: bool) -> Self {
        Self {
            executable,
            no_sandbox,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.browser_executable.clone(), settings.browser_no_sandbox)
    }

    fn config(&self, profile: &TempDir) -> Result<BrowserConfig, CaptureError> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage");
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        builder.build().map_err(CaptureError::Launch)
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(&self) -> Result<Box<dyn RenderSession>, CaptureError> {
        let profile = tempfile::Builder::new()
            .prefix("aqi-relay-profile-")
            .tempdir()
            .map_err(|err| CaptureError::Launch(format!("profile dir: {err}")))?;
        let config = self.config(&profile)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| CaptureError::Launch(err.to_string()))?;

        // The CDP connection only makes progress while the handler is polled.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    log_debug!("browser handler: {err}");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.kill().await;
                handler_task.abort();
                return Err(CaptureError::Launch(format!("new page: {err}")));
            }
        };
        log_info!("Browser launched with profile {}", profile.path().display());

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            _profile: profile,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    _profile: TempDir,
}

fn browser_error(err: impl std::fmt::Display) -> CaptureError {
    CaptureError::Browser(err.to_string())
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn network_events(&self) -> Result<BoxStream<'static, NetworkEvent>, CaptureError> {
        let requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(browser_error)?
            .map(|event| NetworkEvent::RequestWillBeSent {
                request_id: event.request_id.inner().clone(),
                method: event.request.method.clone(),
                url: event.request.url.clone(),
            });
        let responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_error)?
            .map(|event| NetworkEvent::ResponseReceived {
                request_id: event.request_id.inner().clone(),
                url: event.response.url.clone(),
            });
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(browser_error)?
            .map(|event| NetworkEvent::LoadingFinished {
                request_id: event.request_id.inner().clone(),
            });
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(browser_error)?
            .map(|event| NetworkEvent::LoadingFailed {
                request_id: event.request_id.inner().clone(),
                error_text: event.error_text.clone(),
            });

        Ok(futures::stream::select_all([
            requests.boxed(),
            responses.boxed(),
            finished.boxed(),
            failed.boxed(),
        ])
        .boxed())
    }

    async fn navigate(&self, url: &str) -> Result<(), CaptureError> {
        let mut dom_ready = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(browser_error)?;

        let navigation = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|err| CaptureError::Navigation(err.to_string()))?;
        if let Some(error_text) = navigation.result.error_text.clone() {
            return Err(CaptureError::Navigation(error_text));
        }

        dom_ready.next().await;
        log_debug!("DOM content loaded for {url}");
        Ok(())
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
            .await
            .map_err(browser_error)?;
        let body = &response.result;
        if body.base64_encoded {
            BASE64
                .decode(&body.body)
                .map_err(|err| CaptureError::Browser(format!("response body base64: {err}")))
        } else {
            Ok(body.body.clone().into_bytes())
        }
    }

    async fn close(self: Box<Self>) -> Result<(), CaptureError> {
        let ChromiumSession {
            mut browser,
            page,
            handler_task,
            _profile,
        } = *self;

        match tokio::time::timeout(EXIT_GRACE, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log_debug!("page close: {err}"),
            Err(_) => log_debug!("page close timed out"),
        }

        let closed = match tokio::time::timeout(EXIT_GRACE, browser.close()).await {
            Ok(result) => result.map(|_| ()).map_err(browser_error),
            Err(_) => Err(CaptureError::Browser("close request timed out".into())),
        };
        let exited = closed.is_ok()
            && matches!(tokio::time::timeout(EXIT_GRACE, browser.wait()).await, Ok(Ok(_)));
        if !exited {
            log_warn!("browser did not exit after close; killing it");
            if let Some(Err(err)) = browser.kill().await {
                log_warn!("killing browser: {err}");
            }
        }

        handler_task.abort();
        closed
    }
}
