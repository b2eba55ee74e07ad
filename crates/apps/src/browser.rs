use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use agentsim_core_types::{SimError, SimResult};

use crate::resource::{AsyncResource, ResourceWorker};

pub const START_PAGE: &str = "about:blank";

#[derive(Clone, Debug, PartialEq)]
pub enum BrowserRequest {
    Navigate { url: String },
    Back,
    CurrentUrl,
    Summary,
}

/// What the browser reports back after each request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrowserView {
    pub url: String,
    pub history_len: usize,
    pub starts: u32,
    pub stops: u32,
    /// Name of the thread that served the request.
    pub served_by: String,
}

/// Simulated browser session. Every operation is async and must run on the
/// session's own worker.
#[derive(Debug)]
pub struct BrowserSession {
    started: bool,
    history: Vec<String>,
    latency: Duration,
    starts: u32,
    stops: u32,
}

impl BrowserSession {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            started: false,
            history: vec![START_PAGE.to_string()],
            latency,
            starts: 0,
            stops: 0,
        }
    }

    /// Spawns the session on a dedicated worker thread.
    pub fn spawn(name: &str, timeout: Duration) -> SimResult<Arc<ResourceWorker<Self>>> {
        ResourceWorker::spawn(name, Self::new(), timeout)
    }

    fn view(&self) -> BrowserView {
        BrowserView {
            url: self.current().to_string(),
            history_len: self.history.len(),
            starts: self.starts,
            stops: self.stops,
            served_by: thread::current().name().unwrap_or("unnamed").to_string(),
        }
    }

    fn current(&self) -> &str {
        self.history.last().map(String::as_str).unwrap_or(START_PAGE)
    }
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncResource for BrowserSession {
    type Request = BrowserRequest;
    type Response = BrowserView;

    async fn start(&mut self) -> SimResult<()> {
        if self.started {
            return Ok(());
        }
        tokio::time::sleep(self.latency).await;
        self.started = true;
        self.starts += 1;
        debug!(starts = self.starts, "browser session started");
        Ok(())
    }

    async fn stop(&mut self) -> SimResult<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.stops += 1;
        self.history.truncate(1);
        debug!(stops = self.stops, "browser session stopped");
        Ok(())
    }

    async fn handle(&mut self, request: BrowserRequest) -> SimResult<BrowserView> {
        if matches!(request, BrowserRequest::Summary) {
            return Ok(self.view());
        }
        if !self.started {
            return Err(SimError::capability("browser session is not started"));
        }
        tokio::time::sleep(self.latency).await;
        match request {
            BrowserRequest::Navigate { url } => {
                let parsed = Url::parse(&url)
                    .map_err(|err| SimError::capability(format!("invalid url {url}: {err}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(SimError::capability(format!(
                        "unsupported scheme {}",
                        parsed.scheme()
                    )));
                }
                self.history.push(parsed.to_string());
            }
            BrowserRequest::Back => {
                if self.history.len() > 1 {
                    self.history.pop();
                }
            }
            BrowserRequest::CurrentUrl | BrowserRequest::Summary => {}
        }
        Ok(self.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceLease;

    #[test]
    fn navigation_history_is_kept_on_the_worker() {
        let lease = ResourceLease::owned(BrowserSession::spawn("browser", Duration::from_secs(5)).unwrap());
        lease.start().unwrap();
        let view = lease
            .call(BrowserRequest::Navigate {
                url: "https://mail.example.test/inbox".into(),
            })
            .unwrap();
        assert_eq!(view.url, "https://mail.example.test/inbox");
        assert_eq!(view.served_by, "resource-browser");

        let view = lease.call(BrowserRequest::Back).unwrap();
        assert_eq!(view.url, START_PAGE);

        let err = lease
            .call(BrowserRequest::Navigate {
                url: "ftp://files.example.test".into(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), agentsim_core_types::ErrorKind::Capability);
    }

    #[test]
    fn stop_resets_session_and_counts() {
        let lease = ResourceLease::owned(BrowserSession::spawn("browser", Duration::from_secs(5)).unwrap());
        lease.start().unwrap();
        lease
            .call(BrowserRequest::Navigate {
                url: "https://example.test/".into(),
            })
            .unwrap();
        lease.stop().unwrap();
        let view = lease.call(BrowserRequest::Summary).unwrap();
        assert_eq!((view.starts, view.stops), (1, 1));
        assert_eq!(view.history_len, 1);
        assert!(lease.call(BrowserRequest::CurrentUrl).is_err());
    }
}
