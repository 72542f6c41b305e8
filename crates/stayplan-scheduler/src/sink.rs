//! Outbound collaborators of the dispatcher: the job submission sink and
//! the optional ledger reservation hook.

use async_trait::async_trait;
use serde::Serialize;
use stayplan_core::config::SinkConfig;
use tracing::{debug, warn};

use crate::{
    error::{Result, SchedulerError},
    types::SearchItem,
};

/// Accepts a batch of search requests tagged with a unique job name.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// execution task for the lifetime of the dispatcher.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit(&self, job_name: &str, items: &[SearchItem], user_id: &str) -> Result<()>;
}

/// Reserves funds for a submission.
///
/// Called fire-and-forget; an error is logged and never affects the run.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn reserve(&self, user_id: &str, job_name: &str, item_count: usize) -> Result<()>;
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    job_name: &'a str,
    user_id: &'a str,
    items: &'a [SearchItem],
}

/// POSTs each submission as JSON to a fixed endpoint.
pub struct HttpJobSink {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpJobSink {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl JobSink for HttpJobSink {
    async fn submit(&self, job_name: &str, items: &[SearchItem], user_id: &str) -> Result<()> {
        debug!(%job_name, items = items.len(), url = %self.url, "submitting job");

        let mut req = self.client.post(&self.url).json(&SubmitBody {
            job_name,
            user_id,
            items,
        });
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SchedulerError::Submission(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %text,
                %job_name,
                "job sink rejected submission"
            );
            return Err(SchedulerError::Submission(format!(
                "job sink returned {}: {}",
                status.as_u16(),
                text
            )));
        }
        Ok(())
    }
}

/// Stand-in used when no endpoint is configured: every submission fails,
/// so runs are recorded as failed and schedules keep advancing.
pub struct UnconfiguredSink;

#[async_trait]
impl JobSink for UnconfiguredSink {
    async fn submit(&self, job_name: &str, _items: &[SearchItem], _user_id: &str) -> Result<()> {
        Err(SchedulerError::Submission(format!(
            "no job sink configured; dropped {job_name}"
        )))
    }
}

/// Build the sink described by `[sink]` in the config.
pub fn from_config(cfg: &SinkConfig) -> Box<dyn JobSink> {
    match cfg.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Box::new(HttpJobSink::new(url, cfg.api_key.clone())),
        _ => {
            warn!("sink.url is not set; scheduled submissions will be recorded as failed");
            Box::new(UnconfiguredSink)
        }
    }
}
