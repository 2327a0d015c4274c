//! Request → response pipeline.
//!
//! One [`Request`] runs three strictly sequential stages: index query,
//! prompt render, completion. Each stage needs the previous stage's output,
//! so a failure stops the request where it happened: a retrieval error
//! never reaches the template or the LLM, and neither does a query that
//! matched no passages.
//!
//! The index build is not a request stage. [`Pipeline::ready`] builds it
//! once at startup with no deadline; the retrieval timeout covers only the
//! per-request query.
//!
//! The pipeline owns no UI. The shell drives it one request at a time and
//! batch callers can call [`Pipeline::handle`] directly.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::completion::{CompletionClient, OpenAiChatClient};
use crate::config::{ApiKey, Config};
use crate::error::{Error, Result};
use crate::index::{handle_from_config, IndexHandle, IndexStats};
use crate::models::RetrievalResult;
use crate::prompt::{Mode, TemplateRegistry};

#[derive(Debug, Clone)]
pub struct Request {
    pub mode: Mode,
    /// Question or topic as typed by the user.
    pub input: String,
}

impl Request {
    pub fn new(mode: Mode, input: impl Into<String>) -> Self {
        Self {
            mode,
            input: input.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub mode: Mode,
    /// Generated text, verbatim from the completion client.
    pub text: String,
    pub retrieval: RetrievalResult,
}

/// Stage about to start, reported to [`Pipeline::handle_with`] callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieving,
    Rendering,
    Completing,
}

pub struct Pipeline {
    index: Arc<IndexHandle>,
    templates: Arc<TemplateRegistry>,
    completion: Arc<dyn CompletionClient>,
    retrieval_timeout: Duration,
    completion_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        index: Arc<IndexHandle>,
        templates: Arc<TemplateRegistry>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            index,
            templates,
            completion,
            retrieval_timeout: Duration::from_secs(30),
            completion_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeouts(mut self, retrieval: Duration, completion: Duration) -> Self {
        self.retrieval_timeout = retrieval;
        self.completion_timeout = completion;
        self
    }

    /// Wire the directory corpus, embedder, templates and OpenAI client
    /// described by `config`.
    pub fn from_config(config: &Config, api_key: ApiKey) -> Result<Self> {
        let index = handle_from_config(config, None, Some(&api_key))?;
        let templates = TemplateRegistry::from_path(config.templates.path.as_deref())?;
        let completion = OpenAiChatClient::new(&config.completion, api_key)?;

        Ok(Self::new(Arc::new(index), Arc::new(templates), Arc::new(completion)).with_timeouts(
            Duration::from_secs(config.retrieval.timeout_secs),
            Duration::from_secs(config.completion.timeout_secs),
        ))
    }

    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Build the index if it is not built yet and report its size.
    pub async fn ready(&self) -> Result<IndexStats> {
        Ok(self.index.get().await?.stats())
    }

    pub async fn handle(&self, request: &Request) -> Result<Response> {
        self.handle_with(request, |_| {}).await
    }

    /// Run `request`, calling `on_stage` as each stage begins.
    pub async fn handle_with<F>(&self, request: &Request, mut on_stage: F) -> Result<Response>
    where
        F: FnMut(Stage) + Send,
    {
        let input = request.input.trim();
        if input.is_empty() {
            return Err(Error::EmptyInput);
        }

        on_stage(Stage::Retrieving);
        let index = self.index.get().await?;
        let retrieval = tokio::time::timeout(self.retrieval_timeout, index.query(input))
            .await
            .map_err(|_| {
                Error::Retrieval(format!("query timed out after {:?}", self.retrieval_timeout))
            })??;
        debug!(passages = retrieval.passages.len(), "retrieved context");
        if retrieval.is_empty() {
            return Err(Error::Retrieval("no passages matched the query".to_string()));
        }

        on_stage(Stage::Rendering);
        let prompt = self
            .templates
            .render(request.mode, input, &retrieval.context())?;

        on_stage(Stage::Completing);
        let text = tokio::time::timeout(self.completion_timeout, self.completion.complete(&prompt.messages))
            .await
            .map_err(|_| {
                Error::Completion(format!("timed out after {:?}", self.completion_timeout))
            })??;

        info!(mode = %request.mode, model = self.completion.model(), chars = text.len(), "request complete");
        Ok(Response {
            mode: request.mode,
            text,
            retrieval,
        })
    }
}
