//! Conversation engine: turn history, prompt assembly, streaming generation
//! with stop-marker and budget enforcement, and cooperative cancellation.
//!
//! One engine owns one inference backend and runs one generation at a time.
//! A turn flows producer -> monitor -> consumer: the producer drives the
//! backend from a blocking task and pushes raw tokens into an unbounded
//! channel; the monitor scans the accumulated text for turn-boundary
//! markers, enforces the token budgets, forwards tokens to the consumer
//! stream, and commits the turn to history strictly after the stream has
//! terminated. The engine never embeds text itself; retrieval context comes
//! only from the attached [`RetrievalStore`].

pub mod prompt;

use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BackendError, EngineError};
use crate::inference::{
    BackendFactory, GenerationRequest, InferenceBackend, SamplingParameters, StopReason, TokenSink,
};
use crate::store::RetrievalStore;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer using the provided context when it is relevant.";

const SAFETY_NOTICE: &str = "\n[generation stopped: token limit reached]";

const DISPOSE_WAIT: Duration = Duration::from_secs(2);

/// Speaker of one history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One exchange unit in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Generating,
    Disposed,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub system_prompt: String,
    pub sampling: SamplingParameters,
    /// Hard engine-level ceiling, independent of the configured budget.
    /// Hitting it appends an inline notice to the stream.
    pub safety_ceiling: usize,
    /// Entries requested from the retrieval store per turn.
    pub retrieval_top_k: usize,
    pub summary_temperature: f32,
    pub summary_max_tokens: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            sampling: SamplingParameters::default(),
            safety_ceiling: 4096,
            retrieval_top_k: 4,
            summary_temperature: 0.2,
            summary_max_tokens: 192,
        }
    }
}

/// Consumer end of one turn's token stream. Dropping or cancelling the
/// stream terminates generation without committing the turn to history.
#[derive(Debug)]
pub struct ChatStream {
    inner: UnboundedReceiverStream<String>,
    cancel: CancellationToken,
}

impl ChatStream {
    /// Requests cooperative cancellation of the in-flight generation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ChatStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Streaming conversational front end over one inference backend.
pub struct ConversationEngine {
    config: EngineConfig,
    store: Option<Arc<RetrievalStore>>,
    factory: BackendFactory,
    backend: StdMutex<Option<Arc<dyn InferenceBackend>>>,
    history: Arc<Mutex<Vec<Turn>>>,
    state: Arc<StdMutex<EngineState>>,
    generation: Arc<Mutex<()>>,
}

impl ConversationEngine {
    pub fn new(
        config: EngineConfig,
        factory: BackendFactory,
        store: Option<Arc<RetrievalStore>>,
    ) -> Self {
        Self {
            config,
            store,
            factory,
            backend: StdMutex::new(None),
            history: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(StdMutex::new(EngineState::Uninitialized)),
            generation: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    /// Read-only copy of the conversation history.
    pub async fn history(&self) -> Vec<Turn> {
        self.history.lock().await.clone()
    }

    /// Loads the inference backend and primes history with the system
    /// prompt. A call while already loaded is a no-op.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Disposed => return Err(EngineError::Disposed),
            EngineState::Ready | EngineState::Generating => return Ok(()),
            EngineState::Uninitialized => {}
        }

        let _permit = self.generation.try_lock().map_err(|_| EngineError::Busy)?;

        let backend = (self.factory)()?;
        *self.backend.lock().unwrap() = Some(backend);

        let mut history = self.history.lock().await;
        history.clear();
        history.push(Turn::system(&self.config.system_prompt));

        *self.state.lock().unwrap() = EngineState::Ready;
        Ok(())
    }

    /// Clears history and re-primes with the given or default system prompt.
    pub async fn reset_conversation(
        &self,
        new_system_prompt: Option<&str>,
    ) -> Result<(), EngineError> {
        self.ensure_ready()?;
        let _permit = self.generation.try_lock().map_err(|_| EngineError::Busy)?;

        let mut history = self.history.lock().await;
        history.clear();
        history.push(Turn::system(
            new_system_prompt.unwrap_or(&self.config.system_prompt),
        ));
        Ok(())
    }

    /// Streams one assistant turn for `user_message`.
    ///
    /// Retrieval context (if a store is attached) is folded into the wrapped
    /// instruction. The returned stream yields tokens in generation order;
    /// history is committed only after the stream terminates, and only for
    /// turns that were not cancelled and did not fail.
    pub async fn stream_chat(&self, user_message: &str) -> Result<ChatStream, EngineError> {
        self.ensure_ready()?;
        let permit = self
            .generation
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::Busy)?;
        let backend = self
            .backend
            .lock()
            .unwrap()
            .clone()
            .ok_or(EngineError::NotReady)?;

        let context = match &self.store {
            Some(store) => match store.retrieve(user_message, self.config.retrieval_top_k).await {
                Ok(block) => block,
                Err(e) => {
                    warn!(error = %e, "context retrieval failed, continuing without context");
                    String::new()
                }
            },
            None => String::new(),
        };

        let request = {
            let history = self.history.lock().await;
            GenerationRequest {
                prompt: prompt::assemble(&history, &context, user_message),
                sampling: self.config.sampling,
            }
        };

        *self.state.lock().unwrap() = EngineState::Generating;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let user_cancel = CancellationToken::new();
        let producer_stop = CancellationToken::new();

        let producer = {
            let backend = Arc::clone(&backend);
            let stop = producer_stop.clone();
            tokio::task::spawn_blocking(move || {
                backend.generate(request, TokenSink::new(raw_tx), stop)
            })
        };

        let task = TurnTask {
            raw_rx,
            out_tx,
            producer,
            user_cancel: user_cancel.clone(),
            producer_stop,
            user_message: user_message.to_string(),
            max_tokens: self.config.sampling.max_tokens,
            safety_ceiling: self.config.safety_ceiling,
            history: Arc::clone(&self.history),
            state: Arc::clone(&self.state),
            _permit: permit,
        };
        tokio::spawn(task.run());

        Ok(ChatStream {
            inner: UnboundedReceiverStream::new(out_rx),
            cancel: user_cancel,
        })
    }

    /// One-shot summarization of `history_text` with a lower temperature and
    /// a short budget. Turn-boundary markers are stripped from the result.
    /// History is not touched.
    pub async fn summarize_chat(&self, history_text: &str) -> Result<String, EngineError> {
        self.ensure_ready()?;
        let _permit = self.generation.try_lock().map_err(|_| EngineError::Busy)?;
        let backend = self
            .backend
            .lock()
            .unwrap()
            .clone()
            .ok_or(EngineError::NotReady)?;

        let sampling = SamplingParameters {
            temperature: self.config.summary_temperature,
            max_tokens: self.config.summary_max_tokens,
            ..self.config.sampling
        };
        let request = GenerationRequest {
            prompt: prompt::summarize_prompt(history_text),
            sampling,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let producer = tokio::task::spawn_blocking(move || {
            backend.generate(request, TokenSink::new(tx), cancel)
        });

        let mut text = String::new();
        while let Some(token) = rx.recv().await {
            text.push_str(&token);
        }
        let _stop = producer
            .await
            .map_err(|e| EngineError::Backend(BackendError::Generation(e.to_string())))??;

        Ok(prompt::strip_markers(&text).trim().to_string())
    }

    /// Summarizes the current conversation and indexes the summary in the
    /// attached retrieval store under `summary_<session_id>`.
    pub async fn summarize_and_index(&self, session_id: &str) -> Result<String, EngineError> {
        let store = self.store.clone().ok_or(EngineError::NoStore)?;
        let transcript = self.transcript().await;
        let summary = self.summarize_chat(&transcript).await?;
        store.ingest_summary(session_id, &summary).await?;
        Ok(summary)
    }

    /// Plain-text transcript of user and assistant turns.
    pub async fn transcript(&self) -> String {
        let history = self.history.lock().await;
        let mut text = String::new();
        for turn in history.iter() {
            match turn.role {
                Role::System => {}
                Role::User => {
                    text.push_str("User: ");
                    text.push_str(&turn.text);
                    text.push('\n');
                }
                Role::Assistant => {
                    text.push_str("Assistant: ");
                    text.push_str(&turn.text);
                    text.push('\n');
                }
            }
        }
        text
    }

    /// Releases the inference backend. Waits a bounded time for an in-flight
    /// generation; proceeds anyway on timeout rather than deadlocking
    /// shutdown.
    pub async fn dispose(&self) {
        match tokio::time::timeout(DISPOSE_WAIT, self.generation.lock()).await {
            Ok(_guard) => {}
            Err(_) => warn!("disposing while a generation is still in flight"),
        }
        *self.state.lock().unwrap() = EngineState::Disposed;
        *self.backend.lock().unwrap() = None;
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Uninitialized => Err(EngineError::NotReady),
            EngineState::Disposed => Err(EngineError::Disposed),
            EngineState::Generating => Err(EngineError::Busy),
            EngineState::Ready => Ok(()),
        }
    }
}

#[derive(Debug)]
enum StopCause {
    Marker,
    Ceiling,
    Budget,
    Cancelled,
}

/// Monitor side of one turn: relays producer tokens to the consumer while
/// enforcing stop markers and budgets, then commits history and restores the
/// engine to `Ready` before the consumer stream closes.
struct TurnTask {
    raw_rx: mpsc::UnboundedReceiver<String>,
    out_tx: mpsc::UnboundedSender<String>,
    producer: JoinHandle<Result<StopReason, BackendError>>,
    user_cancel: CancellationToken,
    producer_stop: CancellationToken,
    user_message: String,
    max_tokens: usize,
    safety_ceiling: usize,
    history: Arc<Mutex<Vec<Turn>>>,
    state: Arc<StdMutex<EngineState>>,
    _permit: OwnedMutexGuard<()>,
}

impl TurnTask {
    async fn run(mut self) {
        let mut accumulated = String::new();
        let mut tokens_seen = 0usize;
        let mut cause: Option<StopCause> = None;

        loop {
            tokio::select! {
                _ = self.user_cancel.cancelled() => {
                    cause = Some(StopCause::Cancelled);
                    break;
                }
                token = self.raw_rx.recv() => match token {
                    Some(token) => {
                        tokens_seen += 1;
                        accumulated.push_str(&token);
                        // The token is forwarded before scanning: already
                        // yielded tokens are never retracted, only the text
                        // committed to history is truncated.
                        let _ = self.out_tx.send(token);

                        if let Some(offset) = prompt::earliest_stop_offset(&accumulated) {
                            accumulated.truncate(offset);
                            cause = Some(StopCause::Marker);
                            break;
                        }
                        if tokens_seen >= self.safety_ceiling {
                            let _ = self.out_tx.send(SAFETY_NOTICE.to_string());
                            cause = Some(StopCause::Ceiling);
                            break;
                        }
                        if tokens_seen >= self.max_tokens {
                            cause = Some(StopCause::Budget);
                            break;
                        }
                    }
                    // Producer finished on its own (end of sequence or its
                    // own budget check).
                    None => break,
                }
            }
        }

        self.producer_stop.cancel();
        self.raw_rx.close();
        let outcome = self.producer.await;

        let commit = match (&cause, outcome) {
            (Some(StopCause::Cancelled), _) => {
                debug!("turn cancelled, history untouched");
                false
            }
            (_, Ok(Ok(reason))) => {
                // cause is None when the producer finished on its own
                debug!(?reason, ?cause, tokens = tokens_seen, "turn complete");
                true
            }
            (_, Ok(Err(e))) => {
                warn!(error = %e, "generation failed mid-stream");
                let _ = self.out_tx.send(format!("[generation error: {e}]"));
                false
            }
            (_, Err(join_error)) => {
                warn!(error = %join_error, "generation task failed");
                let _ = self
                    .out_tx
                    .send("[generation error: internal task failure]".to_string());
                false
            }
        };

        if commit {
            let mut history = self.history.lock().await;
            history.push(Turn::user(&self.user_message));
            history.push(Turn::assistant(accumulated.trim()));
        }

        {
            let mut state = self.state.lock().unwrap();
            if *state == EngineState::Generating {
                *state = EngineState::Ready;
            }
        }
        // Release the generation permit before out_tx drops and closes the
        // consumer stream: once the stream reports termination the engine
        // must already accept the next call.
        drop(self._permit);
    }
}
