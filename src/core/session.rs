//! Drives a [`Conversation`] against a running relay: executes the commands it
//! returns and feeds stream messages back into it.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::chat_stream::{ChatStreamService, StreamParams};
use crate::core::consumer::StreamMessage;
use crate::core::conversation::{
    Conversation, ConversationCommand, ConversationUpdate, JokeOutcome, StreamRequest,
};
use crate::core::jokes::JokeLookup;
use crate::core::message::Message;
use crate::utils::logging::TranscriptLog;

pub struct ChatSession {
    conversation: Conversation,
    stream_service: ChatStreamService,
    rx: mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    jokes: Arc<dyn JokeLookup>,
    transcript: TranscriptLog,
    client: reqwest::Client,
    endpoint: String,
    cancel_token: Option<CancellationToken>,
    pending: VecDeque<ConversationUpdate>,
}

impl ChatSession {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        jokes: Arc<dyn JokeLookup>,
        transcript: TranscriptLog,
    ) -> Self {
        let (stream_service, rx) = ChatStreamService::new();
        Self {
            conversation: Conversation::new(),
            stream_service,
            rx,
            jokes,
            transcript,
            client,
            endpoint: endpoint.into(),
            cancel_token: None,
            pending: VecDeque::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns false when the conversation is busy or `text` is blank.
    pub async fn submit(&mut self, text: &str) -> bool {
        self.conversation.set_input(text);
        let Some(command) = self.conversation.submit() else {
            return false;
        };

        if let Some(user_message) = self.conversation.messages().last() {
            self.log(user_message.clone());
        }
        self.execute(command).await;
        true
    }

    /// Regenerates the most recent assistant reply.
    pub async fn regenerate_last(&mut self) -> bool {
        let Some(id) = self.conversation.last_assistant_id() else {
            return false;
        };
        let Some(command) = self.conversation.regenerate(id) else {
            return false;
        };

        if let Err(e) = self.transcript.rewrite(self.conversation.messages()) {
            warn!(error = %e, "failed to rewrite transcript");
        }
        self.execute(command).await;
        true
    }

    /// Next observable change, or `None` once the conversation is idle and
    /// nothing is queued.
    pub async fn next_update(&mut self) -> Option<ConversationUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            if self.conversation.is_idle() {
                return None;
            }

            let (message, stream_id) = self.rx.recv().await?;
            let Some(update) = self.conversation.apply_stream_message(stream_id, message) else {
                continue;
            };

            if let ConversationUpdate::Finished { error_message, .. } = &update {
                self.cancel_token = None;
                match error_message {
                    Some(message) => self.log(message.clone()),
                    None => {
                        if let Some(reply) = self.finished_reply() {
                            self.log(reply);
                        }
                    }
                }
            }
            return Some(update);
        }
    }

    async fn execute(&mut self, command: ConversationCommand) {
        match command {
            ConversationCommand::Stream(request) => self.spawn_stream(request),
            ConversationCommand::LookupJoke { topic } => {
                let result = self.jokes.random_joke(topic.as_str()).await;
                match self.conversation.complete_joke(result) {
                    JokeOutcome::Answered(message) => {
                        self.log(message.clone());
                        self.pending.push_back(ConversationUpdate::Appended(message));
                        self.pending.push_back(ConversationUpdate::Finished {
                            errored: false,
                            error_message: None,
                        });
                    }
                    JokeOutcome::FellBack(ConversationCommand::Stream(request)) => {
                        self.spawn_stream(request)
                    }
                    JokeOutcome::FellBack(other) => {
                        warn!(command = ?other, "unexpected joke fallback command")
                    }
                    JokeOutcome::Ignored => {}
                }
            }
        }
    }

    fn spawn_stream(&mut self, request: StreamRequest) {
        if let Some(previous) = self.cancel_token.take() {
            previous.cancel();
        }
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());

        debug!(stream_id = request.stream_id, "starting stream");
        self.stream_service.spawn_stream(StreamParams {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            history: request.history,
            cancel_token,
            stream_id: request.stream_id,
        });
    }

    fn finished_reply(&self) -> Option<Message> {
        let target = self.conversation.session()?.target?;
        self.conversation.find(target).cloned()
    }

    fn log(&self, message: Message) {
        if let Err(e) = self.transcript.log_message(&message) {
            warn!(error = %e, "failed to write transcript");
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}
