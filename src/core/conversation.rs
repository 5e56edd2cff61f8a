//! The conversation log and the `Idle → Loading → Streaming → Idle` status
//! machine that gates every user action.
//!
//! `Conversation` never performs I/O. Accepted actions return a
//! [`ConversationCommand`] for the caller to execute; whatever the executor
//! observes is fed back through [`Conversation::apply_stream_message`] or
//! [`Conversation::complete_joke`].

use serde_json::json;
use tracing::{debug, warn};

use crate::api::ApiMessage;
use crate::core::consumer::StreamMessage;
use crate::core::jokes::{detect_joke_request, JokeError, JokeResult, JokeTopic};
use crate::core::message::{Message, MessageId, ToolInvocation, ToolState};

pub const READ_ERROR_MESSAGE: &str = "Sorry, I encountered an error while processing your request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Accepting input.
    Idle,
    /// Request sent, nothing received yet.
    Loading,
    /// Content is arriving.
    Streaming,
}

/// Bookkeeping for one send or regenerate. `target` refers to the active
/// message by id; the message itself lives only in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub stream_id: u64,
    pub target: Option<MessageId>,
    pub completed: bool,
    pub errored: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub stream_id: u64,
    pub history: Vec<ApiMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationCommand {
    Stream(StreamRequest),
    LookupJoke { topic: JokeTopic },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationUpdate {
    Appended(Message),
    Updated(Message),
    /// First content arrived; the loading indicator can go away.
    Streaming,
    Finished {
        errored: bool,
        error_message: Option<Message>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JokeOutcome {
    Answered(Message),
    /// The lookup failed; the request goes through the model instead.
    FellBack(ConversationCommand),
    Ignored,
}

#[derive(Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    status: Status,
    input: String,
    session: Option<StreamSession>,
    pending_joke: Option<JokeTopic>,
    next_message_id: u64,
    next_stream_id: u64,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            status: Status::Idle,
            input: String::new(),
            session: None,
            pending_joke: None,
            next_message_id: 0,
            next_stream_id: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_idle(&self) -> bool {
        self.status == Status::Idle
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// The assistant message currently receiving fragments, if any.
    pub fn active_message(&self) -> Option<&Message> {
        let session = self.session.as_ref().filter(|session| !session.completed)?;
        self.find(session.target?)
    }

    pub fn last_assistant_id(&self) -> Option<MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.is_assistant())
            .map(|message| message.id)
    }

    pub fn history(&self) -> Vec<ApiMessage> {
        self.messages.iter().map(Message::to_api).collect()
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.stream_id == stream_id && !session.completed)
    }

    /// Sends the current input. Ignored unless idle with non-blank input.
    pub fn submit(&mut self) -> Option<ConversationCommand> {
        if !self.is_idle() {
            debug!(status = ?self.status, "submit ignored while busy");
            return None;
        }
        if self.input.trim().is_empty() {
            return None;
        }

        let text = std::mem::take(&mut self.input);
        let id = self.allocate_id();
        self.messages.push(Message::user(id, text.as_str()));
        self.status = Status::Loading;

        if let Some(topic) = detect_joke_request(&text) {
            self.pending_joke = Some(topic);
            return Some(ConversationCommand::LookupJoke { topic });
        }

        Some(ConversationCommand::Stream(self.begin_stream()))
    }

    /// Drops assistant message `id` and everything after it, then asks for a
    /// fresh reply to the remaining history.
    pub fn regenerate(&mut self, id: MessageId) -> Option<ConversationCommand> {
        if !self.is_idle() {
            debug!(status = ?self.status, "regenerate ignored while busy");
            return None;
        }

        let index = self.messages.iter().position(|message| message.id == id)?;
        if index == 0 || !self.messages[index].is_assistant() {
            return None;
        }

        self.messages.truncate(index);
        self.status = Status::Loading;
        Some(ConversationCommand::Stream(self.begin_stream()))
    }

    pub fn complete_joke(&mut self, result: Result<JokeResult, JokeError>) -> JokeOutcome {
        let Some(topic) = self.pending_joke.take() else {
            return JokeOutcome::Ignored;
        };

        match result {
            Ok(joke) => {
                let id = self.allocate_id();
                let message = joke_message(id, topic, &joke);
                self.messages.push(message.clone());
                self.status = Status::Idle;
                JokeOutcome::Answered(message)
            }
            Err(err) => {
                warn!(error = %err, %topic, "joke lookup failed; asking the model instead");
                JokeOutcome::FellBack(ConversationCommand::Stream(self.begin_stream()))
            }
        }
    }

    pub fn apply_stream_message(
        &mut self,
        stream_id: u64,
        message: StreamMessage,
    ) -> Option<ConversationUpdate> {
        if !self.is_current_stream(stream_id) {
            return None;
        }

        match message {
            StreamMessage::Opened => self.open_placeholder(),
            StreamMessage::FirstContent => self.mark_streaming().then_some(ConversationUpdate::Streaming),
            StreamMessage::Chunk(text) => self.append_chunk(&text),
            StreamMessage::End => {
                self.finish_session(false);
                Some(ConversationUpdate::Finished {
                    errored: false,
                    error_message: None,
                })
            }
            StreamMessage::Error(detail) => {
                warn!(stream_id, %detail, "stream failed");
                let error_message = self.record_read_error();
                self.finish_session(true);
                Some(ConversationUpdate::Finished {
                    errored: true,
                    error_message,
                })
            }
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        self.next_message_id += 1;
        MessageId::new(self.next_message_id)
    }

    fn begin_stream(&mut self) -> StreamRequest {
        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;
        self.session = Some(StreamSession {
            stream_id,
            target: None,
            completed: false,
            errored: false,
        });
        StreamRequest {
            stream_id,
            history: self.history(),
        }
    }

    fn open_placeholder(&mut self) -> Option<ConversationUpdate> {
        if self.session.as_ref()?.target.is_some() {
            return None;
        }

        let id = self.allocate_id();
        let placeholder = Message::assistant(id, "");
        self.messages.push(placeholder.clone());
        if let Some(session) = self.session.as_mut() {
            session.target = Some(id);
        }
        Some(ConversationUpdate::Appended(placeholder))
    }

    fn mark_streaming(&mut self) -> bool {
        if self.status == Status::Loading {
            self.status = Status::Streaming;
            return true;
        }
        false
    }

    fn append_chunk(&mut self, text: &str) -> Option<ConversationUpdate> {
        if text.is_empty() {
            return None;
        }
        let target = self.session.as_ref()?.target?;
        self.mark_streaming();

        let message = self.messages.iter_mut().find(|message| message.id == target)?;
        message.content.push_str(text);
        Some(ConversationUpdate::Updated(message.clone()))
    }

    /// A failed read keeps partial content; otherwise the (empty) placeholder
    /// is replaced by a fixed apology.
    fn record_read_error(&mut self) -> Option<Message> {
        let target = self.session.as_ref().and_then(|session| session.target);

        if let Some(id) = target {
            let has_content = self
                .find(id)
                .is_some_and(|message| !message.content.is_empty());
            if has_content {
                return None;
            }
            self.messages.retain(|message| message.id != id);
        }

        let id = self.allocate_id();
        let message = Message::assistant(id, READ_ERROR_MESSAGE);
        self.messages.push(message.clone());
        Some(message)
    }

    fn finish_session(&mut self, errored: bool) {
        if let Some(session) = self.session.as_mut() {
            session.completed = true;
            session.errored = errored;
        }
        self.status = Status::Idle;
    }
}

fn joke_message(id: MessageId, topic: JokeTopic, joke: &JokeResult) -> Message {
    Message::assistant(
        id,
        format!("Here's a {} joke for you:\n\n\"{}\"", joke.topic, joke.joke),
    )
    .with_reasoning(format!(
        "I detected you wanted a {topic} joke, so I used my joke tool to find one for you."
    ))
    .with_tool(ToolInvocation {
        kind: "joke-generator".to_string(),
        name: "get-random-joke".to_string(),
        state: ToolState::OutputAvailable,
        input: Some(json!({ "topic": topic.as_str() })),
        output: serde_json::to_value(joke).ok(),
    })
}
