//! One running game: the conversation sent to the model, the story shown to
//! the player, the current choices and a bounded undo history.
//!
//! A turn is `Idle -> AwaitingResponse -> Idle`. Only one turn can be in
//! flight; the UI layer reads the returned [`TurnOutcome`] and the accessors
//! instead of observing state.

use crate::ai::{ChatError, ChatRequest, ChatResult, ChatReply, ChatService, StreamEvent};
use crate::elements::{ElementTracker, ElementUpdate};
use crate::interpreter::{fallback_actions, parse_response};
use crate::types::{BackendKind, ChatMessage, ParsedTurn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const MAX_UNDO_HISTORY: usize = 20;

const OPENING_REQUEST: &str = "Begin the adventure. Describe the opening scene.";

/// Model settings applied to every turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
    pub theme: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: "llama3.1:latest".to_string(),
            temperature: 0.8,
            max_tokens: None,
            streaming: true,
            theme: "adventure".to_string(),
        }
    }
}

pub fn system_prompt(theme: &str) -> String {
    format!(
        r#"You are the narrator of an interactive text adventure. Theme: {theme}.

Describe what happens in the second person, in two or three short paragraphs.
Never decide what the player does next.
Introduce characters by name and mention items the player picks up.

After the story, write one final line in exactly this form:
ACTIONS: first option | second option | third option
Offer three or four options, each under ten words."#
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryKind {
    Narrator,
    Player,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoryEntry {
    pub kind: StoryKind,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
struct Snapshot {
    story: Vec<StoryEntry>,
    messages: Vec<ChatMessage>,
    actions: Vec<String>,
    elements: ElementTracker,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("a turn is already waiting for the model")]
    TurnInFlight,

    #[error("no turn is waiting for the model")]
    NoTurnInFlight,

    #[error("nothing to undo")]
    NothingToUndo,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Narrated {
        turn: ParsedTurn,
        tokens_per_second: Option<f64>,
        backend: BackendKind,
        discovered: ElementUpdate,
    },
    Failed {
        error: ChatError,
        message: String,
    },
}

pub struct GameSession {
    options: SessionOptions,
    state: TurnState,
    messages: Vec<ChatMessage>,
    story: Vec<StoryEntry>,
    actions: Vec<String>,
    elements: ElementTracker,
    history: VecDeque<Snapshot>,
    pending: Option<Snapshot>,
}

impl GameSession {
    pub fn new(options: SessionOptions) -> Self {
        let messages = vec![ChatMessage::system(system_prompt(&options.theme))];
        Self {
            options,
            state: TurnState::Idle,
            messages,
            story: Vec::new(),
            actions: Vec::new(),
            elements: ElementTracker::new(),
            history: VecDeque::new(),
            pending: None,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Takes effect from the next turn.
    pub fn set_options(&mut self, options: SessionOptions) {
        self.options = options;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn story(&self) -> &[StoryEntry] {
        &self.story
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn elements(&self) -> &ElementTracker {
        &self.elements
    }

    pub fn undo_depth(&self) -> usize {
        self.history.len()
    }

    /// Prepares the opening turn.
    pub fn begin_opening(&mut self) -> Result<ChatRequest, SessionError> {
        self.begin(OPENING_REQUEST, None)
    }

    /// Records the player's action and returns the request to send.
    pub fn begin_turn(&mut self, action: &str) -> Result<ChatRequest, SessionError> {
        let action = action.trim();
        self.begin(action, Some(action))
    }

    fn begin(&mut self, prompt: &str, shown: Option<&str>) -> Result<ChatRequest, SessionError> {
        if self.state == TurnState::AwaitingResponse {
            return Err(SessionError::TurnInFlight);
        }

        self.pending = Some(self.snapshot());
        self.messages.push(ChatMessage::user(prompt));
        if let Some(text) = shown {
            self.story.push(StoryEntry {
                kind: StoryKind::Player,
                text: text.to_string(),
            });
        }
        self.state = TurnState::AwaitingResponse;
        debug!("turn started, {} messages", self.messages.len());

        Ok(ChatRequest::new(self.options.model.clone(), self.messages.clone())
            .temperature(self.options.temperature)
            .max_tokens(self.options.max_tokens)
            .streaming(self.options.streaming))
    }

    /// Applies the model's reply, or surfaces the error as story text.
    pub fn complete_turn(
        &mut self,
        result: ChatResult<ChatReply>,
    ) -> Result<TurnOutcome, SessionError> {
        if self.state != TurnState::AwaitingResponse {
            return Err(SessionError::NoTurnInFlight);
        }
        self.state = TurnState::Idle;
        let pending = self.pending.take();

        match result {
            Ok(reply) => {
                let turn = parse_response(&reply.content);
                let discovered = self.elements.scan(&reply.content);

                self.messages.push(ChatMessage::assistant(reply.content));
                self.story.push(StoryEntry {
                    kind: StoryKind::Narrator,
                    text: turn.narrative.clone(),
                });
                self.actions = turn.actions.clone();

                if let Some(snapshot) = pending {
                    self.push_history(snapshot);
                }

                Ok(TurnOutcome::Narrated {
                    turn,
                    tokens_per_second: reply.tokens_per_second,
                    backend: reply.backend,
                    discovered,
                })
            }
            Err(error) => {
                warn!("turn failed: {error}");
                if let Some(snapshot) = pending {
                    self.messages = snapshot.messages;
                    self.actions = snapshot.actions;
                }
                if self.actions.is_empty() {
                    self.actions = fallback_actions();
                }
                let message = format!(
                    "The story falters: {error}\n{}",
                    error.troubleshooting_hint()
                );
                self.story.push(StoryEntry {
                    kind: StoryKind::Error,
                    text: message.clone(),
                });
                Ok(TurnOutcome::Failed { error, message })
            }
        }
    }

    /// Abandons an in-flight turn, for callers that dropped the request.
    pub fn cancel_turn(&mut self) {
        if self.state != TurnState::AwaitingResponse {
            return;
        }
        if let Some(snapshot) = self.pending.take() {
            self.restore(snapshot);
        }
        self.state = TurnState::Idle;
    }

    /// Plays the opening scene.
    pub async fn start(
        &mut self,
        service: &dyn ChatService,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<TurnOutcome, SessionError> {
        let request = self.begin_opening()?;
        let result = service.send_chat(&request, on_event).await;
        self.complete_turn(result)
    }

    /// Sends one player action and applies the reply.
    pub async fn play_turn(
        &mut self,
        service: &dyn ChatService,
        action: &str,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<TurnOutcome, SessionError> {
        let request = self.begin_turn(action)?;
        let result = service.send_chat(&request, on_event).await;
        self.complete_turn(result)
    }

    /// Steps back one turn.
    pub fn undo(&mut self) -> Result<(), SessionError> {
        if self.state == TurnState::AwaitingResponse {
            return Err(SessionError::TurnInFlight);
        }
        let snapshot = self.history.pop_back().ok_or(SessionError::NothingToUndo)?;
        self.restore(snapshot);
        Ok(())
    }

    /// Starts over with an empty story.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.state == TurnState::AwaitingResponse {
            return Err(SessionError::TurnInFlight);
        }
        *self = GameSession::new(self.options.clone());
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            story: self.story.clone(),
            messages: self.messages.clone(),
            actions: self.actions.clone(),
            elements: self.elements.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.story = snapshot.story;
        self.messages = snapshot.messages;
        self.actions = snapshot.actions;
        self.elements = snapshot.elements;
    }

    fn push_history(&mut self, snapshot: Snapshot) {
        if self.history.len() == MAX_UNDO_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn reply(text: &str) -> ChatResult<ChatReply> {
        Ok(ChatReply {
            content: text.to_string(),
            tokens_per_second: None,
            backend: BackendKind::Ollama,
        })
    }

    fn session() -> GameSession {
        GameSession::new(SessionOptions::default())
    }

    #[test]
    fn new_session_holds_only_the_system_prompt() {
        let session = session();
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::System);
        assert!(session.messages()[0].content.contains("ACTIONS:"));
        assert_eq!(session.options().theme, "adventure");
        assert!(session.messages()[0].content.contains("Theme: adventure."));
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn request_carries_options() {
        let mut session = GameSession::new(SessionOptions {
            model: "mistral:7b".into(),
            temperature: 0.2,
            max_tokens: Some(400),
            streaming: false,
            theme: "noir".into(),
        });
        let request = session.begin_turn("  Knock on the door ").unwrap();
        assert_eq!(request.model, "mistral:7b");
        assert_eq!(request.options.max_output_tokens, Some(400));
        assert!(!request.stream);
        assert_eq!(request.messages.last().unwrap().content, "Knock on the door");
        assert!(request.messages[0].content.contains("noir"));
    }

    #[test]
    fn second_turn_is_refused_while_one_is_in_flight() {
        let mut session = session();
        session.begin_turn("Go north").unwrap();
        assert_eq!(session.begin_turn("Go south"), Err(SessionError::TurnInFlight));
        assert_eq!(session.undo(), Err(SessionError::TurnInFlight));
    }

    #[test]
    fn complete_without_turn_is_an_error() {
        let mut session = session();
        assert_eq!(
            session.complete_turn(reply("x")),
            Err(SessionError::NoTurnInFlight)
        );
    }

    #[test]
    fn successful_turn_updates_everything() {
        let mut session = session();
        session.begin_opening().unwrap();
        let outcome = session
            .complete_turn(reply(
                "You wake in a cell. A guard named Orrin watches.\nACTIONS: Call out | Search the cell",
            ))
            .unwrap();

        match outcome {
            TurnOutcome::Narrated { turn, discovered, .. } => {
                assert_eq!(turn.actions, vec!["Call out", "Search the cell"]);
                assert_eq!(discovered.npcs, vec!["Orrin"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[2].role, Role::Assistant);
        assert_eq!(session.story().len(), 1);
        assert_eq!(session.story()[0].kind, StoryKind::Narrator);
        assert_eq!(session.undo_depth(), 1);
    }

    #[test]
    fn failed_turn_surfaces_error_and_rolls_back_conversation() {
        let mut session = session();
        session.begin_opening().unwrap();
        session
            .complete_turn(reply("A road.\nACTIONS: Walk | Wait"))
            .unwrap();

        session.begin_turn("Walk").unwrap();
        let outcome = session
            .complete_turn(Err(ChatError::NoBackendAvailable))
            .unwrap();

        match outcome {
            TurnOutcome::Failed { error, message } => {
                assert!(matches!(error, ChatError::NoBackendAvailable));
                assert!(message.contains("None of the configured servers responded"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.actions(), ["Walk", "Wait"]);
        assert_eq!(session.story().last().unwrap().kind, StoryKind::Error);
        assert_eq!(session.undo_depth(), 1);
    }

    #[test]
    fn undo_restores_previous_snapshot_and_pops_one() {
        let mut session = session();
        session.begin_opening().unwrap();
        session
            .complete_turn(reply("A road.\nACTIONS: Walk | Wait"))
            .unwrap();
        let story_before = session.story().to_vec();
        let messages_before = session.messages().to_vec();
        let actions_before = session.actions().to_vec();

        session.begin_turn("Walk").unwrap();
        session
            .complete_turn(reply("A town named Hollow.\nACTIONS: Enter | Leave"))
            .unwrap();
        assert_eq!(session.undo_depth(), 2);

        session.undo().unwrap();
        assert_eq!(session.undo_depth(), 1);
        assert_eq!(session.story(), story_before.as_slice());
        assert_eq!(session.messages(), messages_before.as_slice());
        assert_eq!(session.actions(), actions_before.as_slice());

        session.undo().unwrap();
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.undo(), Err(SessionError::NothingToUndo));
    }

    #[test]
    fn history_is_bounded() {
        let mut session = session();
        for i in 0..(MAX_UNDO_HISTORY + 5) {
            session.begin_turn(&format!("Step {i}")).unwrap();
            session
                .complete_turn(reply("You walk.\nACTIONS: Step"))
                .unwrap();
        }
        assert_eq!(session.undo_depth(), MAX_UNDO_HISTORY);

        for _ in 0..MAX_UNDO_HISTORY {
            session.undo().unwrap();
        }
        // The five oldest snapshots were dropped, so the earliest reachable
        // state still holds the first five turns.
        assert_eq!(session.story().len(), 10);
        assert_eq!(session.undo(), Err(SessionError::NothingToUndo));
    }

    #[test]
    fn cancel_restores_state_before_the_turn() {
        let mut session = session();
        session.begin_turn("Shout").unwrap();
        session.cancel_turn();
        assert_eq!(session.state(), TurnState::Idle);
        assert!(session.story().is_empty());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.undo_depth(), 0);
    }

    #[test]
    fn reset_clears_the_story() {
        let mut session = session();
        session.begin_opening().unwrap();
        session.complete_turn(reply("Hi.\nACTIONS: A")).unwrap();
        session.reset().unwrap();
        assert!(session.story().is_empty());
        assert!(session.actions().is_empty());
        assert_eq!(session.undo_depth(), 0);
    }
}
