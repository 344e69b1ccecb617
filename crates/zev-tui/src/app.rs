use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zev_core::groq::types::ChatRequest;
use zev_core::storage::StorageError;
use zev_core::{
    models, superagent_workflow, ChatRole, Config, Conversation, ConversationStore, GroqClient, GroqError,
    PipelineStep, Preferences,
};

use crate::generation;
use crate::tui::{AppEvent, TaskEvent, TurnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Chat,
    Input,
}

impl FocusPane {
    pub fn next(self) -> Self {
        match self {
            FocusPane::Sidebar => FocusPane::Chat,
            FocusPane::Chat => FocusPane::Input,
            FocusPane::Input => FocusPane::Sidebar,
        }
    }
}

/// What a send turned into, for the caller to spawn.
pub enum Turn {
    Chat {
        turn: TurnId,
        request: ChatRequest,
        conversation: Uuid,
        message: Uuid,
    },
    Superagent {
        turn: TurnId,
        steps: Vec<PipelineStep>,
        task: String,
        conversation: Uuid,
    },
}

struct InFlight {
    turn: TurnId,
    conversation: Uuid,
    message: Option<Uuid>,
    task: Option<JoinHandle<()>>,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Conversations
    pub conversations: Vec<Conversation>,
    pub active: usize,
    pub sidebar_state: ListState,

    // Input
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Generation
    pub loading: bool,
    pub superagent_mode: bool,
    in_flight: Option<InFlight>,
    last_turn: TurnId,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub follow_output: bool,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Model picker state
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,
    pub selected_model: String,

    // API key input state
    pub show_api_key_input: bool,
    pub api_key_input: String,
    pub api_key_input_cursor: usize,

    pub error: Option<String>,
    pub dark_mode: bool,

    // Panel areas for mouse hit-testing (updated during render)
    pub sidebar_area: Option<Rect>,
    pub chat_area: Option<Rect>,

    pub config: Config,
    pub groq: GroqClient,
    store: ConversationStore,
    preferences: Preferences,
}

impl App {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = ConversationStore::new(config.open_history_storage()?);
        let preferences = Preferences::new(config.open_preferences_storage()?);
        Ok(Self::new(config, store, preferences))
    }

    pub fn new(config: Config, store: ConversationStore, preferences: Preferences) -> Self {
        let groq = GroqClient::from_config(&config);

        let mut conversations = store.load();
        if conversations.is_empty() {
            conversations.push(Conversation::new());
        }
        info!("loaded {} conversations", conversations.len());

        let mut sidebar_state = ListState::default();
        sidebar_state.select(Some(0));

        let available_models = models::all().iter().map(|m| m.id.to_string()).collect();
        let selected_model = config.default_model.clone();
        let dark_mode = preferences.dark_mode();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Input,

            conversations,
            active: 0,
            sidebar_state,

            input: String::new(),
            cursor: 0,

            loading: false,
            superagent_mode: false,
            in_flight: None,
            last_turn: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_output: true,
            animation_frame: 0,

            show_model_picker: false,
            available_models,
            model_picker_state: ListState::default(),
            selected_model,

            show_api_key_input: false,
            api_key_input: String::new(),
            api_key_input_cursor: 0,

            error: None,
            dark_mode,

            sidebar_area: None,
            chat_area: None,

            config,
            groq,
            store,
            preferences,
        }
    }

    pub fn active_conversation(&self) -> &Conversation {
        &self.conversations[self.active]
    }

    fn conversation_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    // Conversation list

    pub fn select_conversation(&mut self, index: usize) {
        if index < self.conversations.len() {
            self.active = index;
            self.sidebar_state.select(Some(index));
            self.follow_output = true;
            self.scroll_chat_to_bottom();
        }
    }

    pub fn sidebar_down(&mut self) {
        let next = (self.active + 1).min(self.conversations.len() - 1);
        self.select_conversation(next);
    }

    pub fn sidebar_up(&mut self) {
        self.select_conversation(self.active.saturating_sub(1));
    }

    /// Start a fresh conversation, reusing the current one if it is still empty.
    pub fn new_conversation(&mut self) {
        if self.active_conversation().messages.is_empty() {
            return;
        }
        self.conversations.insert(0, Conversation::new());
        if let Some(in_flight) = &self.in_flight {
            info!("leaving conversation {} generating in the background", in_flight.conversation);
        }
        self.select_conversation(0);
    }

    pub fn delete_active_conversation(&mut self) {
        let id = self.active_conversation().id;
        if self.in_flight.as_ref().map(|f| f.conversation == id).unwrap_or(false) {
            self.stop_generation();
        }
        if let Err(e) = self.store.delete(id) {
            self.report_storage_error(e);
        }
        self.conversations.remove(self.active);
        if self.conversations.is_empty() {
            self.conversations.push(Conversation::new());
        }
        self.select_conversation(self.active.min(self.conversations.len() - 1));
    }

    // Sending

    /// Turn the input box into a request. Nothing is sent without an API key.
    pub fn begin_turn(&mut self) -> Option<Turn> {
        let text = self.input.trim().to_string();
        if text.is_empty() || self.loading {
            return None;
        }
        if !self.groq.has_key() {
            self.error = Some(GroqError::MissingApiKey.to_string());
            self.open_api_key_input();
            return None;
        }

        self.error = None;
        self.input.clear();
        self.cursor = 0;
        self.follow_output = true;

        let system_prompt = self.config.system_prompt.clone();
        let superagent = self.superagent_mode;
        let model = self.selected_model.clone();
        let steps = superagent_workflow(&self.config.superagent);
        let conversation = &mut self.conversations[self.active];

        if conversation.messages.is_empty() {
            if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
                conversation.push_system(prompt);
            }
        }
        conversation.push_user(text.clone());
        let conversation_id = conversation.id;

        self.last_turn += 1;
        let turn_id = self.last_turn;
        let turn = if superagent {
            self.in_flight = Some(InFlight {
                turn: turn_id,
                conversation: conversation_id,
                message: None,
                task: None,
            });
            Turn::Superagent {
                turn: turn_id,
                steps,
                task: text,
                conversation: conversation_id,
            }
        } else {
            let messages = conversation.request_messages();
            let message = conversation.start_assistant();
            self.in_flight = Some(InFlight {
                turn: turn_id,
                conversation: conversation_id,
                message: Some(message),
                task: None,
            });
            Turn::Chat {
                turn: turn_id,
                request: self.groq.request(&model, messages, true),
                conversation: conversation_id,
                message,
            }
        };

        self.loading = true;
        self.persist(conversation_id);
        self.scroll_chat_to_bottom();
        Some(turn)
    }

    /// Send the input box contents, spawning the generation task.
    pub fn submit(&mut self, tx: &UnboundedSender<AppEvent>) {
        let Some(turn) = self.begin_turn() else {
            return;
        };
        let task = match turn {
            Turn::Chat {
                turn,
                request,
                conversation,
                message,
            } => generation::spawn_chat(
                self.groq.clone(),
                request,
                self.config.flush.to_policy(),
                turn,
                conversation,
                message,
                tx.clone(),
            ),
            Turn::Superagent {
                turn,
                steps,
                task,
                conversation,
            } => generation::spawn_superagent(self.groq.clone(), steps, task, turn, conversation, tx.clone()),
        };
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.task = Some(task);
        }
    }

    /// Stop generating: the task is aborted, which drops the HTTP response.
    /// Text already shown is kept.
    pub fn stop_generation(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        if let Some(task) = in_flight.task {
            task.abort();
        }
        info!("generation stopped by user");
        self.finish_in_flight(in_flight.conversation, in_flight.message);
    }

    pub fn apply_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Batch {
                conversation,
                message,
                batch,
            } => {
                if let Some(c) = self.conversation_mut(conversation) {
                    c.append(message, &batch);
                }
                if self.follow_output {
                    self.scroll_chat_to_bottom();
                }
            }
            TaskEvent::Step { turn, conversation, output } => {
                if !self.is_current(turn) {
                    debug!("dropping step {} from stale turn {}", output.name, turn);
                    return;
                }
                if let Some(c) = self.conversation_mut(conversation) {
                    c.push_assistant(format!("**{}**\n{}", output.name, output.output));
                }
                self.persist(conversation);
                if self.follow_output {
                    self.scroll_chat_to_bottom();
                }
            }
            TaskEvent::Finished { turn } => {
                if let Some(in_flight) = self.take_current(turn) {
                    self.finish_in_flight(in_flight.conversation, in_flight.message);
                }
            }
            TaskEvent::Failed { turn, error } => {
                if let Some(in_flight) = self.take_current(turn) {
                    self.finish_in_flight(in_flight.conversation, in_flight.message);
                    self.error = Some(error);
                }
            }
            TaskEvent::Models(ids) => {
                for id in ids {
                    if !self.available_models.contains(&id) {
                        self.available_models.push(id);
                    }
                }
            }
        }
    }

    fn is_current(&self, turn: TurnId) -> bool {
        self.in_flight.as_ref().map(|f| f.turn == turn).unwrap_or(false)
    }

    fn take_current(&mut self, turn: TurnId) -> Option<InFlight> {
        if self.is_current(turn) {
            self.in_flight.take()
        } else {
            None
        }
    }

    fn finish_in_flight(&mut self, conversation: Uuid, message: Option<Uuid>) {
        if let (Some(c), Some(message)) = (self.conversation_mut(conversation), message) {
            c.finish_message(message);
            // An aborted or failed reply with no text is not worth keeping.
            c.messages.retain(|m| !(m.id == message && m.content.is_empty() && m.reasoning.is_none()));
        }
        self.loading = false;
        self.persist(conversation);
    }

    fn persist(&mut self, conversation: Uuid) {
        let Some(c) = self.conversations.iter().find(|c| c.id == conversation) else {
            return;
        };
        if let Err(e) = self.store.upsert(c) {
            self.report_storage_error(e);
        }
    }

    fn report_storage_error(&mut self, e: StorageError) {
        warn!("failed to save conversations: {}", e);
        self.error = Some(format!("Could not save history: {}", e));
    }

    pub fn shutdown(&mut self) {
        self.stop_generation();
    }

    // Preferences

    pub fn toggle_dark_mode(&mut self) {
        self.dark_mode = !self.dark_mode;
        if let Err(e) = self.preferences.set_dark_mode(self.dark_mode) {
            warn!("failed to save dark mode: {}", e);
        }
    }

    pub fn toggle_superagent(&mut self) {
        self.superagent_mode = !self.superagent_mode;
    }

    // Animation and scrolling

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
        self.follow_output = false;
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
        self.follow_output = false;
    }

    pub fn scroll_chat_to_top(&mut self) {
        self.chat_scroll = 0;
        self.follow_output = false;
    }

    /// Scroll chat to bottom so the newest text is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        let visible = self
            .active_conversation()
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System);
        for msg in visible {
            total_lines = total_lines.saturating_add(1); // Role line
            let reasoning = msg.reasoning.as_deref().unwrap_or("");
            for line in reasoning.lines().chain(msg.content.lines()) {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                total_lines = total_lines.saturating_add(((char_count / wrap_width) + 1) as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        if self.loading {
            total_lines = total_lines.saturating_add(2); // "AI:" + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
        self.follow_output = true;
    }

    // Model picker methods

    pub fn open_model_picker(&mut self, tx: &UnboundedSender<AppEvent>) {
        self.show_model_picker = true;
        let current = self
            .available_models
            .iter()
            .position(|m| m == &self.selected_model)
            .unwrap_or(0);
        self.model_picker_state.select(Some(current));
        if self.groq.has_key() {
            generation::spawn_model_listing(self.groq.clone(), tx.clone());
        }
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        if let Some(i) = self.model_picker_state.selected() {
            if let Some(model) = self.available_models.get(i) {
                self.selected_model = model.clone();
                self.show_model_picker = false;
                // Save to config
                if let Err(e) = Config::save_default_model(&self.selected_model) {
                    warn!("failed to save default model: {}", e);
                }
            }
        }
    }

    // API key input

    pub fn open_api_key_input(&mut self) {
        self.show_api_key_input = true;
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
    }

    pub fn close_api_key_input(&mut self) {
        self.show_api_key_input = false;
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
    }

    pub fn save_api_key(&mut self) {
        let key = self.api_key_input.trim().to_string();
        if !key.is_empty() {
            if let Err(e) = Config::save_api_key(&key) {
                warn!("failed to save API key: {}", e);
            }
            self.config.api_key = Some(key);
            self.groq = GroqClient::from_config(&self.config);
            self.error = None;
        }
        self.close_api_key_input();
    }

    /// Returns the source of the API key: "env", "config", or None
    pub fn key_source(&self) -> Option<&'static str> {
        self.config.key_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zev_core::config::API_KEY_ENV;
    use zev_core::{Flushed, MemoryStorage, StepOutput};

    fn app_with_key(key: Option<&str>) -> App {
        let config = Config {
            api_key: key.map(String::from),
            ..Config::new()
        };
        App::new(
            config,
            ConversationStore::new(Box::new(MemoryStorage::new())),
            Preferences::new(Box::new(MemoryStorage::new())),
        )
    }

    fn content(text: &str) -> Flushed {
        Flushed {
            content: Some(text.to_string()),
            reasoning: None,
        }
    }

    #[test]
    fn starts_with_one_empty_conversation() {
        let app = app_with_key(None);
        assert_eq!(app.conversations.len(), 1);
        assert!(app.active_conversation().messages.is_empty());
        assert!(app.dark_mode);
    }

    #[test]
    fn missing_key_blocks_send_and_keeps_input() {
        if std::env::var(API_KEY_ENV).is_ok() {
            return;
        }
        let mut app = app_with_key(None);
        app.input = "hello".to_string();

        assert!(app.begin_turn().is_none());
        assert_eq!(app.input, "hello");
        assert!(app.show_api_key_input);
        assert!(app.error.as_deref().unwrap_or("").contains("API key"));
        assert!(app.active_conversation().messages.is_empty());
    }

    #[test]
    fn chat_turn_streams_into_placeholder() {
        let mut app = app_with_key(Some("test-key"));
        app.config.system_prompt = Some("be brief".to_string());
        app.input = "  hi there ".to_string();

        let Some(Turn::Chat { turn, request, conversation, message }) = app.begin_turn() else {
            panic!("expected a chat turn");
        };
        assert!(app.loading);
        assert!(app.input.is_empty());
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "hi there");
        assert!(request.stream);

        // A second send while loading is ignored.
        app.input = "again".to_string();
        assert!(app.begin_turn().is_none());

        app.apply_task_event(TaskEvent::Batch { conversation, message, batch: content("Hel") });
        app.apply_task_event(TaskEvent::Batch { conversation, message, batch: content("lo") });
        app.apply_task_event(TaskEvent::Finished { turn });

        assert!(!app.loading);
        let reply = app.active_conversation().messages.last().unwrap();
        assert_eq!(reply.content, "Hello");
        assert!(!reply.streaming);
        assert_eq!(app.active_conversation().title, "hi there");
    }

    #[test]
    fn stop_keeps_flushed_text_and_drops_empty_placeholder() {
        let mut app = app_with_key(Some("test-key"));
        app.input = "first".to_string();
        let Some(Turn::Chat { conversation, message, .. }) = app.begin_turn() else {
            panic!("expected a chat turn");
        };
        app.apply_task_event(TaskEvent::Batch { conversation, message, batch: content("partial") });
        app.stop_generation();

        assert!(!app.loading);
        let reply = app.active_conversation().messages.last().unwrap();
        assert_eq!(reply.content, "partial");

        // Late batches from the aborted task are rejected.
        app.apply_task_event(TaskEvent::Batch { conversation, message, batch: content("!") });
        assert_eq!(app.active_conversation().messages.last().unwrap().content, "partial");

        app.input = "second".to_string();
        assert!(app.begin_turn().is_some());
        app.stop_generation();
        let roles: Vec<_> = app.active_conversation().messages.iter().map(|m| m.role).collect();
        assert_eq!(roles.len(), 3);
    }

    #[test]
    fn failure_surfaces_banner() {
        let mut app = app_with_key(Some("test-key"));
        app.input = "boom".to_string();
        let Some(Turn::Chat { turn, .. }) = app.begin_turn() else {
            panic!("expected a chat turn");
        };
        app.apply_task_event(TaskEvent::Failed {
            turn,
            error: "Groq API error 500: oops".to_string(),
        });
        assert!(!app.loading);
        assert_eq!(app.error.as_deref(), Some("Groq API error 500: oops"));
        assert_eq!(app.active_conversation().messages.len(), 1);
    }

    #[test]
    fn superagent_steps_become_messages() {
        let mut app = app_with_key(Some("test-key"));
        app.toggle_superagent();
        app.input = "write a haiku".to_string();

        let Some(Turn::Superagent { turn, steps, task, conversation }) = app.begin_turn() else {
            panic!("expected a superagent turn");
        };
        assert_eq!(steps.len(), 3);
        assert_eq!(task, "write a haiku");

        for (index, name) in ["Researcher", "Writer", "Editor"].iter().enumerate() {
            app.apply_task_event(TaskEvent::Step {
                turn,
                conversation,
                output: StepOutput {
                    index,
                    name: name.to_string(),
                    output: format!("out {}", index),
                },
            });
        }
        app.apply_task_event(TaskEvent::Finished { turn });

        let messages = &app.active_conversation().messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].content, "**Editor**\nout 2");
        assert!(!app.loading);
    }

    #[test]
    fn events_from_stopped_turn_leave_next_turn_alone() {
        let mut app = app_with_key(Some("test-key"));
        app.toggle_superagent();
        app.input = "first task".to_string();
        let Some(Turn::Superagent { turn: old, conversation, .. }) = app.begin_turn() else {
            panic!("expected a superagent turn");
        };
        app.stop_generation();

        app.input = "second task".to_string();
        let Some(Turn::Superagent { turn: current, .. }) = app.begin_turn() else {
            panic!("expected a superagent turn");
        };
        assert_ne!(old, current);
        let before = app.active_conversation().messages.len();

        app.apply_task_event(TaskEvent::Step {
            turn: old,
            conversation,
            output: StepOutput {
                index: 0,
                name: "Researcher".to_string(),
                output: "stale".to_string(),
            },
        });
        app.apply_task_event(TaskEvent::Failed {
            turn: old,
            error: "aborted".to_string(),
        });
        app.apply_task_event(TaskEvent::Finished { turn: old });

        assert!(app.loading);
        assert!(app.error.is_none());
        assert_eq!(app.active_conversation().messages.len(), before);

        app.apply_task_event(TaskEvent::Finished { turn: current });
        assert!(!app.loading);
    }

    #[test]
    fn scroll_ignores_hidden_system_prompt() {
        let mut app = app_with_key(Some("test-key"));
        app.chat_width = 40;
        app.chat_height = 5;
        app.config.system_prompt = Some("line\n".repeat(30));
        app.input = "hi".to_string();
        let Some(Turn::Chat { turn, conversation, message, .. }) = app.begin_turn() else {
            panic!("expected a chat turn");
        };
        app.apply_task_event(TaskEvent::Batch { conversation, message, batch: content("hello") });
        app.apply_task_event(TaskEvent::Finished { turn });

        // Six rendered lines in a five-row pane.
        app.scroll_chat_to_bottom();
        assert_eq!(app.chat_scroll, 1);
    }

    #[test]
    fn new_conversation_reuses_empty_one() {
        let mut app = app_with_key(Some("test-key"));
        app.new_conversation();
        assert_eq!(app.conversations.len(), 1);

        app.input = "hi".to_string();
        app.begin_turn();
        app.stop_generation();
        app.new_conversation();
        assert_eq!(app.conversations.len(), 2);
        assert_eq!(app.active, 0);
        assert!(app.active_conversation().messages.is_empty());

        app.select_conversation(1);
        app.delete_active_conversation();
        assert_eq!(app.conversations.len(), 1);
    }

    #[test]
    fn listed_models_are_merged_once() {
        let mut app = app_with_key(None);
        let before = app.available_models.len();
        app.apply_task_event(TaskEvent::Models(vec![
            "llama-3.3-70b-versatile".to_string(),
            "brand-new-model".to_string(),
        ]));
        assert_eq!(app.available_models.len(), before + 1);
    }
}
