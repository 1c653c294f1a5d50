use super::*;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::DEFAULT_COMMAND_PROMPT;

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw shell chunk events.
    pub keep_raw_chunks: bool,
    /// Keep login state transitions.
    pub keep_auth_states: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_auth_states: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        #[serde(alias = "prompt")]
        prompt_after: String,
    },
    ConnectionClosed {
        reason: String,
        #[serde(default)]
        prompt_before: Option<String>,
    },
    CommandOutput {
        command: String,
        #[serde(default)]
        prompt_before: Option<String>,
        #[serde(default)]
        prompt_after: Option<String>,
        success: bool,
        content: String,
        all: String,
    },
    AuthStateChanged {
        state: AuthState,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), ConnectError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                ConnectError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                ConnectError::InternalServerError(format!("record decode error: {e}"))
            })?;
            parsed.push(entry);
        }

        Ok(SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp (stable for equal timestamps) and noisy
    /// events such as raw shell chunks can be filtered out.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConnectError> {
        let mut entries = Self::from_jsonl(jsonl)?.entries()?;
        entries.sort_by_key(|entry| entry.ts_ms);

        let filtered = entries
            .into_iter()
            .filter(|entry| match &entry.event {
                SessionEvent::RawChunk { .. } => options.keep_raw_chunks,
                SessionEvent::AuthStateChanged { .. } => options.keep_auth_states,
                _ => true,
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline replayer backed by session recording data.
///
/// Implements [`CommandChannel`], so anything built on top of a live session
/// can run against a recorded fixture instead.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
    command_prompt: String,
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    pub device_addr: String,
    pub prompt: String,
}

impl SessionReplayer {
    /// Build a replayer from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self {
            entries,
            cursor: 0,
            command_prompt: DEFAULT_COMMAND_PROMPT.to_string(),
            closed: false,
        }
    }

    /// Build a replayer from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Prompt used to terminate replayed responses.
    pub fn with_command_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.command_prompt = prompt.into();
        self
    }

    /// Returns initial connection context if present in recording.
    pub fn initial_context(&self) -> Option<ReplayContext> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::ConnectionEstablished {
                device_addr,
                prompt_after,
            } => Some(ReplayContext {
                device_addr: device_addr.clone(),
                prompt: prompt_after.clone(),
            }),
            _ => None,
        })
    }

    /// Whether [`CommandChannel::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Replay the next recorded output for the given command.
    ///
    /// Recorded outputs for other commands before the match are skipped.
    pub fn replay_next(&mut self, command: &str) -> Result<Output, ConnectError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            if let SessionEvent::CommandOutput {
                command: recorded_command,
                prompt_after,
                success,
                content,
                all,
                ..
            } = &entry.event
            {
                if recorded_command != command {
                    continue;
                }
                return Ok(Output {
                    success: *success,
                    content: content.clone(),
                    all: all.clone(),
                    prompt: prompt_after.clone(),
                });
            }
        }

        Err(ConnectError::ReplayMismatchError(format!(
            "no replayable output found for command '{command}'"
        )))
    }

    /// Replay a script without a router by consuming recorded command outputs.
    pub fn replay_script<S: AsRef<str>>(
        &mut self,
        script: &[S],
    ) -> Result<Vec<Output>, ConnectError> {
        let mut outputs = Vec::with_capacity(script.len());
        for cmd in script {
            outputs.push(self.replay_next(cmd.as_ref())?);
        }
        Ok(outputs)
    }
}

impl CommandChannel for SessionReplayer {
    fn command_prompt(&self) -> &str {
        &self.command_prompt
    }

    async fn execute(&mut self, command: &str) -> Result<Output, ConnectError> {
        if self.closed {
            return Err(ConnectError::NotReady(AuthState::Disconnected));
        }
        self.replay_next(command)
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.closed = true;
        Ok(())
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
