use std::io;

use super::*;

impl Session<TelnetTransport> {
    /// Dials the router and runs the login sequence.
    ///
    /// On any failure the connection is closed before the error is returned.
    pub async fn connect(options: ConnectOptions) -> Result<Self, ConnectError> {
        Self::connect_with_recorder(options, None).await
    }

    /// Same as [`Session::connect`], recording the session into `recorder`.
    pub async fn connect_with_recorder(
        options: ConnectOptions,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, ConnectError> {
        let transport = TelnetTransport::connect(&options).await?;
        let mut session = Session::new(transport, options);
        session.recorder = recorder;

        if let Err(err) = session.authenticate().await {
            debug!("{} login failed: {}", session.options.device_addr(), err);
            let _ = session.close_session().await;
            return Err(err);
        }
        Ok(session)
    }
}

impl<T: Transport> Session<T> {
    /// Wraps a connected transport. Call [`Session::authenticate`] next.
    pub fn new(transport: T, options: ConnectOptions) -> Self {
        Self {
            transport,
            options,
            policy: WaitPolicy::default(),
            state: AuthState::Disconnected,
            closed: false,
            prompt: String::new(),
            recorder: None,
        }
    }

    /// Overrides the prompt-wait bounds.
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Records the session into `recorder`.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    /// Last command prompt line seen on this session.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn transition(&mut self, next: AuthState) {
        debug!(
            "{} auth state {:?} -> {:?}",
            self.options.device_addr(),
            self.state,
            next
        );
        self.state = next;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::AuthStateChanged { state: next });
        }
    }

    /// Drives the login sequence up to the first command prompt.
    ///
    /// The login and password prompts are only awaited when both credentials
    /// are configured. A missing prompt is terminal for the session; the
    /// session stays owned by the caller, who should close it.
    pub async fn authenticate(&mut self) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::transport(
                io::Error::new(io::ErrorKind::NotConnected, "session already closed"),
                "",
            ));
        }
        match self.state {
            AuthState::Ready => return Ok(()),
            AuthState::Disconnected => {}
            other => return Err(ConnectError::NotReady(other)),
        }

        let credentials = self
            .options
            .credentials()
            .map(|(user, password)| (user.to_string(), password.to_string()));

        if let Some((user, password)) = credentials {
            self.transition(AuthState::AwaitingLogin);
            let login_prompt = self.options.login_prompt().to_string();
            self.expect_prompt(&login_prompt).await?;
            self.write_line(&user).await?;

            self.transition(AuthState::AwaitingPassword);
            let password_prompt = self.options.password_prompt().to_string();
            self.expect_prompt(&password_prompt).await?;
            self.write_line(&password).await?;
        } else {
            debug!(
                "{} no credentials configured, skipping login",
                self.options.device_addr()
            );
        }

        self.transition(AuthState::AwaitingCommandPrompt);
        let command_prompt = self.options.command_prompt().to_string();
        let wait = self.expect_prompt(&command_prompt).await?;
        self.prompt = last_line(&wait.output);
        self.transition(AuthState::Ready);

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionEstablished {
                device_addr: self.options.device_addr(),
                prompt_after: self.prompt.clone(),
            });
        }
        Ok(())
    }

    /// Reads until the trimmed accumulated text ends with `prompt`.
    ///
    /// Gives up after the policy's attempt budget and reports `found = false`
    /// without an error. Read failures are returned immediately together with
    /// the text accumulated so far.
    pub async fn wait_for_prompt(&mut self, prompt: &str) -> Result<PromptWait, ConnectError> {
        let target = prompt.trim();
        let mut buffer: Vec<u8> = Vec::new();
        let mut reads = 0;

        loop {
            let chunk = match self.transport.read_chunk(self.policy.read_deadline).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    return Err(ConnectError::transport(
                        err,
                        String::from_utf8_lossy(&buffer),
                    ));
                }
            };
            reads += 1;
            trace!("{:?}", String::from_utf8_lossy(&chunk));
            if let Some(recorder) = self.recorder.as_ref() {
                let _ = recorder.record_raw_chunk(String::from_utf8_lossy(&chunk).into_owned());
            }
            buffer.extend_from_slice(&chunk);

            let text = String::from_utf8_lossy(&buffer);
            if text.trim().ends_with(target) {
                return Ok(PromptWait {
                    found: true,
                    output: text.into_owned(),
                    reads,
                });
            }
            if reads >= self.policy.attempts {
                debug!("prompt {:?} not found after {} reads", target, reads);
                return Ok(PromptWait {
                    found: false,
                    output: text.into_owned(),
                    reads,
                });
            }
            tokio::time::sleep(self.policy.retry_pause).await;
        }
    }

    async fn expect_prompt(&mut self, prompt: &str) -> Result<PromptWait, ConnectError> {
        let wait = self.wait_for_prompt(prompt).await?;
        if !wait.found {
            return Err(ConnectError::PromptTimeout {
                prompt: prompt.to_string(),
                output: wait.output,
            });
        }
        Ok(wait)
    }

    /// Writes one newline-terminated line.
    pub async fn write_line(&mut self, value: &str) -> Result<(), ConnectError> {
        self.transport
            .write_all(format!("{value}\n").as_bytes())
            .await
            .map_err(|err| ConnectError::transport(err, ""))
    }

    /// Executes a command and waits for the command prompt to come back.
    pub async fn execute_command(&mut self, command: &str) -> Result<Output, ConnectError> {
        if self.state != AuthState::Ready || self.closed {
            return Err(ConnectError::NotReady(self.state));
        }

        let prompt_before = self.prompt.clone();
        let command_prompt = self.options.command_prompt().to_string();
        let wait = match self.send_and_wait(command, &command_prompt).await {
            Ok(wait) => wait,
            Err(err) => {
                self.abandon("command_prompt_lost").await;
                return Err(err);
            }
        };
        let output = Output::from_response(command, &wait.output, &command_prompt);
        if let Some(prompt) = output.prompt.as_ref() {
            self.prompt = prompt.clone();
        }
        debug!(
            "{} executed {:?} success={}",
            self.options.device_addr(),
            command,
            output.success
        );

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::CommandOutput {
                command: command.to_string(),
                prompt_before: Some(prompt_before),
                prompt_after: output.prompt.clone(),
                success: output.success,
                content: output.content.clone(),
                all: output.all.clone(),
            });
        }
        Ok(output)
    }

    async fn send_and_wait(
        &mut self,
        command: &str,
        command_prompt: &str,
    ) -> Result<PromptWait, ConnectError> {
        self.write_line(command).await?;
        self.expect_prompt(command_prompt).await
    }

    /// Drops a session whose pending output can no longer be tied to a command.
    ///
    /// No `exit` is sent; late bytes from the router must never be read as
    /// the response to a later command.
    async fn abandon(&mut self, reason: &str) {
        debug!("{} abandoning session: {}", self.options.device_addr(), reason);
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: reason.to_string(),
                prompt_before: Some(self.prompt.clone()),
            });
        }
        self.closed = true;
        self.transition(AuthState::Disconnected);
        if let Err(err) = self.transport.shutdown().await {
            debug!("shutdown after abandon failed: {:?}", err);
        }
    }

    /// Safely closes the connection.
    ///
    /// A logged-in session sends `exit` first; errors while doing so are ignored.
    pub async fn close_session(&mut self) -> Result<(), ConnectError> {
        if self.closed {
            return Ok(());
        }
        debug!("{} closing session", self.options.device_addr());

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: "client_close_called".to_string(),
                prompt_before: Some(self.prompt.clone()),
            });
        }

        if self.state == AuthState::Ready
            && let Err(e) = self.write_line("exit").await
        {
            debug!("Failed to send exit command: {:?}", e);
        }

        self.closed = true;
        self.transition(AuthState::Disconnected);
        self.transport
            .shutdown()
            .await
            .map_err(|err| ConnectError::transport(err, ""))
    }
}

impl<T: Transport> CommandChannel for Session<T> {
    fn command_prompt(&self) -> &str {
        self.options.command_prompt()
    }

    async fn execute(&mut self, command: &str) -> Result<Output, ConnectError> {
        self.execute_command(command).await
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.close_session().await
    }
}

fn last_line(text: &str) -> String {
    text.trim()
        .lines()
        .last()
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}
