use std::future::Future;

use log::{debug, info};

use super::*;
use crate::session::{CommandChannel, Output, Session};

/// Create/read/list/delete operations on the router's virtual servers.
///
/// [`CliVirtualServers`] is the implementation backed by the router shell;
/// tests substitute in-memory doubles.
pub trait VirtualServers: Send {
    /// All rules in device order.
    fn list(&mut self) -> impl Future<Output = Result<Vec<VirtualServer>, ConnectError>> + Send;

    /// The first rule whose name matches, or [`ConnectError::NotFound`].
    fn read(
        &mut self,
        input: &ReadInput,
    ) -> impl Future<Output = Result<VirtualServer, ConnectError>> + Send {
        async move {
            self.list()
                .await?
                .into_iter()
                .find(|rule| input.matches(rule))
                .ok_or_else(|| ConnectError::NotFound(input.name.clone()))
        }
    }

    /// Adds a rule.
    fn create(&mut self, input: &CreateInput)
    -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Removes the named rule. Succeeds without changes if it does not exist.
    fn delete(&mut self, input: &DeleteInput)
    -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Ends the underlying session.
    fn close(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;
}

/// Virtual-server client driving the router shell through a [`CommandChannel`].
pub struct CliVirtualServers<C = Session> {
    channel: C,
}

impl<C: CommandChannel> CliVirtualServers<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Executes one command; an error marker in the response fails it.
    async fn run(&mut self, command: &str) -> Result<Output, ConnectError> {
        let output = self.channel.execute(command).await?;
        if !output.success {
            return Err(ConnectError::Command {
                command: command.to_string(),
                output: output.content,
            });
        }
        Ok(output)
    }
}

impl<C: CommandChannel> VirtualServers for CliVirtualServers<C> {
    async fn list(&mut self) -> Result<Vec<VirtualServer>, ConnectError> {
        let output = self.run(SHOW_COMMAND).await?;
        let servers = parse_virtual_servers(&output.content, self.channel.command_prompt());
        debug!("router reported {} virtual servers", servers.len());
        Ok(servers)
    }

    async fn create(&mut self, input: &CreateInput) -> Result<(), ConnectError> {
        let command = input.create_command()?;
        info!("creating virtual server {}", input.server_name);
        self.run(&command).await?;
        Ok(())
    }

    async fn delete(&mut self, input: &DeleteInput) -> Result<(), ConnectError> {
        let rule = match self.read(&ReadInput::from(input)).await {
            Ok(rule) => rule,
            Err(ConnectError::NotFound(name)) => {
                debug!("virtual server {} already absent", name);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let command = rule.remove_command()?;
        info!("removing virtual server {}", rule.server_name);
        self.run(&command).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.channel.close().await
    }
}
