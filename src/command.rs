//! Outbound command channel
//!
//! Reads text lines from a [`CommandSource`] and writes each one to the
//! peripheral until the exit sentinel arrives, the input ends, or the link
//! drops. Line acquisition may block indefinitely; it never runs on the task
//! that delivers notifications.

use std::io::BufRead;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::session::LinkSession;
use crate::transport::Transport;
use crate::{LinkError, Result};

/// Lines already buffered between the stdin thread and the command loop
const STDIN_BUFFER: usize = 16;

/// A source of command lines.
#[async_trait::async_trait]
pub trait CommandSource: Send {
    /// Next line of input, or `None` once the input is exhausted.
    async fn next_line(&mut self) -> Option<String>;
}

#[async_trait::async_trait]
impl CommandSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> Option<String> {
        self.recv().await
    }
}

/// Command lines read from standard input on a dedicated thread.
///
/// The thread stops by itself after forwarding the exit sentinel, at end
/// of input, or once the receiving side is gone.
#[derive(Debug)]
pub struct StdinCommands {
    lines: mpsc::Receiver<String>,
}

impl StdinCommands {
    pub fn spawn(config: &LinkConfig) -> std::io::Result<Self> {
        let (tx, lines) = mpsc::channel(STDIN_BUFFER);
        let config = config.clone();

        std::thread::Builder::new().name("gaslink-stdin".to_string()).spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to read command input: {}", e);
                        break;
                    }
                };
                let is_exit = config.is_exit_command(&line);
                if tx.blocking_send(line).is_err() || is_exit {
                    break;
                }
            }
            debug!("Stdin reader finished");
        })?;

        Ok(Self { lines })
    }
}

#[async_trait::async_trait]
impl CommandSource for StdinCommands {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

/// How the command loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandExit {
    /// The exit sentinel was entered
    Exited,
    /// The input source was exhausted
    InputClosed,
    /// The link dropped while the loop was running
    LinkLost,
}

/// Drives command input into a connected session.
#[derive(Debug)]
pub struct CommandChannel<S> {
    source: S,
}

impl<S: CommandSource> CommandChannel<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Run until exit, end of input, or link loss, then shut the session down.
    ///
    /// Every line other than the exit sentinel is written, blank lines
    /// included. Failed writes are reported to the session's sink and the
    /// loop keeps going. Only the exit sentinel unsubscribes before closing;
    /// end of input just disconnects, and after a link loss the session has
    /// already released the transport.
    pub async fn run<T: Transport>(mut self, session: &mut LinkSession<T>) -> Result<CommandExit> {
        let link = session.link_token().ok_or_else(|| LinkError::not_connected("command channel"))?;
        info!("Command channel ready (type '{}' to quit)", session.config().exit_command);

        let outcome = loop {
            let line = tokio::select! {
                biased;
                _ = link.cancelled() => break CommandExit::LinkLost,
                line = self.source.next_line() => line,
            };

            let Some(line) = line else {
                info!("Command input closed");
                break CommandExit::InputClosed;
            };
            let command = line.trim_end_matches(['\r', '\n']);
            if session.config().is_exit_command(command) {
                info!("Exit command received");
                break CommandExit::Exited;
            }

            let written = tokio::select! {
                biased;
                _ = link.cancelled() => break CommandExit::LinkLost,
                result = session.send_command(command) => result,
            };

            match written {
                Ok(()) => debug!("Command sent: {}", command),
                Err(e) => {
                    warn!("Error sending command: {}", e);
                    session.sink().report_command_error(&e.to_string());
                    if e.is_disconnect() {
                        break CommandExit::LinkLost;
                    }
                }
            }
        };

        match outcome {
            CommandExit::Exited => session.close().await?,
            CommandExit::InputClosed => session.disconnect().await?,
            CommandExit::LinkLost => {
                info!("Link lost; command channel stopping");
                session.disconnect().await?;
            }
        }
        Ok(outcome)
    }
}
