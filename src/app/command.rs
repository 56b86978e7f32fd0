//! Line commands for the interactive shell.
//!
//! Fields are `#`-separated: `add#Tool=Eclipse#SensorDataType=DevEvent`,
//! `statechange#/src/Foo.java#Type=Edit`, `send`, `ping`, `quit`, ...

use crate::domain::{KEY_RUNTIME, KEY_SENSOR_DATA_TYPE, KEY_TIMESTAMP, KEY_URI};
use crate::reliability::RecoveryOutcome;
use crate::sender::SensorTransport;
use crate::shell::Shell;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

const STATE_CHANGE_TYPE: &str = "StateChange";

pub const HELP: &str = "\
Commands (fields separated by '#'):
  add#Key=Value#...            queue one sensor data record
  statechange#Resource#Key=Value#...
                               queue a StateChange record if Resource changed
  send                         send queued records now
  ping                         check whether the server is reachable
  hasOfflineData               report whether offline data is waiting
  recover                      resend offline data now
  properties                   print the active configuration
  help                         show this text
  quit                         flush and exit";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command '{0}', type 'help' for a list")]
    Unknown(String),
    #[error("Command '{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("Expected Key=Value, got '{0}'")]
    BadPair(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(Vec<(String, String)>),
    StateChange {
        resource: String,
        pairs: Vec<(String, String)>,
    },
    Send,
    Ping,
    HasOfflineData,
    Recover,
    Properties,
    Help,
    Quit,
}

fn parse_pairs<'a>(fields: impl Iterator<Item = &'a str>) -> Result<Vec<(String, String)>, CommandError> {
    fields
        .filter(|field| !field.trim().is_empty())
        .map(|field| match field.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(CommandError::BadPair(field.to_string())),
        })
        .collect()
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let mut fields = line.split('#');
        let name = fields.next().unwrap_or_default().trim();

        match name.to_ascii_lowercase().as_str() {
            "add" => {
                let pairs = parse_pairs(fields)?;
                if pairs.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "add",
                        argument: "at least one Key=Value pair",
                    });
                }
                Ok(Command::Add(pairs))
            }
            "statechange" => {
                let resource = fields
                    .next()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(CommandError::MissingArgument {
                        command: "statechange",
                        argument: "a resource",
                    })?
                    .to_string();
                Ok(Command::StateChange {
                    resource,
                    pairs: parse_pairs(fields)?,
                })
            }
            "send" => Ok(Command::Send),
            "ping" => Ok(Command::Ping),
            "hasofflinedata" => Ok(Command::HasOfflineData),
            "recover" => Ok(Command::Recover),
            "properties" => Ok(Command::Properties),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(name.to_string())),
        }
    }
}

/// Outcome of one command, printed as one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Ok(String),
    Error(String),
    /// The shell has stopped; the loop should exit.
    Quit(Result<String, String>),
}

impl CommandReply {
    pub fn is_quit(&self) -> bool {
        matches!(self, CommandReply::Quit(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CommandReply::Error(_) | CommandReply::Quit(Err(_)))
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandReply::Ok(message) | CommandReply::Quit(Ok(message)) => write!(f, "OK: {message}"),
            CommandReply::Error(message) | CommandReply::Quit(Err(message)) => {
                write!(f, "ERROR: {message}")
            }
        }
    }
}

/// Runs commands against one shell.
pub struct CommandProcessor<T: SensorTransport> {
    shell: Shell<T>,
    last_state: Mutex<Option<(String, u64)>>,
}

impl<T: SensorTransport> CommandProcessor<T> {
    pub fn new(shell: Shell<T>) -> Self {
        Self {
            shell,
            last_state: Mutex::new(None),
        }
    }

    pub fn shell(&self) -> &Shell<T> {
        &self.shell
    }

    pub async fn handle_line(&self, line: &str) -> CommandReply {
        match line.parse::<Command>() {
            Ok(command) => self.execute(command).await,
            Err(e) => CommandReply::Error(e.to_string()),
        }
    }

    pub async fn execute(&self, command: Command) -> CommandReply {
        debug!(command = ?command, "Executing shell command");
        match command {
            Command::Add(pairs) => match self.shell.add(pairs).await {
                Ok(()) => CommandReply::Ok("added".to_string()),
                Err(e) => CommandReply::Error(e.to_string()),
            },
            Command::StateChange { resource, pairs } => self.state_change(resource, pairs).await,
            Command::Send => match self.shell.send().await {
                Ok(sent) => CommandReply::Ok(format!("sent {sent} records")),
                Err(e) => CommandReply::Error(e.to_string()),
            },
            Command::Ping => {
                let host = &self.shell.properties().host;
                if self.shell.ping().await {
                    CommandReply::Ok(format!("{host} is reachable"))
                } else {
                    CommandReply::Error(format!("{host} is not reachable"))
                }
            }
            Command::HasOfflineData => {
                CommandReply::Ok(self.shell.has_offline_data().await.to_string())
            }
            Command::Recover => match self.shell.recover().await {
                RecoveryOutcome::Recovered { sent, deferred } => {
                    CommandReply::Ok(format!("recovered {sent} records, {deferred} deferred"))
                }
                RecoveryOutcome::NothingToRecover => {
                    CommandReply::Ok("no offline data".to_string())
                }
                RecoveryOutcome::AlreadyRunning => {
                    CommandReply::Ok("recovery already running".to_string())
                }
                RecoveryOutcome::Unreachable => {
                    CommandReply::Error("server unreachable, offline data kept".to_string())
                }
                RecoveryOutcome::Failed { reason } => CommandReply::Error(reason),
            },
            Command::Properties => match serde_json::to_string_pretty(self.shell.properties()) {
                Ok(json) => CommandReply::Ok(json),
                Err(e) => CommandReply::Error(e.to_string()),
            },
            Command::Help => CommandReply::Ok(HELP.to_string()),
            Command::Quit => CommandReply::Quit(
                self.shell
                    .quit()
                    .await
                    .map(|sent| format!("sent {sent} records, shell stopped"))
                    .map_err(|e| e.to_string()),
            ),
        }
    }

    /// Adds a `StateChange` record unless the resource and its checksum match
    /// the previous state change.
    async fn state_change(&self, resource: String, pairs: Vec<(String, String)>) -> CommandReply {
        let checksum = resource_checksum(&resource, &pairs).await;
        let unchanged = self
            .last_state
            .lock()
            .as_ref()
            .is_some_and(|(last, sum)| *last == resource && *sum == checksum);
        if unchanged {
            return CommandReply::Ok("unchanged, not added".to_string());
        }

        let mut description = vec![(KEY_URI.to_string(), resource.clone())];
        if !pairs.iter().any(|(k, _)| k == KEY_SENSOR_DATA_TYPE) {
            description.push((KEY_SENSOR_DATA_TYPE.to_string(), "DevEvent".to_string()));
        }
        if !pairs.iter().any(|(k, _)| k == "Type") {
            description.push(("Type".to_string(), STATE_CHANGE_TYPE.to_string()));
        }
        description.extend(pairs);

        match self.shell.add(description).await {
            Ok(()) => {
                *self.last_state.lock() = Some((resource, checksum));
                CommandReply::Ok("added".to_string())
            }
            Err(e) => CommandReply::Error(e.to_string()),
        }
    }
}

/// Checksum of the resource's contents when it is a readable file, of the
/// supplied pairs otherwise. Timestamps never count as a change.
async fn resource_checksum(resource: &str, pairs: &[(String, String)]) -> u64 {
    let mut hasher = DefaultHasher::new();
    match tokio::fs::read(resource).await {
        Ok(contents) => contents.hash(&mut hasher),
        Err(_) => {
            for (key, value) in pairs.iter().filter(|(k, _)| k != KEY_TIMESTAMP && k != KEY_RUNTIME) {
                key.hash(&mut hasher);
                value.hash(&mut hasher);
            }
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::ShellProperties;
    use crate::shell::fake::FakeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    async fn processor(transport: Arc<FakeTransport>) -> CommandProcessor<FakeTransport> {
        let properties = ShellProperties {
            offline_cache_enabled: false,
            offline_recovery_enabled: false,
            autosend_interval: Duration::ZERO,
            autosend_max_buffer: 0,
            ..ShellProperties::default()
        };
        CommandProcessor::new(Shell::start(properties, transport).await.unwrap())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "add#Tool=Eclipse#Query=a=b".parse::<Command>(),
            Ok(Command::Add(vec![
                ("Tool".to_string(), "Eclipse".to_string()),
                ("Query".to_string(), "a=b".to_string()),
            ]))
        );
        assert_eq!("SEND".parse::<Command>(), Ok(Command::Send));
        assert_eq!("hasOfflineData".parse::<Command>(), Ok(Command::HasOfflineData));
        assert_eq!(
            "statechange#/src/Foo.java".parse::<Command>(),
            Ok(Command::StateChange {
                resource: "/src/Foo.java".to_string(),
                pairs: Vec::new(),
            })
        );
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert!(matches!("add".parse::<Command>(), Err(CommandError::MissingArgument { .. })));
        assert!(matches!("add#novalue".parse::<Command>(), Err(CommandError::BadPair(_))));
        assert!(matches!("statechange#".parse::<Command>(), Err(CommandError::MissingArgument { .. })));
        assert!(matches!("bogus".parse::<Command>(), Err(CommandError::Unknown(_))));
    }

    #[tokio::test]
    async fn test_add_send_quit() {
        let transport = Arc::new(FakeTransport::reachable());
        let processor = processor(transport.clone()).await;

        assert!(!processor.handle_line("add#Tool=Eclipse#Type=Edit").await.is_error());
        assert!(processor.handle_line("add#Timestamp=garbage").await.is_error());
        assert_eq!(
            processor.handle_line("send").await,
            CommandReply::Ok("sent 1 records".to_string())
        );
        assert_eq!(transport.posted.lock()[0].property("Type"), Some("Edit"));

        let reply = processor.handle_line("quit").await;
        assert!(reply.is_quit());
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn test_statechange_deduplicates() {
        let transport = Arc::new(FakeTransport::reachable());
        let processor = processor(transport.clone()).await;

        processor.handle_line("statechange#/nowhere/Foo.java#Size=10").await;
        processor.handle_line("statechange#/nowhere/Foo.java#Size=10").await;
        processor.handle_line("statechange#/nowhere/Foo.java#Size=11").await;
        processor.handle_line("statechange#/nowhere/Bar.java#Size=11").await;
        assert_eq!(processor.shell().queued_len().await, 3);

        processor.handle_line("send").await;
        let posted = transport.posted.lock();
        assert_eq!(posted[0].uri(), "/nowhere/Foo.java");
        assert_eq!(posted[0].property("Type"), Some(STATE_CHANGE_TYPE));
        assert_eq!(posted[0].sensor_data_type(), "DevEvent");
    }

    #[tokio::test]
    async fn test_ping_and_offline_replies() {
        let transport = Arc::new(FakeTransport::unreachable());
        let processor = processor(transport).await;
        assert!(processor.handle_line("ping").await.is_error());
        assert_eq!(
            processor.handle_line("hasOfflineData").await,
            CommandReply::Ok("false".to_string())
        );
        assert_eq!(
            processor.handle_line("recover").await,
            CommandReply::Ok("no offline data".to_string())
        );
        let properties = processor.handle_line("properties").await;
        assert!(properties.to_string().contains("autosendMaxBuffer"));
    }
}
