//! Domain primitive types used across the berth workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BerthError, Result};

/// Unique identifier for a container instance.
///
/// Identifiers are random 128-bit values rendered as lowercase hex and are
/// never reused, even after the container is removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character prefix used in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an image template: `name[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository name, e.g. `nginx` or `library/redis`.
    pub name: String,
    /// Tag, `latest` when omitted.
    pub tag: String,
}

impl ImageRef {
    /// Parses an image reference.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::InvalidSpec`] if the name or tag is empty or
    /// contains characters outside `[a-z0-9._/-]` (tags also allow upper case).
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        // A colon after the last slash separates the tag; earlier colons belong to a registry host.
        let split = input
            .rfind(':')
            .filter(|&colon| input.rfind('/').is_none_or(|slash| colon > slash));
        let (name, tag) = match split {
            Some(colon) => (&input[..colon], &input[colon + 1..]),
            None => (input, "latest"),
        };

        let name_ok = !name.is_empty()
            && !name.starts_with('/')
            && !name.ends_with('/')
            && name.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/' | ':')
            });
        let tag_ok = !tag.is_empty()
            && tag.len() <= 128
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if !name_ok || !tag_ok {
            return Err(BerthError::InvalidSpec {
                message: format!("malformed image reference: {input:?}"),
            });
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Transport protocol of a port binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP (the default).
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(BerthError::InvalidSpec {
                message: format!("unknown protocol: {other}"),
            }),
        }
    }
}

/// A requested port binding. `host == None` asks for an automatic host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSpec {
    /// Requested host port, if any.
    pub host: Option<u16>,
    /// Port inside the container.
    pub container: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl PortSpec {
    /// Requests a fixed host port.
    #[must_use]
    pub const fn fixed(host: u16, container: u16, protocol: Protocol) -> Self {
        Self {
            host: Some(host),
            container,
            protocol,
        }
    }

    /// Requests an automatically allocated host port.
    #[must_use]
    pub const fn automatic(container: u16, protocol: Protocol) -> Self {
        Self {
            host: None,
            container,
            protocol,
        }
    }
}

/// Parses `[host:]container[/proto]`, e.g. `8080:80/tcp` or `53/udp`.
impl FromStr for PortSpec {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BerthError::InvalidSpec {
            message: format!("malformed port spec: {s:?}"),
        };
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, proto)) => (ports, proto.parse()?),
            None => (s, Protocol::Tcp),
        };
        let (host, container) = match ports.split_once(':') {
            Some((host, container)) => (Some(host.parse().map_err(|_| invalid())?), container),
            None => (None, ports),
        };
        let container = container.parse().map_err(|_| invalid())?;
        Ok(Self {
            host,
            container,
            protocol,
        })
    }
}

/// A resolved binding from a host port to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}/{}",
            self.host_port, self.container_port, self.protocol
        )
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Created but never started, or waiting for its first start.
    Created,
    /// The workload process is alive.
    Running,
    /// Stopped on request; may be started again.
    Stopped,
    /// The workload terminated on its own or failed to launch.
    Exited,
    /// Removal in progress.
    Removing,
}

impl ContainerState {
    /// Applies a transition, returning the resulting state or `None` when
    /// the edge does not leave from `self`.
    #[must_use]
    pub const fn apply(self, transition: Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Created | Self::Stopped, Transition::Start) => Some(Self::Running),
            (Self::Created | Self::Stopped, Transition::LaunchFailed)
            | (Self::Running, Transition::Exit) => Some(Self::Exited),
            (Self::Running, Transition::Stop) => Some(Self::Stopped),
            (Self::Created | Self::Stopped | Self::Exited, Transition::BeginRemove) => {
                Some(Self::Removing)
            }
            _ => None,
        }
    }

    /// Whether host ports stay reserved for a container in this state.
    #[must_use]
    pub const fn holds_ports(self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Stopped)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
            Self::Removing => write!(f, "removing"),
        }
    }
}

impl FromStr for ContainerState {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "exited" => Ok(Self::Exited),
            "removing" => Ok(Self::Removing),
            other => Err(BerthError::InvalidSpec {
                message: format!("unknown container state: {other}"),
            }),
        }
    }
}

/// The edges of the container state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// `created | stopped -> running`.
    Start,
    /// `created | stopped -> exited` when the workload could not be launched.
    LaunchFailed,
    /// `running -> stopped`.
    Stop,
    /// `running -> exited` when the workload died.
    Exit,
    /// `created | stopped | exited -> removing`.
    BeginRemove,
}

impl Transition {
    /// Operation name used in error messages.
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::Start | Self::LaunchFailed => "start",
            Self::Stop => "stop",
            Self::Exit => "exit",
            Self::BeginRemove => "remove",
        }
    }
}

/// Exit status of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitCode {
    /// The process exited with this code (`128 + n` when killed by signal `n`).
    Code(i32),
    /// The exit status could not be observed, e.g. the process died while
    /// the engine was not running.
    Unknown,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Signals the engine sends to workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StopSignal {
    /// `SIGTERM`.
    #[serde(alias = "SIGTERM")]
    Term,
    /// `SIGINT`.
    #[serde(alias = "SIGINT")]
    Int,
    /// `SIGQUIT`.
    #[serde(alias = "SIGQUIT")]
    Quit,
    /// `SIGHUP`.
    #[serde(alias = "SIGHUP")]
    Hup,
    /// `SIGKILL`.
    #[serde(alias = "SIGKILL")]
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term => write!(f, "SIGTERM"),
            Self::Int => write!(f, "SIGINT"),
            Self::Quit => write!(f, "SIGQUIT"),
            Self::Hup => write!(f, "SIGHUP"),
            Self::Kill => write!(f, "SIGKILL"),
        }
    }
}
