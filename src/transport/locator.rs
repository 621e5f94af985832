//! Socket discovery.
//!
//! The peer listens on one of a small family of well-known addresses. The
//! [`SocketLocator`] walks a fixed rule table, platform-filtered, trying
//! indices 0 through 9 for each rule, and returns the first stream that
//! connects.
//!
//! Candidate order (first match wins):
//!
//! | Rule          | Platform | Path                                                |
//! |---------------|----------|-----------------------------------------------------|
//! | `windows-pipe`| Windows  | `\\?\pipe\discord-ipc-{i}`                          |
//! | `runtime-dir` | Unix     | `{runtime}/discord-ipc-{i}`                         |
//! | `snap`        | Unix     | `{runtime}/snap.discord/discord-ipc-{i}`            |
//! | `flatpak`     | Unix     | `{runtime}/app/com.discordapp.Discord/discord-ipc-{i}` |
//!
//! Environment lookups happen once, in [`LocatorConfig::from_env`]; the
//! locator itself only reads its config.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{IpcError, Result};

/// Boxed future returned by [`Dialer::dial`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default socket base name.
pub const DEFAULT_SOCKET_NAME: &str = "discord-ipc";

/// Environment variables consulted for the runtime directory, in order.
pub const RUNTIME_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Runtime directory used when none of [`RUNTIME_DIR_VARS`] is set.
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp";

/// Number of indices tried per rule (0..=9).
pub const MAX_SOCKET_INDEX: u8 = 10;

/// Default timeout for a single connection attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Platform family, selecting which rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Named pipes.
    Windows,
    /// Unix domain sockets (Linux, macOS, BSDs).
    Unix,
}

impl Platform {
    /// Platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// Inputs to socket discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorConfig {
    /// Platform family.
    pub platform: Platform,
    /// Directory the Unix rules are rooted at.
    pub runtime_dir: PathBuf,
    /// Socket base name; the index is appended as `-{i}`.
    pub socket_name: String,
    /// Timeout for each individual connection attempt.
    pub attempt_timeout: Duration,
}

impl LocatorConfig {
    /// Build a config from the current platform and process environment.
    pub fn from_env() -> Self {
        Self::from_vars(Platform::current(), |name| std::env::var(name).ok())
    }

    /// Build a config from an explicit variable lookup.
    ///
    /// The runtime directory is the first non-empty variable of
    /// [`RUNTIME_DIR_VARS`], else [`DEFAULT_RUNTIME_DIR`].
    ///
    /// # Example
    ///
    /// ```
    /// use presence_ipc::transport::{LocatorConfig, Platform};
    /// use std::path::Path;
    ///
    /// let config = LocatorConfig::from_vars(Platform::Unix, |name| {
    ///     (name == "TMP").then(|| "/var/tmp".to_string())
    /// });
    /// assert_eq!(config.runtime_dir, Path::new("/var/tmp"));
    /// ```
    pub fn from_vars<F>(platform: Platform, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let runtime_dir = RUNTIME_DIR_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_RUNTIME_DIR.to_string());

        Self {
            platform,
            runtime_dir: PathBuf::from(runtime_dir),
            socket_name: DEFAULT_SOCKET_NAME.to_string(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Override the runtime directory.
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Override the socket base name.
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = name.into();
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// One entry in the discovery table.
#[derive(Clone, Copy)]
pub struct SocketRule {
    /// Rule name, used in diagnostics.
    pub name: &'static str,
    /// Platforms the rule applies to.
    pub platforms: &'static [Platform],
    build: fn(&LocatorConfig, u8) -> PathBuf,
}

impl SocketRule {
    /// Whether this rule applies on `platform`.
    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    /// Candidate path for one index.
    pub fn path(&self, config: &LocatorConfig, index: u8) -> PathBuf {
        (self.build)(config, index)
    }
}

impl std::fmt::Debug for SocketRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketRule")
            .field("name", &self.name)
            .field("platforms", &self.platforms)
            .finish()
    }
}

fn socket_file(config: &LocatorConfig, index: u8) -> String {
    format!("{}-{}", config.socket_name, index)
}

fn windows_pipe(config: &LocatorConfig, index: u8) -> PathBuf {
    PathBuf::from(format!(r"\\?\pipe\{}", socket_file(config, index)))
}

fn runtime_dir(config: &LocatorConfig, index: u8) -> PathBuf {
    config.runtime_dir.join(socket_file(config, index))
}

fn snap(config: &LocatorConfig, index: u8) -> PathBuf {
    config
        .runtime_dir
        .join("snap.discord")
        .join(socket_file(config, index))
}

fn flatpak(config: &LocatorConfig, index: u8) -> PathBuf {
    config
        .runtime_dir
        .join("app")
        .join("com.discordapp.Discord")
        .join(socket_file(config, index))
}

/// Discovery rules, in priority order.
pub const SOCKET_RULES: [SocketRule; 4] = [
    SocketRule {
        name: "windows-pipe",
        platforms: &[Platform::Windows],
        build: windows_pipe,
    },
    SocketRule {
        name: "runtime-dir",
        platforms: &[Platform::Unix],
        build: runtime_dir,
    },
    SocketRule {
        name: "snap",
        platforms: &[Platform::Unix],
        build: snap,
    },
    SocketRule {
        name: "flatpak",
        platforms: &[Platform::Unix],
        build: flatpak,
    },
];

/// A single discovery candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCandidate {
    /// Name of the rule that produced it.
    pub rule: &'static str,
    /// Index within the rule (0..=9).
    pub index: u8,
    /// Concrete path or pipe name.
    pub path: PathBuf,
}

/// Every candidate for `config`, in the order they are tried.
pub fn candidates(config: &LocatorConfig) -> Vec<SocketCandidate> {
    SOCKET_RULES
        .iter()
        .filter(|rule| rule.applies_to(config.platform))
        .flat_map(|rule| {
            (0..MAX_SOCKET_INDEX).map(move |index| SocketCandidate {
                rule: rule.name,
                index,
                path: rule.path(config, index),
            })
        })
        .collect()
}

/// Opens a stream to a candidate address.
///
/// [`PipeDialer`](super::PipeDialer) is the real implementation; tests
/// substitute in-memory streams.
pub trait Dialer: Send + Sync + 'static {
    /// Connected stream type.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Attempt a connection to `path`.
    fn dial<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Self::Stream>>;

    /// Whether `dir` exists; candidates under a missing directory are skipped.
    fn dir_exists(&self, dir: &Path) -> bool {
        dir.is_dir()
    }
}

/// Walks the candidate table and returns the first live connection.
#[derive(Debug, Clone)]
pub struct SocketLocator<D> {
    config: LocatorConfig,
    dialer: D,
}

impl<D: Dialer> SocketLocator<D> {
    /// Create a locator.
    pub fn new(config: LocatorConfig, dialer: D) -> Self {
        Self { config, dialer }
    }

    /// Discovery inputs.
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Try every candidate in order; the first successful connection wins.
    ///
    /// # Errors
    ///
    /// [`IpcError::ConnectionNotFound`] when no candidate connects.
    pub async fn locate(&self) -> Result<(SocketCandidate, D::Stream)> {
        let mut attempted = 0;

        for candidate in candidates(&self.config) {
            if self.config.platform != Platform::Windows {
                if let Some(parent) = candidate.path.parent() {
                    if !self.dialer.dir_exists(parent) {
                        tracing::trace!(
                            "Skipping {} (directory {} missing)",
                            candidate.path.display(),
                            parent.display()
                        );
                        continue;
                    }
                }
            }

            attempted += 1;
            let attempt =
                tokio::time::timeout(self.config.attempt_timeout, self.dialer.dial(&candidate.path))
                    .await;

            match attempt {
                Ok(Ok(stream)) => {
                    tracing::debug!(
                        "Connected to {} (rule {}, index {})",
                        candidate.path.display(),
                        candidate.rule,
                        candidate.index
                    );
                    return Ok((candidate, stream));
                }
                Ok(Err(e)) => {
                    tracing::trace!("Candidate {} failed: {}", candidate.path.display(), e);
                }
                Err(_) => {
                    tracing::trace!("Candidate {} timed out", candidate.path.display());
                }
            }
        }

        Err(IpcError::ConnectionNotFound { attempted })
    }
}
