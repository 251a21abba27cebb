//! Browser launching
//!
//! [`SystemBrowser`] walks an ordered list of [`LaunchStrategy`] values: the
//! generic default-browser open first, then the command the current platform
//! ships for opening URLs.
//!
//! # How launching works
//!
//! 1. Each strategy is tried in order until one hands the URL off.
//! 2. A fallback command is spawned with null stdio. The launch does not wait
//!    for it; a detached reaper thread collects its exit status so no zombie
//!    process is left behind on Unix.
//! 3. When every strategy fails, the last spawn error is reported, or
//!    `UnsupportedPlatform` when the platform has no fallback command.

use std::process::{Child, Command, Stdio};

use crate::error::{Result, SigninError};

// ---------------------------------------------------------------------------
// Launch strategies
// ---------------------------------------------------------------------------

/// Capability to open a URL for the user.
///
/// Implemented by [`SystemBrowser`]; tests plug in launchers that play the
/// browser's part by requesting the redirect URI themselves.
pub trait UrlLauncher: Send + Sync {
    /// Opens `url`. Returns once the launch has been handed off.
    fn launch_url(&self, url: &str) -> Result<()>;
}

/// One way of opening a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// The platform's default-browser association via the `webbrowser` crate
    Generic,
    /// `cmd /c start <url>` on Windows
    WindowsStart,
    /// `xdg-open <url>` on Linux and the BSDs
    XdgOpen,
    /// `open <url>` on macOS
    MacOpen,
}

impl LaunchStrategy {
    /// The fallback command for the platform this binary was built for.
    pub fn platform_fallback() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::WindowsStart)
        } else if cfg!(target_os = "macos") {
            Some(Self::MacOpen)
        } else if cfg!(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            Some(Self::XdgOpen)
        } else {
            None
        }
    }

    /// The external command for this strategy, `None` for [`Self::Generic`].
    pub fn command(&self, url: &str) -> Option<Command> {
        match self {
            Self::Generic => None,
            Self::WindowsStart => {
                // cmd treats '&' as a command separator.
                let escaped = url.replace('&', "^&");
                let mut cmd = Command::new("cmd");
                cmd.args(["/c", "start", &escaped]);
                Some(cmd)
            }
            Self::XdgOpen => {
                let mut cmd = Command::new("xdg-open");
                cmd.arg(url);
                Some(cmd)
            }
            Self::MacOpen => {
                let mut cmd = Command::new("open");
                cmd.arg(url);
                Some(cmd)
            }
        }
    }

    fn launch(&self, url: &str) -> std::io::Result<()> {
        match self.command(url) {
            None => webbrowser::open(url).map(|_| ()),
            Some(mut cmd) => {
                let child = cmd
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()?;
                reap_in_background(child);
                Ok(())
            }
        }
    }
}

fn reap_in_background(mut child: Child) {
    let pid = child.id();
    let reaper = std::thread::Builder::new()
        .name("browser-launch-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => tracing::debug!(pid, %status, "Browser launch command exited"),
            Err(e) => tracing::debug!(pid, error = %e, "Failed to wait for browser launch command"),
        });
    if let Err(e) = reaper {
        tracing::debug!(pid, error = %e, "Browser launch command left unreaped");
    }
}

// ---------------------------------------------------------------------------
// SystemBrowser
// ---------------------------------------------------------------------------

/// Opens URLs in the user's default browser.
#[derive(Debug, Clone)]
pub struct SystemBrowser {
    strategies: Vec<LaunchStrategy>,
}

impl SystemBrowser {
    /// Generic open, then the current platform's fallback command.
    ///
    /// # Examples
    ///
    /// ```
    /// use loopback_signin::webui::{LaunchStrategy, SystemBrowser};
    ///
    /// let browser = SystemBrowser::for_current_platform();
    /// assert_eq!(browser.strategies()[0], LaunchStrategy::Generic);
    /// ```
    pub fn for_current_platform() -> Self {
        let mut strategies = vec![LaunchStrategy::Generic];
        strategies.extend(LaunchStrategy::platform_fallback());
        Self { strategies }
    }

    /// A browser with an explicit strategy order.
    pub fn with_strategies(strategies: Vec<LaunchStrategy>) -> Self {
        Self { strategies }
    }

    /// The strategies in the order they are tried.
    pub fn strategies(&self) -> &[LaunchStrategy] {
        &self.strategies
    }
}

impl Default for SystemBrowser {
    fn default() -> Self {
        Self::for_current_platform()
    }
}

impl UrlLauncher for SystemBrowser {
    fn launch_url(&self, url: &str) -> Result<()> {
        let mut last_error = None;

        for strategy in &self.strategies {
            match strategy.launch(url) {
                Ok(()) => {
                    tracing::debug!(?strategy, "Browser launched");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(?strategy, error = %e, "Browser launch strategy failed");
                    if strategy.command(url).is_some() {
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(SigninError::transport("failed to launch browser", e).into()),
            None => Err(SigninError::UnsupportedPlatform(std::env::consts::OS.to_string()).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_spawned_command_is_reaped() {
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        reap_in_background(child);
        let proc_dir = std::path::PathBuf::from(format!("/proc/{pid}"));
        for _ in 0..100 {
            if !proc_dir.exists() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        if cfg!(target_os = "linux") {
            panic!("process {pid} was never reaped");
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_windows_start_escapes_ampersands() {
        let cmd = LaunchStrategy::WindowsStart
            .command("https://login.example.com/authorize?a=1&b=2")
            .unwrap();
        assert_eq!(cmd.get_program(), "cmd");
        assert_eq!(
            args(&cmd),
            vec!["/c", "start", "https://login.example.com/authorize?a=1^&b=2"]
        );
    }

    #[test]
    fn test_xdg_open_and_open_pass_url_verbatim() {
        let url = "https://login.example.com/authorize?a=1&b=2";
        let xdg = LaunchStrategy::XdgOpen.command(url).unwrap();
        assert_eq!(xdg.get_program(), "xdg-open");
        assert_eq!(args(&xdg), vec![url]);

        let mac = LaunchStrategy::MacOpen.command(url).unwrap();
        assert_eq!(mac.get_program(), "open");
        assert_eq!(args(&mac), vec![url]);
    }

    #[test]
    fn test_generic_has_no_command() {
        assert!(LaunchStrategy::Generic.command("https://example.com").is_none());
    }

    #[test]
    fn test_current_platform_starts_with_generic() {
        let browser = SystemBrowser::for_current_platform();
        assert_eq!(browser.strategies().first(), Some(&LaunchStrategy::Generic));
        #[cfg(target_os = "linux")]
        assert_eq!(browser.strategies(), &[LaunchStrategy::Generic, LaunchStrategy::XdgOpen]);
    }

    #[test]
    fn test_no_strategies_is_unsupported_platform() {
        let browser = SystemBrowser::with_strategies(Vec::new());
        let err = browser.launch_url("https://example.com").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SigninError>(),
            Some(SigninError::UnsupportedPlatform(_))
        ));
    }
}
