//! Restriction backends for different host environments
//!
//! Each backend implements the same capability set (engage, release, repair,
//! notify) with a different strength guarantee. No backend promises an
//! unbreakable restriction: the host can revoke window states, kill inhibitor
//! processes, or refocus another surface at any time. The engine's answer is
//! continuous re-assertion (see the enforcement loop), so every backend keeps
//! `engage`'s externally revertible portions idempotent and exposes them
//! through `repair`.

use std::process::{Child, Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::RestrictionError;

/// Relative strength of a restriction backend, weakest first.
/// Detection prefers the strongest available backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    /// Keeps the screen awake; the user can still navigate away freely.
    IdleInhibit,
    /// Single privileged "lock now" request; cannot be programmatically undone.
    LockRequest,
    /// Fullscreen + keep-above + foreground pinning of the session surface.
    Kiosk,
}

impl Strength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdleInhibit => "idle-inhibit",
            Self::LockRequest => "lock-request",
            Self::Kiosk => "kiosk",
        }
    }
}

/// Capability set every restriction backend must satisfy.
///
/// The session state machine guarantees call ordering within one session:
/// `notify_session_state(true)`, `engage`, zero or more `repair`/`reassert`,
/// `release`, `notify_session_state(false)`. `engage` is never called twice
/// without an intervening `release`.
pub trait Restriction: Send {
    fn name(&self) -> &'static str;

    fn strength(&self) -> Strength;

    /// Install the restriction. Opportunistic: sub-steps may fail
    /// independently and partial engagement is still engagement.
    fn engage(&mut self) -> Result<(), RestrictionError>;

    /// Remove the restriction. Tolerates "already removed" as success.
    fn release(&mut self) -> Result<(), RestrictionError>;

    /// Re-assert the externally revertible portions of `engage`. Checks
    /// liveness of existing resources first and only recreates what is
    /// missing; must not allocate duplicates.
    fn repair(&mut self) -> Result<(), RestrictionError> {
        Ok(())
    }

    /// Full re-assert after an external refocus/interrupt, additionally
    /// requesting that the session surface be brought back to the foreground.
    fn reassert(&mut self) -> Result<(), RestrictionError> {
        self.repair()
    }

    /// Best-effort session lifecycle signal for the host. Never fails the
    /// session.
    fn notify_session_state(&mut self, _active: bool) {}
}

/// Check if a command exists on the host
fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Pick the strongest restriction backend available on this host.
///
/// Called once at process start; the result is injected into the session
/// engine. There is no runtime re-detection.
pub fn detect() -> Box<dyn Restriction> {
    if KioskRestriction::available() {
        info!("using kiosk restriction backend");
        return Box::new(KioskRestriction::new());
    }
    if ScreenLockRestriction::available() {
        info!("using screen-lock restriction backend");
        return Box::new(ScreenLockRestriction::new());
    }
    info!("using idle-inhibit restriction backend");
    Box::new(IdleInhibitRestriction::new())
}

/// Host tools relevant to backend selection and whether each is present
pub fn host_tools() -> Vec<(&'static str, bool)> {
    [
        "wmctrl",
        "xdotool",
        "loginctl",
        "xdg-screensaver",
        "pmset",
        "caffeinate",
        "systemd-inhibit",
    ]
    .iter()
    .map(|tool| (*tool, command_exists(tool)))
    .collect()
}

/// Screen-lock backend: a single privileged "lock now" request.
///
/// If the privilege is missing the request fails and must be granted
/// out-of-band; `release` is a no-op because a lock request cannot be
/// programmatically undone.
#[derive(Debug, Default)]
pub struct ScreenLockRestriction;

const LOCK_TOOLS: &[(&str, &[&str])] = &[
    ("loginctl", &["lock-session"]),
    ("xdg-screensaver", &["lock"]),
    ("pmset", &["displaysleepnow"]),
];

impl ScreenLockRestriction {
    pub fn new() -> Self {
        Self
    }

    pub fn available() -> bool {
        Self::lock_tool().is_some()
    }

    fn lock_tool() -> Option<(&'static str, &'static [&'static str])> {
        LOCK_TOOLS
            .iter()
            .find(|(cmd, _)| command_exists(cmd))
            .copied()
    }
}

impl Restriction for ScreenLockRestriction {
    fn name(&self) -> &'static str {
        "screen-lock"
    }

    fn strength(&self) -> Strength {
        Strength::LockRequest
    }

    fn engage(&mut self) -> Result<(), RestrictionError> {
        let Some((cmd, args)) = Self::lock_tool() else {
            return Err(RestrictionError::Unavailable(
                "no screen lock tool found on this host".into(),
            ));
        };

        let status = Command::new(cmd)
            .args(args)
            .status()
            .map_err(|e| RestrictionError::Transient(e.to_string()))?;

        if status.success() {
            info!(tool = cmd, "screen lock requested");
            Ok(())
        } else {
            Err(RestrictionError::PrivilegeNotGranted(format!(
                "{} exited with {}",
                cmd, status
            )))
        }
    }

    fn release(&mut self) -> Result<(), RestrictionError> {
        // A lock-now request cannot be undone from here. Nothing to release.
        Ok(())
    }
}

/// Idle-inhibit backend: suppresses automatic screen dimming and idle sleep
/// by holding a spawned inhibitor process for the lifetime of the session.
///
/// Weakest guarantee: the user can still exit through normal navigation.
#[derive(Debug, Default)]
pub struct IdleInhibitRestriction {
    inhibitor: Option<Child>,
    unavailable: bool,
}

impl IdleInhibitRestriction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available() -> bool {
        command_exists("caffeinate") || command_exists("systemd-inhibit")
    }

    fn inhibit_command() -> Option<Command> {
        if command_exists("caffeinate") {
            let mut cmd = Command::new("caffeinate");
            cmd.args(["-d", "-i"]);
            return Some(cmd);
        }
        if command_exists("systemd-inhibit") {
            let mut cmd = Command::new("systemd-inhibit");
            cmd.args([
                "--what=idle:sleep",
                "--who=focuslock",
                "--why=focus session active",
                "sleep",
                "infinity",
            ]);
            return Some(cmd);
        }
        None
    }

    fn inhibitor_alive(&mut self) -> bool {
        match self.inhibitor.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn spawn_inhibitor(&mut self) -> Result<(), RestrictionError> {
        let Some(mut cmd) = Self::inhibit_command() else {
            if !self.unavailable {
                warn!("no idle inhibitor tool found on this host");
                self.unavailable = true;
            }
            return Err(RestrictionError::Unavailable(
                "no idle inhibitor tool".into(),
            ));
        };

        let child = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RestrictionError::Transient(format!("failed to spawn inhibitor: {e}")))?;

        debug!(pid = child.id(), "idle inhibitor started");
        self.inhibitor = Some(child);
        Ok(())
    }
}

impl Restriction for IdleInhibitRestriction {
    fn name(&self) -> &'static str {
        "idle-inhibit"
    }

    fn strength(&self) -> Strength {
        Strength::IdleInhibit
    }

    fn engage(&mut self) -> Result<(), RestrictionError> {
        if self.inhibitor_alive() {
            return Ok(());
        }
        self.spawn_inhibitor()
    }

    fn release(&mut self) -> Result<(), RestrictionError> {
        if let Some(mut child) = self.inhibitor.take() {
            // Already-exited children are fine; kill and reap regardless.
            let _ = child.kill();
            let _ = child.wait();
            debug!("idle inhibitor stopped");
        }
        Ok(())
    }

    fn repair(&mut self) -> Result<(), RestrictionError> {
        if self.unavailable {
            return Ok(());
        }
        if self.inhibitor_alive() {
            return Ok(());
        }
        // The host (or the user) killed the inhibitor; respawn it.
        self.inhibitor = None;
        self.spawn_inhibitor()
    }
}

/// Kiosk backend: pins the session surface as the only usable surface on an
/// X11 host via fullscreen, keep-above, and foreground activation.
///
/// Engagement is opportunistic, not atomic: each sub-step may fail
/// independently and failures are swallowed. The enforcement loop retries
/// whatever is missing on every tick.
#[derive(Debug, Default)]
pub struct KioskRestriction {
    /// X11 window id of the session surface, captured at engage
    window: Option<String>,
    fullscreen: bool,
    above: bool,
    unavailable: bool,
}

impl KioskRestriction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available() -> bool {
        command_exists("wmctrl") && command_exists("xdotool")
    }

    fn active_window() -> Option<String> {
        let out = Command::new("xdotool").arg("getactivewindow").output().ok()?;
        if !out.status.success() {
            return None;
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    fn set_wm_state(window: &str, op: &str, prop: &str) -> bool {
        Command::new("wmctrl")
            .args(["-i", "-r", window, "-b", &format!("{},{}", op, prop)])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn activate(window: &str) -> bool {
        Command::new("xdotool")
            .args(["windowactivate", window])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn mark_unavailable(&mut self) -> RestrictionError {
        if !self.unavailable {
            warn!("kiosk tooling (wmctrl/xdotool) missing; restriction degraded for process lifetime");
            self.unavailable = true;
        }
        RestrictionError::Unavailable("wmctrl/xdotool not found".into())
    }
}

impl Restriction for KioskRestriction {
    fn name(&self) -> &'static str {
        "kiosk"
    }

    fn strength(&self) -> Strength {
        Strength::Kiosk
    }

    fn engage(&mut self) -> Result<(), RestrictionError> {
        if !Self::available() {
            return Err(self.mark_unavailable());
        }

        if self.window.is_none() {
            self.window = Self::active_window();
        }
        let Some(window) = self.window.clone() else {
            return Err(RestrictionError::Transient(
                "could not determine session window".into(),
            ));
        };

        // Sub-steps are independent; a failed one is logged and left for the
        // enforcement loop to retry.
        if Self::set_wm_state(&window, "add", "fullscreen") {
            self.fullscreen = true;
        } else {
            warn!("failed to enter fullscreen");
        }
        if Self::set_wm_state(&window, "add", "above") {
            self.above = true;
        } else {
            warn!("failed to raise session window above others");
        }
        if !Self::activate(&window) {
            warn!("failed to pin session window to the foreground");
        }

        info!(window = %window, "kiosk restriction engaged");
        Ok(())
    }

    fn release(&mut self) -> Result<(), RestrictionError> {
        let Some(window) = self.window.take() else {
            return Ok(());
        };
        // Removing an already-removed state counts as success.
        if self.above && !Self::set_wm_state(&window, "remove", "above") {
            debug!("above state already gone");
        }
        if self.fullscreen && !Self::set_wm_state(&window, "remove", "fullscreen") {
            debug!("fullscreen state already gone");
        }
        self.above = false;
        self.fullscreen = false;
        info!("kiosk restriction released");
        Ok(())
    }

    fn repair(&mut self) -> Result<(), RestrictionError> {
        if self.unavailable {
            return Ok(());
        }
        if self.window.is_none() {
            self.window = Self::active_window();
        }
        let Some(window) = self.window.clone() else {
            return Err(RestrictionError::Transient("session window unknown".into()));
        };

        let mut failed = false;

        // Window states are idempotent assertions, not fresh resources.
        if Self::set_wm_state(&window, "add", "fullscreen") {
            self.fullscreen = true;
        } else {
            failed = true;
        }
        if Self::set_wm_state(&window, "add", "above") {
            self.above = true;
        } else {
            failed = true;
        }

        // The host may have silently put another surface over ours.
        if Self::active_window().as_deref() != Some(window.as_str()) && !Self::activate(&window) {
            failed = true;
        }

        if failed {
            Err(RestrictionError::Transient(
                "one or more kiosk repair steps failed".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn reassert(&mut self) -> Result<(), RestrictionError> {
        if self.unavailable {
            return Ok(());
        }
        let result = self.repair();
        if let Some(window) = self.window.clone() {
            // A refocus event means we just lost the foreground; ask for it
            // back regardless of what repair found.
            if !Self::activate(&window) {
                return Err(RestrictionError::Transient(
                    "could not regain foreground".into(),
                ));
            }
        }
        result
    }

    fn notify_session_state(&mut self, active: bool) {
        debug!(active, "kiosk session state changed");
    }
}
