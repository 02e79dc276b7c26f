//! Shell session lifecycle.
//!
//! Owns one pseudo-console child process and the two background threads
//! that service it: an output pump and an exit waiter. Both publish
//! [`SessionEvent`]s into a channel the host drains at its own pace;
//! control calls (`start`, `send_input`, `resize`, `stop`, `dispose`)
//! stay on the host's thread and return promptly.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
#[cfg(windows)]
use std::sync::Arc;
#[cfg(windows)]
use std::thread::{self, JoinHandle};

use thiserror::Error;

#[cfg(windows)]
use super::pty::{PseudoConsole, PtyError};

/// Smallest pseudo-console width a session will create or resize to.
pub const MIN_COLS: u16 = 20;
/// Smallest pseudo-console height a session will create or resize to.
pub const MIN_ROWS: u16 = 5;

/// How the child shell is launched. Consumed once per `start`.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Executable name or path.
    pub executable: String,
    /// Raw argument string appended after the quoted executable.
    pub arguments: String,
    /// Working directory for the child; `None` means our own.
    pub working_directory: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: "powershell.exe".to_string(),
            arguments: "-NoLogo -NoExit -ExecutionPolicy Bypass".to_string(),
            working_directory: None,
        }
    }
}

impl LaunchOptions {
    /// Merged command line, `"<executable>" <arguments>`.
    #[cfg_attr(not(windows), allow(dead_code))]
    fn command_line(&self) -> String {
        if self.arguments.trim().is_empty() {
            self.executable.clone()
        } else {
            format!("\"{}\" {}", self.executable, self.arguments)
        }
    }

    #[cfg_attr(not(windows), allow(dead_code))]
    fn resolve_working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Notifications published by the background threads.
#[derive(Debug)]
pub enum SessionEvent {
    /// A chunk of shell output, decoded to text.
    Output(String),
    /// The child process terminated with this exit code. Sent at most once
    /// per session, and only if a child was actually spawned.
    Exited(u32),
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// `start` was called while a session was live.
    #[error("session is already running")]
    AlreadyRunning,

    #[cfg(windows)]
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[cfg(not(windows))]
    #[error("pseudo-console sessions are only supported on Windows")]
    Unsupported,
}

/// One interactive shell session over a pseudo console.
///
/// Control calls follow single-writer discipline: the hosting thread
/// issues them; only the two background threads run concurrently with it,
/// and they touch nothing but the live pty handle and the event channel.
#[cfg_attr(not(windows), allow(dead_code))]
pub struct ShellSession {
    options: LaunchOptions,
    #[cfg(windows)]
    pty: Option<Arc<PseudoConsole>>,
    #[cfg(windows)]
    pump_thread: Option<JoinHandle<()>>,
    #[cfg(windows)]
    exit_thread: Option<JoinHandle<()>>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl ShellSession {
    /// Create an unstarted session.
    pub fn new(options: LaunchOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            options,
            #[cfg(windows)]
            pty: None,
            #[cfg(windows)]
            pump_thread: None,
            #[cfg(windows)]
            exit_thread: None,
            events_tx,
            events_rx,
        }
    }

    /// The channel the background threads publish into. Drain it with
    /// `try_iter` from the control thread, or block on `recv`.
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events_rx
    }

    /// Whether a child is currently attached.
    #[cfg(windows)]
    pub fn is_running(&self) -> bool {
        self.pty.is_some()
    }

    #[cfg(not(windows))]
    pub fn is_running(&self) -> bool {
        false
    }

    /// Spawn the configured shell under a pseudo console of at least
    /// `MIN_COLS` x `MIN_ROWS` cells and begin pumping its output.
    #[cfg(windows)]
    pub fn start(&mut self, columns: u16, rows: u16) -> Result<(), SessionError> {
        if self.pty.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        let cols = columns.max(MIN_COLS);
        let rows = rows.max(MIN_ROWS);
        let pty = Arc::new(PseudoConsole::open(
            &self.options.command_line(),
            &self.options.resolve_working_directory(),
            cols,
            rows,
        )?);
        tracing::info!("session started: {} ({}x{})", self.options.executable, cols, rows);

        let pump_pty = pty.clone();
        let pump_tx = self.events_tx.clone();
        self.pump_thread = Some(thread::spawn(move || pump_output(pump_pty, pump_tx)));

        let exit_pty = pty.clone();
        let exit_tx = self.events_tx.clone();
        self.exit_thread = Some(thread::spawn(move || wait_for_exit(exit_pty, exit_tx)));

        self.pty = Some(pty);
        Ok(())
    }

    #[cfg(not(windows))]
    pub fn start(&mut self, _columns: u16, _rows: u16) -> Result<(), SessionError> {
        Err(SessionError::Unsupported)
    }

    /// Write UTF-8 input to the child. A session that was never started or
    /// has been torn down ignores the call; a broken pipe is swallowed and
    /// surfaces later through the exit event.
    pub fn send_input(&self, data: &str) {
        #[cfg(windows)]
        if let Some(pty) = &self.pty {
            if let Err(e) = pty.write(data.as_bytes()) {
                tracing::debug!("input write failed: {e}");
            }
        }
        #[cfg(not(windows))]
        let _ = data;
    }

    /// Send the interrupt control character (Ctrl+C) to the child.
    pub fn send_interrupt(&self) {
        self.send_input("\x03");
    }

    /// Resize the live pseudo console; ignored when not started.
    pub fn resize(&self, columns: u16, rows: u16) {
        #[cfg(windows)]
        if let Some(pty) = &self.pty {
            let cols = columns.max(MIN_COLS);
            let rows = rows.max(MIN_ROWS);
            if let Err(e) = pty.resize(cols, rows) {
                tracing::debug!("resize failed: {e}");
            }
        }
        #[cfg(not(windows))]
        let _ = (columns, rows);
    }

    /// Ask the shell to exit. `graceful` writes an `exit` command and
    /// returns immediately; the exit event still arrives asynchronously
    /// once the child actually terminates. Otherwise, or when the write
    /// fails, the child is terminated outright. No-op when not started.
    pub fn stop(&self, graceful: bool) {
        #[cfg(windows)]
        if let Some(pty) = &self.pty {
            if graceful && pty.write(b"exit\r").is_ok() {
                return;
            }
            pty.terminate(u32::MAX);
        }
        #[cfg(not(windows))]
        let _ = graceful;
    }

    /// Tear the session down: force-stop the child, unblock and join both
    /// background threads, then release every handle. Idempotent, and safe
    /// when `start` failed or was never called.
    pub fn dispose(&mut self) {
        #[cfg(windows)]
        {
            self.stop(false);

            if let Some(pty) = &self.pty {
                pty.cancel_io();
            }
            if let Some(handle) = self.pump_thread.take() {
                let _ = handle.join();
            }
            if let Some(handle) = self.exit_thread.take() {
                let _ = handle.join();
            }

            // Both threads are joined, so this is the last reference;
            // dropping it runs the ordered handle release.
            if self.pty.take().is_some() {
                tracing::info!("session disposed");
            }
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(windows)]
fn pump_output(pty: Arc<PseudoConsole>, events: Sender<SessionEvent>) {
    let mut buffer = vec![0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match pty.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            // Cancellation and broken pipes both end the pump; process
            // exit is reported by the exit waiter, not here.
            Err(e) => {
                tracing::debug!("output pump stopped: {e}");
                break;
            }
        };

        pending.extend_from_slice(&buffer[..read]);
        let text = drain_complete_utf8(&mut pending);
        if !text.is_empty() && events.send(SessionEvent::Output(text)).is_err() {
            break;
        }
    }
}

#[cfg(windows)]
fn wait_for_exit(pty: Arc<PseudoConsole>, events: Sender<SessionEvent>) {
    if let Some(code) = pty.wait_for_exit() {
        tracing::info!("child exited with code {code}");
        let _ = events.send(SessionEvent::Exited(code));
    }
}

/// Take the decodable prefix of `pending` as text, leaving the trailing
/// bytes of an unfinished multi-byte character for the next read. Invalid
/// interior bytes become U+FFFD.
#[cfg_attr(not(windows), allow(dead_code))]
fn drain_complete_utf8(pending: &mut Vec<u8>) -> String {
    let keep = trailing_incomplete_len(pending);
    let tail = pending.split_off(pending.len() - keep);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = tail;
    text
}

/// Length of an incomplete UTF-8 sequence at the end of `bytes`, 0 if the
/// buffer ends on a character boundary or on bytes no continuation could
/// ever complete.
#[cfg_attr(not(windows), allow(dead_code))]
fn trailing_incomplete_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(3)..len).rev() {
        let byte = bytes[i];
        if byte & 0xC0 == 0x80 {
            continue; // continuation byte, keep looking for the lead
        }
        let need = match byte {
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return 0, // ASCII or a stray byte; nothing to wait for
        };
        let have = len - i;
        return if have < need { have } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_calls_are_noops_before_start() {
        let session = ShellSession::new(LaunchOptions::default());
        session.send_input("echo hi\r");
        session.send_interrupt();
        session.resize(120, 40);
        session.stop(true);
        session.stop(false);
        assert!(session.events().try_recv().is_err());
        assert!(!session.is_running());
    }

    #[test]
    fn dispose_is_idempotent_without_start() {
        let mut session = ShellSession::new(LaunchOptions::default());
        session.dispose();
        session.dispose();
        assert!(!session.is_running());
        assert!(session.events().try_recv().is_err());
    }

    #[test]
    fn utf8_split_across_reads_survives() {
        let bytes = "héllo".as_bytes();
        let mut pending = bytes[..2].to_vec(); // 'h' plus the first byte of 'é'
        assert_eq!(drain_complete_utf8(&mut pending), "h");
        assert_eq!(pending, vec![0xC3]);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(drain_complete_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[test]
    fn incomplete_four_byte_sequence_is_carried() {
        let mut pending = vec![0xF0, 0x9F, 0x92]; // three of four emoji bytes
        assert_eq!(drain_complete_utf8(&mut pending), "");
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn stray_bytes_are_replaced_not_held() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        assert_eq!(drain_complete_utf8(&mut pending), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[cfg(windows)]
    mod windows {
        use super::super::*;
        use std::time::{Duration, Instant};

        fn cmd_session() -> ShellSession {
            ShellSession::new(LaunchOptions {
                executable: "cmd.exe".to_string(),
                arguments: String::new(),
                working_directory: None,
            })
        }

        fn wait_for_exit_event(session: &ShellSession) -> Option<u32> {
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                match session.events().recv_timeout(Duration::from_millis(200)) {
                    Ok(SessionEvent::Exited(code)) => return Some(code),
                    Ok(SessionEvent::Output(_)) => {}
                    Err(_) => {}
                }
            }
            None
        }

        #[test]
        fn start_twice_fails_with_already_running() {
            let mut session = cmd_session();
            session.start(80, 25).unwrap();
            assert!(matches!(
                session.start(80, 25),
                Err(SessionError::AlreadyRunning)
            ));
            assert!(session.is_running());
            session.dispose();
        }

        #[test]
        fn forced_stop_fires_exit_event_once() {
            let mut session = cmd_session();
            session.start(80, 25).unwrap();
            session.stop(false);
            assert_eq!(wait_for_exit_event(&session), Some(u32::MAX));
            session.dispose();
            session.dispose(); // still a no-op
            assert!(!session.is_running());
        }

        #[test]
        fn failed_start_leaves_session_stopped() {
            let mut session = ShellSession::new(LaunchOptions {
                executable: "wtty-no-such-shell.exe".to_string(),
                arguments: String::new(),
                working_directory: None,
            });
            assert!(session.start(80, 25).is_err());
            assert!(!session.is_running());
            session.dispose();
            assert!(session.events().try_recv().is_err());
        }
    }

    #[test]
    fn command_line_quotes_executable_with_arguments() {
        let options = LaunchOptions::default();
        assert_eq!(
            options.command_line(),
            "\"powershell.exe\" -NoLogo -NoExit -ExecutionPolicy Bypass"
        );

        let bare = LaunchOptions {
            executable: "cmd.exe".to_string(),
            arguments: "   ".to_string(),
            working_directory: None,
        };
        assert_eq!(bare.command_line(), "cmd.exe");
    }
}
