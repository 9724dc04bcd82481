//! PTY spawning and I/O plumbing.
//!
//! `portable-pty` readers and writers are blocking, so reads run on a
//! dedicated blocking task feeding an async channel, and writes go through
//! a channel drained by a writer task. The PTY is exclusively owned by its
//! session; killing the child ends both tasks.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::types::SessionError;

/// Shell used for new sessions: `cmd.exe` on Windows, `bash` elsewhere.
pub fn platform_shell() -> &'static str {
    if cfg!(windows) {
        "cmd.exe"
    } else {
        "bash"
    }
}

/// Handle to a spawned PTY. Dropping it does not kill the child; call
/// [`PtyProcess::kill`] from the session close path.
pub struct PtyProcess {
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess").finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Spawn the platform shell in a fresh PTY.
    ///
    /// Returns the handle, a receiver of raw output chunks, and a oneshot
    /// that fires when the child exits.
    pub fn spawn(
        cwd: &Path,
        rows: u16,
        cols: u16,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>, oneshot::Receiver<()>), SessionError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed {
                reason: e.to_string(),
            })?;

        let mut command = CommandBuilder::new(platform_shell());
        command.cwd(cwd);
        command.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| SessionError::SpawnFailed {
                reason: e.to_string(),
            })?;
        let killer = child.clone_killer();

        // Closing the slave side lets reads observe EOF when the child exits.
        drop(pair.slave);

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(256);
        let mut reader =
            pair.master
                .try_clone_reader()
                .map_err(|e| SessionError::SpawnFailed {
                    reason: e.to_string(),
                })?;
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
            debug!("PTY reader finished");
        });

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed {
                reason: e.to_string(),
            })?;
        let writer = Arc::new(Mutex::new(writer));
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                let writer = Arc::clone(&writer);
                let result = tokio::task::spawn_blocking(move || {
                    let mut guard = writer.lock().map_err(|_| ())?;
                    guard.write_all(&bytes).map_err(|_| ())?;
                    guard.flush().map_err(|_| ())
                })
                .await;
                if !matches!(result, Ok(Ok(()))) {
                    error!("PTY write failed, stopping writer");
                    break;
                }
            }
        });

        // The master must stay alive for the lifetime of the child; park it
        // with the wait so the reader is not cut off early.
        let (exit_tx, exit_rx) = oneshot::channel::<()>();
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            debug!(?status, "PTY child exited");
            drop(pair.master);
            let _ = exit_tx.send(());
        });

        Ok((
            Self { writer_tx, killer },
            output_rx,
            exit_rx,
        ))
    }

    /// Queue bytes for the PTY. Fails once the writer task has stopped.
    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.writer_tx
            .send(bytes.into())
            .await
            .map_err(|_| SessionError::PtyGone)
    }

    /// Clone of the input channel, for writes that must not hold the
    /// session table lock across an await.
    pub fn input_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.writer_tx.clone()
    }

    /// Kill the child process. The exit watcher then drives normal cleanup.
    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            warn!(error = %e, "PTY kill failed (child may already be gone)");
        }
    }
}
