//! Child process execution with streamed output

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::deploy::publisher::LogPublisher;

/// Lines buffered between the output readers and the publisher; a full
/// buffer stalls the readers, and the child blocks on its pipe
const LINE_BUFFER: usize = 256;

/// Run `command`, publishing every stdout/stderr line as it arrives
///
/// The child is killed if the returned future is dropped, which is how step
/// timeouts stop a hung build.
pub async fn run_streamed(
    mut command: Command,
    cwd: &Path,
    publisher: &LogPublisher,
) -> std::io::Result<ExitStatus> {
    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Spawning {:?} in {}", command.as_std(), cwd.display());
    let mut child = command.spawn()?;

    let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    while let Some(line) = rx.recv().await {
        publisher.log(line).await;
    }

    child.wait().await
}

/// Shell command run through `sh -c`
pub fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
