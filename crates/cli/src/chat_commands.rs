use {
    conduit_agents::{ChatSession, SessionOutcome},
    tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};

const EXIT_COMMANDS: &[&str] = &["quit", "exit", "/quit", "/exit"];

fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    EXIT_COMMANDS.iter().any(|c| c.eq_ignore_ascii_case(line))
}

/// Print the outcome of one message. Returns whether it succeeded.
fn report(outcome: SessionOutcome) -> bool {
    match outcome {
        SessionOutcome::Done { answer } => {
            println!("{answer}");
            true
        },
        SessionOutcome::Failed(reason) => {
            eprintln!("conversation failed: {reason}");
            false
        },
    }
}

pub async fn run_once(session: &mut ChatSession, message: &str) -> anyhow::Result<bool> {
    Ok(report(session.send(message).await))
}

/// Read messages from stdin until EOF, an exit command, or an interrupt.
pub async fn run_interactive(session: &mut ChatSession) -> anyhow::Result<bool> {
    let cancel = session.cancel_token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();
    let mut last_ok = true;

    eprintln!("Type a message, or 'quit' to exit.");
    loop {
        stderr.write_all(b"> ").await?;
        stderr.flush().await?;

        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        if is_exit_command(&line) {
            break;
        }

        last_ok = report(session.send(&line).await);
        if session.failure().is_some() {
            break;
        }
    }
    Ok(last_ok)
}
