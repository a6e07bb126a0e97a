//! Name prompt on its own thread, so reading stdin never stalls the loop.

use std::io::{BufRead, Write};
use tokio::sync::mpsc;

/// Ask the operator to name an unknown face.
#[derive(Debug)]
pub struct PromptRequest {
    pub ticket: u64,
    pub message: String,
}

/// `name` is `None` when stdin is closed or unreadable.
#[derive(Debug)]
pub struct PromptReply {
    pub ticket: u64,
    pub name: Option<String>,
}

pub fn spawn_prompt() -> (mpsc::Sender<PromptRequest>, mpsc::Receiver<PromptReply>) {
    let (req_tx, req_rx) = mpsc::channel::<PromptRequest>(1);
    let (reply_tx, reply_rx) = mpsc::channel::<PromptReply>(1);

    std::thread::Builder::new()
        .name("facelog-prompt".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            run_prompt(stdin.lock(), std::io::stdout(), req_rx, reply_tx)
        })
        .expect("failed to spawn prompt thread");

    (req_tx, reply_rx)
}

fn run_prompt<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    mut requests: mpsc::Receiver<PromptRequest>,
    replies: mpsc::Sender<PromptReply>,
) {
    let mut closed = false;

    while let Some(request) = requests.blocking_recv() {
        let name = if closed {
            None
        } else {
            let _ = write!(output, "{} ", request.message);
            let _ = output.flush();

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) => {
                    tracing::info!("stdin closed; further unknown faces are skipped");
                    closed = true;
                    None
                }
                Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read name");
                    None
                }
            }
        };

        let reply = PromptReply {
            ticket: request.ticket,
            name,
        };
        if replies.blocking_send(reply).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_scripted(input: &str, tickets: &[u64]) -> (Vec<PromptReply>, String) {
        let (req_tx, req_rx) = mpsc::channel(tickets.len().max(1));
        let (reply_tx, mut reply_rx) = mpsc::channel(tickets.len().max(1));
        for &ticket in tickets {
            req_tx
                .try_send(PromptRequest {
                    ticket,
                    message: "Name?".into(),
                })
                .unwrap();
        }
        drop(req_tx);

        let mut output = Vec::new();
        run_prompt(Cursor::new(input.to_string()), &mut output, req_rx, reply_tx);

        let mut replies = Vec::new();
        while let Ok(reply) = reply_rx.try_recv() {
            replies.push(reply);
        }
        (replies, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_reads_one_line_per_request() {
        let (replies, output) = run_scripted("Alice\r\n\nBob\n", &[1, 2, 3]);
        let names: Vec<_> = replies.iter().map(|r| r.name.clone()).collect();
        assert_eq!(
            names,
            vec![Some("Alice".into()), Some(String::new()), Some("Bob".into())]
        );
        assert_eq!(
            replies.iter().map(|r| r.ticket).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(output.matches("Name?").count(), 3);
    }

    #[test]
    fn test_eof_answers_none() {
        let (replies, output) = run_scripted("Alice\n", &[7, 8, 9]);
        let names: Vec<_> = replies.iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec![Some("Alice".into()), None, None]);
        // No prompt is printed once stdin is known to be closed.
        assert_eq!(output.matches("Name?").count(), 2);
    }
}
