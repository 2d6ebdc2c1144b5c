//! Operator console: line commands read from stdin.
//!
//! ```text
//! pause                          stop accepting publishes
//! resume                         accept publishes again
//! last <channel>                 show a channel's cached message
//! say <channel> <alias> <text>   broadcast a server message
//! status                         router summary
//! help                           list commands
//! ```

use crate::relay::ChannelRouter;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Pause,
    Resume,
    Last { channel: usize },
    Say {
        channel: usize,
        alias: String,
        content: String,
    },
    Status,
    Help,
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim_start()),
        None => (line, ""),
    };

    let command = match verb {
        "pause" => ConsoleCommand::Pause,
        "resume" => ConsoleCommand::Resume,
        "status" => ConsoleCommand::Status,
        "help" => ConsoleCommand::Help,
        "last" => ConsoleCommand::Last {
            channel: parse_channel(rest)?,
        },
        "say" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let channel = parse_channel(parts.next().unwrap_or(""))?;
            let alias = parts.next().unwrap_or("").to_string();
            let content = parts.next().unwrap_or("").trim().to_string();
            if alias.is_empty() || content.is_empty() {
                return Err("usage: say <channel> <alias> <text>".into());
            }
            ConsoleCommand::Say {
                channel,
                alias,
                content,
            }
        }
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };

    Ok(Some(command))
}

fn parse_channel(s: &str) -> Result<usize, String> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| format!("expected a channel index, got {s:?}"))
}

/// Apply a command and return the line to print back.
pub async fn execute(router: &ChannelRouter, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Pause => {
            router.pause().await;
            "paused".into()
        }
        ConsoleCommand::Resume => {
            router.resume().await;
            "resumed".into()
        }
        ConsoleCommand::Last { channel } => match router.get_last_message(channel).await {
            Some(msg) => format!("[{channel}] {}: {}", msg.alias, msg.content),
            None => format!("[{channel}] (no message)"),
        },
        ConsoleCommand::Say {
            channel,
            alias,
            content,
        } => match router.publish(channel, &alias, &content).await {
            Ok(report) => format!(
                "[{channel}] sent to {} subscriber(s), {} dropped",
                report.delivered, report.dropped
            ),
            Err(e) => format!("error: {e}"),
        },
        ConsoleCommand::Status => {
            let stats = router.stats().await;
            format!(
                "mode={} listening={} accepting={} channels={} subscriptions={} cached={}",
                stats.mode,
                stats.listening,
                stats.accepting,
                stats.channels,
                stats.subscriptions,
                stats.cached_messages
            )
        }
        ConsoleCommand::Help => {
            "commands: pause | resume | last <ch> | say <ch> <alias> <text> | status".into()
        }
    }
}

/// Read commands from stdin until EOF.
pub async fn run_stdin(router: Arc<ChannelRouter>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("operator console ready (type `help`)");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(command)) => {
                    let reply = execute(&router, command).await;
                    println!("{reply}");
                }
                Ok(None) => {}
                Err(msg) => println!("{msg}"),
            },
            Ok(None) => {
                debug!("console stdin closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        }
    }
}
