//! Operator keyboard commands on stdin

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::shutdown::Shutdown;
use crate::voice::{CommandKind, VoiceCommand};

/// Map one typed line to a command
#[must_use]
pub fn parse_key(line: &str) -> Option<CommandKind> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" => Some(CommandKind::Quit),
        "on" => Some(CommandKind::GuardOn),
        "off" => Some(CommandKind::GuardOff),
        _ => None,
    }
}

/// Forward operator commands until shutdown or end of input
pub async fn run_operator_console(commands: mpsc::Sender<VoiceCommand>, mut shutdown: Shutdown) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::debug!("operator console ready (q = quit, on/off = guard mode)");

    loop {
        let line = tokio::select! {
            biased;
            () = shutdown.wait() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("operator console closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "operator console read failed");
                break;
            }
        };

        let Some(kind) = parse_key(&line) else {
            if !line.trim().is_empty() {
                println!("commands: q (quit), on, off");
            }
            continue;
        };

        tracing::info!(command = %kind, "operator command");
        if commands.send(VoiceCommand::new(kind, line)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("q"), Some(CommandKind::Quit));
        assert_eq!(parse_key(" QUIT \n"), Some(CommandKind::Quit));
        assert_eq!(parse_key("on"), Some(CommandKind::GuardOn));
        assert_eq!(parse_key("Off"), Some(CommandKind::GuardOff));
        assert_eq!(parse_key("guard on"), None);
        assert_eq!(parse_key(""), None);
    }
}
