//! Text console standing in for microphone and speakers

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};

use super::{Listen, MicLease, Speak};
use crate::{Error, Result};

/// Reads "speech" from stdin lines and "speaks" to stdout
pub struct ConsoleVoice {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl ConsoleVoice {
    /// Start reading stdin in the background
    #[must_use]
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            tracing::debug!("console input closed");
        });
        Self::from_channel(rx)
    }

    /// Use an existing line channel as input
    #[must_use]
    pub fn from_channel(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }
}

#[async_trait]
impl Listen for ConsoleVoice {
    async fn listen(&self, _lease: &MicLease, timeout: Duration) -> Result<Option<String>> {
        let mut lines = self.lines.lock().await;
        match tokio::time::timeout(timeout, lines.recv()).await {
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => Err(Error::Audio("console input closed".to_string())),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl Speak for ConsoleVoice {
    async fn speak(&self, _lease: &MicLease, text: &str) -> Result<()> {
        println!("[warden] {text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{MicArbiter, MicOwner};

    #[tokio::test]
    async fn test_lines_and_timeout() {
        let (tx, rx) = mpsc::channel(4);
        let voice = ConsoleVoice::from_channel(rx);
        let arbiter = MicArbiter::new();
        let lease = arbiter.acquire(MicOwner::CommandListener).await;

        tx.send("guard on".to_string()).await.unwrap();
        let heard = voice.listen(&lease, Duration::from_millis(50)).await.unwrap();
        assert_eq!(heard.as_deref(), Some("guard on"));

        let heard = voice.listen(&lease, Duration::from_millis(20)).await.unwrap();
        assert!(heard.is_none());

        drop(tx);
        assert!(voice.listen(&lease, Duration::from_millis(20)).await.is_err());
    }
}
