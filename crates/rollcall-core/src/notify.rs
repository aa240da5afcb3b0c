//! Fire-and-forget spoken notifications.
//!
//! Speaking can take seconds, so text goes into an unbounded queue drained by
//! one dedicated thread. The vision worker never waits on it.

use parking_lot::Mutex;
use std::process::Command;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc;

/// Destination for user-facing notification text.
pub trait NotificationSink: Send + Sync {
    /// Best-effort and non-blocking.
    fn say(&self, text: &str);
}

#[derive(Error, Debug)]
pub enum SpeakError {
    #[error("failed to run speech command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("speech command exited with {0}")]
    Status(std::process::ExitStatus),
}

/// Something that turns text into speech (or a stand-in for it).
pub trait Speaker: Send {
    fn speak(&mut self, text: &str) -> Result<(), SpeakError>;
}

/// Logs the text instead of speaking it.
pub struct TracingSpeaker;

impl Speaker for TracingSpeaker {
    fn speak(&mut self, text: &str) -> Result<(), SpeakError> {
        tracing::info!(text, "notification");
        Ok(())
    }
}

/// Runs an external TTS program with the text as its final argument,
/// e.g. `espeak` or `spd-say`.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    /// Split a command line on whitespace: the first word is the program.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&mut self, text: &str) -> Result<(), SpeakError> {
        let status = Command::new(&self.program).args(&self.args).arg(text).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeakError::Status(status))
        }
    }
}

/// Single-consumer speech queue.
pub struct SpeechQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechQueue {
    pub fn spawn(mut speaker: Box<dyn Speaker>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let worker = std::thread::Builder::new()
            .name("rollcall-speech".into())
            .spawn(move || {
                tracing::debug!("speech thread started");
                while let Some(text) = rx.blocking_recv() {
                    if let Err(e) = speaker.speak(&text) {
                        tracing::warn!(error = %e, "speech failed");
                    }
                }
                tracing::debug!("speech thread exiting");
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Close the queue, let already-queued text finish, and join the thread.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("speech thread panicked");
            }
        }
    }
}

impl NotificationSink for SpeechQueue {
    fn say(&self, text: &str) {
        match self.tx.lock().as_ref() {
            Some(tx) if tx.send(text.to_string()).is_ok() => {}
            _ => tracing::debug!(text, "speech queue closed; dropping notification"),
        }
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Speaker for Recording {
        fn speak(&mut self, text: &str) -> Result<(), SpeakError> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_queue_delivers_in_order() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let queue = SpeechQueue::spawn(Box::new(Recording(spoken.clone()))).unwrap();
        queue.say("one");
        queue.say("two");
        queue.shutdown();
        assert_eq!(*spoken.lock(), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_say_after_shutdown_is_dropped() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let queue = SpeechQueue::spawn(Box::new(Recording(spoken.clone()))).unwrap();
        queue.shutdown();
        queue.say("late");
        assert!(spoken.lock().is_empty());
    }

    #[test]
    fn test_command_speaker_parse() {
        let s = CommandSpeaker::parse("spd-say -r 10").unwrap();
        assert_eq!(s.program, "spd-say");
        assert_eq!(s.args, vec!["-r", "10"]);
        assert!(CommandSpeaker::parse("   ").is_none());
    }

    #[test]
    fn test_command_speaker_failure_is_reported() {
        let mut s = CommandSpeaker::parse("false").unwrap();
        assert!(matches!(s.speak("hi"), Err(SpeakError::Status(_))));
    }
}
