//! Volume Warning Timer
//!
//! Clears the hearing warning after a delay. Each arm carries a generation
//! number; re-arming replaces the pending deadline and `cancel` drops it, so
//! a superseded clear never fires. The controller checks the generation
//! again under its own lock before clearing anything.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{at, never, select, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::AudioError;

enum TimerCommand {
    Arm { generation: u64, delay: Duration },
    Cancel,
    Shutdown,
}

pub(crate) struct WarningTimer {
    commands: Sender<TimerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WarningTimer {
    /// Start the timer thread; `on_expire` runs on it with the generation
    /// whose deadline passed
    pub(crate) fn spawn<F>(on_expire: F) -> Result<Self, AudioError>
    where
        F: Fn(u64) + Send + 'static,
    {
        let (commands, receiver) = unbounded();
        let thread = thread::Builder::new()
            .name("hearken-warning".into())
            .spawn(move || run(receiver, on_expire))
            .map_err(|e| AudioError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    pub(crate) fn arm(&self, generation: u64, delay: Duration) {
        let _ = self.commands.send(TimerCommand::Arm { generation, delay });
    }

    pub(crate) fn cancel(&self) {
        let _ = self.commands.send(TimerCommand::Cancel);
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.commands.send(TimerCommand::Shutdown);
            if handle.join().is_err() {
                warn!("Warning timer thread panicked");
            }
        }
    }
}

impl Drop for WarningTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: Fn(u64)>(commands: Receiver<TimerCommand>, on_expire: F) {
    let mut pending: Option<(u64, Instant)> = None;

    loop {
        let deadline = match pending {
            Some((_, when)) => at(when),
            None => never(),
        };

        select! {
            recv(commands) -> command => match command {
                Ok(TimerCommand::Arm { generation, delay }) => {
                    pending = Some((generation, Instant::now() + delay));
                }
                Ok(TimerCommand::Cancel) => pending = None,
                Ok(TimerCommand::Shutdown) | Err(_) => break,
            },
            recv(deadline) -> _ => {
                if let Some((generation, _)) = pending.take() {
                    debug!("Warning generation {} expired", generation);
                    on_expire(generation);
                }
            }
        }
    }
}
