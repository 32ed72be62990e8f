// src/dispatch.rs
//
// Sorting-hardware commands. Each classification maps to one short token
// written as a line to the actuator channel.

use crate::types::{Classification, ClassificationResult};
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCommand {
    High,
    Mix,
    Low,
    Reject,
}

impl HardwareCommand {
    pub fn token(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Mix => "mix",
            Self::Low => "low",
            Self::Reject => "reject",
        }
    }
}

impl From<Classification> for HardwareCommand {
    fn from(label: Classification) -> Self {
        match label {
            Classification::HighValue => Self::High,
            Classification::Mixed => Self::Mix,
            Classification::LowValue => Self::Low,
            Classification::Rejected => Self::Reject,
        }
    }
}

pub struct LineDispatcher<W: Write> {
    out: W,
    sent: u64,
}

impl<W: Write> LineDispatcher<W> {
    pub fn new(out: W) -> Self {
        Self { out, sent: 0 }
    }

    pub fn dispatch(&mut self, result: &ClassificationResult) -> Result<HardwareCommand> {
        let command = HardwareCommand::from(result.classification);
        writeln!(self.out, "{}", command.token())
            .and_then(|_| self.out.flush())
            .context("Failed to write hardware command")?;
        self.sent += 1;
        debug!("➡️  {} → {}", result.id, command.token());
        Ok(command)
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> LineDispatcher<W> {
    /// Forward every classification event until the channel closes.
    /// Write failures are logged and the event is skipped.
    pub fn spawn(mut self, events: Receiver<Arc<ClassificationResult>>) -> JoinHandle<Self> {
        thread::spawn(move || {
            for result in events.iter() {
                if let Err(e) = self.dispatch(&result) {
                    warn!("Dispatch of {} failed: {:#}", result.id, e);
                }
            }
            info!("Dispatcher stopped after {} command(s)", self.sent);
            self
        })
    }
}
