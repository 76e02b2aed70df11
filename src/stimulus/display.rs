use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::hardware::lock;
use crate::stimulus::{DrawInstruction, EpochKind, Frame};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The output device could not be opened; fatal at startup.
    #[error("display connect failed: {0}")]
    Connect(String),
    #[error("draw failed: {0}")]
    Draw(String),
}

/// Output surface driven by the render thread.
pub trait Display: Send {
    /// Open the output surface. Called once, before the render thread starts.
    fn open(&mut self) -> Result<(), DisplayError>;

    fn draw(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Present what was drawn since the last flip.
    fn flip(&mut self);
}

/// What a [`HeadlessDisplay`] saw for one flipped frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub epoch: EpochKind,
    pub generation: u64,
    pub dots: usize,
}

/// Display with no window. Presented frames are recorded into a shared log
/// that tests and the headless binary can inspect.
#[derive(Default)]
pub struct HeadlessDisplay {
    pending: Option<PresentedFrame>,
    presented: Arc<Mutex<Vec<PresentedFrame>>>,
    keep: usize,
    fail_next: Arc<Mutex<usize>>,
    unavailable: bool,
}

impl HeadlessDisplay {
    /// `keep` bounds the recorded history; 0 keeps nothing.
    pub fn new(keep: usize) -> Self {
        Self {
            keep,
            ..Self::default()
        }
    }

    /// A display whose `open` fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn presented(&self) -> Arc<Mutex<Vec<PresentedFrame>>> {
        Arc::clone(&self.presented)
    }

    /// Counter of upcoming draws that will fail.
    pub fn failures(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.fail_next)
    }
}

impl Display for HeadlessDisplay {
    fn open(&mut self) -> Result<(), DisplayError> {
        if self.unavailable {
            return Err(DisplayError::Connect("no headless surface".into()));
        }
        Ok(())
    }

    fn draw(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        {
            let mut fail = lock(&self.fail_next);
            if *fail > 0 {
                *fail -= 1;
                return Err(DisplayError::Draw(format!("{} frame", frame.epoch)));
            }
        }
        let dots = match &frame.instruction {
            DrawInstruction::Fill { .. } => 0,
            DrawInstruction::Dots { positions, .. } => positions.len(),
        };
        self.pending = Some(PresentedFrame {
            epoch: frame.epoch,
            generation: frame.generation,
            dots,
        });
        Ok(())
    }

    fn flip(&mut self) {
        let Some(frame) = self.pending.take() else {
            return;
        };
        if self.keep == 0 {
            return;
        }
        let mut log = lock(&self.presented);
        if log.len() == self.keep {
            log.remove(0);
        }
        log.push(frame);
    }
}
