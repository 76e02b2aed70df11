use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender, unbounded};
use tracing::{debug, trace, warn};

use crate::config::DisplayConfig;
use crate::core::timebase::FrameTicker;
use crate::stimulus::display::{Display, DisplayError};
use crate::stimulus::dots::RandomDotMotion;
use crate::stimulus::queue::FrameQueue;
use crate::stimulus::{DrawInstruction, EpochCommand, EpochKind, InitFn, UpdateFn};

const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Owns the intake and render threads. Commands are delivered in send
/// order through a single mailbox.
pub struct RendererHandle {
    tx: Option<Sender<EpochCommand>>,
    queue: Arc<FrameQueue>,
    running: Arc<AtomicBool>,
    intake: Option<JoinHandle<()>>,
    render: Option<JoinHandle<()>>,
}

impl RendererHandle {
    pub fn spawn(display: Box<dyn Display>, cfg: &DisplayConfig) -> std::io::Result<Self> {
        let queue = Arc::new(FrameQueue::new(cfg.queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = unbounded::<EpochCommand>();

        let intake = {
            let queue = Arc::clone(&queue);
            let cfg = cfg.clone();
            thread::Builder::new()
                .name("stimulus-intake".into())
                .spawn(move || intake_loop(rx, queue, cfg))?
        };
        let render = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let frame_rate = cfg.frame_rate;
            thread::Builder::new()
                .name("stimulus-render".into())
                .spawn(move || render_loop(display, queue, frame_rate, running))?
        };

        Ok(Self {
            tx: Some(tx),
            queue,
            running,
            intake: Some(intake),
            render: Some(render),
        })
    }

    pub fn send(&self, cmd: EpochCommand) -> Result<(), SendError<EpochCommand>> {
        match &self.tx {
            Some(tx) => tx.send(cmd),
            None => Err(SendError(cmd)),
        }
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    pub fn shutdown(&mut self) {
        // Closing the mailbox ends the intake loop.
        self.tx.take();
        if let Some(h) = self.intake.take() {
            let _ = h.join();
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.render.take() {
            let _ = h.join();
        }
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct FrameSource {
    cfg: DisplayConfig,
    epoch: Option<EpochKind>,
    update: Option<UpdateFn>,
    dots: Option<RandomDotMotion>,
}

impl FrameSource {
    fn apply(&mut self, cmd: &EpochCommand, queue: &FrameQueue) {
        if cmd.clear_queue {
            let dropped = queue.clear();
            trace!(target: "render", epoch = %cmd.epoch, dropped, "queue cleared");
        }
        let bg = self.cfg.background;
        match cmd.init {
            InitFn::FillBackground => {
                self.dots = None;
                queue.set_static(cmd.epoch, DrawInstruction::Fill { color: bg });
            }
            InitFn::StimulusOnset => {
                let dots = RandomDotMotion::new(
                    &self.cfg.dots,
                    self.cfg.width,
                    self.cfg.height,
                    cmd.args.seed.unwrap_or_default(),
                    cmd.args.signed_coherence.unwrap_or_default(),
                    self.cfg.frame_rate,
                );
                queue.set_static(cmd.epoch, dots.frame(bg));
                self.dots = Some(dots);
            }
            InitFn::OutcomeFeedback => {
                self.dots = None;
                let color = self.cfg.outcome_color(cmd.args.outcome);
                queue.set_static(cmd.epoch, DrawInstruction::Fill { color });
            }
            InitFn::Nothing => {}
        }
        self.epoch = Some(cmd.epoch);
        self.update = cmd.update;
    }

    /// Fill every free slot. Only this thread pushes, so a slot seen free
    /// stays free.
    fn top_up(&mut self, queue: &FrameQueue) {
        let (Some(update), Some(epoch)) = (self.update, self.epoch) else {
            return;
        };
        while !queue.is_full() {
            let instruction = match update {
                UpdateFn::DotMotion => match self.dots.as_mut() {
                    Some(dots) => {
                        dots.advance();
                        dots.frame(self.cfg.background)
                    }
                    None => return,
                },
                UpdateFn::Hold => match queue.static_frame() {
                    Some(frame) => frame.instruction,
                    None => return,
                },
            };
            if !queue.try_push(epoch, instruction) {
                return;
            }
        }
    }
}

fn intake_loop(rx: Receiver<EpochCommand>, queue: Arc<FrameQueue>, cfg: DisplayConfig) {
    let refill = FrameTicker::new(cfg.frame_rate).interval() / 2;
    let mut source = FrameSource {
        cfg,
        epoch: None,
        update: None,
        dots: None,
    };
    debug!(target: "render", "intake started");
    loop {
        let wait = if source.update.is_some() {
            refill
        } else {
            IDLE_WAIT
        };
        match rx.recv_timeout(wait) {
            Ok(cmd) => source.apply(&cmd, &queue),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        source.top_up(&queue);
    }
    debug!(target: "render", "intake stopped");
}

fn render_loop(
    mut display: Box<dyn Display>,
    queue: Arc<FrameQueue>,
    frame_rate: f64,
    running: Arc<AtomicBool>,
) {
    let mut ticker = FrameTicker::new(frame_rate);
    debug!(target: "render", "render started");
    while running.load(Ordering::SeqCst) {
        queue.wait_for_frame(ticker.interval());
        let drawn = queue.render_next(|frame| {
            display.draw(frame)?;
            display.flip();
            Ok::<(), DisplayError>(())
        });
        if let Some(Err(e)) = drawn {
            warn!(target: "render", "{e}; frame skipped");
        }
        ticker.tick();
    }
    debug!(
        target: "render",
        frames = ticker.frames(),
        late = ticker.late_frames(),
        "render stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::lock;
    use crate::stimulus::display::HeadlessDisplay;
    use crate::stimulus::{EpochArgs, EpochTable};

    #[test]
    fn stimulus_epoch_streams_dot_frames() {
        let cfg = DisplayConfig {
            frame_rate: 200.0,
            width: 200,
            height: 200,
            ..DisplayConfig::default()
        };
        let display = HeadlessDisplay::new(1000);
        let presented = display.presented();
        let mut renderer = RendererHandle::spawn(Box::new(display), &cfg).unwrap();
        let table = EpochTable::standard();
        let args = EpochArgs {
            seed: Some(3),
            signed_coherence: Some(36.0),
            ..EpochArgs::default()
        };
        renderer
            .send(table.command(EpochKind::Stimulus, args).unwrap())
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        renderer.shutdown();

        let log = lock(&presented);
        let dot_frames = log
            .iter()
            .filter(|f| f.epoch == EpochKind::Stimulus && f.dots > 0)
            .count();
        assert!(dot_frames > 5, "dot_frames={dot_frames}");
    }

    #[test]
    fn draw_failure_skips_frame_and_continues() {
        let cfg = DisplayConfig {
            frame_rate: 200.0,
            ..DisplayConfig::default()
        };
        let display = HeadlessDisplay::new(1000);
        let presented = display.presented();
        *lock(&display.failures()) = 3;
        let mut renderer = RendererHandle::spawn(Box::new(display), &cfg).unwrap();
        renderer
            .send(
                EpochTable::standard()
                    .command(EpochKind::Fixation, EpochArgs::default())
                    .unwrap(),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(80));
        renderer.shutdown();
        assert!(!lock(&presented).is_empty());
    }
}
