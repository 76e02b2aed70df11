use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::hardware::lock;
use crate::stimulus::{DrawInstruction, EpochKind, Frame};

struct Inner {
    items: VecDeque<Frame>,
    generation: u64,
    static_frame: Option<Frame>,
    capacity: usize,
}

/// Bounded frame FIFO shared by the intake and render threads.
///
/// `render_gate` is held by the render thread for the whole pop + draw + flip
/// of one frame and by [`FrameQueue::clear`] while draining, so once `clear`
/// returns nothing queued before it can still reach the screen.
pub struct FrameQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
    render_gate: Mutex<()>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                generation: 0,
                static_frame: None,
                capacity: capacity.max(1),
            }),
            ready: Condvar::new(),
            render_gate: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner).capacity
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = lock(&self.inner);
        inner.items.len() >= inner.capacity
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    /// Enqueue without blocking. Returns `false` when full.
    pub fn try_push(&self, epoch: EpochKind, instruction: DrawInstruction) -> bool {
        let mut inner = lock(&self.inner);
        if inner.items.len() >= inner.capacity {
            return false;
        }
        let generation = inner.generation;
        inner.items.push_back(Frame {
            epoch,
            generation,
            instruction,
        });
        drop(inner);
        self.ready.notify_one();
        true
    }

    /// Frame redrawn whenever the queue runs dry.
    pub fn set_static(&self, epoch: EpochKind, instruction: DrawInstruction) {
        let mut inner = lock(&self.inner);
        let generation = inner.generation;
        inner.static_frame = Some(Frame {
            epoch,
            generation,
            instruction,
        });
        drop(inner);
        self.ready.notify_one();
    }

    pub fn static_frame(&self) -> Option<Frame> {
        lock(&self.inner).static_frame.clone()
    }

    /// Drop every pending frame and the static frame, and start a new
    /// generation. Waits for an in-progress draw to finish. Returns the
    /// number of queued frames dropped.
    pub fn clear(&self) -> usize {
        let _gate = lock(&self.render_gate);
        let mut inner = lock(&self.inner);
        let dropped = inner.items.len();
        inner.items.clear();
        inner.static_frame = None;
        inner.generation += 1;
        dropped
    }

    /// Block until a frame is queued or `timeout` elapses.
    pub fn wait_for_frame(&self, timeout: Duration) -> bool {
        let inner = lock(&self.inner);
        let (inner, _) = self
            .ready
            .wait_timeout_while(inner, timeout, |i| i.items.is_empty())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        !inner.items.is_empty()
    }

    /// Pop the next frame, or fall back to the static frame, and hand it to
    /// `draw` while holding the render gate.
    pub fn render_next<R>(&self, draw: impl FnOnce(&Frame) -> R) -> Option<R> {
        let _gate = lock(&self.render_gate);
        let frame = {
            let mut inner = lock(&self.inner);
            let current = inner.generation;
            // Frames are only ever tagged with the current generation once a
            // clear has drained the queue; the check keeps that explicit.
            loop {
                match inner.items.pop_front() {
                    Some(f) if f.generation == current => break Some(f),
                    Some(_) => continue,
                    None => break inner.static_frame.clone(),
                }
            }
        };
        frame.map(|f| draw(&f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(v: u8) -> DrawInstruction {
        DrawInstruction::Fill { color: [v, v, v] }
    }

    #[test]
    fn push_respects_capacity() {
        let q = FrameQueue::new(2);
        assert!(q.try_push(EpochKind::Stimulus, fill(1)));
        assert!(q.try_push(EpochKind::Stimulus, fill(2)));
        assert!(!q.try_push(EpochKind::Stimulus, fill(3)));
        assert!(q.is_full());
        let first = q.render_next(|f| f.instruction.clone());
        assert_eq!(first, Some(fill(1)));
    }

    #[test]
    fn clear_drops_queued_and_static_frames() {
        let q = FrameQueue::new(8);
        q.set_static(EpochKind::Fixation, fill(0));
        for i in 0..5 {
            q.try_push(EpochKind::Stimulus, fill(i));
        }
        assert_eq!(q.clear(), 5);
        assert_eq!(q.generation(), 1);
        assert!(q.render_next(|_| ()).is_none());
    }

    #[test]
    fn empty_queue_falls_back_to_static() {
        let q = FrameQueue::new(4);
        q.set_static(EpochKind::Intertrial, fill(9));
        for _ in 0..3 {
            let got = q.render_next(|f| (f.epoch, f.instruction.clone()));
            assert_eq!(got, Some((EpochKind::Intertrial, fill(9))));
        }
    }

    #[test]
    fn wait_times_out_when_empty() {
        let q = FrameQueue::new(4);
        assert!(!q.wait_for_frame(Duration::from_millis(5)));
        q.try_push(EpochKind::Stimulus, fill(1));
        assert!(q.wait_for_frame(Duration::from_millis(5)));
    }
}
