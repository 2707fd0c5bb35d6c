//! Wrap-around cursor over a slice stack and the two ways of replaying it.
//!
//! [`SliceNavigator::interactive`] renders only in response to scroll and
//! seek events. [`SliceNavigator::export`] walks the stack once from the first
//! slice to the last. Both hand each frame to a [`FrameRenderer`] instead of
//! drawing anything themselves.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    enums::{Direction, SequenceMode, SequenceState},
    slice_stack::SliceStack,
};

/// Default pacing between exported frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NavigatorError {
    #[error("cannot navigate an empty slice stack")]
    EmptyStack,
}

/// Per-frame render capability.
///
/// Any `FnMut(usize, &P)` closure is a renderer. Failures belong to the
/// renderer: implementations that can fail keep the error and report it when
/// they are finished.
pub trait FrameRenderer<P> {
    /// Called once before an export starts with the advisory pacing.
    fn begin(&mut self, _frame_count: usize, _frame_interval: Duration) {}

    fn render(&mut self, index: usize, payload: &P);
}

impl<P, F> FrameRenderer<P> for F
where
    F: FnMut(usize, &P),
{
    fn render(&mut self, index: usize, payload: &P) {
        self(index, payload)
    }
}

/// Cursor over a non-empty [`SliceStack`].
#[derive(Debug)]
pub struct SliceNavigator<P> {
    stack: SliceStack<P>,
    cursor: usize,
}

impl<P> SliceNavigator<P> {
    /// Start on the middle slice.
    ///
    /// # Errors
    ///
    /// [`NavigatorError::EmptyStack`] if `stack` holds no slices.
    pub fn new(stack: SliceStack<P>) -> Result<Self, NavigatorError> {
        if stack.is_empty() {
            return Err(NavigatorError::EmptyStack);
        }
        let cursor = stack.len() / 2;
        Ok(Self { stack, cursor })
    }

    /// Start on `index`, or on the middle slice when `index` is out of range.
    pub fn starting_at(stack: SliceStack<P>, index: isize) -> Result<Self, NavigatorError> {
        let mut navigator = Self::new(stack)?;
        navigator.seek(index);
        Ok(navigator)
    }

    pub fn stack(&self) -> &SliceStack<P> {
        &self.stack
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Always false; an empty stack is rejected at construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn middle(&self) -> usize {
        self.stack.len() / 2
    }

    /// Move to `index`. Anything outside `[0, len)` lands on the middle slice.
    pub fn seek(&mut self, index: isize) -> usize {
        self.cursor = match usize::try_from(index) {
            Ok(index) if index < self.stack.len() => index,
            _ => {
                log::warn!(
                    "slice {index} outside 0..{}, using middle slice {}",
                    self.stack.len(),
                    self.middle()
                );
                self.middle()
            }
        };
        self.cursor
    }

    /// Step one slice, wrapping at either end.
    pub fn advance(&mut self, direction: Direction) -> usize {
        let len = self.stack.len();
        self.cursor = match direction {
            Direction::Forward => (self.cursor + 1) % len,
            Direction::Backward => (self.cursor + len - 1) % len,
        };
        self.cursor
    }

    pub fn current_frame(&self) -> &P {
        &self.stack.slices()[self.cursor]
    }

    /// Arm event-driven rendering. The current frame is rendered once up
    /// front; after that only [`InteractiveDriver`] events render.
    pub fn interactive<R>(&mut self, renderer: R) -> InteractiveDriver<'_, P, R>
    where
        R: FrameRenderer<P>,
    {
        let mut driver = InteractiveDriver {
            navigator: self,
            renderer,
        };
        driver.render_current();
        driver
    }

    /// A fresh one-shot export over the whole stack. The cursor is untouched.
    pub fn export(&self, frame_interval: Duration) -> ExportDriver<'_, P> {
        ExportDriver {
            stack: &self.stack,
            frame_interval,
            next: 0,
            state: SequenceState::Ready,
        }
    }

    /// Drive the stack in `mode`.
    ///
    /// Export runs to completion and yields the final report. Interactive
    /// renders the current frame and returns the armed driver for the caller
    /// to feed events into.
    pub fn run_sequence<R>(
        &mut self,
        mode: SequenceMode,
        renderer: R,
        frame_interval: Duration,
    ) -> Sequence<'_, P, R>
    where
        R: FrameRenderer<P>,
    {
        match mode {
            SequenceMode::Interactive => Sequence::Interactive(self.interactive(renderer)),
            SequenceMode::Export => {
                let mut renderer = renderer;
                let report = self.export(frame_interval).run(&mut renderer);
                Sequence::Exported { report, renderer }
            }
        }
    }
}

/// Outcome of [`SliceNavigator::run_sequence`].
pub enum Sequence<'a, P, R> {
    Interactive(InteractiveDriver<'a, P, R>),
    Exported { report: ExportReport, renderer: R },
}

/// Scroll/seek events understood by [`InteractiveDriver::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationEvent {
    Scroll(Direction),
    Seek(isize),
}

/// Navigator armed for interactive use: every event moves the cursor and
/// renders the new frame.
pub struct InteractiveDriver<'a, P, R> {
    navigator: &'a mut SliceNavigator<P>,
    renderer: R,
}

impl<P, R: FrameRenderer<P>> InteractiveDriver<'_, P, R> {
    pub fn handle(&mut self, event: NavigationEvent) -> usize {
        match event {
            NavigationEvent::Scroll(direction) => self.advance(direction),
            NavigationEvent::Seek(index) => self.seek(index),
        }
    }

    pub fn advance(&mut self, direction: Direction) -> usize {
        self.navigator.advance(direction);
        self.render_current()
    }

    pub fn seek(&mut self, index: isize) -> usize {
        self.navigator.seek(index);
        self.render_current()
    }

    pub fn cursor(&self) -> usize {
        self.navigator.cursor()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Disarm and hand the renderer back.
    pub fn into_renderer(self) -> R {
        self.renderer
    }

    fn render_current(&mut self) -> usize {
        let index = self.navigator.cursor();
        self.renderer.render(index, self.navigator.current_frame());
        index
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub frames_emitted: usize,
    pub state: SequenceState,
}

/// One-shot ascending traversal of a stack.
///
/// `Ready -> Running -> Done`, or `Cancelled` when stopped through a token.
/// Terminal drivers emit nothing further; replaying needs a new driver.
#[derive(Debug)]
pub struct ExportDriver<'a, P> {
    stack: &'a SliceStack<P>,
    frame_interval: Duration,
    next: usize,
    state: SequenceState,
}

impl<P> ExportDriver<'_, P> {
    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn frames_emitted(&self) -> usize {
        self.next
    }

    /// Emit the next frame. Returns the state after the step.
    pub fn step<R: FrameRenderer<P>>(&mut self, renderer: &mut R) -> SequenceState {
        match self.state {
            SequenceState::Done | SequenceState::Cancelled => return self.state,
            SequenceState::Ready => {
                renderer.begin(self.stack.len(), self.frame_interval);
                self.state = SequenceState::Running;
            }
            SequenceState::Running => {}
        }

        let index = self.next;
        renderer.render(index, &self.stack.slices()[index]);
        self.next += 1;
        if self.next == self.stack.len() {
            self.state = SequenceState::Done;
        }
        self.state
    }

    /// Emit every remaining frame.
    pub fn run<R: FrameRenderer<P>>(mut self, renderer: &mut R) -> ExportReport {
        while !self.step(renderer).is_terminal() {}
        self.report()
    }

    /// Like [`run`](Self::run), checking `token` before each frame. A cancelled
    /// export ends in [`SequenceState::Cancelled`] with the frames emitted so
    /// far.
    pub fn run_until_cancelled<R: FrameRenderer<P>>(
        mut self,
        renderer: &mut R,
        token: &CancellationToken,
    ) -> ExportReport {
        while !self.state.is_terminal() {
            if token.is_cancelled() {
                log::info!(
                    "export of {} cancelled after {} of {} frames",
                    self.stack.identity(),
                    self.next,
                    self.stack.len()
                );
                self.state = SequenceState::Cancelled;
                break;
            }
            self.step(renderer);
        }
        self.report()
    }

    fn report(&self) -> ExportReport {
        ExportReport {
            frames_emitted: self.next,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FileIdentity;

    fn stack(len: usize) -> SliceStack<usize> {
        SliceStack::new(FileIdentity::new("stack.dcm"), (0..len).map(|i| i * 100).collect())
    }

    fn navigator(len: usize) -> SliceNavigator<usize> {
        SliceNavigator::new(stack(len)).unwrap()
    }

    #[test]
    fn empty_stack_is_rejected() {
        assert_eq!(
            SliceNavigator::new(stack(0)).unwrap_err(),
            NavigatorError::EmptyStack
        );
        assert_eq!(
            SliceNavigator::starting_at(stack(0), 0).unwrap_err(),
            NavigatorError::EmptyStack
        );
    }

    #[test]
    fn starts_on_middle_slice() {
        assert_eq!(navigator(10).cursor(), 5);
        assert_eq!(navigator(7).cursor(), 3);
        assert_eq!(navigator(1).cursor(), 0);
    }

    #[test]
    fn out_of_range_seed_falls_back_to_middle() {
        assert_eq!(SliceNavigator::starting_at(stack(10), 2).unwrap().cursor(), 2);
        assert_eq!(SliceNavigator::starting_at(stack(10), 10).unwrap().cursor(), 5);
        assert_eq!(SliceNavigator::starting_at(stack(10), -1).unwrap().cursor(), 5);
    }

    #[test]
    fn seek_accepts_only_half_open_range() {
        let mut nav = navigator(10);
        assert_eq!(nav.seek(0), 0);
        assert_eq!(nav.seek(9), 9);
        // `len` itself is out of range.
        assert_eq!(nav.seek(10), 5);
        assert_eq!(nav.seek(3), 3);
        assert_eq!(nav.seek(-4), 5);
        assert_eq!(nav.seek(isize::MAX), 5);
    }

    #[test]
    fn backward_scroll_wraps_past_zero() {
        let mut nav = navigator(10);
        let visited: Vec<_> = (0..6).map(|_| nav.advance(Direction::Backward)).collect();
        assert_eq!(visited, vec![4, 3, 2, 1, 0, 9]);
    }

    #[test]
    fn forward_scroll_wraps_past_end() {
        let mut nav = navigator(3);
        nav.seek(2);
        assert_eq!(nav.advance(Direction::Forward), 0);
    }

    #[test]
    fn full_lap_returns_to_start() {
        for len in 1..12 {
            for start in 0..len {
                let mut nav = navigator(len);
                nav.seek(start as isize);
                for _ in 0..len {
                    nav.advance(Direction::Forward);
                }
                assert_eq!(nav.cursor(), start, "len {len} start {start}");
            }
        }
    }

    #[test]
    fn current_frame_follows_cursor() {
        let mut nav = navigator(4);
        assert_eq!(*nav.current_frame(), 200);
        nav.advance(Direction::Forward);
        assert_eq!(*nav.current_frame(), 300);
        assert_eq!(nav.cursor(), 3);
    }

    #[test]
    fn interactive_renders_after_each_event() {
        let mut nav = navigator(5);
        let mut frames = Vec::new();
        {
            let mut driver = nav.interactive(|index: usize, payload: &usize| {
                frames.push((index, *payload));
            });
            driver.handle(NavigationEvent::Scroll(Direction::Forward));
            driver.handle(NavigationEvent::Scroll(Direction::Forward));
            driver.handle(NavigationEvent::Scroll(Direction::Forward));
            driver.handle(NavigationEvent::Seek(42));
            driver.handle(NavigationEvent::Scroll(Direction::Backward));
        }
        assert_eq!(
            frames,
            vec![(2, 200), (3, 300), (4, 400), (0, 0), (2, 200), (1, 100)]
        );
        assert_eq!(nav.cursor(), 1);
    }

    #[test]
    fn export_visits_every_slice_once_in_order() {
        let nav = navigator(6);
        let mut seen = Vec::new();
        let mut renderer = |index: usize, payload: &usize| seen.push((index, *payload));

        let report = nav.export(DEFAULT_FRAME_INTERVAL).run(&mut renderer);

        assert_eq!(report, ExportReport { frames_emitted: 6, state: SequenceState::Done });
        let indices: Vec<_> = seen.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(seen[4].1, 400);
        assert_eq!(nav.cursor(), 3);
    }

    #[test]
    fn export_moves_through_ready_running_done() {
        let nav = navigator(3);
        let mut count = 0;
        let mut renderer = |_: usize, _: &usize| count += 1;
        let mut driver = nav.export(Duration::from_millis(40));

        assert_eq!(driver.state(), SequenceState::Ready);
        assert_eq!(driver.step(&mut renderer), SequenceState::Running);
        assert_eq!(driver.step(&mut renderer), SequenceState::Running);
        assert_eq!(driver.step(&mut renderer), SequenceState::Done);
        assert_eq!(driver.step(&mut renderer), SequenceState::Done);
        assert_eq!(driver.frames_emitted(), 3);
        assert_eq!(count, 3);
    }

    #[test]
    fn single_slice_export_finishes_on_first_frame() {
        let nav = navigator(1);
        let mut renderer = |_: usize, _: &usize| {};
        let mut driver = nav.export(DEFAULT_FRAME_INTERVAL);
        assert_eq!(driver.step(&mut renderer), SequenceState::Done);
    }

    struct Recorder {
        begun: Option<(usize, Duration)>,
        indices: Vec<usize>,
    }

    impl FrameRenderer<usize> for Recorder {
        fn begin(&mut self, frame_count: usize, frame_interval: Duration) {
            self.begun = Some((frame_count, frame_interval));
        }

        fn render(&mut self, index: usize, _payload: &usize) {
            self.indices.push(index);
        }
    }

    #[test]
    fn export_passes_pacing_to_renderer() {
        let nav = navigator(4);
        let mut recorder = Recorder {
            begun: None,
            indices: Vec::new(),
        };
        nav.export(Duration::from_millis(250)).run(&mut recorder);
        assert_eq!(recorder.begun, Some((4, Duration::from_millis(250))));
        assert_eq!(recorder.indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn cancelled_export_stops_between_frames() {
        let nav = navigator(8);
        let token = CancellationToken::new();
        let mut emitted = Vec::new();
        let mut renderer = |index: usize, _: &usize| {
            emitted.push(index);
            if index == 2 {
                token.cancel();
            }
        };

        let report = nav
            .export(DEFAULT_FRAME_INTERVAL)
            .run_until_cancelled(&mut renderer, &token);

        assert_eq!(report.state, SequenceState::Cancelled);
        assert_eq!(report.frames_emitted, 3);
        assert_eq!(emitted, vec![0, 1, 2]);
    }

    #[test]
    fn uncancelled_token_runs_to_done() {
        let nav = navigator(3);
        let token = CancellationToken::new();
        let mut renderer = |_: usize, _: &usize| {};
        let report = nav
            .export(DEFAULT_FRAME_INTERVAL)
            .run_until_cancelled(&mut renderer, &token);
        assert_eq!(report, ExportReport { frames_emitted: 3, state: SequenceState::Done });
    }

    #[test]
    fn run_sequence_dispatches_on_mode() {
        let mut nav = navigator(4);

        let mut exported = Vec::new();
        match nav.run_sequence(
            SequenceMode::Export,
            |index: usize, _: &usize| exported.push(index),
            DEFAULT_FRAME_INTERVAL,
        ) {
            Sequence::Exported { report, .. } => assert_eq!(report.state, SequenceState::Done),
            Sequence::Interactive(_) => panic!("export mode armed an interactive driver"),
        }
        assert_eq!(exported, vec![0, 1, 2, 3]);

        let mut rendered = Vec::new();
        match nav.run_sequence(
            SequenceMode::Interactive,
            |index: usize, _: &usize| rendered.push(index),
            DEFAULT_FRAME_INTERVAL,
        ) {
            Sequence::Interactive(mut driver) => {
                driver.advance(Direction::Forward);
            }
            Sequence::Exported { .. } => panic!("interactive mode ran an export"),
        }
        assert_eq!(rendered, vec![2, 3]);
    }
}
