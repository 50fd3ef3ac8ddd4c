use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};

use crate::frame::CorrectedImage;
use crate::geometry::Size;
use crate::timer::TimerHandle;
use crate::tracking::reference::{AnchorId, AnchorUpdate, ReferenceCandidate, ReferenceImage};

pub const DEFAULT_LOSS_TIMEOUT: Duration = Duration::from_millis(30);

/// Instructions for the visualization layer and the tracking session.
#[derive(Clone, Debug)]
pub enum LifecycleSignal {
    /// Build the overlay for a newly active target.
    Present {
        class_label: String,
        reference_size: Size,
    },
    /// Reconfigure tracking to follow exactly this one image.
    FollowReference(ReferenceImage),
    /// Remove the overlay of the target that just went idle.
    TearDown,
    /// Stop tracking and drop every anchor.
    StopAndClearAnchors,
}

/// The single physical object currently being tracked.
#[derive(Clone, Debug)]
pub struct TrackedTarget {
    pub class_label: String,
    pub reference: ReferenceImage,
    pub anchor_binding: Option<AnchorId>,
    pub last_seen_at: Instant,
}

impl TrackedTarget {
    pub fn reference_size(&self) -> Size {
        self.reference.physical_size
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Acquiring,
    Active,
}

#[derive(Debug)]
struct Pending {
    candidate: u64,
    class_label: String,
}

#[derive(Debug)]
enum State {
    Idle,
    Acquiring(Pending),
    Active {
        target: TrackedTarget,
        loss_timer: TimerHandle,
    },
}

/// Owns the at-most-one tracked target.
///
/// ```text
/// Idle --match--> Acquiring --validated--> Active --timeout/reset--> Idle
///                     \--rejected--> Idle      \--tracked update--> Active
/// ```
///
/// A target exists only inside `State::Active`, so two live targets cannot
/// be represented. Outputs go out on the signal channel.
pub struct TrackedTargetLifecycle {
    state: State,
    loss_timeout: Duration,
    next_candidate: u64,
    signals: Sender<LifecycleSignal>,
}

impl TrackedTargetLifecycle {
    pub fn new(loss_timeout: Duration, signals: Sender<LifecycleSignal>) -> Self {
        Self {
            state: State::Idle,
            loss_timeout,
            next_candidate: 1,
            signals,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        match self.state {
            State::Idle => LifecyclePhase::Idle,
            State::Acquiring(_) => LifecyclePhase::Acquiring,
            State::Active { .. } => LifecyclePhase::Active,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn target(&self) -> Option<&TrackedTarget> {
        match &self.state {
            State::Active { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn loss_timeout(&self) -> Duration {
        self.loss_timeout
    }

    /// Deadline of the running loss timer.
    pub fn loss_deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Active { loss_timer, .. } => Some(loss_timer.deadline()),
            _ => None,
        }
    }

    /// Receiver for the running loss timer, for use in `select!`.
    ///
    /// A clone keeps the deadline it was taken with after the timer is restarted, so
    /// a firing receiver is only a wake-up; `check_timeout` decides.
    pub fn loss_receiver(&self) -> Option<Receiver<Instant>> {
        match &self.state {
            State::Active { loss_timer, .. } => Some(loss_timer.receiver().clone()),
            _ => None,
        }
    }

    /// A matched region while idle starts acquisition and returns the
    /// candidate to validate. Anything else is ignored.
    pub fn on_match(
        &mut self,
        class_label: &str,
        image: CorrectedImage,
        physical_width: f32,
    ) -> Option<ReferenceCandidate> {
        if !self.is_idle() {
            log::debug!(
                "ignoring match for '{}' while {:?}",
                class_label,
                self.phase()
            );
            return None;
        }

        let candidate = self.next_candidate;
        self.next_candidate += 1;
        self.state = State::Acquiring(Pending {
            candidate,
            class_label: class_label.to_string(),
        });
        log::info!("acquiring '{}' (candidate {})", class_label, candidate);

        Some(ReferenceCandidate {
            candidate,
            class_label: class_label.to_string(),
            image,
            physical_width,
        })
    }

    /// Outcome of validating `candidate`. Results for anything but the
    /// pending candidate are stale and dropped.
    pub fn on_validation(&mut self, candidate: u64, result: Result<ReferenceImage>, now: Instant) {
        let pending = match &self.state {
            State::Acquiring(pending) if pending.candidate == candidate => pending,
            _ => {
                log::debug!("dropping stale validation for candidate {}", candidate);
                return;
            }
        };

        match result {
            Ok(reference) => {
                let class_label = pending.class_label.clone();
                log::info!(
                    "tracking '{}' as {} ({:.3} x {:.3} m)",
                    class_label,
                    reference.id,
                    reference.physical_size.width,
                    reference.physical_size.height
                );
                self.emit(LifecycleSignal::FollowReference(reference.clone()));
                self.emit(LifecycleSignal::Present {
                    class_label: class_label.clone(),
                    reference_size: reference.physical_size,
                });
                self.state = State::Active {
                    target: TrackedTarget {
                        class_label,
                        reference,
                        anchor_binding: None,
                        last_seen_at: now,
                    },
                    loss_timer: TimerHandle::start(self.loss_timeout, now),
                };
            }
            Err(err) => {
                log::warn!(
                    "reference validation failed for '{}': {:#}",
                    pending.class_label,
                    err
                );
                self.state = State::Idle;
            }
        }
    }

    /// Bind the anchor the tracking subsystem created for our reference.
    pub fn on_anchor_added(&mut self, update: AnchorUpdate) {
        let State::Active { target, .. } = &mut self.state else {
            return;
        };
        if update.reference != target.reference.id {
            log::debug!("ignoring anchor for unrelated {}", update.reference);
            return;
        }
        target.anchor_binding = Some(update.anchor);
        log::debug!("bound anchor {:?} to {}", update.anchor, target.reference.id);
    }

    /// Restart the loss timer when the bound anchor is reported as tracked.
    /// Returns whether the timer was restarted.
    pub fn on_anchor_updated(&mut self, update: AnchorUpdate, now: Instant) -> bool {
        let State::Active { target, loss_timer } = &mut self.state else {
            return false;
        };
        if target.anchor_binding != Some(update.anchor) || !update.is_tracked {
            return false;
        }
        target.last_seen_at = now;
        *loss_timer = TimerHandle::start(self.loss_timeout, now);
        true
    }

    /// Drop the target if its loss timer has expired. Returns whether it did.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        let expired = matches!(
            &self.state,
            State::Active { loss_timer, .. } if loss_timer.is_expired(now)
        );
        if expired {
            if let Some(target) = self.target() {
                log::info!(
                    "lost '{}' after {:?} without confirmation",
                    target.class_label,
                    now.saturating_duration_since(target.last_seen_at)
                );
            }
            self.go_idle();
        }
        expired
    }

    /// Explicit reset from any state.
    pub fn reset(&mut self) {
        log::info!("tracking reset from {:?}", self.phase());
        if matches!(self.state, State::Active { .. }) {
            self.go_idle();
        } else {
            self.state = State::Idle;
            self.emit(LifecycleSignal::StopAndClearAnchors);
        }
    }

    fn go_idle(&mut self) {
        self.state = State::Idle;
        self.emit(LifecycleSignal::TearDown);
        self.emit(LifecycleSignal::StopAndClearAnchors);
    }

    fn emit(&self, signal: LifecycleSignal) {
        if self.signals.send(signal).is_err() {
            log::debug!("no listener for lifecycle signals");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::reference::ReferenceId;
    use anyhow::anyhow;
    use crossbeam_channel::unbounded;

    const TIMEOUT: Duration = Duration::from_millis(30);

    fn image() -> CorrectedImage {
        CorrectedImage::new(vec![0; 6], 2, 3)
    }

    fn reference(id: u64) -> ReferenceImage {
        ReferenceImage {
            id: ReferenceId(id),
            image: image(),
            physical_size: Size::new(0.07, 0.105),
        }
    }

    fn drain(rx: &Receiver<LifecycleSignal>) -> Vec<LifecycleSignal> {
        rx.try_iter().collect()
    }

    fn active(now: Instant) -> (TrackedTargetLifecycle, Receiver<LifecycleSignal>) {
        let (tx, rx) = unbounded();
        let mut lifecycle = TrackedTargetLifecycle::new(TIMEOUT, tx);
        let candidate = lifecycle.on_match("poster", image(), 0.07).expect("candidate");
        lifecycle.on_validation(candidate.candidate, Ok(reference(5)), now);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Active);
        drain(&rx);
        (lifecycle, rx)
    }

    #[test]
    fn validation_success_activates_and_signals() {
        let (tx, rx) = unbounded();
        let mut lifecycle = TrackedTargetLifecycle::new(TIMEOUT, tx);
        let now = Instant::now();

        let candidate = lifecycle.on_match("poster", image(), 0.07).expect("candidate");
        assert_eq!(lifecycle.phase(), LifecyclePhase::Acquiring);
        assert!(lifecycle.target().is_none());
        assert!(drain(&rx).is_empty());

        lifecycle.on_validation(candidate.candidate, Ok(reference(5)), now);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Active);
        assert_eq!(lifecycle.loss_deadline(), Some(now + TIMEOUT));

        let signals = drain(&rx);
        assert_eq!(signals.len(), 2);
        assert!(matches!(&signals[0], LifecycleSignal::FollowReference(r) if r.id == ReferenceId(5)));
        match &signals[1] {
            LifecycleSignal::Present {
                class_label,
                reference_size,
            } => {
                assert_eq!(class_label, "poster");
                assert_eq!(*reference_size, Size::new(0.07, 0.105));
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn validation_failure_returns_to_idle_quietly() {
        let (tx, rx) = unbounded();
        let mut lifecycle = TrackedTargetLifecycle::new(TIMEOUT, tx);
        let candidate = lifecycle.on_match("poster", image(), 0.07).expect("candidate");
        lifecycle.on_validation(candidate.candidate, Err(anyhow!("too blurry")), Instant::now());
        assert!(lifecycle.is_idle());
        assert!(lifecycle.loss_deadline().is_none());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn match_while_engaged_is_a_no_op() {
        let (tx, rx) = unbounded();
        let mut lifecycle = TrackedTargetLifecycle::new(TIMEOUT, tx);
        assert!(lifecycle.on_match("a", image(), 0.07).is_some());
        assert!(lifecycle.on_match("b", image(), 0.07).is_none());
        assert_eq!(lifecycle.phase(), LifecyclePhase::Acquiring);

        let (mut lifecycle, rx2) = active(Instant::now());
        assert!(lifecycle.on_match("b", image(), 0.07).is_none());
        assert_eq!(lifecycle.phase(), LifecyclePhase::Active);
        assert_eq!(lifecycle.target().map(|t| t.class_label.as_str()), Some("poster"));
        assert!(drain(&rx).is_empty());
        assert!(drain(&rx2).is_empty());
    }

    #[test]
    fn stale_validation_is_ignored() {
        let (tx, _rx) = unbounded();
        let mut lifecycle = TrackedTargetLifecycle::new(TIMEOUT, tx);
        let first = lifecycle.on_match("a", image(), 0.07).expect("candidate");
        lifecycle.reset();
        let second = lifecycle.on_match("b", image(), 0.07).expect("candidate");
        assert_ne!(first.candidate, second.candidate);

        lifecycle.on_validation(first.candidate, Ok(reference(1)), Instant::now());
        assert_eq!(lifecycle.phase(), LifecyclePhase::Acquiring);
        lifecycle.on_validation(second.candidate, Ok(reference(2)), Instant::now());
        assert_eq!(lifecycle.phase(), LifecyclePhase::Active);
    }

    #[test]
    fn timeout_emits_exactly_one_teardown() {
        let start = Instant::now();
        let (mut lifecycle, rx) = active(start);

        assert!(!lifecycle.check_timeout(start + Duration::from_millis(29)));
        assert!(lifecycle.check_timeout(start + TIMEOUT));
        assert!(lifecycle.is_idle());
        assert!(!lifecycle.check_timeout(start + TIMEOUT * 2));
        lifecycle.reset();

        let teardowns = drain(&rx)
            .iter()
            .filter(|s| matches!(s, LifecycleSignal::TearDown))
            .count();
        assert_eq!(teardowns, 1);
    }

    #[test]
    fn only_tracked_updates_for_bound_anchor_restart_the_clock() {
        let start = Instant::now();
        let (mut lifecycle, _rx) = active(start);
        let anchor = AnchorId(9);

        // Not bound yet.
        let tracked = AnchorUpdate {
            anchor,
            reference: ReferenceId(5),
            is_tracked: true,
        };
        assert!(!lifecycle.on_anchor_updated(tracked, start + Duration::from_millis(10)));

        lifecycle.on_anchor_added(AnchorUpdate {
            reference: ReferenceId(4),
            ..tracked
        });
        assert_eq!(lifecycle.target().and_then(|t| t.anchor_binding), None);
        lifecycle.on_anchor_added(tracked);
        assert_eq!(lifecycle.target().and_then(|t| t.anchor_binding), Some(anchor));

        let later = start + Duration::from_millis(20);
        let untracked = AnchorUpdate {
            is_tracked: false,
            ..tracked
        };
        assert!(!lifecycle.on_anchor_updated(untracked, later));
        assert_eq!(lifecycle.loss_deadline(), Some(start + TIMEOUT));

        let other = AnchorUpdate {
            anchor: AnchorId(10),
            ..tracked
        };
        assert!(!lifecycle.on_anchor_updated(other, later));

        assert!(lifecycle.on_anchor_updated(tracked, later));
        assert_eq!(lifecycle.loss_deadline(), Some(later + TIMEOUT));
        assert!(!lifecycle.check_timeout(start + TIMEOUT));
        assert!(lifecycle.check_timeout(later + TIMEOUT));
    }

    #[test]
    fn reset_from_active_tears_down_and_clears() {
        let (mut lifecycle, rx) = active(Instant::now());
        lifecycle.reset();
        let signals = drain(&rx);
        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[0], LifecycleSignal::TearDown));
        assert!(matches!(signals[1], LifecycleSignal::StopAndClearAnchors));
    }

    #[test]
    fn reset_from_idle_only_clears() {
        let (tx, rx) = unbounded();
        let mut lifecycle = TrackedTargetLifecycle::new(TIMEOUT, tx);
        lifecycle.reset();
        let signals = drain(&rx);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0], LifecycleSignal::StopAndClearAnchors));
    }
}
