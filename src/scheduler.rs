//! Detection cadence and the single-flight detection cycle.
//!
//! One cycle is: frame -> inference -> decode -> suppress -> region
//! detection -> match -> lifecycle. The two external calls complete
//! asynchronously by posting an [`Event`]; everything else runs inline on
//! the scheduler's thread. The cycle guard is released on every path out of
//! a cycle and the cycle's frame is dropped with it.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{never, select, unbounded, Receiver, Sender};

use crate::config::PipelineConfig;
use crate::detect::{FeatureDecoder, FeatureMaps, InferenceService, NonMaxSuppressor, Prediction};
use crate::event::{Completer, Event};
use crate::frame::{FrameSnapshot, FrameSource};
use crate::region::{DetectedRegion, RegionDetector, RegionMatcher};
use crate::timer::Cadence;
use crate::tracking::{LifecycleSignal, ReferenceValidator, TrackedTargetLifecycle};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// External collaborators driven by the scheduler.
pub struct Services {
    pub frames: Box<dyn FrameSource>,
    pub inference: Box<dyn InferenceService>,
    pub regions: Box<dyn RegionDetector>,
    pub validator: Box<dyn ReferenceValidator>,
}

/// "A detection cycle is in flight."
#[derive(Debug, Default)]
pub struct CycleGuard {
    in_flight: bool,
}

impl CycleGuard {
    pub fn is_set(&self) -> bool {
        self.in_flight
    }

    /// Set the guard. Returns false if it was already set.
    pub fn try_enter(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn release(&mut self) {
        self.in_flight = false;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub started: u64,
    pub skipped: u64,
    /// Cycles that ended with nothing above threshold, or no frame.
    pub empty: u64,
    pub no_match: u64,
    /// Cycles that handed a candidate to the lifecycle.
    pub matched: u64,
    pub failed: u64,
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "started={} skipped={} empty={} no_match={} matched={} failed={}",
            self.started, self.skipped, self.empty, self.no_match, self.matched, self.failed
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Started(u64),
    /// A cycle is already in flight.
    SkippedInFlight,
    /// A target is being acquired or tracked.
    SkippedEngaged,
    NoFrame,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Inference,
    Regions,
}

struct Cycle {
    id: u64,
    started: Instant,
    stage: Stage,
    snapshot: FrameSnapshot,
    top: Option<Prediction>,
}

pub struct DetectionScheduler {
    config: PipelineConfig,
    decoder: FeatureDecoder,
    suppressor: NonMaxSuppressor,
    matcher: RegionMatcher,
    guard: CycleGuard,
    cycle: Option<Cycle>,
    next_cycle: u64,
    stats: CycleStats,
    lifecycle: TrackedTargetLifecycle,
    services: Services,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl DetectionScheduler {
    pub fn new(config: PipelineConfig, services: Services, signals: Sender<LifecycleSignal>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            decoder: config.decoder(),
            suppressor: config.suppressor(),
            matcher: config.matcher(),
            lifecycle: TrackedTargetLifecycle::new(config.loss_timeout, signals),
            config,
            guard: CycleGuard::default(),
            cycle: None,
            next_cycle: 1,
            stats: CycleStats::default(),
            services,
            events_tx,
            events_rx,
        }
    }

    /// Sender for anchor and reset events from the tracking subsystem.
    pub fn events(&self) -> Sender<Event> {
        self.events_tx.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn guard(&self) -> &CycleGuard {
        &self.guard
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn lifecycle(&self) -> &TrackedTargetLifecycle {
        &self.lifecycle
    }

    /// Frame held by the in-flight cycle, if any.
    pub fn current_snapshot(&self) -> Option<&FrameSnapshot> {
        self.cycle.as_ref().map(|c| &c.snapshot)
    }

    /// When the in-flight cycle was started.
    pub fn in_flight_since(&self) -> Option<Instant> {
        self.cycle.as_ref().map(|c| c.started)
    }

    pub fn warm_up(&mut self) -> Result<()> {
        log::info!(
            "warming up inference '{}', regions '{}', validator '{}'",
            self.services.inference.name(),
            self.services.regions.name(),
            self.services.validator.name()
        );
        self.services.inference.warm_up()
    }

    /// One cadence tick: start a cycle unless one is in flight or a target
    /// is engaged.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if !self.lifecycle.is_idle() {
            self.stats.skipped += 1;
            return TickOutcome::SkippedEngaged;
        }
        if !self.guard.try_enter() {
            if let Some(cycle) = &self.cycle {
                log::debug!(
                    "cycle {} still in flight after {:?}",
                    cycle.id,
                    now.saturating_duration_since(cycle.started)
                );
            }
            self.stats.skipped += 1;
            return TickOutcome::SkippedInFlight;
        }

        let id = self.next_cycle;
        self.next_cycle += 1;
        self.stats.started += 1;

        let snapshot = match self.services.frames.current_frame() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                log::debug!("cycle {}: no frame yet", id);
                self.stats.empty += 1;
                self.finish_cycle();
                return TickOutcome::NoFrame;
            }
            Err(err) => {
                log::warn!("cycle {}: frame source failed: {:#}", id, err);
                self.stats.failed += 1;
                self.finish_cycle();
                return TickOutcome::Failed;
            }
        };

        let frame = snapshot.frame.clone();
        self.cycle = Some(Cycle {
            id,
            started: now,
            stage: Stage::Inference,
            snapshot,
            top: None,
        });
        log::debug!("cycle {}: submitting {}x{} frame", id, frame.width, frame.height);
        self.services.inference.submit(
            frame,
            Completer::new(id, self.events_tx.clone(), Event::inference_finished),
        );
        TickOutcome::Started(id)
    }

    pub fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::InferenceFinished { cycle, result } => {
                if !self.is_current(cycle, Stage::Inference) {
                    log::debug!("dropping stale inference result for cycle {}", cycle);
                    return;
                }
                match result {
                    Ok(outputs) => self.on_inference(cycle, outputs),
                    Err(err) => self.fail(cycle, "inference", err),
                }
            }
            Event::RegionsDetected { cycle, result } => {
                if !self.is_current(cycle, Stage::Regions) {
                    log::debug!("dropping stale region result for cycle {}", cycle);
                    return;
                }
                match result {
                    Ok(regions) => self.on_regions(cycle, regions),
                    Err(err) => self.fail(cycle, "region detection", err),
                }
            }
            Event::ReferenceValidated { candidate, result } => {
                self.lifecycle.on_validation(candidate, result, now);
            }
            Event::AnchorAdded(update) => self.lifecycle.on_anchor_added(update),
            Event::AnchorUpdated(update) => {
                self.lifecycle.on_anchor_updated(update, now);
            }
            Event::ResetTracking => self.lifecycle.reset(),
        }
    }

    /// Handle every queued event. Returns how many were handled.
    pub fn drain_events(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, now);
            handled += 1;
        }
        handled
    }

    /// Expire the tracked target if its loss timer has run out.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        self.lifecycle.check_timeout(now)
    }

    /// Drive the pipeline until `shutdown` fires or disconnects.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<()> {
        let cadence = Cadence::new(self.config.tick_interval);
        let health = crossbeam_channel::tick(HEALTH_INTERVAL);
        let events = self.events_rx.clone();
        log::info!("detection cadence {:?}", cadence.interval());

        loop {
            let loss = self.lifecycle.loss_receiver().unwrap_or_else(never);
            select! {
                recv(shutdown) -> _ => break,
                recv(cadence.receiver()) -> _ => {
                    self.tick(Instant::now());
                }
                recv(events) -> msg => match msg {
                    Ok(event) => self.handle_event(event, Instant::now()),
                    Err(_) => break,
                },
                recv(loss) -> _ => {
                    self.check_timeout(Instant::now());
                }
                recv(health) -> _ => {
                    log::info!("health: {} phase={:?}", self.stats, self.lifecycle.phase());
                }
            }
        }

        log::info!("scheduler stopping: {}", self.stats);
        self.lifecycle.reset();
        Ok(())
    }

    fn is_current(&self, cycle: u64, stage: Stage) -> bool {
        self.cycle
            .as_ref()
            .map_or(false, |c| c.id == cycle && c.stage == stage)
    }

    fn on_inference(&mut self, cycle: u64, outputs: FeatureMaps) {
        let views = match self.decoder.feature_views(&outputs) {
            Ok(views) => views,
            Err(err) => return self.fail(cycle, "inference output", err),
        };
        let predictions = self.decoder.decode(&views);
        let kept = self.suppressor.suppress(&predictions);
        drop(views);
        drop(outputs);

        let Some(top) = kept.first().copied() else {
            log::debug!("cycle {}: nothing above threshold", cycle);
            self.stats.empty += 1;
            self.finish_cycle();
            return;
        };
        log::debug!(
            "cycle {}: {} candidates, {} after suppression, top class {} score {:.2}",
            cycle,
            predictions.len(),
            kept.len(),
            top.class_index,
            top.score
        );

        let Some(current) = self.cycle.as_mut() else {
            return;
        };
        current.stage = Stage::Regions;
        current.top = Some(top);
        let frame = current.snapshot.frame.clone();
        self.services.regions.submit(
            frame,
            &self.config.region_query,
            Completer::new(cycle, self.events_tx.clone(), Event::regions_detected),
        );
    }

    fn on_regions(&mut self, cycle: u64, regions: Vec<DetectedRegion>) {
        let Some(current) = self.cycle.take() else {
            return;
        };
        self.finish_cycle();

        let Some(top) = current.top else {
            log::warn!("cycle {}: region result without a prediction", cycle);
            self.stats.failed += 1;
            return;
        };
        let snapshot = &current.snapshot;
        let Some(hit) = self.matcher.best_match(
            &top,
            &regions,
            &snapshot.display_transform,
            &snapshot.screen_bounds,
        ) else {
            log::debug!("cycle {}: no region among {} matched", cycle, regions.len());
            self.stats.no_match += 1;
            return;
        };

        let Some(image) = regions.into_iter().nth(hit.index).and_then(|r| r.corrected) else {
            log::warn!(
                "cycle {}: matched region {} has no corrected image",
                cycle,
                hit.index
            );
            self.stats.no_match += 1;
            return;
        };

        let label = self.config.label_for(top.class_index);
        log::debug!(
            "cycle {}: '{}' matched region {} (iou {:.2})",
            cycle,
            label,
            hit.index,
            hit.iou
        );
        if let Some(candidate) = self
            .lifecycle
            .on_match(&label, image, self.config.reference_width)
        {
            self.stats.matched += 1;
            let ticket = candidate.candidate;
            self.services.validator.validate(
                candidate,
                Completer::new(ticket, self.events_tx.clone(), Event::reference_validated),
            );
        }
    }

    fn fail(&mut self, cycle: u64, stage: &str, err: anyhow::Error) {
        log::warn!("cycle {}: {} failed: {:#}", cycle, stage, err);
        self.stats.failed += 1;
        self.finish_cycle();
    }

    fn finish_cycle(&mut self) {
        self.cycle = None;
        self.guard.release();
    }
}
