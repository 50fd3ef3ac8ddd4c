mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::unbounded;

use scene_anchor::detect::StubInference;
use scene_anchor::region::StubRegionDetector;
use scene_anchor::tracking::AcceptingValidator;
use scene_anchor::{
    DetectionScheduler, Event, LifecyclePhase, LifecycleSignal, PipelineConfig, Services,
    TickOutcome,
};

use common::{
    disjoint_region, empty_outputs, matching_region, planted_outputs, DroppingInference,
    HeldInference, HeldValidator, TestCamera,
};

fn scheduler(services: Services) -> DetectionScheduler {
    let (tx, _rx) = unbounded::<LifecycleSignal>();
    DetectionScheduler::new(PipelineConfig::default(), services, tx)
}

fn services(
    camera: TestCamera,
    inference: impl scene_anchor::InferenceService + 'static,
    regions: StubRegionDetector,
) -> Services {
    Services {
        frames: Box::new(camera),
        inference: Box::new(inference),
        regions: Box::new(regions),
        validator: Box::new(AcceptingValidator::new()),
    }
}

#[test]
fn frame_failure_releases_guard() {
    let mut s = scheduler(services(
        TestCamera::failing(),
        StubInference::new(planted_outputs(0)),
        StubRegionDetector::new(vec![matching_region()]),
    ));
    assert_eq!(s.tick(Instant::now()), TickOutcome::Failed);
    assert!(!s.guard().is_set());
    assert_eq!(s.stats().failed, 1);
    assert!(s.lifecycle().is_idle());
}

#[test]
fn inference_failure_releases_guard() {
    let mut s = scheduler(services(
        TestCamera::new(),
        StubInference::failing("accelerator busy"),
        StubRegionDetector::new(vec![matching_region()]),
    ));
    let now = Instant::now();
    assert_eq!(s.tick(now), TickOutcome::Started(1));
    assert!(s.guard().is_set());
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert!(s.current_snapshot().is_none());
    assert_eq!(s.stats().failed, 1);
    assert!(s.lifecycle().is_idle());
}

#[test]
fn malformed_inference_output_is_a_failure_not_a_panic() {
    let mut s = scheduler(services(
        TestCamera::new(),
        StubInference::new(vec![]),
        StubRegionDetector::default(),
    ));
    let now = Instant::now();
    s.tick(now);
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert_eq!(s.stats().failed, 1);
}

#[test]
fn region_detection_failure_releases_guard() {
    let mut s = scheduler(services(
        TestCamera::new(),
        StubInference::new(planted_outputs(0)),
        StubRegionDetector::failing("vision request failed"),
    ));
    let now = Instant::now();
    s.tick(now);
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert_eq!(s.stats().failed, 1);
    assert!(s.lifecycle().is_idle());
}

#[test]
fn dropped_completion_releases_guard() {
    let mut s = scheduler(services(
        TestCamera::new(),
        DroppingInference,
        StubRegionDetector::default(),
    ));
    let now = Instant::now();
    assert_eq!(s.tick(now), TickOutcome::Started(1));
    assert_eq!(s.drain_events(now), 1);
    assert!(!s.guard().is_set());
    assert_eq!(s.stats().failed, 1);
}

#[test]
fn empty_and_unmatched_cycles_release_guard() {
    let mut s = scheduler(services(
        TestCamera::new(),
        StubInference::new(empty_outputs()),
        StubRegionDetector::default(),
    ));
    let now = Instant::now();
    s.tick(now);
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert_eq!(s.stats().empty, 1);

    let mut s = scheduler(services(
        TestCamera::new(),
        StubInference::new(planted_outputs(0)),
        StubRegionDetector::new(vec![disjoint_region()]),
    ));
    s.tick(now);
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert_eq!(s.stats().no_match, 1);
    assert!(s.lifecycle().is_idle());
}

#[test]
fn match_without_corrected_image_stays_idle() {
    let mut region = matching_region();
    region.corrected = None;
    let mut s = scheduler(services(
        TestCamera::new(),
        StubInference::new(planted_outputs(0)),
        StubRegionDetector::new(vec![region]),
    ));
    let now = Instant::now();
    s.tick(now);
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert!(s.lifecycle().is_idle());
    assert_eq!(s.stats().no_match, 1);
}

#[test]
fn tick_is_skipped_while_cycle_in_flight() {
    let held = HeldInference::default();
    let mut s = scheduler(services(
        TestCamera::new(),
        held.clone(),
        StubRegionDetector::default(),
    ));
    let now = Instant::now();
    assert_eq!(s.tick(now), TickOutcome::Started(1));
    assert_eq!(s.in_flight_since(), Some(now));
    let later = now + Duration::from_millis(30);
    assert_eq!(s.tick(later), TickOutcome::SkippedInFlight);
    assert_eq!(s.in_flight_since(), Some(now));
    assert_eq!(s.stats().skipped, 1);

    // A completion for some other cycle changes nothing.
    s.events()
        .send(Event::inference_finished(99, Err(anyhow!("late"))))
        .expect("send");
    s.drain_events(now);
    assert!(s.guard().is_set());

    held.complete_next(Err(anyhow!("timeout")));
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert!(s.in_flight_since().is_none());
    assert_eq!(s.tick(later), TickOutcome::Started(2));
    assert_eq!(s.in_flight_since(), Some(later));
}

#[test]
fn frame_is_released_when_cycle_ends() {
    let camera = TestCamera::new();
    let frame = camera.frame.clone();
    let held = HeldInference::default();
    let mut s = scheduler(services(camera, held.clone(), StubRegionDetector::default()));
    let now = Instant::now();

    s.tick(now);
    // test handle, camera, cycle snapshot
    assert_eq!(Arc::strong_count(&frame), 3);

    held.complete_next(Ok(empty_outputs()));
    s.drain_events(now);
    assert_eq!(Arc::strong_count(&frame), 2);
}

#[test]
fn tick_is_skipped_while_target_is_acquiring() {
    let validator = HeldValidator::default();
    let mut s = scheduler(Services {
        frames: Box::new(TestCamera::new()),
        inference: Box::new(StubInference::new(planted_outputs(0))),
        regions: Box::new(StubRegionDetector::new(vec![matching_region()])),
        validator: Box::new(validator.clone()),
    });
    let now = Instant::now();
    s.tick(now);
    s.drain_events(now);
    assert!(!s.guard().is_set());
    assert_eq!(s.lifecycle().phase(), LifecyclePhase::Acquiring);
    assert_eq!(s.stats().matched, 1);

    assert_eq!(s.tick(now), TickOutcome::SkippedEngaged);

    let (candidate, done) = validator.pending.lock().expect("lock").remove(0);
    assert_eq!(candidate.class_label, "class_0");
    done.complete(Err(anyhow!("not enough features")));
    s.drain_events(now);
    assert!(s.lifecycle().is_idle());
    assert_eq!(s.tick(now), TickOutcome::Started(2));
}
