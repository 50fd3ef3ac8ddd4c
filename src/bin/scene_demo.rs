//! scene_demo - end-to-end synthetic run of the detection and tracking pipeline

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use scene_anchor::detect::{SyntheticInference, SyntheticScene};
use scene_anchor::region::StubRegionDetector;
use scene_anchor::tracking::{AcceptingValidator, AnchorId, AnchorUpdate};
use scene_anchor::{
    AffineTransform, CorrectedImage, DetectedRegion, DetectionScheduler, Event, Frame,
    FrameSnapshot, FrameSource, LifecycleSignal, ModelViewport, Orientation, PipelineConfig, Quad,
    Rect, Services, Size,
};

const CAMERA_RESOLUTION: Size = Size::new(1920.0, 1440.0);
const SCREEN: Rect = Rect::new(0.0, 0.0, 390.0, 844.0);
const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;
const ANCHOR_UPDATE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Pipeline config file (JSON, or TOML with a .toml extension).
    #[arg(long)]
    config: Option<PathBuf>,
    /// How long to run, in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Optional deterministic seed for the synthetic network.
    #[arg(long)]
    seed: Option<u64>,
    /// Chance that a frame contains the object.
    #[arg(long, default_value_t = 0.8)]
    presence: f64,
    /// Tracked confirmations the simulated session sends before the object
    /// "leaves" the view.
    #[arg(long, default_value_t = 50)]
    confirmations: u32,
}

/// Camera stand-in producing flat grey frames with a portrait display
/// transform.
struct SyntheticCamera {
    display_transform: AffineTransform,
    frames: u64,
}

impl SyntheticCamera {
    fn new() -> Self {
        Self {
            display_transform: display_transform(),
            frames: 0,
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn current_frame(&mut self) -> Result<Option<FrameSnapshot>> {
        self.frames += 1;
        let shade = (self.frames % 256) as u8;
        let frame = Frame::new(
            vec![shade; (FRAME_WIDTH * FRAME_HEIGHT) as usize],
            FRAME_WIDTH,
            FRAME_HEIGHT,
        )?;
        Ok(Some(FrameSnapshot {
            frame: Arc::new(frame),
            display_transform: self.display_transform,
            screen_bounds: SCREEN,
        }))
    }
}

fn display_transform() -> AffineTransform {
    AffineTransform::display_corrected(
        CAMERA_RESOLUTION,
        Size::new(SCREEN.width, SCREEN.height),
        Orientation::Portrait,
    )
}

/// The region the synthetic object occupies, in normalized image space.
fn region_for_scene(cfg: &PipelineConfig, scene: &SyntheticScene) -> Result<DetectedRegion> {
    let scale = cfg
        .pyramid
        .scales
        .get(scene.level)
        .ok_or_else(|| anyhow!("scene level {} is not configured", scene.level))?;
    let divisor = 2f32.powi(scene.level as i32);
    let [anchor_w, anchor_h] = scale.anchors[scene.object.slot];
    let model_rect = Rect::from_center(
        (scene.object.cell_x as f32 + 0.5) * scale.stride / divisor,
        (scene.object.cell_y as f32 + 0.5) * scale.stride / divisor,
        anchor_w,
        anchor_h,
    );
    let on_screen = ModelViewport::new(cfg.model_input_size).to_screen(&model_rect, &SCREEN);
    let to_image = display_transform()
        .invert()
        .ok_or_else(|| anyhow!("display transform is singular"))?;
    let normalized = on_screen.apply(&to_image);

    let corrected = CorrectedImage::new(vec![128; 40 * 60], 40, 60);
    Ok(DetectedRegion::new(Quad::from_rect(&normalized), 0.9).with_corrected(corrected))
}

/// Stand-in for the tracking session: binds an anchor for every followed
/// reference, confirms it for a while, then goes quiet.
fn spawn_tracking_session(
    signals: Receiver<LifecycleSignal>,
    events: Sender<Event>,
    confirmations: u32,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut following: Option<(AnchorUpdate, u32)> = None;
        let mut next_anchor = 1;
        loop {
            match signals.recv_timeout(ANCHOR_UPDATE_INTERVAL) {
                Ok(LifecycleSignal::FollowReference(reference)) => {
                    let update = AnchorUpdate {
                        anchor: AnchorId(next_anchor),
                        reference: reference.id,
                        is_tracked: true,
                    };
                    next_anchor += 1;
                    let _ = events.send(Event::AnchorAdded(update));
                    following = Some((update, confirmations));
                }
                Ok(LifecycleSignal::Present {
                    class_label,
                    reference_size,
                }) => {
                    log::info!(
                        "overlay up: '{}' {:.3} x {:.3} m",
                        class_label,
                        reference_size.width,
                        reference_size.height
                    );
                }
                Ok(LifecycleSignal::TearDown) => log::info!("overlay down"),
                Ok(LifecycleSignal::StopAndClearAnchors) => following = None,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some((update, remaining)) = following.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    if events.send(Event::AnchorUpdated(*update)).is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!("tracking session stopped");
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.presence) {
        return Err(anyhow!("presence must be within [0, 1]"));
    }

    let cfg = PipelineConfig::load_from(args.config.as_deref())?;
    log::info!(
        "scene_demo {} starting: confidence {} nms {} match {} loss timeout {:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.confidence_threshold,
        cfg.nms_threshold,
        cfg.match_threshold,
        cfg.loss_timeout
    );

    let scene = SyntheticScene {
        presence: args.presence,
        ..SyntheticScene::default()
    };
    let region = region_for_scene(&cfg, &scene)?;
    let services = Services {
        frames: Box::new(SyntheticCamera::new()),
        inference: Box::new(SyntheticInference::new(cfg.pyramid.clone(), scene, args.seed)?),
        regions: Box::new(StubRegionDetector::new(vec![region])),
        validator: Box::new(AcceptingValidator::new()),
    };

    let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
    let mut scheduler = DetectionScheduler::new(cfg, services, signal_tx);
    scheduler.warm_up()?;

    let session = spawn_tracking_session(signal_rx, scheduler.events(), args.confirmations);

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let ctrlc_tx = shutdown_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;
    let run_for = Duration::from_secs(args.seconds);
    std::thread::spawn(move || {
        std::thread::sleep(run_for);
        let _ = shutdown_tx.try_send(());
    });

    scheduler.run(&shutdown_rx)?;
    let stats = scheduler.stats();
    drop(scheduler);

    if session.join().is_err() {
        log::error!("tracking session thread panicked");
    }
    log::info!("scene_demo finished: {}", stats);
    Ok(())
}
