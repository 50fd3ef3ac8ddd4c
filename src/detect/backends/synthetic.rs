use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Sender};
use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::{FeatureMaps, InferenceService};
use crate::detect::scale::{ScalePyramid, BOX_FIELDS};
use crate::detect::tensor::{plant, zero_outputs, PlantedBox};
use crate::event::Completer;
use crate::frame::Frame;

/// What the synthetic network "sees".
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    /// Scale index the object is planted on.
    pub level: usize,
    pub object: PlantedBox,
    /// Chance in `[0, 1]` that a given frame contains the object.
    pub presence: f64,
    /// Simulated inference latency.
    pub latency: Duration,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            level: 0,
            object: PlantedBox::strong(6, 6, 0, 0),
            presence: 0.8,
            latency: Duration::from_millis(5),
        }
    }
}

struct Job {
    frame: Arc<Frame>,
    done: Completer<FeatureMaps>,
}

/// Inference service running on its own worker thread.
///
/// Every output carries low-amplitude random logits that stay well below
/// the confidence threshold, plus the scene's object on frames where the
/// seeded dice say it is present.
pub struct SyntheticInference {
    jobs: Option<Sender<Job>>,
    join: Option<JoinHandle<()>>,
}

impl SyntheticInference {
    pub fn new(pyramid: ScalePyramid, scene: SyntheticScene, seed: Option<u64>) -> Result<Self> {
        pyramid.validate()?;
        let scale = pyramid
            .scales
            .get(scene.level)
            .ok_or_else(|| anyhow!("scene level {} is not a defined scale", scene.level))?;
        // Fail at construction rather than on the worker.
        plant(&mut zero_outputs(&pyramid)[scene.level], scale, &scene.object)?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (tx, rx) = unbounded::<Job>();
        let join = std::thread::Builder::new()
            .name("synthetic-inference".to_string())
            .spawn(move || {
                let mut worker = Worker {
                    pyramid,
                    scene,
                    rng,
                };
                for job in rx {
                    std::thread::sleep(worker.scene.latency);
                    let result = worker.infer(&job.frame);
                    drop(job.frame);
                    job.done.complete(result);
                }
                log::debug!("synthetic inference worker stopped");
            })?;

        Ok(Self {
            jobs: Some(tx),
            join: Some(join),
        })
    }
}

impl InferenceService for SyntheticInference {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn submit(&mut self, frame: Arc<Frame>, done: Completer<FeatureMaps>) {
        let Some(jobs) = &self.jobs else {
            done.complete(Err(anyhow!("synthetic inference is shut down")));
            return;
        };
        if let Err(err) = jobs.send(Job { frame, done }) {
            // The job comes back with the error; dropping it fails the request.
            log::warn!("synthetic inference worker is gone");
            drop(err.into_inner());
        }
    }
}

impl Drop for SyntheticInference {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("synthetic inference worker panicked");
            }
        }
    }
}

struct Worker {
    pyramid: ScalePyramid,
    scene: SyntheticScene,
    rng: StdRng,
}

impl Worker {
    fn infer(&mut self, frame: &Frame) -> Result<FeatureMaps> {
        if frame.byte_len() == 0 {
            return Err(anyhow!("empty frame"));
        }
        let mut outputs = zero_outputs(&self.pyramid);
        for (output, scale) in outputs.iter_mut().zip(&self.pyramid.scales) {
            add_noise(output, scale.num_classes + BOX_FIELDS, &mut self.rng);
        }
        if self.rng.gen_bool(self.scene.presence.clamp(0.0, 1.0)) {
            let level = self.scene.level;
            plant(
                &mut outputs[level],
                &self.pyramid.scales[level],
                &self.scene.object,
            )?;
        }
        Ok(outputs)
    }
}

/// Jitter every logit, keeping objectness strongly negative.
fn add_noise(output: &mut ArrayD<f32>, box_span: usize, rng: &mut StdRng) {
    for (channel, mut plane) in output.axis_iter_mut(Axis(1)).enumerate() {
        let objectness = channel % box_span == 4;
        for v in plane.iter_mut() {
            *v = if objectness {
                rng.gen_range(-6.0..-3.0)
            } else {
                rng.gen_range(-0.5..0.5)
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::decoder::{FeatureDecoder, DEFAULT_CONFIDENCE_THRESHOLD};
    use crate::event::Event;

    #[test]
    fn worker_completes_with_planted_object() {
        let pyramid = ScalePyramid::default();
        let scene = SyntheticScene {
            presence: 1.0,
            latency: Duration::ZERO,
            ..SyntheticScene::default()
        };
        let mut service = SyntheticInference::new(pyramid.clone(), scene, Some(7)).expect("service");
        let (tx, rx) = crossbeam_channel::unbounded();
        let frame = Arc::new(Frame::new(vec![0; 12], 4, 3).expect("frame"));
        service.submit(frame, Completer::new(3, tx, Event::inference_finished));

        let event = rx.recv_timeout(Duration::from_secs(5)).expect("completion");
        let outputs = match event {
            Event::InferenceFinished { cycle: 3, result } => result.expect("outputs"),
            other => panic!("unexpected event {:?}", other),
        };

        let decoder = FeatureDecoder::new(pyramid, DEFAULT_CONFIDENCE_THRESHOLD);
        let views = decoder.feature_views(&outputs).expect("views");
        let predictions = decoder.decode(&views);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].class_index, 0);
    }

    #[test]
    fn rejects_scene_outside_pyramid() {
        let scene = SyntheticScene {
            object: PlantedBox::strong(40, 0, 0, 0),
            ..SyntheticScene::default()
        };
        assert!(SyntheticInference::new(ScalePyramid::default(), scene, None).is_err());
    }
}
