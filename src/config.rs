use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{
    FeatureDecoder, NonMaxSuppressor, ScaleConfig, ScalePyramid, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_MAX_BOXES, DEFAULT_NUM_CLASSES, DEFAULT_OVERLAP_THRESHOLD,
};
use crate::geometry::{ModelViewport, MODEL_INPUT_SIZE};
use crate::region::{RegionMatcher, RegionQuery, DEFAULT_MATCH_THRESHOLD};
use crate::tracking::{DEFAULT_LOSS_TIMEOUT, DEFAULT_REFERENCE_WIDTH};

const DEFAULT_TICK_MS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    detection: Option<DetectionConfigFile>,
    matching: Option<MatchingConfigFile>,
    tracking: Option<TrackingConfigFile>,
    scheduler: Option<SchedulerConfigFile>,
    region_query: Option<RegionQuery>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    max_boxes: Option<usize>,
    num_classes: Option<usize>,
    active_scales: Option<usize>,
    scales: Option<Vec<ScaleConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct MatchingConfigFile {
    threshold: Option<f32>,
    model_input_size: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    loss_timeout_ms: Option<u64>,
    reference_width_m: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SchedulerConfigFile {
    tick_ms: Option<u64>,
}

/// Every tunable of the pipeline, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pyramid: ScalePyramid,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub max_boxes: usize,
    pub match_threshold: f32,
    pub model_input_size: f32,
    pub loss_timeout: Duration,
    /// Physical width given to every reference image, in metres.
    pub reference_width: f32,
    pub tick_interval: Duration,
    pub region_query: RegionQuery,
    pub labels: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pyramid: ScalePyramid::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_OVERLAP_THRESHOLD,
            max_boxes: DEFAULT_MAX_BOXES,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            model_input_size: MODEL_INPUT_SIZE,
            loss_timeout: DEFAULT_LOSS_TIMEOUT,
            reference_width: DEFAULT_REFERENCE_WIDTH,
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            region_query: RegionQuery::default(),
            labels: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the file named by `SCENE_CONFIG`, then environment
    /// overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`PipelineConfig::load`], but an explicit `path` takes
    /// precedence over `SCENE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SCENE_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        let file_cfg = match (path, env_path.as_deref()) {
            (Some(path), _) => Some(read_config_file(path)?),
            (None, Some(path)) => Some(read_config_file(Path::new(path))?),
            (None, None) => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let detection = file.detection.unwrap_or_default();
        let matching = file.matching.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let scheduler = file.scheduler.unwrap_or_default();

        let mut pyramid = match (detection.scales, detection.num_classes) {
            (Some(scales), Some(num_classes))
                if scales.iter().any(|s| s.num_classes != num_classes) =>
            {
                return Err(anyhow!(
                    "detection.num_classes = {} disagrees with the configured scales",
                    num_classes
                ));
            }
            (Some(scales), _) => ScalePyramid {
                active: scales.len().min(defaults.pyramid.active),
                scales,
            },
            (None, Some(num_classes)) => ScalePyramid::yolov3_416(num_classes),
            (None, None) => ScalePyramid::yolov3_416(DEFAULT_NUM_CLASSES),
        };
        if let Some(active) = detection.active_scales {
            pyramid.active = active;
        }

        Ok(Self {
            pyramid,
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            nms_threshold: detection.nms_threshold.unwrap_or(defaults.nms_threshold),
            max_boxes: detection.max_boxes.unwrap_or(defaults.max_boxes),
            match_threshold: matching.threshold.unwrap_or(defaults.match_threshold),
            model_input_size: matching
                .model_input_size
                .unwrap_or(defaults.model_input_size),
            loss_timeout: tracking
                .loss_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.loss_timeout),
            reference_width: tracking
                .reference_width_m
                .unwrap_or(defaults.reference_width),
            tick_interval: scheduler
                .tick_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            region_query: file.region_query.unwrap_or(defaults.region_query),
            labels: file.labels,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_value("SCENE_CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = v;
        }
        if let Some(v) = env_value("SCENE_NMS_THRESHOLD")? {
            self.nms_threshold = v;
        }
        if let Some(v) = env_value("SCENE_MATCH_THRESHOLD")? {
            self.match_threshold = v;
        }
        if let Some(v) = env_value("SCENE_MAX_BOXES")? {
            self.max_boxes = v;
        }
        if let Some(ms) = env_value("SCENE_LOSS_TIMEOUT_MS")? {
            self.loss_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value("SCENE_TICK_MS")? {
            self.tick_interval = Duration::from_millis(ms);
        }
        if let Ok(labels) = std::env::var("SCENE_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.labels = Some(parsed);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence threshold", self.confidence_threshold),
            ("nms threshold", self.nms_threshold),
            ("match threshold", self.match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.max_boxes == 0 {
            return Err(anyhow!("max boxes must be at least 1"));
        }
        if self.loss_timeout.is_zero() {
            return Err(anyhow!("loss timeout must be greater than zero"));
        }
        if self.tick_interval.is_zero() {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        if self.model_input_size.is_nan() || self.model_input_size <= 0.0 {
            return Err(anyhow!("model input size must be positive"));
        }
        if self.reference_width.is_nan() || self.reference_width <= 0.0 {
            return Err(anyhow!("reference width must be positive"));
        }
        self.pyramid.validate().context("invalid scale pyramid")?;
        if let Some(labels) = &self.labels {
            let num_classes = self.pyramid.num_classes();
            if labels.len() != num_classes {
                return Err(anyhow!(
                    "{} labels configured for {} classes",
                    labels.len(),
                    num_classes
                ));
            }
        }
        Ok(())
    }

    /// Display label for a class index, `class_<index>` when unlabeled.
    pub fn label_for(&self, class_index: usize) -> String {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(class_index))
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_index))
    }

    pub fn decoder(&self) -> FeatureDecoder {
        FeatureDecoder::new(self.pyramid.clone(), self.confidence_threshold)
    }

    pub fn suppressor(&self) -> NonMaxSuppressor {
        NonMaxSuppressor::new(self.max_boxes, self.nms_threshold)
    }

    pub fn matcher(&self) -> RegionMatcher {
        RegionMatcher::new(ModelViewport::new(self.model_input_size), self.match_threshold)
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
