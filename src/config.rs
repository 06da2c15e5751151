use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actions::{ActionConfig, EntityKeying, FallRule, ViolenceRule};
use crate::alert::TwilioCredentials;
use crate::detect::{DetectorConfig, DetectorKind};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::SourceConfig;
use crate::pipeline::{AnalyzerSettings, PipelineConfig};

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SNAPSHOT_DIR: &str = "events";
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_MAX_WIDTH: u32 = 1024;
const DEFAULT_QUEUE_DEPTH: usize = 2;
const DEFAULT_TRACK_MIN_IOU: f32 = 0.3;
const DEFAULT_TRACK_MAX_MISSED: u32 = 15;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SentryConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    video: Option<VideoConfigFile>,
    alerts: Option<AlertsConfigFile>,
    intruder: Option<IntruderConfigFile>,
    fall: Option<FallConfigFile>,
    violence: Option<ViolenceConfigFile>,
    tracking: Option<TrackingConfigFile>,
    broadcast: Option<BroadcastConfigFile>,
    api: Option<ApiConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    hog_weights_path: Option<PathBuf>,
    hog_hit_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    draw: Option<bool>,
    max_width: Option<u32>,
    jpeg_quality: Option<u8>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_sec: Option<u64>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct IntruderConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct FallConfigFile {
    enabled: Option<bool>,
    aspect_ratio: Option<f32>,
    min_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ViolenceConfigFile {
    enabled: Option<bool>,
    proximity_iou: Option<f32>,
    motion_mag: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    mode: Option<String>,
    min_iou: Option<f32>,
    max_missed_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BroadcastConfigFile {
    queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    twilio_account_sid: Option<String>,
    twilio_auth_token: Option<String>,
    twilio_from: Option<String>,
    alert_to: Option<String>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub video: VideoSettings,
    pub alerts: AlertSettings,
    pub actions: ActionConfig,
    pub queue_depth: usize,
    pub api_addr: String,
    pub notify: TwilioCredentials,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub draw: bool,
    pub max_width: u32,
    pub jpeg_quality: u8,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub snapshot_dir: PathBuf,
    pub intruder_enabled: bool,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self::assemble(SentryConfigFile::default(), EntityKeying::default())
    }
}

impl SentryConfig {
    /// Defaults, then the file named by `SENTRY_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit file instead of `SENTRY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentryConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(mut file: SentryConfigFile) -> Result<Self> {
        let keying = parse_keying(file.tracking.take().unwrap_or_default())?;
        Ok(Self::assemble(file, keying))
    }

    fn assemble(file: SentryConfigFile, keying: EntityKeying) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let detector_defaults = DetectorConfig::default();
        let det = file.detector.unwrap_or_default();
        let detector = DetectorConfig {
            kind: det.kind.unwrap_or(detector_defaults.kind),
            model_path: det.model_path.unwrap_or(detector_defaults.model_path),
            labels_path: det.labels_path.or(detector_defaults.labels_path),
            input_size: det.input_size.unwrap_or(detector_defaults.input_size),
            confidence_threshold: det
                .confidence_threshold
                .unwrap_or(detector_defaults.confidence_threshold),
            iou_threshold: det.iou_threshold.unwrap_or(detector_defaults.iou_threshold),
            hog_weights_path: det.hog_weights_path.or(detector_defaults.hog_weights_path),
            hog_hit_threshold: det
                .hog_hit_threshold
                .unwrap_or(detector_defaults.hog_hit_threshold),
        };

        let video_file = file.video.unwrap_or_default();
        let video = VideoSettings {
            draw: video_file.draw.unwrap_or(true),
            max_width: video_file.max_width.unwrap_or(DEFAULT_MAX_WIDTH),
            jpeg_quality: video_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            font_path: video_file.font_path,
        };

        let alerts_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            cooldown: Duration::from_secs(alerts_file.cooldown_sec.unwrap_or(DEFAULT_COOLDOWN_SECS)),
            snapshot_dir: alerts_file
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            intruder_enabled: file
                .intruder
                .and_then(|intruder| intruder.enabled)
                .unwrap_or(true),
        };

        let fall_defaults = FallRule::default();
        let fall_file = file.fall.unwrap_or_default();
        let violence_defaults = ViolenceRule::default();
        let violence_file = file.violence.unwrap_or_default();
        let actions = ActionConfig {
            fall: FallRule {
                enabled: fall_file.enabled.unwrap_or(fall_defaults.enabled),
                aspect_ratio_threshold: fall_file
                    .aspect_ratio
                    .unwrap_or(fall_defaults.aspect_ratio_threshold),
                min_consecutive_frames: fall_file
                    .min_frames
                    .unwrap_or(fall_defaults.min_consecutive_frames),
            },
            violence: ViolenceRule {
                enabled: violence_file.enabled.unwrap_or(violence_defaults.enabled),
                proximity_iou_threshold: violence_file
                    .proximity_iou
                    .unwrap_or(violence_defaults.proximity_iou_threshold),
                motion_magnitude_threshold: violence_file
                    .motion_mag
                    .unwrap_or(violence_defaults.motion_magnitude_threshold),
            },
            keying,
        };

        let notify_file = file.notify.unwrap_or_default();
        let notify = TwilioCredentials {
            account_sid: notify_file.twilio_account_sid,
            auth_token: notify_file.twilio_auth_token,
            from: notify_file.twilio_from,
            to: notify_file.alert_to,
        };

        Self {
            source,
            detector,
            video,
            alerts,
            actions,
            queue_depth: file
                .broadcast
                .and_then(|broadcast| broadcast.queue_depth)
                .unwrap_or(DEFAULT_QUEUE_DEPTH),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            notify,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("SOURCE") {
            self.source.url = url;
        }
        if let Some(kind) = env_value("DETECTOR") {
            self.detector.kind = kind
                .parse()
                .map_err(|e| anyhow!("DETECTOR: {}", e))?;
        }
        if let Some(addr) = env_value("SENTRY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = env_value("SENTRY_SNAPSHOT_DIR") {
            self.alerts.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(cooldown) = env_value("SENTRY_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("SENTRY_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Some(sid) = env_value("TWILIO_ACCOUNT_SID") {
            self.notify.account_sid = Some(sid);
        }
        if let Some(token) = env_value("TWILIO_AUTH_TOKEN") {
            self.notify.auth_token = Some(token);
        }
        if let Some(from) = env_value("TWILIO_FROM") {
            self.notify.from = Some(from);
        }
        if let Some(to) = env_value("ALERT_TO") {
            self.notify.to = Some(to);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.video.max_width == 0 {
            return Err(anyhow!("video.max_width must be greater than zero"));
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(anyhow!("video.jpeg_quality must be within 1..=100"));
        }
        if self.actions.fall.min_consecutive_frames == 0 {
            return Err(anyhow!("fall.min_frames must be at least 1"));
        }
        if self.actions.fall.aspect_ratio_threshold <= 0.0 {
            return Err(anyhow!("fall.aspect_ratio must be positive"));
        }
        check_unit("violence.proximity_iou", self.actions.violence.proximity_iou_threshold)?;
        if self.actions.violence.motion_magnitude_threshold < 0.0 {
            return Err(anyhow!("violence.motion_mag must not be negative"));
        }
        if let EntityKeying::Tracked { min_iou, .. } = self.actions.keying {
            check_unit("tracking.min_iou", min_iou)?;
        }
        check_unit("detector.confidence_threshold", self.detector.confidence_threshold)?;
        check_unit("detector.iou_threshold", self.detector.iou_threshold)?;
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        if self.queue_depth == 0 {
            return Err(anyhow!("broadcast.queue_depth must be at least 1"));
        }
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source.url must not be empty"));
        }
        Ok(())
    }

    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            draw: self.video.draw,
            max_width: self.video.max_width,
            intruder_alerts: self.alerts.intruder_enabled,
            jpeg_quality: self.video.jpeg_quality,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue_depth: self.queue_depth,
            ..PipelineConfig::default()
        }
    }
}

fn parse_keying(file: TrackingConfigFile) -> Result<EntityKeying> {
    match file.mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("positional") => Ok(EntityKeying::Positional),
        Some("tracked") => Ok(EntityKeying::Tracked {
            min_iou: file.min_iou.unwrap_or(DEFAULT_TRACK_MIN_IOU),
            max_missed_frames: file.max_missed_frames.unwrap_or(DEFAULT_TRACK_MAX_MISSED),
        }),
        Some(other) => Err(anyhow!(
            "tracking.mode '{}' unknown; expected positional or tracked",
            other
        )),
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1]", name));
    }
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let cfg = SentryConfig::default();
        assert_eq!(cfg.alerts.cooldown, Duration::from_secs(60));
        assert!(cfg.video.draw);
        assert_eq!(cfg.video.max_width, 1024);
        assert_eq!(cfg.actions.fall.aspect_ratio_threshold, 1.2);
        assert_eq!(cfg.actions.fall.min_consecutive_frames, 8);
        assert_eq!(cfg.actions.violence.proximity_iou_threshold, 0.2);
        assert_eq!(cfg.actions.violence.motion_magnitude_threshold, 2.5);
        assert!(cfg.alerts.intruder_enabled);
        assert_eq!(cfg.alerts.snapshot_dir, PathBuf::from("events"));
        assert_eq!(cfg.api_addr, "127.0.0.1:5000");
        assert_eq!(cfg.source.url, "0");
        assert_eq!(cfg.detector.kind, DetectorKind::Learned);
        assert_eq!(cfg.actions.keying, EntityKeying::Positional);
        cfg.validate().unwrap();
    }

    #[test]
    fn tracking_mode_parses() {
        let keying = parse_keying(TrackingConfigFile {
            mode: Some("Tracked".into()),
            min_iou: Some(0.5),
            max_missed_frames: None,
        })
        .unwrap();
        assert_eq!(
            keying,
            EntityKeying::Tracked {
                min_iou: 0.5,
                max_missed_frames: DEFAULT_TRACK_MAX_MISSED
            }
        );
        assert!(parse_keying(TrackingConfigFile {
            mode: Some("sorted".into()),
            ..TrackingConfigFile::default()
        })
        .is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = SentryConfig::default();
        cfg.actions.fall.min_consecutive_frames = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.actions.violence.proximity_iou_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.queue_depth = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.video.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentryConfig::default();
        cfg.alerts.cooldown = Duration::ZERO;
        assert!(cfg.validate().is_ok());
    }
}
