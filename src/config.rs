//! Settings: defaults, the persisted settings file and command-line overrides.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, StreamerError};

/// Directory (below the user config dir) holding the settings file.
const CONFIG_DIR_NAME: &str = "DesktopStreamer";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub const DEFAULT_PORT: u16 = 1312;
pub const DEFAULT_FRAMERATE: u32 = 25;

/// Capture or output size, `WIDTHxHEIGHT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for Resolution {
    type Err = StreamerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StreamerError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once('x').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl From<Resolution> for String {
    fn from(res: Resolution) -> Self {
        res.to_string()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

pub fn parse_resolution(s: &str) -> Result<Resolution> {
    s.parse()
}

pub fn parse_port(s: &str) -> Result<u16> {
    match s.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(StreamerError::InvalidPort(s.to_string())),
    }
}

pub fn parse_framerate(s: &str) -> Result<u32> {
    match s.trim().parse::<u32>() {
        Ok(fps) if fps > 0 => Ok(fps),
        _ => Err(StreamerError::InvalidFramerate(s.to_string())),
    }
}

/// Fully resolved settings. Everything needed to build both command lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Capture audio.
    pub audio: bool,
    /// Capture video.
    pub video: bool,
    /// Capture area.
    pub res_in: Resolution,
    /// Transcode to this output resolution.
    pub res_out: Resolution,
    /// Frame rate (fps).
    pub framerate: u32,
    /// Serve the stream on this port on all interfaces.
    pub port: u16,
    /// ALSA input handed to the capture tool.
    pub audio_source: String,
    /// X11 display and screen to grab.
    pub display: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            res_in: Resolution::new(1920, 1080),
            res_out: Resolution::new(1280, 720),
            framerate: DEFAULT_FRAMERATE,
            port: DEFAULT_PORT,
            audio_source: "pulse".to_string(),
            display: ":0.0".to_string(),
        }
    }
}

/// A partial set of settings. Both the settings file and the command line
/// produce one of these; unset keys leave the lower layer alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub audio: Option<bool>,
    pub video: Option<bool>,
    pub res_in: Option<Resolution>,
    pub res_out: Option<Resolution>,
    pub framerate: Option<u32>,
    pub port: Option<u16>,
    pub audio_source: Option<String>,
    pub display: Option<String>,
}

impl Settings {
    /// Resolve settings with priority: overrides > settings file > defaults.
    ///
    /// The settings file is only consulted when `settings_file` is set. A file
    /// that can't be read is skipped with a warning; one that can be read but
    /// holds invalid values is an error.
    pub fn resolve(settings_file: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(path) = settings_file {
            if let Some(stored) = load_overrides(path)? {
                info!("loaded settings from {}", path.display());
                settings.apply(&stored);
            }
        }

        settings.apply(overrides);
        settings.validate()?;
        debug!("resolved settings: {:?}", settings);
        Ok(settings)
    }

    /// Overwrite every key that `overrides` sets.
    pub fn apply(&mut self, overrides: &SettingsOverrides) {
        if let Some(audio) = overrides.audio {
            self.audio = audio;
        }
        if let Some(video) = overrides.video {
            self.video = video;
        }
        if let Some(res_in) = overrides.res_in {
            self.res_in = res_in;
        }
        if let Some(res_out) = overrides.res_out {
            self.res_out = res_out;
        }
        if let Some(framerate) = overrides.framerate {
            self.framerate = framerate;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(ref source) = overrides.audio_source {
            self.audio_source = source.clone();
        }
        if let Some(ref display) = overrides.display {
            self.display = display.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.audio && !self.video {
            return Err(StreamerError::NothingToCapture);
        }
        if self.framerate == 0 {
            return Err(StreamerError::InvalidFramerate(self.framerate.to_string()));
        }
        if self.port == 0 {
            return Err(StreamerError::InvalidPort(self.port.to_string()));
        }
        Ok(())
    }

    /// Write the settings as JSON to `path`, replacing any previous content.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("saved settings to {}", path.display());
        Ok(())
    }
}

/// `~/.config/DesktopStreamer/settings.json` on Linux.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(SETTINGS_FILE_NAME)
}

/// Read the settings file at `path`.
///
/// Returns `Ok(None)` (after a warning) if the file can't be read.
pub fn load_overrides(path: &Path) -> Result<Option<SettingsOverrides>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("can't load settings from '{}': {}", path.display(), e);
            return Ok(None);
        }
    };

    let malformed = |reason: String| StreamerError::MalformedSettings {
        path: path.display().to_string(),
        reason,
    };
    let file: SettingsFile = serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))?;
    file.into_overrides().map(Some)
}

/// On-disk layout. Numbers may also be stored as strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    audio: Option<bool>,
    video: Option<bool>,
    #[serde(alias = "res-in")]
    res_in: Option<String>,
    #[serde(alias = "res-out")]
    res_out: Option<String>,
    framerate: Option<Scalar>,
    port: Option<Scalar>,
    #[serde(alias = "audio-source")]
    audio_source: Option<String>,
    display: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }
}

impl SettingsFile {
    fn into_overrides(self) -> Result<SettingsOverrides> {
        Ok(SettingsOverrides {
            audio: self.audio,
            video: self.video,
            res_in: self.res_in.as_deref().map(parse_resolution).transpose()?,
            res_out: self.res_out.as_deref().map(parse_resolution).transpose()?,
            framerate: self
                .framerate
                .map(|v| parse_framerate(&v.as_text()))
                .transpose()?,
            port: self.port.map(|v| parse_port(&v.as_text())).transpose()?,
            audio_source: self.audio_source,
            display: self.display,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_settings(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("settings.json");
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(None, &SettingsOverrides::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.res_in, Resolution::new(1920, 1080));
        assert_eq!(settings.res_out, Resolution::new(1280, 720));
        assert_eq!(settings.framerate, 25);
        assert_eq!(settings.port, 1312);
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1024x768").unwrap(), Resolution::new(1024, 768));
        assert_eq!(parse_resolution(" 800 x 600 ").unwrap(), Resolution::new(800, 600));

        for bad in ["abcx123", "1920", "1920x", "x1080", "0x100", "1920x1080x3", "-1x10"] {
            assert!(
                matches!(parse_resolution(bad), Err(StreamerError::InvalidResolution(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_parse_port_and_framerate() {
        assert_eq!(parse_port("420").unwrap(), 420);
        assert!(matches!(parse_port("0"), Err(StreamerError::InvalidPort(_))));
        assert!(matches!(parse_port("70000"), Err(StreamerError::InvalidPort(_))));
        assert!(matches!(parse_port("http"), Err(StreamerError::InvalidPort(_))));

        assert_eq!(parse_framerate("30").unwrap(), 30);
        assert!(matches!(parse_framerate("0"), Err(StreamerError::InvalidFramerate(_))));
        assert!(matches!(parse_framerate("2.5"), Err(StreamerError::InvalidFramerate(_))));
    }

    #[test]
    fn test_precedence_cli_over_file_over_default() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(
            &dir,
            r#"{"res_in": "1600x900", "port": 420, "framerate": "30", "display": ":1.0"}"#,
        );

        let overrides = SettingsOverrides {
            port: Some(8080),
            res_out: Some(Resolution::new(640, 360)),
            ..Default::default()
        };
        let settings = Settings::resolve(Some(&path), &overrides).unwrap();

        // explicit
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.res_out, Resolution::new(640, 360));
        // file
        assert_eq!(settings.res_in, Resolution::new(1600, 900));
        assert_eq!(settings.framerate, 30);
        assert_eq!(settings.display, ":1.0");
        // default
        assert!(settings.audio);
        assert!(settings.video);
        assert_eq!(settings.audio_source, "pulse");
    }

    #[test]
    fn test_file_ignored_without_load() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, r#"{"port": 420}"#);

        let settings = Settings::resolve(None, &SettingsOverrides::default()).unwrap();
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("DesktopStreamer").join("settings.json");

        let saved = Settings {
            audio: false,
            video: true,
            res_in: Resolution::new(2560, 1440),
            res_out: Resolution::new(1920, 1080),
            framerate: 60,
            port: 9000,
            audio_source: "hw:1".to_string(),
            display: ":1.0".to_string(),
        };
        saved.save(&path).unwrap();

        let loaded = Settings::resolve(Some(&path), &SettingsOverrides::default()).unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_save_overwrites_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, r#"{"port": 420, "framerate": 5, "extra": true}"#);

        Settings::default().save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("extra"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["port"], 1312);
        assert_eq!(value["res_in"], "1920x1080");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("does-not-exist.json");

        let settings = Settings::resolve(Some(&path), &SettingsOverrides::default()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_invalid_values_in_file_are_rejected() {
        let dir = TempDir::new().unwrap();

        let path = write_settings(&dir, r#"{"res_in": "abcx123"}"#);
        let err = Settings::resolve(Some(&path), &SettingsOverrides::default()).unwrap_err();
        assert!(matches!(err, StreamerError::InvalidResolution(_)));

        let path = write_settings(&dir, r#"{"port": "http"}"#);
        let err = Settings::resolve(Some(&path), &SettingsOverrides::default()).unwrap_err();
        assert!(matches!(err, StreamerError::InvalidPort(_)));

        let path = write_settings(&dir, "{ not json");
        let err = Settings::resolve(Some(&path), &SettingsOverrides::default()).unwrap_err();
        assert!(matches!(err, StreamerError::MalformedSettings { .. }));
    }

    #[test]
    fn test_dashed_keys_accepted() {
        let dir = TempDir::new().unwrap();
        let path = write_settings(&dir, r#"{"res-in": "1280x1024", "audio-source": "hw:0"}"#);

        let settings = Settings::resolve(Some(&path), &SettingsOverrides::default()).unwrap();
        assert_eq!(settings.res_in, Resolution::new(1280, 1024));
        assert_eq!(settings.audio_source, "hw:0");
    }

    #[test]
    fn test_nothing_to_capture() {
        let overrides = SettingsOverrides {
            audio: Some(false),
            video: Some(false),
            ..Default::default()
        };
        let err = Settings::resolve(None, &overrides).unwrap_err();
        assert!(matches!(err, StreamerError::NothingToCapture));
    }

    #[test]
    fn test_default_settings_path() {
        let path = default_settings_path();
        assert!(path.ends_with("DesktopStreamer/settings.json"));
    }
}
