//! Configuration parsing – reads a `KEY=VALUE` file shared by the capture
//! producer and the transfer bridge.
//!
//! Every key is optional; missing or unparsable values fall back to the
//! defaults in [`Config::default`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Application configuration, shared between the producer and the bridge.
///
/// Both processes load the same file; each ignores fields it does not need.
#[derive(Debug, Clone)]
pub struct Config {
    // ── capture store ────────────────────────────────────────────────
    /// Directory holding the sequence-indexed captures.
    pub capture_dir: PathBuf,
    /// Indexed files are named `<prefix>_<index>.<ext>`.
    pub capture_prefix: String,
    pub capture_ext: String,
    /// Stable alias paths.  The producer overwrites the first one; the
    /// bridge scans all of them.
    pub stable_aliases: Vec<PathBuf>,
    pub flag_path: PathBuf,
    /// Account that should own a freshly raised trigger flag so the
    /// producer (possibly running as another user) can delete it.
    pub flag_owner: Option<String>,
    pub min_valid_size: u64,

    // ── bridge ───────────────────────────────────────────────────────
    pub lock_path: PathBuf,
    pub listen_addr: String,
    pub capture_timeout: Duration,
    pub freshness_poll: Duration,
    pub stable_delay: Duration,
    pub stable_read_attempts: u32,
    pub client_timeout: Duration,
    pub error_backoff: Duration,
    pub trigger_signal: String,
    pub error_message: String,
    /// Advertise the bridge on mDNS.
    pub advertise: bool,

    // ── producer ─────────────────────────────────────────────────────
    pub producer_poll: Duration,
    /// Camera device; `stub://<name>` selects the synthetic camera.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,
    pub warmup_frames: u32,
    pub frame_timeout: Duration,
    pub jpeg_quality: u8,
    pub keyboard_trigger: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_dir: PathBuf::from("."),
            capture_prefix: "capture".into(),
            capture_ext: "png".into(),
            stable_aliases: vec![
                PathBuf::from("/tmp/capture_latest.png"),
                PathBuf::from("/tmp/capture.png"),
                PathBuf::from("/tmp/capture.jpg"),
            ],
            flag_path: PathBuf::from("/tmp/snap.flag"),
            flag_owner: None,
            min_valid_size: 1024,

            lock_path: PathBuf::from("/tmp/urbansight_bridge.lock"),
            listen_addr: "0.0.0.0:8095".into(),
            capture_timeout: Duration::from_millis(6000),
            freshness_poll: Duration::from_millis(150),
            stable_delay: Duration::from_millis(150),
            stable_read_attempts: 3,
            client_timeout: Duration::from_secs(60),
            error_backoff: Duration::from_millis(1000),
            trigger_signal: "TAKE_PICTURE_SIGNAL".into(),
            error_message: "ERROR: No image available.".into(),
            advertise: true,

            producer_poll: Duration::from_millis(20),
            camera_device: "/dev/video0".into(),
            camera_width: 640,
            camera_height: 480,
            camera_fps: 30,
            warmup_frames: 10,
            frame_timeout: Duration::from_millis(5000),
            jpeg_quality: 90,
            keyboard_trigger: true,
        }
    }
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/urbansight/urbansight.conf"
    }

    /// Glob pattern (relative to `capture_dir`) matching indexed captures.
    pub fn capture_glob(&self) -> String {
        format!("{}_*.{}", self.capture_prefix, self.capture_ext)
    }

    /// Load from an explicit path, or from [`Config::default_path`] when it
    /// exists, or fall back to built-in defaults.
    pub fn from_args(arg: Option<String>) -> Result<Self> {
        match arg {
            Some(path) => load(Path::new(&path)),
            None => {
                let path = Path::new(Self::default_path());
                if path.exists() {
                    load(path)
                } else {
                    info!("No config at {} – using defaults", path.display());
                    Ok(with_environment(Config::default()))
                }
            }
        }
    }
}

/// Parse a `KEY=VALUE` configuration file.
///
/// Lines starting with `#` are comments.  Values may be optionally
/// double-quoted.  Unknown keys are silently ignored.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;

    let config = with_environment(from_map(&parse_conf(&text)));
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Apply environment overrides that do not belong in the config file.
fn with_environment(mut config: Config) -> Config {
    if config.flag_owner.is_none() {
        config.flag_owner = std::env::var("SUDO_USER")
            .or_else(|_| std::env::var("USER"))
            .ok()
            .filter(|s| !s.is_empty());
    }
    if std::env::var("URBANSIGHT_DISABLE_MDNS").is_ok() {
        config.advertise = false;
    }
    config
}

fn from_map(map: &HashMap<String, String>) -> Config {
    let d = Config::default();

    let get = |key: &str| -> Option<String> { map.get(key).cloned() };
    let get_num = |key: &str, default: u64| -> u64 {
        get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    };
    let get_u32 = |key: &str, default: u32| -> u32 {
        get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    };
    let get_ms = |key: &str, default: Duration| -> Duration {
        get(key)
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    };
    let get_bool = |key: &str, default: bool| -> bool {
        get(key)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    };

    let stable_aliases = get("STABLE_ALIASES")
        .map(|s| {
            s.split(',')
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or(d.stable_aliases);

    Config {
        capture_dir: get("CAPTURE_DIR").map(PathBuf::from).unwrap_or(d.capture_dir),
        capture_prefix: get("CAPTURE_PREFIX")
            .filter(|s| !s.is_empty())
            .unwrap_or(d.capture_prefix),
        capture_ext: get("CAPTURE_EXT")
            .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or(d.capture_ext),
        stable_aliases,
        flag_path: get("FLAG_PATH").map(PathBuf::from).unwrap_or(d.flag_path),
        flag_owner: get("FLAG_OWNER").filter(|s| !s.is_empty()),
        min_valid_size: get_num("MIN_VALID_SIZE", d.min_valid_size),

        lock_path: get("LOCK_PATH").map(PathBuf::from).unwrap_or(d.lock_path),
        listen_addr: get("LISTEN_ADDR").unwrap_or(d.listen_addr),
        capture_timeout: get_ms("CAPTURE_TIMEOUT_MS", d.capture_timeout),
        freshness_poll: get_ms("FRESHNESS_POLL_MS", d.freshness_poll),
        stable_delay: get_ms("STABLE_DELAY_MS", d.stable_delay),
        stable_read_attempts: get_u32("STABLE_READ_ATTEMPTS", d.stable_read_attempts).max(1),
        client_timeout: get("CLIENT_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.client_timeout),
        error_backoff: get_ms("ERROR_BACKOFF_MS", d.error_backoff),
        trigger_signal: get("TRIGGER_SIGNAL")
            .filter(|s| !s.is_empty())
            .unwrap_or(d.trigger_signal),
        error_message: get("ERROR_MESSAGE").unwrap_or(d.error_message),
        advertise: get_bool("ADVERTISE", d.advertise),

        producer_poll: get_ms("PRODUCER_POLL_MS", d.producer_poll),
        camera_device: get("CAMERA_DEVICE")
            .filter(|s| !s.is_empty())
            .unwrap_or(d.camera_device),
        camera_width: get_u32("CAMERA_WIDTH", d.camera_width),
        camera_height: get_u32("CAMERA_HEIGHT", d.camera_height),
        camera_fps: get_u32("CAMERA_FPS", d.camera_fps),
        warmup_frames: get_u32("WARMUP_FRAMES", d.warmup_frames),
        frame_timeout: get_ms("FRAME_TIMEOUT_MS", d.frame_timeout),
        jpeg_quality: get("JPEG_QUALITY")
            .and_then(|v| v.parse::<u8>().ok())
            .map(|q| q.clamp(1, 100))
            .unwrap_or(d.jpeg_quality),
        keyboard_trigger: get_bool("KEYBOARD_TRIGGER", d.keyboard_trigger),
    }
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────
