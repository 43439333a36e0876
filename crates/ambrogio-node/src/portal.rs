//! File-backed configuration portal
//!
//! Watches the configuration file the node was started with. The first
//! maintenance call reports the network as connected; after that, a save
//! that produces a valid configuration raises `ConfigurationSaved` so the
//! bridge restarts with the new settings. Saves that do not parse are
//! logged and otherwise ignored.

use ambrogio_bridge::{BridgeConfig, ConfigPortal, DeviceConfig, PortalEvent};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// How often the file's modification time is checked
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration portal backed by the configuration file
pub struct FilePortal {
    path: PathBuf,
    settings: DeviceConfig,
    modified: Option<SystemTime>,
    last_check: Option<Instant>,
    check_interval: Duration,
    announced: bool,
}

impl FilePortal {
    /// Watch `path`, starting from the settings it was loaded with
    pub fn new(path: impl AsRef<Path>, settings: DeviceConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        let modified = modified_time(&path);
        Self {
            path,
            settings,
            modified,
            last_check: None,
            check_interval: CHECK_INTERVAL,
            announced: false,
        }
    }

    /// Override the check interval
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Whether the file changed since the last look
    async fn check_for_save(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_check {
            if now.duration_since(last) < self.check_interval {
                return false;
            }
        }
        self.last_check = Some(now);

        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .ok();
        if modified.is_none() || modified == self.modified {
            return false;
        }
        self.modified = modified;

        match BridgeConfig::load(&self.path) {
            Ok(config) => {
                info!("Configuration file saved: {}", self.path.display());
                self.settings = config.device;
                true
            }
            Err(e) => {
                warn!("Ignoring unusable configuration in {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[async_trait]
impl ConfigPortal for FilePortal {
    async fn maintain(&mut self) -> Vec<PortalEvent> {
        let mut events = Vec::new();
        if !self.announced {
            debug!("Host network assumed up");
            self.announced = true;
            events.push(PortalEvent::NetworkConnected);
        }
        if self.check_for_save().await {
            events.push(PortalEvent::ConfigurationSaved);
        }
        events
    }

    fn is_online(&self) -> bool {
        true
    }

    fn device_settings(&self) -> DeviceConfig {
        self.settings.clone()
    }
}
