use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use rxtx_config::{ChannelRef, DeviceRef, SyncConfig};

pub mod controller;
pub mod locator;
pub mod reconcile;

pub use controller::{IterationReport, SyncController, SyncStats};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Connection to {url} failed: {message}")]
    ConnectionFailure { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    RemoteFault { url: String, status: u16, body: String },

    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Unexpected settings: {0}")]
    SchemaMismatch(String),

    #[error("Failed to set up HTTP client: {0}")]
    Client(String),
}

impl SyncError {
    /// Fehler auf HTTP-Ebene (im Gegensatz zu unerwarteten Settings)
    pub fn is_http(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailure { .. }
                | SyncError::RemoteFault { .. }
                | SyncError::InvalidResponse { .. }
        )
    }

    fn connection(url: &str, error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            "request timed out".to_string()
        } else {
            describe_error(&error)
        };
        SyncError::ConnectionFailure { url: url.to_string(), message }
    }
}

/// Message plus source chain, reqwest hides the interesting part in the sources.
fn describe_error(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

// ============================================================================
// ControllerBackend Trait - abstrahiert die SDRangel REST API für Tests
// ============================================================================

/// Eine Settings-Resource der SDRangel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsResource {
    Device { device_set: u32 },
    Channel { device_set: u32, channel: u32 },
}

impl SettingsResource {
    pub fn device(device: DeviceRef) -> Self {
        SettingsResource::Device { device_set: device.device_set }
    }

    pub fn device_of(channel: ChannelRef) -> Self {
        SettingsResource::Device { device_set: channel.device_set }
    }

    pub fn channel(channel: ChannelRef) -> Self {
        SettingsResource::Channel {
            device_set: channel.device_set,
            channel: channel.channel,
        }
    }

    /// Pfad relativ zur API-Basis.
    pub fn path(&self) -> String {
        match self {
            SettingsResource::Device { device_set } => {
                format!("deviceset/{device_set}/device/settings")
            }
            SettingsResource::Channel { device_set, channel } => {
                format!("deviceset/{device_set}/channel/{channel}/settings")
            }
        }
    }
}

impl fmt::Display for SettingsResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsResource::Device { device_set } => write!(f, "device set {device_set}"),
            SettingsResource::Channel { device_set, channel } => {
                write!(f, "device set {device_set} channel {channel}")
            }
        }
    }
}

/// Trait für Zugriffe auf den SDR-Controller.
/// Ermöglicht Mocking für Tests.
#[async_trait]
pub trait ControllerBackend: Send + Sync {
    /// Liest das komplette Settings-Dokument
    async fn fetch(&self, resource: SettingsResource) -> Result<Value, SyncError>;

    /// Schreibt das komplette Settings-Dokument zurück
    async fn patch(&self, resource: SettingsResource, settings: &Value) -> Result<(), SyncError>;
}

// ============================================================================
// HttpController - Echte SDRangel REST API
// ============================================================================

pub struct HttpController {
    client: reqwest::Client,
    base_url: String,
}

impl HttpController {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Client(describe_error(&e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::new(config.base_url(), config.request_timeout_duration())
    }

    pub fn url(&self, resource: SettingsResource) -> String {
        format!("{}/{}", self.base_url, resource.path())
    }

    async fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Failed to read error body from {url}: {}", describe_error(&e));
                format!("<body unreadable: {}>", describe_error(&e))
            }
        };
        Err(SyncError::RemoteFault {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ControllerBackend for HttpController {
    async fn fetch(&self, resource: SettingsResource) -> Result<Value, SyncError> {
        let url = self.url(resource);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::connection(&url, e))?;
        let response = Self::check_status(&url, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::connection(&url, e))?;

        serde_json::from_str(&body).map_err(|e| SyncError::InvalidResponse {
            url,
            message: e.to_string(),
        })
    }

    async fn patch(&self, resource: SettingsResource, settings: &Value) -> Result<(), SyncError> {
        let url = self.url(resource);
        let response = self
            .client
            .patch(&url)
            .json(settings)
            .send()
            .await
            .map_err(|e| SyncError::connection(&url, e))?;
        Self::check_status(&url, response).await?;
        Ok(())
    }
}

// ============================================================================
// SyncUI Trait - abstrahiert Ausgabe für Headless und Tests
// ============================================================================

/// Trait für UI-Interaktionen während des Sync-Loops.
pub trait SyncUI {
    /// Wird einmal vor dem ersten Durchlauf aufgerufen
    fn on_start(&mut self, config: &SyncConfig);

    /// Wird nach jedem erfolgreichen Durchlauf aufgerufen
    fn on_iteration(&mut self, report: &IterationReport);

    /// Wird bei Fehlern aufgerufen, bevor `retry_in` gewartet wird
    fn on_error(&mut self, error: &SyncError, retry_in: Duration);

    /// Wird aufgerufen wenn der Loop durch Abbruch endet
    fn on_stop(&mut self);

    /// Prüft ob der Benutzer abbrechen möchte
    fn check_quit(&mut self) -> bool {
        false
    }
}

/// Headless UI: Log-Zeilen über `log`, verbose Reports auf stdout.
pub struct HeadlessUI {
    verbose: bool,
}

impl HeadlessUI {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SyncUI for HeadlessUI {
    fn on_start(&mut self, config: &SyncConfig) {
        log::info!(
            "Mirroring {} demodulator offset to {} modulator (offset {} Hz), aligning device set {} to device set {} via {}",
            SettingsResource::channel(config.reference_rx),
            SettingsResource::channel(config.tx),
            config.offset_hz,
            config.align_rx.device_set,
            config.reference_rx.device_set,
            config.base_url(),
        );
    }

    fn on_iteration(&mut self, report: &IterationReport) {
        if self.verbose {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
            for line in report.lines(&ts) {
                println!("{line}");
            }
        } else if report.tx_written || report.align_written {
            log::debug!("{report:?}");
        }
    }

    fn on_error(&mut self, error: &SyncError, retry_in: Duration) {
        if error.is_http() {
            log::warn!("HTTP error: {error} (retrying in {:.1}s)", retry_in.as_secs_f64());
        } else {
            log::warn!("Sync error: {error} (retrying in {:.1}s)", retry_in.as_secs_f64());
        }
    }

    fn on_stop(&mut self) {
        log::info!("Stopped by user");
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Startet den Sync-Loop gegen die echte REST API.
///
/// Endet wenn `shutdown` fertig wird, im `once`-Modus nach einem Durchlauf.
pub async fn run_sync<F>(config: SyncConfig, shutdown: F) -> Result<SyncStats, SyncError>
where
    F: Future<Output = ()>,
{
    let backend = Arc::new(HttpController::from_config(&config)?);
    let ui = HeadlessUI::new(config.verbose);
    let mut controller = SyncController::new(backend, config, ui);
    controller.run(shutdown).await
}

// ============================================================================
// Test Utilities - exportiert für Integrationstests
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Mock UI für Tests - zeichnet alle Events auf
    #[derive(Default)]
    pub struct MockUI {
        pub events: Vec<String>,
        pub reports: Vec<IterationReport>,
        pub quit_after: Option<usize>,
        pub quit_checks: usize,
    }

    impl MockUI {
        pub fn new() -> Self {
            Self::default()
        }

        /// Konfiguriert die UI so dass nach N Durchläufen abgebrochen wird
        pub fn quit_after(mut self, iterations: usize) -> Self {
            self.quit_after = Some(iterations);
            self
        }

        pub fn errors(&self) -> Vec<&String> {
            self.events.iter().filter(|e| e.starts_with("error:")).collect()
        }
    }

    impl SyncUI for MockUI {
        fn on_start(&mut self, _config: &SyncConfig) {
            self.events.push("start".to_string());
        }
        fn on_iteration(&mut self, report: &IterationReport) {
            self.events.push(format!(
                "iteration:{}:{}:{}:{}",
                report.rx_offset, report.applied_shift, report.tx_written, report.align_written
            ));
            self.reports.push(report.clone());
        }
        fn on_error(&mut self, error: &SyncError, retry_in: Duration) {
            let kind = match error {
                SyncError::ConnectionFailure { .. } => "connection",
                SyncError::RemoteFault { .. } => "remote",
                SyncError::InvalidResponse { .. } => "invalid",
                SyncError::SchemaMismatch(_) => "schema",
                SyncError::Client(_) => "client",
            };
            self.events.push(format!("error:{}:{}", kind, retry_in.as_secs()));
        }
        fn on_stop(&mut self) {
            self.events.push("stop".to_string());
        }
        fn check_quit(&mut self) -> bool {
            let quit = self.quit_after.is_some_and(|n| self.quit_checks >= n);
            self.quit_checks += 1;
            quit
        }
    }

    /// Mock SDR-Controller für Tests
    #[derive(Default)]
    pub struct MockController {
        documents: Mutex<HashMap<SettingsResource, Value>>,
        fetch_calls: Mutex<Vec<(SettingsResource, Instant)>>,
        patch_calls: Mutex<Vec<(SettingsResource, Value)>>,
        failures: Mutex<Vec<(SettingsResource, SyncError)>>,
    }

    impl MockController {
        pub fn new() -> Self {
            Self::default()
        }

        /// Legt ein Settings-Dokument im Mock ab
        pub fn set_document(&self, resource: SettingsResource, document: Value) {
            self.documents.lock().unwrap().insert(resource, document);
        }

        pub fn document(&self, resource: SettingsResource) -> Option<Value> {
            self.documents.lock().unwrap().get(&resource).cloned()
        }

        /// Der nächste fetch dieser Resource schlägt mit `error` fehl
        pub fn fail_next_fetch(&self, resource: SettingsResource, error: SyncError) {
            self.failures.lock().unwrap().push((resource, error));
        }

        pub fn fetched(&self) -> Vec<SettingsResource> {
            self.fetch_calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
        }

        /// Zeitpunkte aller fetches dieser Resource
        pub fn fetch_times(&self, resource: SettingsResource) -> Vec<Instant> {
            self.fetch_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| *r == resource)
                .map(|(_, t)| *t)
                .collect()
        }

        pub fn patches(&self) -> Vec<(SettingsResource, Value)> {
            self.patch_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControllerBackend for MockController {
        async fn fetch(&self, resource: SettingsResource) -> Result<Value, SyncError> {
            self.fetch_calls.lock().unwrap().push((resource, Instant::now()));

            let mut failures = self.failures.lock().unwrap();
            if let Some(pos) = failures.iter().position(|(r, _)| *r == resource) {
                return Err(failures.remove(pos).1);
            }
            drop(failures);

            self.documents
                .lock()
                .unwrap()
                .get(&resource)
                .cloned()
                .ok_or_else(|| SyncError::RemoteFault {
                    url: resource.path(),
                    status: 404,
                    body: "{\"message\":\"not found\"}".to_string(),
                })
        }

        async fn patch(&self, resource: SettingsResource, settings: &Value) -> Result<(), SyncError> {
            self.patch_calls.lock().unwrap().push((resource, settings.clone()));
            // PATCH ersetzt das komplette Dokument
            self.documents.lock().unwrap().insert(resource, settings.clone());
            Ok(())
        }
    }

    /// Erstellt einen Connection-Fehler wie ihn der HttpController liefert
    pub fn connection_refused(resource: SettingsResource) -> SyncError {
        SyncError::ConnectionFailure {
            url: resource.path(),
            message: "Connection refused (os error 111)".to_string(),
        }
    }

    pub fn ssb_demod_channel(offset: i64) -> Value {
        json!({
            "channelType": "SSBDemod",
            "direction": 0,
            "originatorDeviceSetIndex": 0,
            "originatorChannelIndex": 0,
            "SSBDemodSettings": {
                "inputFrequencyOffset": offset,
                "filterIndex": 0,
                "volume": 1.0,
                "agc": 1,
                "rgbColor": -16711936,
                "title": "SSB Demodulator",
                "streamIndex": 0
            }
        })
    }

    pub fn ssb_mod_channel(offset: i64) -> Value {
        json!({
            "channelType": "SSBMod",
            "direction": 1,
            "originatorDeviceSetIndex": 1,
            "originatorChannelIndex": 0,
            "SSBModSettings": {
                "inputFrequencyOffset": offset,
                "bandwidth": 3000.0,
                "lowCutoff": 300.0,
                "usbNotLsb": 1,
                "toneFrequency": 1000.0,
                "volumeFactor": 1.0,
                "title": "SSB Modulator",
                "cwKeyer": { "text": "CQ DE S51BW", "loop": 0, "wpm": 13 }
            }
        })
    }

    pub fn lime_input_device(center: i64) -> Value {
        json!({
            "deviceHwType": "LimeSDR",
            "direction": 0,
            "limeSdrInputSettings": {
                "centerFrequency": center,
                "devSampleRate": 3200000,
                "log2HardDecim": 3,
                "lpfBW": 4500000,
                "gain": 50,
                "antennaPath": 1,
                "reverseAPIAddress": "127.0.0.1"
            }
        })
    }

    pub fn usrp_input_device(center: i64) -> Value {
        json!({
            "deviceHwType": "USRP",
            "direction": 0,
            "usrpInputSettings": {
                "centerFrequency": center,
                "devSampleRate": 1000000,
                "loOffset": 0,
                "gain": 40,
                "antennaPath": "TX/RX"
            }
        })
    }

    /// Legt Standard-Dokumente für alle vier Resourcen der Config ab
    pub fn seed_documents(
        backend: &MockController,
        config: &SyncConfig,
        rx_offset: i64,
        rx_center: i64,
        tx_offset: i64,
        align_center: i64,
    ) {
        backend.set_document(SettingsResource::channel(config.reference_rx), ssb_demod_channel(rx_offset));
        backend.set_document(SettingsResource::device_of(config.reference_rx), lime_input_device(rx_center));
        backend.set_document(SettingsResource::channel(config.tx), ssb_mod_channel(tx_offset));
        backend.set_document(SettingsResource::device(config.align_rx), usrp_input_device(align_center));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_paths() {
        let device = SettingsResource::Device { device_set: 1 };
        let channel = SettingsResource::Channel { device_set: 0, channel: 2 };

        assert_eq!(device.path(), "deviceset/1/device/settings");
        assert_eq!(channel.path(), "deviceset/0/channel/2/settings");
        assert_eq!(device.to_string(), "device set 1");
        assert_eq!(channel.to_string(), "device set 0 channel 2");
    }

    #[test]
    fn test_resources_from_config() {
        let config = SyncConfig::default();

        assert_eq!(
            SettingsResource::channel(config.reference_rx),
            SettingsResource::Channel { device_set: 0, channel: 0 }
        );
        assert_eq!(
            SettingsResource::device_of(config.reference_rx),
            SettingsResource::Device { device_set: 0 }
        );
        assert_eq!(SettingsResource::device(config.align_rx), SettingsResource::Device { device_set: 1 });
        assert_eq!(
            SettingsResource::channel(config.tx),
            SettingsResource::Channel { device_set: 1, channel: 0 }
        );
    }

    #[test]
    fn test_http_controller_urls() {
        let controller = HttpController::new("http://localhost:8091/sdrangel/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            controller.url(SettingsResource::Channel { device_set: 1, channel: 0 }),
            "http://localhost:8091/sdrangel/deviceset/1/channel/0/settings"
        );

        let config = SyncConfig {
            host: "sdr.local".to_string(),
            port: 8888,
            ..SyncConfig::default()
        };
        let controller = HttpController::from_config(&config).unwrap();
        assert_eq!(
            controller.url(SettingsResource::Device { device_set: 0 }),
            "http://sdr.local:8888/sdrangel/deviceset/0/device/settings"
        );
    }

    #[test]
    fn test_error_classification() {
        let connection = SyncError::ConnectionFailure { url: "u".into(), message: "m".into() };
        let remote = SyncError::RemoteFault { url: "u".into(), status: 500, body: "b".into() };
        let schema = SyncError::SchemaMismatch("x".into());

        assert!(connection.is_http());
        assert!(remote.is_http());
        assert!(!schema.is_http());
        assert_eq!(remote.to_string(), "u returned HTTP 500: b");
    }
}
