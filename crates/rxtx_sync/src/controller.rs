//! SyncController - Haupt-Controller für den Sync-Loop
//!
//! Ein Durchlauf ("mirror and align"):
//! 1. Rx-Demodulator Offset lesen
//! 2. Center-Frequenz des Referenz-Devices lesen
//! 3. Tx-Modulator Offset auf Rx-Offset + fixen Offset setzen (nur bei Änderung)
//! 4. Center-Frequenz des zweiten Rx-Devices angleichen (nur bei Änderung)
//!
//! Fehler werden nur hier im Loop behandelt, ein Durchlauf bricht beim
//! ersten Fehler ab und der nächste gleicht wieder vollständig ab.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::time::sleep;

use crate::locator::{
    find_center_frequency, find_settings_block, read_hz, ChannelRole, FieldPath, MatchQuality,
    INPUT_FREQUENCY_OFFSET_KEY,
};
use crate::reconcile::{desired_tx_offset, plan_field_update, FieldUpdate};
use crate::{ControllerBackend, SettingsResource, SyncConfig, SyncError, SyncUI};

/// Beobachteter und angewendeter Zustand eines Durchlaufs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    /// Offset des Rx-Demodulators in Hz
    pub rx_offset: i64,
    /// Konfigurierter fixer Offset in Hz
    pub offset_hz: i64,
    /// Soll-Offset des Tx-Modulators
    pub applied_shift: i64,
    /// Center-Frequenz des Referenz-Devices in Hz
    pub reference_center: i64,
    pub tx_written: bool,
    pub align_written: bool,
}

impl IterationReport {
    /// Menschenlesbare Zeilen mit Zeitstempel-Präfix
    pub fn lines(&self, timestamp: &str) -> Vec<String> {
        let mut lines = vec![format!(
            "[{timestamp}] Rx shift={} Hz | offset={} Hz | applied={} Hz | reference center={} Hz",
            self.rx_offset, self.offset_hz, self.applied_shift, self.reference_center
        )];
        if self.tx_written {
            lines.push(format!("[{timestamp}] Applied shift to Tx modulator"));
        }
        if self.align_written {
            lines.push(format!("[{timestamp}] Aligned Rx center frequency to reference"));
        }
        lines
    }
}

/// Zähler über alle Durchläufe eines `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Erfolgreiche Durchläufe
    pub iterations: u64,
    /// Fehlgeschlagene Durchläufe
    pub failures: u64,
    pub tx_writes: u64,
    pub align_writes: u64,
}

impl SyncStats {
    fn record(&mut self, report: &IterationReport) {
        self.iterations += 1;
        self.tx_writes += u64::from(report.tx_written);
        self.align_writes += u64::from(report.align_written);
    }
}

/// Der Sync-Controller führt den Read-Compare-Write Loop aus.
pub struct SyncController<B: ControllerBackend, U: SyncUI> {
    backend: Arc<B>,
    config: SyncConfig,
    ui: U,
}

impl<B: ControllerBackend, U: SyncUI> SyncController<B, U> {
    pub fn new(backend: Arc<B>, config: SyncConfig, ui: U) -> Self {
        Self { backend, config, ui }
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// Führt den Loop aus bis `shutdown` fertig wird oder die UI abbricht.
    ///
    /// Im `once`-Modus genau ein Durchlauf, Fehler werden dann zurückgegeben.
    /// Sonst ist kein Fehler fatal: er wird gemeldet und nach
    /// `reconnect_delay` erneut versucht.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<SyncStats, SyncError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stats = SyncStats::default();
        self.ui.on_start(&self.config);

        if self.config.once {
            let outcome = tokio::select! {
                _ = &mut shutdown => None,
                result = self.sync_once() => Some(result),
            };
            match outcome {
                Some(result) => {
                    let report = result?;
                    stats.record(&report);
                    self.ui.on_iteration(&report);
                }
                None => self.ui.on_stop(),
            }
            return Ok(stats);
        }

        loop {
            if self.ui.check_quit() {
                break;
            }

            let outcome = tokio::select! {
                _ = &mut shutdown => None,
                result = self.sync_once() => Some(result),
            };
            let Some(result) = outcome else {
                break;
            };

            let pause = match result {
                Ok(report) => {
                    stats.record(&report);
                    self.ui.on_iteration(&report);
                    self.config.delay_duration()
                }
                Err(error) => {
                    stats.failures += 1;
                    let backoff = self.config.reconnect_duration();
                    self.ui.on_error(&error, backoff);
                    backoff
                }
            };

            let stopped = tokio::select! {
                _ = &mut shutdown => true,
                _ = sleep(pause) => false,
            };
            if stopped {
                break;
            }
        }

        self.ui.on_stop();
        Ok(stats)
    }

    /// Ein kompletter Durchlauf, bis zu acht Requests nacheinander.
    pub async fn sync_once(&self) -> Result<IterationReport, SyncError> {
        let rx_offset = self.read_rx_offset().await?;
        let reference_center = self.read_reference_center().await?;

        let applied_shift = desired_tx_offset(rx_offset, self.config.offset_hz);

        let tx_written = self.apply_tx_offset(applied_shift).await?;
        let align_written = self.align_center_frequency(reference_center).await?;

        Ok(IterationReport {
            rx_offset,
            offset_hz: self.config.offset_hz,
            applied_shift,
            reference_center,
            tx_written,
            align_written,
        })
    }

    async fn read_rx_offset(&self) -> Result<i64, SyncError> {
        let resource = SettingsResource::channel(self.config.reference_rx);
        let doc = self.backend.fetch(resource).await?;
        let path = self.channel_offset_path(&doc, ChannelRole::Demodulator, resource)?;

        path.get(&doc).and_then(read_hz).ok_or_else(|| {
            SyncError::SchemaMismatch(format!(
                "Rx channel in {resource} has no numeric {path}"
            ))
        })
    }

    async fn read_reference_center(&self) -> Result<i64, SyncError> {
        let resource = SettingsResource::device_of(self.config.reference_rx);
        let doc = self.backend.fetch(resource).await?;
        let location = find_center_frequency(&doc).ok_or_else(|| {
            SyncError::SchemaMismatch(format!("Cannot find centerFrequency in device settings for {resource}"))
        })?;

        location.path.get(&doc).and_then(read_hz).ok_or_else(|| {
            SyncError::SchemaMismatch(format!(
                "centerFrequency at {} in {resource} is not a number",
                location.path
            ))
        })
    }

    /// Gibt zurück ob geschrieben wurde.
    async fn apply_tx_offset(&self, applied_shift: i64) -> Result<bool, SyncError> {
        let resource = SettingsResource::channel(self.config.tx);
        let doc = self.backend.fetch(resource).await?;
        let path = self.channel_offset_path(&doc, ChannelRole::Modulator, resource)?;

        self.write_if_changed(resource, &doc, &path, applied_shift).await
    }

    /// Gibt zurück ob geschrieben wurde.
    async fn align_center_frequency(&self, reference_center: i64) -> Result<bool, SyncError> {
        let resource = SettingsResource::device(self.config.align_rx);
        let doc = self.backend.fetch(resource).await?;
        let location = find_center_frequency(&doc).ok_or_else(|| {
            SyncError::SchemaMismatch(format!("Cannot find centerFrequency in device settings for {resource}"))
        })?;

        self.write_if_changed(resource, &doc, &location.path, reference_center).await
    }

    async fn write_if_changed(
        &self,
        resource: SettingsResource,
        doc: &Value,
        path: &FieldPath,
        desired: i64,
    ) -> Result<bool, SyncError> {
        match plan_field_update(doc, path, desired) {
            FieldUpdate::InSync => Ok(false),
            FieldUpdate::Patch { document, previous } => {
                log::debug!("{resource}: {path} {previous:?} -> {desired}");
                self.backend.patch(resource, &document).await?;
                Ok(true)
            }
            FieldUpdate::Unreachable => Err(SyncError::SchemaMismatch(format!(
                "{path} in {resource} is not writable"
            ))),
        }
    }

    /// Pfad zu `inputFrequencyOffset` im Settings-Block der erwarteten Rolle.
    ///
    /// Mit Kind-Hint muss der Block auch den Kind enthalten (z.B. SSB).
    fn channel_offset_path(
        &self,
        doc: &Value,
        role: ChannelRole,
        resource: SettingsResource,
    ) -> Result<FieldPath, SyncError> {
        let hint = Some(self.config.kind_hint.as_str()).filter(|h| !h.is_empty());
        let required = if hint.is_some() { MatchQuality::Kind } else { MatchQuality::Role };

        match find_settings_block(doc, role, hint) {
            Some(block) if block.quality >= required => Ok(block.field_path(INPUT_FREQUENCY_OFFSET_KEY)),
            _ => Err(SyncError::SchemaMismatch(match hint {
                Some(kind) => format!("Channel in {resource} is not an {kind} {role}"),
                None => format!("Channel in {resource} is not a {role}"),
            })),
        }
    }
}
