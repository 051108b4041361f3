//! Reconcile - Pure Functions für den Soll/Ist-Vergleich
//!
//! Keine Side Effects, kein Netzwerk. Der Controller holt die Dokumente,
//! diese Funktionen entscheiden ob und was zurückgeschrieben wird.

use serde_json::Value;

use crate::locator::{read_hz, FieldPath};

/// Offset der auf den Tx-Modulator angewendet werden soll.
pub fn desired_tx_offset(rx_offset: i64, offset_hz: i64) -> i64 {
    rx_offset.saturating_add(offset_hz)
}

/// Ergebnis des Vergleichs eines Felds mit seinem Soll-Wert.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Feld hat bereits den Soll-Wert, nichts schreiben
    InSync,
    /// Vollständiges Dokument mit genau einem geänderten Feld
    Patch {
        document: Value,
        previous: Option<i64>,
    },
    /// Der Container des Felds existiert nicht
    Unreachable,
}

/// Vergleicht das Feld am `path` mit `desired`.
///
/// Bei Abweichung wird das gesamte Dokument kopiert und nur dieses eine
/// Feld ersetzt, weil die API immer das komplette Settings-Objekt erwartet.
/// Ein fehlendes Feld gilt als abweichend und wird eingefügt.
pub fn plan_field_update(doc: &Value, path: &FieldPath, desired: i64) -> FieldUpdate {
    let previous = path.get(doc).and_then(read_hz);
    if previous == Some(desired) {
        return FieldUpdate::InSync;
    }

    let mut document = doc.clone();
    if !path.set(&mut document, Value::from(desired)) {
        return FieldUpdate::Unreachable;
    }

    FieldUpdate::Patch { document, previous }
}
