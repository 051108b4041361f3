//! Field Locator - findet Felder in SDRangel Settings-Dokumenten
//!
//! Device- und Channel-Settings haben je nach Treiber/Channel-Typ eine
//! andere Struktur. Der Locator liefert einen [`FieldPath`] statt einer
//! Referenz, damit der Aufrufer das Dokument danach mutieren kann.

use std::fmt;

use serde_json::Value;

pub const CENTER_FREQUENCY_KEY: &str = "centerFrequency";
pub const INPUT_FREQUENCY_OFFSET_KEY: &str = "inputFrequencyOffset";

// ============================================================================
// FieldPath
// ============================================================================

/// Ein Segment eines Pfads durch ein JSON-Dokument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Geordnete Liste von Keys/Indizes vom Dokument-Root bis zum Feld.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(doc, |node, segment| match segment {
            PathSegment::Key(key) => node.as_object()?.get(key),
            PathSegment::Index(index) => node.as_array()?.get(*index),
        })
    }

    pub fn get_mut<'a>(&self, doc: &'a mut Value) -> Option<&'a mut Value> {
        self.segments.iter().try_fold(doc, |node, segment| match segment {
            PathSegment::Key(key) => node.as_object_mut()?.get_mut(key),
            PathSegment::Index(index) => node.as_array_mut()?.get_mut(*index),
        })
    }

    /// Setzt den Wert am Pfad.
    ///
    /// Der Container (alle Segmente bis auf das letzte) muss existieren.
    /// Fehlt nur das letzte Key-Segment, wird es eingefügt.
    /// Gibt `false` zurück, wenn der Pfad nicht anwendbar ist.
    pub fn set(&self, doc: &mut Value, value: Value) -> bool {
        let Some((last, parent)) = self.segments.split_last() else {
            *doc = value;
            return true;
        };

        let container = parent.iter().try_fold(doc, |node, segment| match segment {
            PathSegment::Key(key) => node.as_object_mut()?.get_mut(key),
            PathSegment::Index(index) => node.as_array_mut()?.get_mut(*index),
        });

        match (container, last) {
            (Some(Value::Object(map)), PathSegment::Key(key)) => {
                map.insert(key.clone(), value);
                true
            }
            (Some(Value::Array(items)), PathSegment::Index(index)) => match items.get_mut(*index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "$");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Center Frequency
// ============================================================================

/// Bekannte Device-Treiber und wo sie ihre Center-Frequenz ablegen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    LimeSdrInput,
    LimeSdrOutput,
    UsrpInput,
    UsrpOutput,
    HackRfInput,
    HackRfOutput,
    PlutoSdrInput,
    PlutoSdrOutput,
    RtlSdr,
    /// `centerFrequency` direkt im Root-Objekt
    TopLevel,
    /// Unbekannter Treiber, per Traversierung gefunden
    Discovered,
}

impl DriverKind {
    /// Known drivers in lookup order. `TopLevel` comes last.
    pub const KNOWN: [DriverKind; 10] = [
        DriverKind::LimeSdrInput,
        DriverKind::LimeSdrOutput,
        DriverKind::UsrpInput,
        DriverKind::UsrpOutput,
        DriverKind::HackRfInput,
        DriverKind::HackRfOutput,
        DriverKind::PlutoSdrInput,
        DriverKind::PlutoSdrOutput,
        DriverKind::RtlSdr,
        DriverKind::TopLevel,
    ];

    /// Name of the driver block holding the settings, `None` for root level.
    pub fn settings_key(self) -> Option<&'static str> {
        match self {
            DriverKind::LimeSdrInput => Some("limeSdrInputSettings"),
            DriverKind::LimeSdrOutput => Some("limeSdrOutputSettings"),
            DriverKind::UsrpInput => Some("usrpInputSettings"),
            DriverKind::UsrpOutput => Some("usrpOutputSettings"),
            DriverKind::HackRfInput => Some("hackRFInputSettings"),
            DriverKind::HackRfOutput => Some("hackRFOutputSettings"),
            DriverKind::PlutoSdrInput => Some("plutoSdrInputSettings"),
            DriverKind::PlutoSdrOutput => Some("plutoSdrOutputSettings"),
            DriverKind::RtlSdr => Some("rtlSdrSettings"),
            DriverKind::TopLevel | DriverKind::Discovered => None,
        }
    }
}

/// Fundstelle der Center-Frequenz in einem Device-Dokument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CenterFrequencyLocation {
    pub driver: DriverKind,
    pub path: FieldPath,
}

/// Sucht die Center-Frequenz in einem Device-Settings-Dokument.
///
/// Zuerst werden die bekannten Treiber-Pfade geprüft, danach wird das
/// gesamte Dokument nach einem Objekt mit `centerFrequency` durchsucht.
/// Die Reihenfolge der Traversierung ist bei mehreren Treffern nicht
/// festgelegt, wohlgeformte Dokumente enthalten nur einen.
pub fn find_center_frequency(doc: &Value) -> Option<CenterFrequencyLocation> {
    let root = doc.as_object()?;

    for driver in DriverKind::KNOWN {
        match driver.settings_key() {
            Some(block) => {
                let found = root
                    .get(block)
                    .and_then(Value::as_object)
                    .is_some_and(|settings| settings.contains_key(CENTER_FREQUENCY_KEY));
                if found {
                    return Some(CenterFrequencyLocation {
                        driver,
                        path: FieldPath::new().key(block).key(CENTER_FREQUENCY_KEY),
                    });
                }
            }
            None => {
                if root.contains_key(CENTER_FREQUENCY_KEY) {
                    return Some(CenterFrequencyLocation {
                        driver,
                        path: FieldPath::new().key(CENTER_FREQUENCY_KEY),
                    });
                }
            }
        }
    }

    discover_field(doc, CENTER_FREQUENCY_KEY).map(|path| CenterFrequencyLocation {
        driver: DriverKind::Discovered,
        path,
    })
}

/// Depth-first search for the first object that directly contains `field`.
///
/// Descends into object values and into objects inside arrays.
fn discover_field(doc: &Value, field: &str) -> Option<FieldPath> {
    let mut stack = vec![(doc, FieldPath::new())];

    while let Some((node, path)) = stack.pop() {
        let Value::Object(map) = node else {
            continue;
        };
        if map.contains_key(field) {
            return Some(path.key(field));
        }
        for (key, value) in map {
            match value {
                Value::Object(_) => stack.push((value, path.clone().key(key.as_str()))),
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        if item.is_object() {
                            stack.push((item, path.clone().key(key.as_str()).index(index)));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    None
}

// ============================================================================
// Channel Settings Block
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Demodulator,
    Modulator,
}

impl ChannelRole {
    /// Matches the lower-cased key against the role token.
    ///
    /// "mod" is a substring of "demod", so a modulator key must not contain "demod".
    fn matches(self, lower_key: &str) -> bool {
        match self {
            ChannelRole::Demodulator => lower_key.contains("demod"),
            ChannelRole::Modulator => lower_key.contains("mod") && !lower_key.contains("demod"),
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Demodulator => write!(f, "demodulator"),
            ChannelRole::Modulator => write!(f, "modulator"),
        }
    }
}

/// Wie gut ein gefundener Settings-Block zur Anfrage passt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchQuality {
    /// Irgendein `...Settings` Key, Rolle passt nicht
    Any,
    /// Rolle passt, Kind-Hint nicht (oder kein Hint angegeben)
    Role,
    /// Rolle und Kind-Hint passen
    Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsBlock {
    pub key: String,
    pub quality: MatchQuality,
}

impl SettingsBlock {
    pub fn path(&self) -> FieldPath {
        FieldPath::new().key(self.key.as_str())
    }

    pub fn field_path(&self, field: &str) -> FieldPath {
        self.path().key(field)
    }
}

/// Sucht den Settings-Block eines Channels für eine Rolle.
///
/// Top-Level Keys werden case-insensitive geprüft: sie müssen auf
/// "settings" enden und das Rollen-Token enthalten. Ein Treffer mit
/// `kind_hint` wird bevorzugt, sonst der erste Rollen-Treffer, sonst der
/// erste `...Settings` Key.
pub fn find_settings_block(
    doc: &Value,
    role: ChannelRole,
    kind_hint: Option<&str>,
) -> Option<SettingsBlock> {
    let root = doc.as_object()?;
    let hint = kind_hint.map(str::to_lowercase).filter(|h| !h.is_empty());

    let mut first_role_match: Option<&String> = None;
    let mut first_settings: Option<&String> = None;

    for key in root.keys() {
        let lower = key.to_lowercase();
        if !lower.ends_with("settings") {
            continue;
        }
        first_settings.get_or_insert(key);

        if !role.matches(&lower) {
            continue;
        }
        if let Some(hint) = &hint {
            if lower.contains(hint.as_str()) {
                return Some(SettingsBlock { key: key.clone(), quality: MatchQuality::Kind });
            }
        }
        first_role_match.get_or_insert(key);
    }

    first_role_match
        .map(|key| SettingsBlock { key: key.clone(), quality: MatchQuality::Role })
        .or_else(|| first_settings.map(|key| SettingsBlock { key: key.clone(), quality: MatchQuality::Any }))
}

/// Liest einen JSON-Wert als ganze Zahl (Hz).
///
/// Nicht-ganzzahlige Werte werden Richtung 0 abgeschnitten.
pub fn read_hz(value: &Value) -> Option<i64> {
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    if let Some(v) = value.as_u64() {
        return i64::try_from(v).ok();
    }
    value
        .as_f64()
        .filter(|v| v.is_finite() && *v >= i64::MIN as f64 && *v <= i64::MAX as f64)
        .map(|v| v.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========================================================================
    // Tests: find_center_frequency
    // ========================================================================

    #[test]
    fn test_center_frequency_in_driver_block() {
        let doc = json!({
            "deviceHwType": "LimeSDR",
            "direction": 0,
            "limeSdrInputSettings": {
                "centerFrequency": 145000000,
                "devSampleRate": 3200000
            }
        });

        let location = find_center_frequency(&doc).unwrap();
        assert_eq!(location.driver, DriverKind::LimeSdrInput);
        assert_eq!(location.path.to_string(), "limeSdrInputSettings.centerFrequency");
        assert_eq!(location.path.get(&doc), Some(&json!(145000000)));
    }

    #[test]
    fn test_center_frequency_each_known_driver() {
        for driver in DriverKind::KNOWN {
            let doc = match driver.settings_key() {
                Some(block) => {
                    let mut root = serde_json::Map::new();
                    root.insert(block.to_string(), json!({ "centerFrequency": 1 }));
                    Value::Object(root)
                }
                None => json!({ "centerFrequency": 1 }),
            };
            let location = find_center_frequency(&doc).unwrap();
            assert_eq!(location.driver, driver);
        }
    }

    #[test]
    fn test_center_frequency_top_level() {
        let doc = json!({ "centerFrequency": 433920000, "gain": 20 });

        let location = find_center_frequency(&doc).unwrap();
        assert_eq!(location.driver, DriverKind::TopLevel);
        assert_eq!(location.path, FieldPath::new().key("centerFrequency"));
    }

    #[test]
    fn test_center_frequency_driver_block_wins_over_top_level() {
        let doc = json!({
            "centerFrequency": 1,
            "usrpOutputSettings": { "centerFrequency": 2 }
        });

        let location = find_center_frequency(&doc).unwrap();
        assert_eq!(location.driver, DriverKind::UsrpOutput);
        assert_eq!(location.path.get(&doc), Some(&json!(2)));
    }

    #[test]
    fn test_center_frequency_driver_block_without_field_falls_through() {
        let doc = json!({
            "limeSdrInputSettings": { "gain": 10 },
            "centerFrequency": 7
        });

        let location = find_center_frequency(&doc).unwrap();
        assert_eq!(location.driver, DriverKind::TopLevel);
    }

    #[test]
    fn test_center_frequency_unknown_driver_discovered() {
        let doc = json!({
            "deviceHwType": "Airspy",
            "airspySettings": {
                "LOppmTenths": 0,
                "tuner": { "centerFrequency": 7100000 }
            }
        });

        let location = find_center_frequency(&doc).unwrap();
        assert_eq!(location.driver, DriverKind::Discovered);
        assert_eq!(location.path.to_string(), "airspySettings.tuner.centerFrequency");
        assert_eq!(location.path.get(&doc), Some(&json!(7100000)));
    }

    #[test]
    fn test_center_frequency_inside_array() {
        let doc = json!({
            "streams": [
                "ignored",
                { "gain": 3 },
                { "centerFrequency": 50313000 }
            ]
        });

        let location = find_center_frequency(&doc).unwrap();
        assert_eq!(location.path.to_string(), "streams[2].centerFrequency");
        assert_eq!(location.path.get(&doc), Some(&json!(50313000)));
    }

    #[test]
    fn test_center_frequency_not_found() {
        let doc = json!({
            "deviceHwType": "FileInput",
            "fileInputSettings": { "fileName": "x.sdriq", "loop": [1, 2, { "a": null }] }
        });
        assert_eq!(find_center_frequency(&doc), None);
    }

    #[test]
    fn test_center_frequency_non_object_documents() {
        assert_eq!(find_center_frequency(&json!(null)), None);
        assert_eq!(find_center_frequency(&json!([{ "centerFrequency": 1 }])), None);
        assert_eq!(find_center_frequency(&json!("centerFrequency")), None);
        assert_eq!(find_center_frequency(&json!({})), None);
    }

    // ========================================================================
    // Tests: find_settings_block
    // ========================================================================

    fn ssb_demod_channel() -> Value {
        json!({
            "channelType": "SSBDemod",
            "direction": 0,
            "SSBDemodSettings": { "inputFrequencyOffset": -1500, "volume": 1.0 }
        })
    }

    #[test]
    fn test_settings_block_demod_with_kind() {
        let block = find_settings_block(&ssb_demod_channel(), ChannelRole::Demodulator, Some("SSB")).unwrap();
        assert_eq!(block.key, "SSBDemodSettings");
        assert_eq!(block.quality, MatchQuality::Kind);
    }

    #[test]
    fn test_settings_block_kind_hint_is_case_insensitive() {
        let block = find_settings_block(&ssb_demod_channel(), ChannelRole::Demodulator, Some("ssb")).unwrap();
        assert_eq!(block.quality, MatchQuality::Kind);
    }

    #[test]
    fn test_settings_block_modulator_not_confused_with_demod() {
        let doc = json!({
            "SSBDemodSettings": { "inputFrequencyOffset": 1 },
            "SSBModSettings": { "inputFrequencyOffset": 2 }
        });

        let block = find_settings_block(&doc, ChannelRole::Modulator, None).unwrap();
        assert_eq!(block.key, "SSBModSettings");
        assert_eq!(block.quality, MatchQuality::Role);

        let block = find_settings_block(&doc, ChannelRole::Demodulator, None).unwrap();
        assert_eq!(block.key, "SSBDemodSettings");
    }

    #[test]
    fn test_settings_block_prefers_kind_over_first_role_match() {
        let doc = json!({
            "AMModSettings": {},
            "SSBModSettings": {}
        });

        let block = find_settings_block(&doc, ChannelRole::Modulator, Some("SSB")).unwrap();
        assert_eq!(block.key, "SSBModSettings");
        assert_eq!(block.quality, MatchQuality::Kind);
    }

    #[test]
    fn test_settings_block_falls_back_to_first_role_match() {
        let doc = json!({
            "channelType": "NFMMod",
            "NFMModSettings": { "inputFrequencyOffset": 0 }
        });

        let block = find_settings_block(&doc, ChannelRole::Modulator, Some("SSB")).unwrap();
        assert_eq!(block.key, "NFMModSettings");
        assert_eq!(block.quality, MatchQuality::Role);
    }

    #[test]
    fn test_settings_block_falls_back_to_any_settings() {
        let doc = json!({
            "channelType": "SSBMod",
            "SSBModSettings": { "inputFrequencyOffset": 0 }
        });

        let block = find_settings_block(&doc, ChannelRole::Demodulator, Some("SSB")).unwrap();
        assert_eq!(block.key, "SSBModSettings");
        assert_eq!(block.quality, MatchQuality::Any);
    }

    #[test]
    fn test_settings_block_not_found() {
        let doc = json!({ "channelType": "SSBDemod", "settingsVersion": 3 });
        assert_eq!(find_settings_block(&doc, ChannelRole::Demodulator, Some("SSB")), None);
        assert_eq!(find_settings_block(&json!([]), ChannelRole::Modulator, None), None);
    }

    #[test]
    fn test_settings_block_empty_hint_ignored() {
        let block = find_settings_block(&ssb_demod_channel(), ChannelRole::Demodulator, Some("")).unwrap();
        assert_eq!(block.quality, MatchQuality::Role);
    }

    // ========================================================================
    // Tests: FieldPath / read_hz
    // ========================================================================

    #[test]
    fn test_field_path_set_replaces_and_inserts() {
        let mut doc = json!({ "SSBModSettings": { "inputFrequencyOffset": 0, "toneFrequency": 1000 } });
        let path = FieldPath::new().key("SSBModSettings").key("inputFrequencyOffset");

        assert!(path.set(&mut doc, json!(-1000)));
        assert_eq!(doc, json!({ "SSBModSettings": { "inputFrequencyOffset": -1000, "toneFrequency": 1000 } }));

        let missing = FieldPath::new().key("SSBModSettings").key("volume");
        assert!(missing.set(&mut doc, json!(2.0)));
        assert_eq!(missing.get(&doc), Some(&json!(2.0)));

        let no_container = FieldPath::new().key("nope").key("inputFrequencyOffset");
        assert!(!no_container.set(&mut doc, json!(1)));
    }

    #[test]
    fn test_field_path_display() {
        assert_eq!(FieldPath::new().to_string(), "$");
        assert_eq!(FieldPath::new().key("a").index(0).key("b").to_string(), "a[0].b");
    }

    #[test]
    fn test_read_hz() {
        assert_eq!(read_hz(&json!(-1500)), Some(-1500));
        assert_eq!(read_hz(&json!(145000000u64)), Some(145000000));
        assert_eq!(read_hz(&json!(100.9)), Some(100));
        assert_eq!(read_hz(&json!(-100.9)), Some(-100));
        assert_eq!(read_hz(&json!(u64::MAX)), None);
        assert_eq!(read_hz(&json!("100")), None);
        assert_eq!(read_hz(&json!(null)), None);
    }
}
