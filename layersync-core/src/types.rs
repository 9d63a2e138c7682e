//! Domain types shared by the sender, the receiver and the host runtime.
//!
//! Everything that crosses the wire to the remote stream store or lands in a
//! persisted session file is serializable via serde (camelCase on the wire).

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator used inside layer names to encode a nested layer path.
pub const LAYER_PATH_SEPARATOR: &str = "::";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Identifier of a stream on the remote store.
    StreamId
);
string_newtype!(
    /// Document-local identity of a native object.
    ObjectId
);
string_newtype!(
    /// Identifier the remote store assigned to an uploaded object.
    RemoteId
);
string_newtype!(
    /// Hex content digest of a portable object.
    ContentHash
);
string_newtype!(
    /// Identifier of one client instance (sender or receiver) on the remote store.
    ClientId
);

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`, `RRGGBB` or the short `#RGB` form.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if !digits.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match digits.len() {
            6 => Some(Self {
                r: channel(&digits[0..2])?,
                g: channel(&digits[2..4])?,
                b: channel(&digits[4..6])?,
            }),
            3 => {
                let expand = |i: usize| channel(&digits[i..i + 1]).map(|v| v * 17);
                Some(Self {
                    r: expand(0)?,
                    g: expand(1)?,
                    b: expand(2)?,
                })
            }
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Color::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex color '{raw}'")))
    }
}

/// Layer color as carried on the wire: a hex string plus alpha.
///
/// Kept as a raw string so a malformed color coming from another client does
/// not reject the whole stream; use [`LayerColor::resolve`] to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerColor {
    pub hex: String,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

fn default_alpha() -> f32 {
    1.0
}

impl LayerColor {
    pub fn from_color(color: Color) -> Self {
        Self {
            hex: color.to_hex(),
            alpha: 1.0,
        }
    }

    pub fn resolve(&self) -> Option<Color> {
        Color::from_hex(&self.hex)
    }
}

// ---------------------------------------------------------------------------
// Stream payloads
// ---------------------------------------------------------------------------

/// One layer of a stream: a named, colored, contiguous range of the stream's
/// flat object list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    /// Full layer path; nested layers are joined with [`LAYER_PATH_SEPARATOR`].
    pub name: String,
    pub guid: String,
    pub start_index: usize,
    pub object_count: usize,
    pub order_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<LayerColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
}

impl LayerDescriptor {
    /// Index range `[start_index, start_index + object_count)`.
    pub fn range(&self) -> Range<usize> {
        self.start_index..self.start_index + self.object_count
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    /// Path segments of the layer name, outermost first.
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.name.split(LAYER_PATH_SEPARATOR)
    }

    /// Parsed layer color, or `fallback` when missing or malformed.
    pub fn resolved_color(&self, fallback: Color) -> Color {
        self.color
            .as_ref()
            .and_then(LayerColor::resolve)
            .unwrap_or(fallback)
    }
}

/// Marker `type` of a placeholder object.
pub const PLACEHOLDER_TYPE: &str = "Placeholder";

/// Converted, hash-addressable representation of a document object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl PortableObject {
    pub fn new(object_type: impl Into<String>, body: Value) -> Self {
        Self {
            object_type: object_type.into(),
            hash: None,
            application_id: None,
            remote_id: None,
            body,
        }
    }

    /// Lightweight stand-in for an object the remote store already holds.
    pub fn placeholder(
        hash: Option<ContentHash>,
        remote_id: RemoteId,
        application_id: Option<String>,
    ) -> Self {
        Self {
            object_type: PLACEHOLDER_TYPE.to_string(),
            hash,
            application_id,
            remote_id: Some(remote_id),
            body: Value::Null,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.object_type == PLACEHOLDER_TYPE
    }
}

/// Reference from a stream's flat object list to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub remote_id: RemoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

/// Free-form stream properties (units, tolerances).
pub type BaseProperties = BTreeMap<String, Value>;

/// A stream's metadata: name, layers and the ordered object list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub stream_id: StreamId,
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
    #[serde(default)]
    pub objects: Vec<ObjectRef>,
    #[serde(default)]
    pub base_properties: BaseProperties,
}

impl StreamSnapshot {
    pub fn new(stream_id: StreamId, name: impl Into<String>) -> Self {
        Self {
            stream_id,
            name: name.into(),
            layers: Vec::new(),
            objects: Vec::new(),
            base_properties: BaseProperties::new(),
        }
    }

    /// Layer whose range holds the object at `index`.
    pub fn layer_for_index(&self, index: usize) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|layer| layer.contains(index))
    }

    pub fn layer_by_guid(&self, guid: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|layer| layer.guid == guid)
    }

    /// Name of the document layer a bake nests this stream under.
    pub fn root_layer_name(&self) -> String {
        format!("{} | {}", self.name, self.stream_id)
    }
}

// ---------------------------------------------------------------------------
// Client state
// ---------------------------------------------------------------------------

/// Which half of the protocol a client runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Sender,
    Receiver,
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRole::Sender => write!(f, "sender"),
            ClientRole::Receiver => write!(f, "receiver"),
        }
    }
}

/// Per-stream sender state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    #[default]
    Idle,
    Sending,
    SendingWithPendingRetrigger,
}

/// Reconnectable handle to a client registered on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHandle {
    pub client_id: ClientId,
    pub stream_id: StreamId,
    pub role: ClientRole,
    pub server_url: String,
}

/// Persistable client state: the handle plus the two UI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    pub client: ClientHandle,
    #[serde(default)]
    pub paused: bool,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn layer(name: &str, start: usize, count: usize) -> LayerDescriptor {
        LayerDescriptor {
            name: name.to_string(),
            guid: format!("guid-{name}"),
            start_index: start,
            object_count: count,
            order_index: 0,
            color: None,
            topology: None,
        }
    }

    #[test]
    fn newtype_display() {
        assert_eq!(StreamId::from("s1").to_string(), "s1");
        assert_eq!(RemoteId::from(String::from("r1")).as_str(), "r1");
    }

    #[rstest]
    #[case("#AEECFD", Some(Color::rgb(0xAE, 0xEC, 0xFD)))]
    #[case("aeecfd", Some(Color::rgb(0xAE, 0xEC, 0xFD)))]
    #[case("#fff", Some(Color::rgb(255, 255, 255)))]
    #[case("#12345", None)]
    #[case("#GG0000", None)]
    #[case("", None)]
    fn color_from_hex(#[case] input: &str, #[case] expected: Option<Color>) {
        assert_eq!(Color::from_hex(input), expected);
    }

    #[test]
    fn color_serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::rgb(1, 2, 255)).unwrap();
        assert_eq!(json, "\"#0102FF\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::rgb(1, 2, 255));
    }

    #[test]
    fn descriptor_range_and_lookup() {
        let mut snapshot = StreamSnapshot::new(StreamId::from("s"), "demo");
        snapshot.layers = vec![layer("A", 0, 3), layer("B", 3, 2)];

        assert_eq!(snapshot.layer_for_index(0).map(|l| l.name.as_str()), Some("A"));
        assert_eq!(snapshot.layer_for_index(2).map(|l| l.name.as_str()), Some("A"));
        assert_eq!(snapshot.layer_for_index(3).map(|l| l.name.as_str()), Some("B"));
        assert!(snapshot.layer_for_index(5).is_none());
        assert_eq!(snapshot.root_layer_name(), "demo | s");
    }

    #[test]
    fn malformed_layer_color_falls_back() {
        let mut descriptor = layer("A", 0, 1);
        descriptor.color = Some(LayerColor {
            hex: "not-a-color".to_string(),
            alpha: 1.0,
        });
        assert_eq!(descriptor.resolved_color(Color::BLACK), Color::BLACK);

        descriptor.color = Some(LayerColor::from_color(Color::rgb(10, 20, 30)));
        assert_eq!(descriptor.resolved_color(Color::BLACK), Color::rgb(10, 20, 30));
    }

    #[test]
    fn nested_layer_segments() {
        let descriptor = layer("Site::Walls::Interior", 0, 1);
        let segments: Vec<_> = descriptor.path_segments().collect();
        assert_eq!(segments, ["Site", "Walls", "Interior"]);
    }

    #[test]
    fn placeholder_omits_body_on_the_wire() {
        let placeholder = PortableObject::placeholder(
            Some(ContentHash::from("abc")),
            RemoteId::from("r-1"),
            Some("app-1".to_string()),
        );
        assert!(placeholder.is_placeholder());
        let json = serde_json::to_value(&placeholder).unwrap();
        assert_eq!(json["type"], "Placeholder");
        assert_eq!(json["remoteId"], "r-1");
        assert!(json.get("body").is_none());
    }

    #[test]
    fn client_snapshot_defaults_visible() {
        let raw = r#"{"client":{"clientId":"c","streamId":"s","role":"receiver","serverUrl":"http://x"},"paused":true}"#;
        let snapshot: ClientSnapshot = serde_json::from_str(raw).unwrap();
        assert!(snapshot.paused);
        assert!(snapshot.visible);
        assert_eq!(snapshot.client.role, ClientRole::Receiver);
    }
}
