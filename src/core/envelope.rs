//! The JSON envelope exchanged on every WebSocket text frame
//!
//! Every message on the wire is a JSON object with a small metadata envelope
//! around an application payload:
//!
//! ```json
//! {
//!   "id":   "00001765102456123456",
//!   "kind": "event",
//!   "ts":   "2025-12-07T10:15:30Z",
//!   "room": "africa",
//!   "type": "chat.message",
//!   "payload": {"user": "alice", "text": "hello"}
//! }
//! ```
//!
//! `type` is the only required field. `id` and `ts` are assigned by the
//! message store on append when absent; `room` is empty for global messages.
//! The envelope maps 1:1 to a store row (`id, kind, room, type, ts,
//! payload_json`), which is why absent metadata is modelled as an empty
//! string rather than `Option` — the row columns are plain text.
//!
//! The payload is an *ordered* flat list of key/value pairs. Insertion order
//! is observable (it is what gets serialized), but equality ignores nothing:
//! two payloads are equal iff their pair sequences are equal.

use serde_json::Value as JsonValue;

use crate::core::error::EnvelopeError;

/// Message category carried in the `kind` field.
///
/// Unknown kinds decode as [`Kind::Event`]; the default kind is omitted on
/// serialization so that minimal envelopes stay minimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kind {
    /// Ordinary application traffic (the default).
    #[default]
    Event,
    /// Server-generated notifications (joins, leaves).
    System,
    /// A stored message replayed to a (re)joining client.
    History,
    /// An error notification.
    Error,
}

impl Kind {
    /// Wire representation of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Event => "event",
            Kind::System => "system",
            Kind::History => "history",
            Kind::Error => "error",
        }
    }

    /// Parse a wire string; anything unrecognized falls back to `Event`.
    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Kind::System,
            "history" => Kind::History,
            "error" => Kind::Error,
            _ => Kind::Event,
        }
    }
}

/// A payload value: the JSON scalar types plus nested lists and payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(Payload),
}

impl Value {
    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow the value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => JsonValue::from(*f),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(p) => p.to_json_object(),
        }
    }

    fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(_) => Value::Map(Payload::from_json_value(json)),
        }
    }

    fn check_unique_keys(&self) -> Result<(), EnvelopeError> {
        match self {
            Value::Map(p) => p.check_unique_keys(),
            Value::List(items) => items.iter().try_for_each(Value::check_unique_keys),
            _ => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Ordered flat key/value payload.
///
/// Keys are unique on encode (duplicates are rejected by
/// [`Envelope::to_json`]); on decode the last occurrence of a duplicated
/// JSON key wins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    entries: Vec<(String, Value)>,
}

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair, replacing the value in place if the key is
    /// already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a string value by key. Non-string values yield `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the payload has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    /// Convert to a JSON object, preserving entry order.
    pub fn to_json_object(&self) -> JsonValue {
        let mut map = serde_json::Map::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            map.insert(key.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Build a payload from a JSON value. Non-objects yield an empty payload.
    pub fn from_json_value(json: &JsonValue) -> Self {
        let JsonValue::Object(map) = json else {
            return Self::new();
        };
        let mut payload = Self::new();
        for (key, value) in map {
            payload.insert(key.clone(), Value::from_json(value));
        }
        payload
    }

    fn check_unique_keys(&self) -> Result<(), EnvelopeError> {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|(k, _)| k == key) {
                return Err(EnvelopeError::DuplicateKey { key: key.clone() });
            }
            value.check_unique_keys()?;
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for Payload {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut payload = Payload::new();
        for (key, value) in iter {
            payload.insert(key, value);
        }
        payload
    }
}

/// The envelope around every text frame.
///
/// Designed to map 1:1 to a `messages` table row; empty strings mean
/// "absent" for `id`, `ts` and `room`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Opaque lexicographically ordered identifier; assigned on store append
    /// when empty.
    pub id: String,
    /// Message category.
    pub kind: Kind,
    /// ISO-8601 UTC timestamp; assigned on store append when empty.
    pub ts: String,
    /// Room scope; empty for global messages.
    pub room: String,
    /// Business discriminator, e.g. `chat.message`. Never empty.
    pub message_type: String,
    /// Application payload.
    pub payload: Payload,
}

impl Envelope {
    /// Build a minimal envelope with just a type and payload.
    pub fn new(message_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: String::new(),
            kind: Kind::Event,
            ts: String::new(),
            room: String::new(),
            message_type: message_type.into(),
            payload,
        }
    }

    /// Set the room scope.
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }

    /// Set the kind.
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Parse an envelope from a JSON text frame.
    ///
    /// Fails if the text is not a JSON object or if `type` is missing or
    /// empty after decoding. A missing or non-object `payload` yields an
    /// empty payload.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let json: JsonValue =
            serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson {
                message: e.to_string(),
            })?;
        Self::from_json_value(&json)
    }

    /// Build an envelope from an already-parsed JSON value.
    pub fn from_json_value(json: &JsonValue) -> Result<Self, EnvelopeError> {
        let JsonValue::Object(map) = json else {
            return Err(EnvelopeError::InvalidJson {
                message: "expected a JSON object".to_string(),
            });
        };

        let field = |name: &str| -> String {
            map.get(name)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let message_type = field("type");
        if message_type.is_empty() {
            return Err(EnvelopeError::MissingType);
        }

        let payload = map
            .get("payload")
            .map(Payload::from_json_value)
            .unwrap_or_default();

        Ok(Self {
            id: field("id"),
            kind: Kind::parse(&field("kind")),
            ts: field("ts"),
            room: field("room"),
            message_type,
            payload,
        })
    }

    /// Serialize to a JSON value, emitting only non-empty metadata fields
    /// plus the required `type` and `payload`.
    ///
    /// Duplicate payload keys (at any nesting depth) are rejected.
    pub fn to_json_value(&self) -> Result<JsonValue, EnvelopeError> {
        self.payload.check_unique_keys()?;

        let mut map = serde_json::Map::new();
        if !self.id.is_empty() {
            map.insert("id".to_string(), JsonValue::String(self.id.clone()));
        }
        if self.kind != Kind::Event {
            map.insert(
                "kind".to_string(),
                JsonValue::String(self.kind.as_str().to_string()),
            );
        }
        if !self.ts.is_empty() {
            map.insert("ts".to_string(), JsonValue::String(self.ts.clone()));
        }
        if !self.room.is_empty() {
            map.insert("room".to_string(), JsonValue::String(self.room.clone()));
        }
        map.insert(
            "type".to_string(),
            JsonValue::String(self.message_type.clone()),
        );
        map.insert("payload".to_string(), self.payload.to_json_object());

        Ok(JsonValue::Object(map))
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        let json = self.to_json_value()?;
        serde_json::to_string(&json).map_err(|e| EnvelopeError::InvalidJson {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_envelope() {
        let env = Envelope::parse(r#"{"type":"chat.message","payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(env.message_type, "chat.message");
        assert_eq!(env.kind, Kind::Event);
        assert!(env.id.is_empty());
        assert!(env.room.is_empty());
        assert_eq!(env.payload.get_str("text"), Some("hi"));
    }

    #[test]
    fn test_parse_full_envelope() {
        let text = r#"{"id":"00000000000000000042","kind":"system","ts":"2025-12-07T10:15:30Z","room":"africa","type":"chat.system","payload":{"user":"alice"}}"#;
        let env = Envelope::parse(text).unwrap();
        assert_eq!(env.id, "00000000000000000042");
        assert_eq!(env.kind, Kind::System);
        assert_eq!(env.ts, "2025-12-07T10:15:30Z");
        assert_eq!(env.room, "africa");
        assert_eq!(env.payload.get_str("user"), Some("alice"));
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        let err = Envelope::parse(r#"{"payload":{"text":"hi"}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingType));
    }

    #[test]
    fn test_parse_rejects_empty_type() {
        let err = Envelope::parse(r#"{"type":"","payload":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingType));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            Envelope::parse("not json").unwrap_err(),
            EnvelopeError::InvalidJson { .. }
        ));
        assert!(matches!(
            Envelope::parse(r#"["type"]"#).unwrap_err(),
            EnvelopeError::InvalidJson { .. }
        ));
    }

    #[test]
    fn test_parse_missing_payload_yields_empty() {
        let env = Envelope::parse(r#"{"type":"ping"}"#).unwrap();
        assert!(env.payload.is_empty());
    }

    #[test]
    fn test_parse_non_object_payload_yields_empty() {
        let env = Envelope::parse(r#"{"type":"ping","payload":"oops"}"#).unwrap();
        assert!(env.payload.is_empty());
    }

    #[test]
    fn test_unknown_kind_decodes_as_event() {
        let env = Envelope::parse(r#"{"type":"x","kind":"mystery","payload":{}}"#).unwrap();
        assert_eq!(env.kind, Kind::Event);
    }

    #[test]
    fn test_serialize_omits_empty_fields() {
        let env = Envelope::new("chat.message", Payload::new().with("text", "hi"));
        let json = env.to_json_value().unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("id"));
        assert!(!obj.contains_key("kind"));
        assert!(!obj.contains_key("ts"));
        assert!(!obj.contains_key("room"));
        assert_eq!(obj["type"], "chat.message");
        assert_eq!(obj["payload"]["text"], "hi");
    }

    #[test]
    fn test_serialize_emits_non_default_kind() {
        let env = Envelope::new("chat.message", Payload::new()).with_kind(Kind::History);
        let json = env.to_json_value().unwrap();
        assert_eq!(json["kind"], "history");
    }

    #[test]
    fn test_round_trip_preserves_envelope() {
        let env = Envelope {
            id: "00000000000000000007".to_string(),
            kind: Kind::System,
            ts: "2025-12-07T10:15:30Z".to_string(),
            room: "general".to_string(),
            message_type: "chat.system".to_string(),
            payload: Payload::new()
                .with("user", "alice")
                .with("count", 3i64)
                .with("active", true),
        };

        let text = env.to_json().unwrap();
        let parsed = Envelope::parse(&text).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_round_trip_default_kind() {
        let env = Envelope::new("tick", Payload::new()).with_room("clock");
        let parsed = Envelope::parse(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_payload_preserves_insertion_order() {
        let payload = Payload::new()
            .with("z", 1i64)
            .with("a", 2i64)
            .with("m", 3i64);
        let keys: Vec<&str> = payload.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);

        // Order survives serialization too.
        let env = Envelope::new("t", payload);
        let text = env.to_json().unwrap();
        let z = text.find("\"z\"").unwrap();
        let a = text.find("\"a\"").unwrap();
        let m = text.find("\"m\"").unwrap();
        assert!(z < a && a < m);
    }

    #[test]
    fn test_payload_insert_replaces_in_place() {
        let mut payload = Payload::new().with("user", "alice").with("text", "hi");
        payload.insert("user", "bob");
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.get_str("user"), Some("bob"));
        // The replaced key keeps its original position.
        assert_eq!(payload.iter().next().unwrap().0, "user");
    }

    #[test]
    fn test_decode_duplicate_keys_keeps_last() {
        let env = Envelope::parse(r#"{"type":"t","payload":{"k":"first","k":"last"}}"#).unwrap();
        assert_eq!(env.payload.len(), 1);
        assert_eq!(env.payload.get_str("k"), Some("last"));
    }

    #[test]
    fn test_encode_rejects_duplicate_keys() {
        // A raw pair list with duplicates can only be built via FromIterator
        // bypass; emulate by constructing the entries directly.
        let payload = Payload {
            entries: vec![
                ("k".to_string(), Value::Str("a".to_string())),
                ("k".to_string(), Value::Str("b".to_string())),
            ],
        };
        let env = Envelope::new("t", payload);
        let err = env.to_json().unwrap_err();
        assert!(matches!(err, EnvelopeError::DuplicateKey { key } if key == "k"));
    }

    #[test]
    fn test_encode_rejects_nested_duplicate_keys() {
        let nested = Payload {
            entries: vec![
                ("x".to_string(), Value::Int(1)),
                ("x".to_string(), Value::Int(2)),
            ],
        };
        let payload = Payload::new().with("inner", Value::Map(nested));
        let env = Envelope::new("t", payload);
        assert!(env.to_json().is_err());
    }

    #[test]
    fn test_nested_values_round_trip() {
        let payload = Payload::new()
            .with("tags", Value::List(vec!["a".into(), "b".into()]))
            .with(
                "meta",
                Value::Map(Payload::new().with("depth", 2i64).with("pi", 3.5f64)),
            )
            .with("none", Value::Null);

        let env = Envelope::new("t", payload);
        let parsed = Envelope::parse(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_kind_wire_forms() {
        for kind in [Kind::Event, Kind::System, Kind::History, Kind::Error] {
            assert_eq!(Kind::parse(kind.as_str()), kind);
        }
    }
}
