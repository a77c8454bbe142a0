//! Stored document representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::query::{Projection, ProjectionMode, VERSION_FIELD};

use super::DocumentPatch;

/// A JSON document with a store-assigned id.
///
/// Serializes as a flat object with `id` alongside the body fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Wrap a body under a fresh id.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self::with_id(Uuid::now_v7(), fields)
    }

    pub fn with_id(id: Uuid, mut fields: Map<String, Value>) -> Self {
        fields.remove("id");
        Self { id, fields }
    }

    /// Look up a dotted path in the body.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.fields.get(first)?, |value, segment| {
            value.as_object()?.get(segment)
        })
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// Read a field holding a UUID reference.
    pub fn get_uuid(&self, path: &str) -> Option<Uuid> {
        self.get_str(path).and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Set a dotted path, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        set_path(&mut self.fields, path, value);
    }

    /// Remove a dotted path, returning the old value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        match path.rsplit_once('.') {
            None => self.fields.remove(path),
            Some((parent, leaf)) => {
                let mut segments = parent.split('.');
                let first = segments.next()?;
                let mut current = self.fields.get_mut(first)?;
                for segment in segments {
                    current = current.as_object_mut()?.get_mut(segment)?;
                }
                current.as_object_mut()?.remove(leaf)
            }
        }
    }

    /// Apply a patch in place. `set` is applied before `unset`.
    pub fn apply(&mut self, patch: &DocumentPatch) {
        for (path, value) in &patch.set {
            if path != "id" {
                self.set(path, value.clone());
            }
        }
        for path in &patch.unset {
            self.remove(path);
        }
    }

    /// Increment the `__v` revision counter.
    pub fn bump_version(&mut self) {
        let next = self
            .get(VERSION_FIELD)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .saturating_add(1);
        self.set(VERSION_FIELD, Value::from(next));
    }

    /// Whole document as one JSON object, `id` included.
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert("id".to_string(), Value::String(self.id.to_string()));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// Copy of this document with a projection applied. The id survives
    /// every projection.
    pub fn project(&self, projection: &Projection) -> Document {
        match projection.mode {
            ProjectionMode::Exclude => {
                let mut out = self.clone();
                for path in &projection.fields {
                    out.remove(path);
                }
                out
            }
            ProjectionMode::Include => {
                let mut out = Document {
                    id: self.id,
                    fields: Map::new(),
                };
                for path in &projection.fields {
                    if let Some(value) = self.get(path) {
                        out.set(path, value.clone());
                    }
                }
                out
            }
        }
    }
}

fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        let Value::Object(map) = value else {
            panic!("expected object")
        };
        Document::new(map)
    }

    #[test]
    fn dotted_paths() {
        let mut d = doc(json!({ "start": { "city": "Banff" } }));
        assert_eq!(d.get_str("start.city"), Some("Banff"));
        d.set("start.zip", json!("T1L"));
        assert_eq!(d.get_str("start.zip"), Some("T1L"));
        assert_eq!(d.remove("start.city"), Some(json!("Banff")));
        assert!(d.get("start.city").is_none());
        assert!(d.get("missing.path").is_none());
    }

    #[test]
    fn serializes_flat_with_id() {
        let d = doc(json!({ "name": "Forest Hiker" }));
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(value["id"], json!(d.id.to_string()));
        assert_eq!(value["name"], json!("Forest Hiker"));
        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn include_projection_keeps_id() {
        let d = doc(json!({ "name": "a", "price": 10, "summary": "s" }));
        let p = d.project(&Projection::include(["name"]));
        assert_eq!(p.id, d.id);
        assert_eq!(p.fields.len(), 1);
        assert_eq!(p.get_str("name"), Some("a"));
    }

    #[test]
    fn exclude_projection_drops_fields() {
        let d = doc(json!({ "name": "a", "password": "h", "__v": 0 }));
        let p = d.project(&Projection::exclude(["password", "__v"]));
        assert!(p.get("password").is_none());
        assert!(p.get("__v").is_none());
        assert_eq!(p.get_str("name"), Some("a"));
    }

    #[test]
    fn patch_never_changes_id() {
        let mut d = doc(json!({ "name": "a" }));
        let id = d.id;
        d.apply(&DocumentPatch::new().with("id", "other").with("name", "b"));
        assert_eq!(d.id, id);
        assert_eq!(d.get_str("name"), Some("b"));
    }
}
