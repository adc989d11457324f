//! Binding snapshots.
//!
//! A snapshot is the filtered, independently owned copy of a script's binding
//! environment that is allowed to cross a process or thread boundary and to be
//! reused by a later snippet. Filtering drops:
//!
//! - values that are not plain data (function pointers, closures, timestamps,
//!   host objects), checked recursively through arrays and maps,
//! - the reserved `__builtins__` namespace,
//! - values whose JSON round trip does not rebuild a value of the same shape.
//!
//! Everything that survives is deep-copied, so no shared cell of the source
//! scope is aliased by the snapshot.

use std::collections::BTreeMap;

use rhai::{Array, Blob, Dynamic, ImmutableString, Map, FLOAT, INT};
use serde::{Deserialize, Serialize};

/// Name of the constant exposing built-in runtime information to snippets.
pub const BUILTINS_BINDING: &str = "__builtins__";

/// Why a binding was left out of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The reserved built-in namespace.
    Reserved,
    /// A function pointer, timestamp, host object or a container holding one.
    ModuleLike(String),
    /// The value did not survive a serialization round trip.
    NotSerializable(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reserved => write!(f, "reserved name"),
            Self::ModuleLike(ty) => write!(f, "not relocatable ({})", ty),
            Self::NotSerializable(why) => write!(f, "failed round-trip probe: {}", why),
        }
    }
}

/// Names dropped by one filtering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub dropped: Vec<(String, DropReason)>,
}

impl FilterReport {
    /// Whether nothing was dropped.
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Filtered, owned copy of a binding environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingSnapshot {
    entries: BTreeMap<String, Dynamic>,
}

impl BindingSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter a live binding map into a snapshot.
    ///
    /// When a name occurs more than once the last occurrence wins, matching
    /// variable shadowing in the script scope.
    pub fn filter<I, K>(entries: I) -> (Self, FilterReport)
    where
        I: IntoIterator<Item = (K, Dynamic)>,
        K: Into<String>,
    {
        let mut live: BTreeMap<String, Dynamic> = BTreeMap::new();
        for (name, value) in entries {
            live.insert(name.into(), value);
        }

        let mut snapshot = Self::new();
        let mut report = FilterReport::default();

        for (name, value) in live {
            if name == BUILTINS_BINDING {
                report.dropped.push((name, DropReason::Reserved));
                continue;
            }
            let value = deep_copy(&value);
            if let Some(ty) = find_module_like(&value) {
                report.dropped.push((name, DropReason::ModuleLike(ty)));
                continue;
            }
            if let Err(why) = round_trip_probe(&value) {
                report.dropped.push((name, DropReason::NotSerializable(why)));
                continue;
            }
            snapshot.entries.insert(name, value);
        }

        if !report.is_clean() {
            tracing::debug!(
                dropped = ?report.dropped.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
                kept = snapshot.len(),
                "Bindings dropped from snapshot"
            );
        }

        (snapshot, report)
    }

    /// Filter this snapshot again. On a snapshot produced by [`filter`](Self::filter)
    /// this removes nothing.
    pub fn refilter(&self) -> (Self, FilterReport) {
        Self::filter(self.entries.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Look up a binding.
    pub fn get(&self, name: &str) -> Option<&Dynamic> {
        self.entries.get(name)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binding names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Iterate over the bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dynamic)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Deep copy of the snapshot, sharing nothing with `self`.
    pub fn deep_clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), deep_copy(v)))
                .collect(),
        }
    }

    /// Overlay `other` on top of this snapshot; names in `other` win.
    pub fn merge(&mut self, other: &BindingSnapshot) {
        for (name, value) in other.iter() {
            self.entries.insert(name.to_string(), deep_copy(value));
        }
    }

    /// Drop `name`, returning its value if it was bound.
    pub fn remove(&mut self, name: &str) -> Option<Dynamic> {
        self.entries.remove(name)
    }

    /// JSON rendering of the snapshot, for logs and summaries.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Copy a value, flattening shared cells at every depth.
fn deep_copy(value: &Dynamic) -> Dynamic {
    let value = value.flatten_clone();
    if value.is::<Array>() {
        if let Some(items) = value.clone().try_cast::<Array>() {
            return Dynamic::from_array(items.iter().map(deep_copy).collect());
        }
    }
    if value.is::<Map>() {
        if let Some(map) = value.clone().try_cast::<Map>() {
            return Dynamic::from_map(map.iter().map(|(k, v)| (k.clone(), deep_copy(v))).collect());
        }
    }
    value
}

fn is_plain_scalar(value: &Dynamic) -> bool {
    value.is::<()>()
        || value.is::<bool>()
        || value.is::<INT>()
        || value.is::<FLOAT>()
        || value.is::<char>()
        || value.is::<ImmutableString>()
        || value.is::<Blob>()
}

/// Return the type name of the first non-relocatable value found, if any.
fn find_module_like(value: &Dynamic) -> Option<String> {
    if is_plain_scalar(value) {
        return None;
    }
    if let Some(items) = value.clone().try_cast::<Array>() {
        return items.iter().find_map(find_module_like);
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        return map.values().find_map(find_module_like);
    }
    Some(value.type_name().to_string())
}

/// Serialize to JSON and back; the rebuilt value must have the original shape.
fn round_trip_probe(value: &Dynamic) -> Result<(), String> {
    let json = serde_json::to_value(value).map_err(|e| e.to_string())?;
    let rebuilt: Dynamic = serde_json::from_value(json).map_err(|e| e.to_string())?;
    if same_shape(value, &rebuilt) {
        Ok(())
    } else {
        Err(format!(
            "{} came back as {}",
            value.type_name(),
            rebuilt.type_name()
        ))
    }
}

fn same_shape(a: &Dynamic, b: &Dynamic) -> bool {
    if a.type_name() != b.type_name() {
        return false;
    }
    match (a.clone().try_cast::<Array>(), b.clone().try_cast::<Array>()) {
        (Some(xs), Some(ys)) => {
            return xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| same_shape(x, y));
        }
        (None, None) => {}
        _ => return false,
    }
    match (a.clone().try_cast::<Map>(), b.clone().try_cast::<Map>()) {
        (Some(xs), Some(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k.as_str()).map_or(false, |y| same_shape(x, y)))
        }
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: INT) -> Dynamic {
        Dynamic::from(v)
    }

    #[test]
    fn test_keeps_plain_data() {
        let mut map = Map::new();
        map.insert("title".into(), Dynamic::from("attention".to_string()));
        map.insert("year".into(), int(2017));

        let (snapshot, report) = BindingSnapshot::filter(vec![
            ("x", int(1)),
            ("ratio", Dynamic::from(0.5 as FLOAT)),
            ("flag", Dynamic::from(true)),
            ("paper", Dynamic::from_map(map)),
            ("ids", Dynamic::from_array(vec![int(1), int(2)])),
        ]);

        assert!(report.is_clean(), "unexpected drops: {:?}", report.dropped);
        assert_eq!(snapshot.names(), vec!["flag", "ids", "paper", "ratio", "x"]);
        assert_eq!(snapshot.get("x").and_then(|v| v.as_int().ok()), Some(1));
    }

    #[test]
    fn test_drops_reserved_name() {
        let (snapshot, report) =
            BindingSnapshot::filter(vec![(BUILTINS_BINDING, Dynamic::from_map(Map::new())), ("y", int(2))]);

        assert_eq!(snapshot.names(), vec!["y"]);
        assert_eq!(
            report.dropped,
            vec![(BUILTINS_BINDING.to_string(), DropReason::Reserved)]
        );
    }

    #[test]
    fn test_drops_function_pointers_recursively() {
        let fn_ptr = Dynamic::from(rhai::FnPtr::new("print").unwrap());
        let nested = Dynamic::from_array(vec![int(1), fn_ptr.clone()]);

        let (snapshot, report) =
            BindingSnapshot::filter(vec![("f", fn_ptr), ("nested", nested), ("ok", int(3))]);

        assert_eq!(snapshot.names(), vec!["ok"]);
        assert_eq!(report.dropped.len(), 2);
        assert!(report
            .dropped
            .iter()
            .all(|(_, reason)| matches!(reason, DropReason::ModuleLike(_))));
    }

    #[test]
    fn test_drops_values_that_change_shape() {
        // A char comes back from JSON as a string.
        let (snapshot, report) =
            BindingSnapshot::filter(vec![("c", Dynamic::from('a')), ("s", Dynamic::from("a".to_string()))]);

        assert_eq!(snapshot.names(), vec!["s"]);
        assert!(matches!(
            report.dropped.as_slice(),
            [(name, DropReason::NotSerializable(_))] if name == "c"
        ));
    }

    #[test]
    fn test_last_shadowing_definition_wins() {
        let (snapshot, _) = BindingSnapshot::filter(vec![("x", int(1)), ("x", int(2))]);
        assert_eq!(snapshot.get("x").and_then(|v| v.as_int().ok()), Some(2));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let (first, _) = BindingSnapshot::filter(vec![
            ("x", int(1)),
            (BUILTINS_BINDING, int(0)),
            ("c", Dynamic::from('z')),
            ("list", Dynamic::from_array(vec![int(1), Dynamic::from("two".to_string())])),
        ]);
        let (second, report) = first.refilter();

        assert!(report.is_clean());
        assert_eq!(first.names(), second.names());
        assert_eq!(first.to_json(), second.to_json());
    }

    #[test]
    fn test_shared_values_are_copied() {
        let mut shared = Dynamic::from_array(vec![int(1)]).into_shared();
        let (snapshot, _) = BindingSnapshot::filter(vec![("xs", shared.clone())]);

        // Mutate the source; the snapshot must not observe it.
        if let Some(mut guard) = shared.write_lock::<Array>() {
            guard.push(int(2));
        }
        let copied = snapshot.get("xs").cloned().and_then(|v| v.try_cast::<Array>());
        assert_eq!(copied.map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let (snapshot, _) = BindingSnapshot::filter(vec![("x", int(7)), ("name", Dynamic::from("bert".to_string()))]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: BindingSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.names(), vec!["name", "x"]);
        assert_eq!(back.get("x").and_then(|v| v.as_int().ok()), Some(7));
    }

    #[test]
    fn test_merge_overrides() {
        let (mut base, _) = BindingSnapshot::filter(vec![("x", int(1)), ("y", int(1))]);
        let (update, _) = BindingSnapshot::filter(vec![("y", int(9))]);
        base.merge(&update);
        assert_eq!(base.get("x").and_then(|v| v.as_int().ok()), Some(1));
        assert_eq!(base.get("y").and_then(|v| v.as_int().ok()), Some(9));
    }
}
