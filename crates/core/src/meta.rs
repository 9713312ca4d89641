//! Metadata helpers shared by the operator: label/annotation merging and name lookup.

use std::collections::BTreeMap;

use kube::core::DynamicObject;

/// Right-biased merge of two string maps.
///
/// Returns `None` only when both sides are absent: callers serialize "no map" and
/// "empty map" differently, so the distinction is preserved.
pub fn merge_map(
    left: Option<&BTreeMap<String, String>>,
    right: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    if left.is_none() && right.is_none() {
        return None;
    }
    let mut out = left.cloned().unwrap_or_default();
    if let Some(r) = right {
        for (k, v) in r {
            out.insert(k.clone(), v.clone());
        }
    }
    Some(out)
}

/// `metadata.name` of a generic document, empty when unset.
pub fn object_name(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or("")
}

/// Exact, case-sensitive name lookup within a locally held collection.
pub fn contains(items: &[DynamicObject], name: &str) -> bool {
    items.iter().any(|o| o.metadata.name.as_deref() == Some(name))
}
