use kube::core::DynamicObject;
use trigsync_core::{contains, FunctionRef, Trigger};

use crate::error::Result;

/// Matcher over generic trigger documents.
pub type Predicate = Box<dyn Fn(&DynamicObject) -> Result<bool> + Send + Sync>;

/// Matches triggers bound to `function` whose name is absent from `desired`.
///
/// A candidate that cannot be decoded as a trigger yields an error rather than a non-match.
pub fn build_orphan_predicate(function: &FunctionRef, desired: &[DynamicObject]) -> Predicate {
    let function = function.clone();
    let desired = desired.to_vec();
    Box::new(move |candidate| {
        let trigger = Trigger::from_object(candidate)?;
        Ok(trigger.is_reference(&function) && !contains(&desired, trigger.name()))
    })
}
