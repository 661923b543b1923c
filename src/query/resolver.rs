//! Instance selection over a collected counter array

use crate::core::{CounterValue, Error, Result};

const TOTAL_MARKER: &str = "_Total";

/// Whether `instance` satisfies `selector`
///
/// Order matters: the `#` prefix rule would otherwise shadow exact matches.
fn matches(selector: &str, instance: &str) -> bool {
    if selector == "*" {
        return !instance.contains(TOTAL_MARKER);
    }
    if selector == "total" {
        return instance.contains(TOTAL_MARKER);
    }
    if selector == instance {
        return true;
    }
    // The subsystem may truncate multi-instance names such as `w3wp#1`
    selector.contains('#') && selector.starts_with(instance)
}

/// First value in `values` whose instance satisfies `selector`
pub fn resolve_value<'a>(
    values: &'a [CounterValue],
    path: &str,
    selector: &str,
) -> Result<&'a CounterValue> {
    values
        .iter()
        .find(|value| matches(selector, &value.instance_name))
        .ok_or_else(|| Error::InstanceNotFound {
            path: path.to_string(),
            instance: selector.to_string(),
        })
}

/// Value of the first instance in `values` satisfying `selector`
pub fn resolve(values: &[CounterValue], path: &str, selector: &str) -> Result<f64> {
    resolve_value(values, path, selector).map(|value| value.value)
}
