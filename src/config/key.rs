/**
 * Flattened key naming
 *
 * Turns a data field of a `ConfigMap` or `Secret` into a key of the
 * configuration tree:
 *
 * - a field ending in `.` loses every `.` before anything else happens
 * - everything except letters, digits and the key delimiter is dropped from
 *   the field, then characters are skipped until the first letter
 * - unless the field starts with `.`, the owning resource's name is prepended
 *   as its own segment
 *
 * The resource name is used verbatim. Only the field segment is normalised,
 * so `("9abc", "cm1")` becomes `cm1:abc` and `("foo", "9cm")` stays `9cm:foo`.
 */
use crate::error::{Error, Result};
use crate::k8s::cache::config::KEY_DELIMITER;
use std::borrow::Cow;

/// Build the flattened key for `field` of the resource called `resource_name`
///
/// # Errors
///
/// Returns a validation error if either argument is empty or whitespace, or
/// if the field contains no letter at all
pub fn convert_key(field: &str, resource_name: &str) -> Result<String> {
    if resource_name.trim().is_empty() {
        return Err(Error::Validation(
            "resource name cannot be empty".to_string(),
        ));
    }
    if field.trim().is_empty() {
        return Err(Error::Validation(format!(
            "field name of `{resource_name}` cannot be empty"
        )));
    }

    let stripped: Cow<'_, str> = if field.ends_with('.') {
        Cow::Owned(field.replace('.', ""))
    } else {
        Cow::Borrowed(field)
    };

    let segment: String = stripped
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == KEY_DELIMITER)
        .skip_while(|c| !c.is_alphabetic())
        .collect();

    if segment.is_empty() {
        return Err(Error::Validation(format!(
            "field `{field}` of `{resource_name}` does not contain a letter"
        )));
    }

    if field.starts_with('.') {
        Ok(segment)
    } else {
        Ok(format!("{resource_name}{KEY_DELIMITER}{segment}"))
    }
}
