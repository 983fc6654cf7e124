//! Upsert-by-name merging.

use crate::models::{Created, Named};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Suffix appended to the display name of deleted apps.
pub const TOMBSTONE_SUFFIX: &str = " [DELETED]";

/// Replace entities of `previous` that share a name with an incoming one, in
/// place, and append the rest in arrival order.
///
/// `prepare` sees each incoming entity together with the entity it replaces,
/// if any, before it is stored.
pub(crate) fn upsert_by_name<E, F>(previous: &[E], incoming: Vec<E>, mut prepare: F) -> Vec<E>
where
    E: Named + Clone,
    F: FnMut(Option<&E>, &mut E),
{
    let mut merged: Vec<E> = previous.to_vec();
    let mut positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(index, entity)| (entity.name().to_string(), index))
        .collect();

    for mut entity in incoming {
        match positions.get(entity.name()) {
            Some(&index) => {
                prepare(Some(&merged[index]), &mut entity);
                merged[index] = entity;
            }
            None => {
                prepare(None, &mut entity);
                positions.insert(entity.name().to_string(), merged.len());
                merged.push(entity);
            }
        }
    }

    merged
}

/// Descending creation time; entities without one sort as the epoch.
pub(crate) fn newest_first<E: Created>(a: &E, b: &E) -> Ordering {
    let a = a.create_time().unwrap_or_default();
    let b = b.create_time().unwrap_or_default();
    b.cmp(&a)
}

pub(crate) fn tombstone_name(display_name: &str) -> String {
    if display_name.ends_with(TOMBSTONE_SUFFIX) {
        display_name.to_string()
    } else {
        format!("{display_name}{TOMBSTONE_SUFFIX}")
    }
}
