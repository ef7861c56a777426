//! Title and slug derivation for new records
//!
//! Runs pre-commit. Only fills a blank `title`; whatever the client typed
//! wins. The slug follows the title unless the client supplied one too.

use tubtrack_core::{fields, relation, EntityKind, Patch, Value};

/// Derive a display title from a (coerced) patch
pub fn derive_title(kind: EntityKind, patch: &Patch) -> String {
    let int = |field: &str| patch.get(field).map_or(0, relation::resolve);
    match kind {
        EntityKind::Batch => {
            let count = patch
                .get(fields::REQUESTED_COUNT)
                .and_then(Value::as_number)
                .unwrap_or(0.0);
            format!(
                "Flavor {} batch of {}",
                int(fields::FLAVOR_ID),
                count
            )
        }
        EntityKind::Cabinet => format!(
            "Cabinet at location {} ({} slots)",
            int(fields::LOCATION_ID),
            int(fields::CAPACITY)
        ),
        EntityKind::Slot => format!(
            "Cabinet {} slot {}",
            int(fields::CABINET_ID),
            int(fields::SEQUENCE_INDEX)
        ),
        EntityKind::Tub => format!(
            "Batch {} tub {}",
            int(fields::BATCH_ID),
            int(fields::SEQUENCE_INDEX)
        ),
        EntityKind::Closeout => format!(
            "Closeout of {} flavor {} at location {}",
            int(fields::REQUESTED_COUNT),
            int(fields::FLAVOR_ID),
            int(fields::LOCATION_ID)
        ),
    }
}

/// Lowercase ASCII slug; other characters collapse to single dashes
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Fill `title` and `slug` when they are blank
pub fn fill_titles(kind: EntityKind, patch: &mut Patch) {
    let title_blank = patch.get(fields::TITLE).map_or(true, Value::is_blank);
    if title_blank {
        let title = derive_title(kind, patch);
        patch.insert(fields::TITLE.to_string(), Value::from(title));
    }
    let slug_blank = patch.get(fields::SLUG).map_or(true, Value::is_blank);
    if slug_blank {
        let slug = patch
            .get(fields::TITLE)
            .and_then(Value::as_str)
            .map(slugify)
            .unwrap_or_default();
        patch.insert(fields::SLUG.to_string(), Value::from(slug));
    }
}
