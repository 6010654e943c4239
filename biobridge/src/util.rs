//! Small shared helpers.

/// Generate a unique id with the given prefix (`req_3f2a...`).
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}
