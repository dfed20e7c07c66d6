// Identifiers are UUIDv7 (timestamp-sortable) and generated app-side, so the
// in-memory and Postgres stores hand out ids with the same shape and ordering.

use uuid::Uuid;

/// Generate a new UUIDv7.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Parse a user-supplied id, returning `None` for malformed input.
pub fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_v7() {
        let id = new_id();
        assert_eq!(id.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn new_ids_sort_by_creation() {
        let a = new_id();
        let b = new_id();
        assert!(b >= a);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_none());
        let id = new_id();
        assert_eq!(parse_id(&format!(" {id} ")), Some(id));
    }
}
