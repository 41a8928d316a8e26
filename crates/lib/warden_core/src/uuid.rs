// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Sessions, refresh tokens and one-time tokens are generated app-side so that
// the in-memory store and PostgreSQL agree on id ordering. Users keep PG's
// gen_random_uuid() (v4) default when inserted through SQL seeds.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuidv7_is_valid() {
        let id = uuidv7();
        assert_eq!(id.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn uuidv7_is_monotonic() {
        let a = uuidv7();
        let b = uuidv7();
        assert!(b >= a);
    }
}
