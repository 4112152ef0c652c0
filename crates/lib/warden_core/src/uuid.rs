// Helper for generating UUIDv7 (timestamp-sortable UUIDs).
//
// Users, roles, permissions and sessions all get app-side v7 ids so that
// "newest first" listings can fall back to id order. Access-token ids (jti)
// stay v4: they must not leak issuance time.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
