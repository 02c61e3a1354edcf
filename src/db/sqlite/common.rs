use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Encode a list of ids as a JSON array so it can be bound as one parameter
/// and expanded with `json_each`, keeping the statement size constant.
pub fn uuid_list_json(ids: &[Uuid]) -> DbResult<String> {
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    Ok(serde_json::to_string(&ids)?)
}
