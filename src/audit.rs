//! Best-effort action log. A failed audit write is logged and swallowed;
//! it never fails the operation being audited.

use crate::models::NewActionLog;
use crate::storage::Storage;

pub async fn record(
    store: &dyn Storage,
    user_id: Option<i64>,
    action: &str,
    entity: &str,
    entity_id: Option<i64>,
    details: Option<String>,
) {
    let entry = NewActionLog {
        user_id,
        action: action.to_string(),
        entity: entity.to_string(),
        entity_id,
        details,
    };
    if let Err(err) = store.append_action(entry).await {
        log::warn!("failed to record action {action} on {entity}: {err}");
    }
}
