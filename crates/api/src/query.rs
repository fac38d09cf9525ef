//! Query parameter types for list endpoints.

use cosmos_core::types::DbId;
use serde::Deserialize;

/// `GET /prompts?search=&limit=&offset=`
#[derive(Debug, Default, Deserialize)]
pub struct PromptListParams {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /runs?status=&prompt_id=&model_type=&batch_id=&limit=&offset=`
///
/// `status` is a status name (`pending`, `running`, ...).
#[derive(Debug, Default, Deserialize)]
pub struct RunListParams {
    pub status: Option<String>,
    pub prompt_id: Option<DbId>,
    pub model_type: Option<String>,
    pub batch_id: Option<uuid::Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
