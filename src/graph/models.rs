use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Site {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct Drive {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub parent_reference: Option<ParentReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default)]
    pub drive_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// One page of a children listing; `next_link` is present when the backend
/// has more pages.
#[derive(Debug, Deserialize)]
pub struct ItemCollection {
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub folder: HashMap<String, String>,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: String,
}

impl CreateFolderRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            folder: HashMap::new(),
            conflict_behavior: "fail".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyItemRequest {
    pub parent_reference: CopyParentReference,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyParentReference {
    pub drive_id: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    code: String,
    message: String,
}

/// Graph failure bodies are OData JSON; surface the code and message when
/// they parse, the raw body otherwise.
pub fn describe_error(body: &str) -> String {
    serde_json::from_str::<GraphErrorResponse>(body)
        .map(|response| format!("{}: {}", response.error.code, response.error.message))
        .unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_error_parses_odata_payload() {
        let body = r#"{"error":{"code":"itemNotFound","message":"The resource could not be found."}}"#;
        assert_eq!(
            describe_error(body),
            "itemNotFound: The resource could not be found."
        );
    }

    #[test]
    fn test_describe_error_passes_through_non_json() {
        assert_eq!(describe_error("502 Bad Gateway"), "502 Bad Gateway");
    }
}
