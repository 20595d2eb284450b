//! Request and response bodies for the registry HTTP routes
//!
//! Shared by [`ClientRegistry`](crate::table::ClientRegistry),
//! [`ApiStorage`](crate::storage::ApiStorage) and the server.

use opsml::{CardRecord, RegistryType};
use serde::{Deserialize, Serialize};

use crate::table::{CardQuery, VersionRequest};

pub mod routes {
    pub const LIST_CARDS: &str = "cards/list";
    pub const CREATE_CARD: &str = "cards/create";
    pub const UPDATE_CARD: &str = "cards/update";
    pub const SET_VERSION: &str = "cards/version";
    pub const CHECK_UID: &str = "cards/uid";
    pub const DELETE_CARD: &str = "cards/delete";

    pub const FILE_BLOB: &str = "files/blob";
    pub const FILE_LIST: &str = "files/list";
    pub const FILE_FIND: &str = "files/find";
    pub const FILE_EXISTS: &str = "files/exists";
    pub const FILE_COPY: &str = "files/copy";
}

/// `POST cards/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCardsRequest {
    pub registry_type: RegistryType,
    #[serde(flatten)]
    pub query: CardQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCardsResponse {
    pub cards: Vec<CardRecord>,
}

/// `POST cards/create` and `POST cards/update`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRequest {
    pub card: CardRecord,
    pub registry_type: RegistryType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCardResponse {
    pub registered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCardResponse {
    pub updated: bool,
}

/// `POST cards/version`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVersionRequest {
    pub registry_type: RegistryType,
    #[serde(flatten)]
    pub request: VersionRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVersionResponse {
    pub version: String,
}

/// `POST cards/uid` and `POST cards/delete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UidRequest {
    pub uid: String,
    pub registry_type: RegistryType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UidExistsResponse {
    pub uid_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCardResponse {
    pub deleted: bool,
}

/// `POST files/list`, `files/find` and `files/exists`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExistsResponse {
    pub exists: bool,
}

/// `POST files/copy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyFilesRequest {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyFilesResponse {
    pub copied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsml::VersionType;

    #[test]
    fn test_list_request_is_flat() {
        let request = ListCardsRequest {
            registry_type: RegistryType::Data,
            query: CardQuery::new().name("iris").version("^1"),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["registry_type"], "data");
        assert_eq!(value["name"], "iris");
        assert_eq!(value["version"], "^1");

        let parsed: ListCardsRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.query.name.as_deref(), Some("iris"));
    }

    #[test]
    fn test_version_request_shape() {
        let body = serde_json::json!({
            "registry_type": "model",
            "name": "iris",
            "repository": "ml",
            "version_type": "patch",
            "pre_tag": "rc",
            "build_tag": "build"
        });
        let parsed: SetVersionRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.registry_type, RegistryType::Model);
        assert_eq!(parsed.request.version_type, VersionType::Patch);
        assert_eq!(parsed.request.version, None);
    }
}
