//! HTTP-proxied registry tables

use async_trait::async_trait;
use opsml::{CardRecord, RegistryType};
use std::sync::Arc;
use tracing::debug;

use super::{CardQuery, RegistryTable, VersionRequest};
use crate::api::{
    CardRequest, CreateCardResponse, DeleteCardResponse, ListCardsRequest, ListCardsResponse,
    SetVersionRequest, SetVersionResponse, UidExistsResponse, UidRequest, UpdateCardResponse,
    routes,
};
use crate::error::{RegistryError, Result};
use crate::http::HttpClient;

/// Registry table living on a remote opsml server
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    http: Arc<HttpClient>,
    registry_type: RegistryType,
}

impl ClientRegistry {
    pub fn new(http: Arc<HttpClient>, registry_type: RegistryType) -> Self {
        Self {
            http,
            registry_type,
        }
    }
}

#[async_trait]
impl RegistryTable for ClientRegistry {
    fn registry_type(&self) -> RegistryType {
        self.registry_type
    }

    async fn list_cards(&self, query: &CardQuery) -> Result<Vec<CardRecord>> {
        let request = ListCardsRequest {
            registry_type: self.registry_type,
            query: query.clone(),
        };
        let response: ListCardsResponse =
            self.http.post_json(routes::LIST_CARDS, &request).await?;
        debug!("Remote listed {} cards", response.cards.len());
        Ok(response.cards)
    }

    async fn check_uid(&self, uid: &str, registry_type: RegistryType) -> Result<bool> {
        let request = UidRequest {
            uid: uid.to_string(),
            registry_type,
        };
        let response: UidExistsResponse = self.http.post_json(routes::CHECK_UID, &request).await?;
        Ok(response.uid_exists)
    }

    async fn set_version(&self, request: &VersionRequest) -> Result<String> {
        let request = SetVersionRequest {
            registry_type: self.registry_type,
            request: request.clone(),
        };
        let response: SetVersionResponse =
            self.http.post_json(routes::SET_VERSION, &request).await?;
        Ok(response.version)
    }

    async fn add_and_commit(&self, record: &CardRecord) -> Result<()> {
        let request = CardRequest {
            card: record.clone(),
            registry_type: self.registry_type,
        };
        let response: CreateCardResponse =
            self.http.post_json(routes::CREATE_CARD, &request).await?;

        if !response.registered {
            return Err(RegistryError::database(
                "Remote registry rejected card",
                &record.uid,
            ));
        }
        Ok(())
    }

    async fn update_card_record(&self, record: &CardRecord) -> Result<()> {
        let request = CardRequest {
            card: record.clone(),
            registry_type: self.registry_type,
        };
        let response: UpdateCardResponse =
            self.http.post_json(routes::UPDATE_CARD, &request).await?;

        if !response.updated {
            return Err(RegistryError::CardNotFound(record.uid.clone()));
        }
        Ok(())
    }

    async fn delete_card_record(&self, uid: &str) -> Result<()> {
        let request = UidRequest {
            uid: uid.to_string(),
            registry_type: self.registry_type,
        };
        let response: DeleteCardResponse =
            self.http.post_json(routes::DELETE_CARD, &request).await?;

        if !response.deleted {
            return Err(RegistryError::CardNotFound(uid.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_remote_surfaces_transport_error() {
        let http = Arc::new(HttpClient::new("http://127.0.0.1:9", 3, 1).unwrap());
        let table = ClientRegistry::new(http, RegistryType::Data);

        let err = table
            .list_cards(&CardQuery::new().name("iris"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Transport { .. }));
        assert!(err.is_retryable());
    }
}
