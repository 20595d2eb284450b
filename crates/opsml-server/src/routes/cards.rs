//! Card record routes

use crate::{
    AppState,
    error::{ApiError, Result},
};
use axum::{Json, Router, extract::State, routing::post};
use opsml::{CardRecord, RegistryType};
use opsml_registry::{
    CardQuery, RegistryError, RegistryTable,
    api::{
        CardRequest, CreateCardResponse, DeleteCardResponse, ListCardsRequest, ListCardsResponse,
        SetVersionRequest, SetVersionResponse, UidExistsResponse, UidRequest, UpdateCardResponse,
    },
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Create card routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/list", post(list_cards))
        .route("/create", post(create_card))
        .route("/update", post(update_card))
        .route("/version", post(set_version))
        .route("/uid", post(check_uid))
        .route("/delete", post(delete_card))
}

fn table(state: &AppState, registry_type: RegistryType) -> &Arc<dyn RegistryTable> {
    state.registries.get(registry_type).table()
}

fn ensure_record_type(request: &CardRequest) -> Result<()> {
    let card_type = request.card.registry_type();
    if card_type != request.registry_type {
        return Err(ApiError::bad_request(format!(
            "Card of type {} sent to the {} registry",
            card_type.as_str(),
            request.registry_type.as_str()
        )));
    }
    Ok(())
}

/// List records matching a query, highest version first
async fn list_cards(
    State(state): State<AppState>,
    Json(request): Json<ListCardsRequest>,
) -> Result<Json<ListCardsResponse>> {
    debug!(
        "Listing {} cards with query: {:?}",
        request.registry_type.as_str(),
        request.query
    );

    let cards = table(&state, request.registry_type)
        .list_cards(&request.query)
        .await?;

    Ok(Json(ListCardsResponse { cards }))
}

/// Insert a new record
async fn create_card(
    State(state): State<AppState>,
    Json(request): Json<CardRequest>,
) -> Result<Json<CreateCardResponse>> {
    ensure_record_type(&request)?;
    let table = table(&state, request.registry_type);

    match table.add_and_commit(&request.card).await {
        Ok(()) => {
            info!(
                "Registered {} {}:{} as {}",
                request.registry_type.as_str(),
                request.card.name,
                request.card.version,
                request.card.uid
            );
            Ok(Json(CreateCardResponse { registered: true }))
        }
        Err(e) if e.is_version_conflict() || matches!(e, RegistryError::Validation(_)) => {
            // A client retry of a create that already landed collides on uid
            if already_committed(table.as_ref(), &request.card).await? {
                warn!(
                    "Record {} already committed, treating create as a retry",
                    request.card.uid
                );
                return Ok(Json(CreateCardResponse { registered: true }));
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn already_committed(
    table: &dyn RegistryTable,
    record: &CardRecord,
) -> std::result::Result<bool, RegistryError> {
    let existing = table
        .list_cards(&CardQuery::new().uid(record.uid.clone()))
        .await?;
    Ok(existing.first() == Some(record))
}

/// Overwrite an existing record
async fn update_card(
    State(state): State<AppState>,
    Json(request): Json<CardRequest>,
) -> Result<Json<UpdateCardResponse>> {
    ensure_record_type(&request)?;

    table(&state, request.registry_type)
        .update_card_record(&request.card)
        .await?;

    info!("Updated card record {}", request.card.uid);
    Ok(Json(UpdateCardResponse { updated: true }))
}

/// Compute the next version for a card
async fn set_version(
    State(state): State<AppState>,
    Json(request): Json<SetVersionRequest>,
) -> Result<Json<SetVersionResponse>> {
    debug!("Resolving version for {:?}", request.request);

    let version = table(&state, request.registry_type)
        .set_version(&request.request)
        .await?;

    Ok(Json(SetVersionResponse { version }))
}

async fn check_uid(
    State(state): State<AppState>,
    Json(request): Json<UidRequest>,
) -> Result<Json<UidExistsResponse>> {
    let uid_exists = table(&state, request.registry_type)
        .check_uid(&request.uid, request.registry_type)
        .await?;

    Ok(Json(UidExistsResponse { uid_exists }))
}

async fn delete_card(
    State(state): State<AppState>,
    Json(request): Json<UidRequest>,
) -> Result<Json<DeleteCardResponse>> {
    table(&state, request.registry_type)
        .delete_card_record(&request.uid)
        .await?;

    info!(
        "Deleted {} card record {}",
        request.registry_type.as_str(),
        request.uid
    );
    Ok(Json(DeleteCardResponse { deleted: true }))
}
