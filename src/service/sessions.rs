//! Create/delete session mutations and their response interpretation.
//!
//! Responses are walked lazily: each level of
//! `data.<field>.<list>[0]` is parsed only as far as needed, and the first
//! list item is decoded into a typed shape. Any mismatch is reported as a
//! descriptive reason string, never a panic and never a default value.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use serde_json::value::RawValue;

use crate::error::ClientError;
use crate::protocol::{GraphqlError, OperationId};
use crate::ws::Session;

/// Mutation creating a batch of sessions.
pub const CREATE_SESSIONS_MUTATION: &str = "mutation createSessions($input: [CreateSessionInput!]!) { createSessions(input: $input) { sessions { id name } } }";

/// Mutation deleting a batch of sessions.
pub const DELETE_SESSIONS_MUTATION: &str =
    "mutation($input: [DeleteSessionInput!]!) { deleteSessions(input: $input) { success } }";

/// Name given to sessions created by the harness.
pub const CREATED_SESSION_NAME: &str = "CreateSession";

/// One item of a `createSessions.sessions` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedSession {
    /// Server-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of one create/delete cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Identifier returned by the create mutation.
    pub created_id: String,
    /// `deleteSessions.success`, when the delete response carried it.
    pub deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    data: Option<HashMap<String, Option<Box<RawValue>>>>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

/// Extracts `data.<field>.<list>[0]` from a `next` payload as `T`.
///
/// Only the first list element is consulted; the harness sends single-item
/// batches.
///
/// # Errors
///
/// Returns a description of the first missing or mismatched level. A
/// GraphQL `errors` entry, an absent level, or an empty list are all errors.
pub fn first_item<T: DeserializeOwned>(
    payload: &RawValue,
    field: &str,
    list: &str,
) -> Result<T, String> {
    let envelope: ResponseEnvelope = serde_json::from_str(payload.get())
        .map_err(|e| format!("payload is not a GraphQL response: {e}"))?;

    if let Some(first) = envelope.errors.first() {
        return Err(format!("GraphQL error: {}", first.message));
    }

    let data = envelope.data.ok_or("missing `data`")?;
    let field_raw = data
        .get(field)
        .and_then(Option::as_deref)
        .ok_or_else(|| format!("missing `data.{field}`"))?;

    let lists: HashMap<String, Option<Box<RawValue>>> = serde_json::from_str(field_raw.get())
        .map_err(|e| format!("`data.{field}` is not an object: {e}"))?;
    let list_raw = lists
        .get(list)
        .and_then(Option::as_deref)
        .ok_or_else(|| format!("missing `data.{field}.{list}`"))?;

    let items: Vec<T> = serde_json::from_str(list_raw.get())
        .map_err(|e| format!("`data.{field}.{list}` has unexpected shape: {e}"))?;
    items
        .into_iter()
        .next()
        .ok_or_else(|| format!("`data.{field}.{list}` is empty"))
}

/// Extracts the identifier of the first created session.
///
/// # Errors
///
/// Returns a description of the mismatch, including an empty `id`.
pub fn parse_created_session_id(payload: &RawValue) -> Result<String, String> {
    let session: CreatedSession = first_item(payload, "createSessions", "sessions")?;
    if session.id.is_empty() {
        return Err("`data.createSessions.sessions[0].id` is empty".to_string());
    }
    Ok(session.id)
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    data: Option<DeleteData>,
}

#[derive(Debug, Deserialize)]
struct DeleteData {
    #[serde(rename = "deleteSessions")]
    delete_sessions: Option<DeleteResult>,
}

#[derive(Debug, Deserialize)]
struct DeleteResult {
    success: Option<bool>,
}

/// Reads `data.deleteSessions.success` when present. Used for logging only.
#[must_use]
pub fn delete_succeeded(payload: &RawValue) -> Option<bool> {
    serde_json::from_str::<DeleteResponse>(payload.get())
        .ok()?
        .data?
        .delete_sessions?
        .success
}

/// Variables for [`CREATE_SESSIONS_MUTATION`].
#[must_use]
pub fn create_variables(name: &str) -> serde_json::Value {
    json!({ "input": [{ "name": name }] })
}

/// Variables for [`DELETE_SESSIONS_MUTATION`].
#[must_use]
pub fn delete_variables(id: &str) -> serde_json::Value {
    json!({ "input": [{ "id": id }] })
}

/// Creates a session, then deletes it by the returned identifier.
///
/// The delete step is skipped when the create response cannot be
/// interpreted; the failure is returned instead. The delete result is only
/// observed: a delete completed without a result still finishes the cycle,
/// with [`CycleOutcome::deleted`] left as `None`.
///
/// # Errors
///
/// - [`ClientError::Parse`] if the create response has no usable id.
/// - Any error from either mutation (see [`Session::mutate_as`]).
pub async fn create_then_delete(session: &Session) -> Result<CycleOutcome, ClientError> {
    let create_id = OperationId::new();
    let created = session
        .mutate_as(
            create_id.clone(),
            CREATE_SESSIONS_MUTATION,
            Some(create_variables(CREATED_SESSION_NAME)),
        )
        .await?;

    let created_id = parse_created_session_id(&created).map_err(|reason| ClientError::Parse {
        session: session.id(),
        op_id: create_id.clone(),
        reason,
    })?;
    tracing::info!(session = %session.id(), op_id = %create_id, %created_id, "createSessions returned id");

    let delete_id = OperationId::new();
    let deleted = match session
        .mutate_as(
            delete_id.clone(),
            DELETE_SESSIONS_MUTATION,
            Some(delete_variables(&created_id)),
        )
        .await
    {
        Ok(payload) => Some(payload),
        Err(ClientError::NoResult { .. }) => None,
        Err(e) => return Err(e),
    };
    let success = deleted.as_deref().and_then(delete_succeeded);
    tracing::info!(
        session = %session.id(),
        op_id = %delete_id,
        %created_id,
        success = ?success,
        payload = deleted.as_deref().map_or("", RawValue::get),
        "deleteSessions response"
    );

    Ok(CycleOutcome {
        created_id,
        deleted: success,
    })
}
