use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{RoomId, UserId},
    error::{ApiError, ApiException},
    protocol::{ChatMessage, ConversationPartner, RoomResponse, SendMessageRequest},
};
use tracing::debug;
use url::Url;

use crate::error::InboxError;

/// Backend calls the inbox depends on.
#[async_trait]
pub trait InboxBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationPartner>, InboxError>;
    async fn resolve_room(&self, partner_id: &UserId) -> Result<RoomId, InboxError>;
    async fn fetch_history(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, InboxError>;
    async fn post_message(&self, request: SendMessageRequest) -> Result<(), InboxError>;
}

pub struct HttpInboxBackend {
    http: Client,
    base_url: Url,
    token: String,
}

impl HttpInboxBackend {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, InboxError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|_| InboxError::InvalidAddress(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(InboxError::InvalidAddress(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InboxError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| InboxError::InvalidAddress(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, InboxError> {
        let url = self.endpoint(segments)?;
        debug!(%url, "backend: GET");
        let res = self.authorized(self.http.get(url)).send().await?;
        let res = check_status(res).await?;
        Ok(res.json().await?)
    }
}

async fn check_status(res: Response) -> Result<Response, InboxError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.json::<ApiError>().await.ok();
    Err(InboxError::Api {
        status: status.as_u16(),
        source: ApiException::from_response(status.as_u16(), body),
    })
}

#[async_trait]
impl InboxBackend for HttpInboxBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationPartner>, InboxError> {
        self.get_json(&["messages", "conversations"]).await
    }

    async fn resolve_room(&self, partner_id: &UserId) -> Result<RoomId, InboxError> {
        let body: RoomResponse = self
            .get_json(&["messages", "room", partner_id.as_str()])
            .await?;
        Ok(body.room_id)
    }

    async fn fetch_history(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, InboxError> {
        self.get_json(&["messages", room_id.as_str()]).await
    }

    async fn post_message(&self, request: SendMessageRequest) -> Result<(), InboxError> {
        let url = self.endpoint(&["messages"])?;
        debug!(%url, room_id = %request.room_id, "backend: POST message");
        let res = self
            .authorized(self.http.post(url))
            .json(&request)
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
