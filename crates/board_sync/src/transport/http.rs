use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{BoardId, CardId, ChecklistItemId, CommentId, FileId, ListId, UserId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        AttachFileRequest, BoardDto, CardDto, CardPatch, ChecklistItemDto, ChecklistItemPatch,
        CommentDto, CreateCardRequest, CreateChecklistItemRequest, CreateCommentRequest,
        CreateListRequest, FileDto, ListDto, MoveCardRequest, RenameListRequest,
        ReorderListsRequest, UpdateCommentRequest,
    },
};

use super::BoardApi;

/// Board API over JSON/HTTP. The acting user travels as a `user_id` query
/// parameter; session handling lives outside this crate.
pub struct HttpBoardApi {
    http: Client,
    server_url: String,
    user_id: UserId,
}

impl HttpBoardApi {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    pub fn with_timeout(
        server_url: impl Into<String>,
        user_id: UserId,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build board api http client")?;
        Ok(Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(api_failure(response).await.context(what.to_string()))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.send(request, what)
            .await?
            .json()
            .await
            .with_context(|| format!("{what}: invalid response body"))
    }
}

/// Turns an error response into an [`ApiException`], using the JSON error
/// body when the server sent one.
async fn api_failure(response: Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let exception = match serde_json::from_str::<ApiError>(&body) {
        Ok(api) => ApiException::from(api),
        Err(_) => {
            let message = if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            };
            ApiException::new(ErrorCode::from_status(status.as_u16()), message)
        }
    };
    anyhow::Error::new(exception)
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn fetch_full_board(&self, board_id: BoardId) -> Result<BoardDto> {
        let request = self.http.get(self.url(&format!("/boards/{}", board_id.0)));
        self.send_json(request, "fetch board").await
    }

    async fn create_list(&self, board_id: BoardId, request: CreateListRequest) -> Result<ListDto> {
        let request = self
            .http
            .post(self.url(&format!("/boards/{}/lists", board_id.0)))
            .json(&request);
        self.send_json(request, "create list").await
    }

    async fn rename_list(
        &self,
        board_id: BoardId,
        list_id: ListId,
        request: RenameListRequest,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!("/boards/{}/lists/{}", board_id.0, list_id.0)))
            .json(&request);
        self.send(request, "rename list").await.map(drop)
    }

    async fn delete_list(&self, board_id: BoardId, list_id: ListId) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("/boards/{}/lists/{}", board_id.0, list_id.0)));
        self.send(request, "delete list").await.map(drop)
    }

    async fn reorder_lists(&self, board_id: BoardId, request: ReorderListsRequest) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("/boards/{}/lists/order", board_id.0)))
            .json(&request);
        self.send(request, "reorder lists").await.map(drop)
    }

    async fn create_card(&self, board_id: BoardId, request: CreateCardRequest) -> Result<CardDto> {
        let request = self
            .http
            .post(self.url(&format!("/boards/{}/cards", board_id.0)))
            .json(&request);
        self.send_json(request, "create card").await
    }

    async fn update_card(
        &self,
        board_id: BoardId,
        card_id: CardId,
        patch: CardPatch,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!("/boards/{}/cards/{}", board_id.0, card_id.0)))
            .json(&patch);
        self.send(request, "update card").await.map(drop)
    }

    async fn move_card(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: MoveCardRequest,
    ) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!(
                "/boards/{}/cards/{}/position",
                board_id.0, card_id.0
            )))
            .json(&request);
        self.send(request, "move card").await.map(drop)
    }

    async fn delete_card(&self, board_id: BoardId, card_id: CardId) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("/boards/{}/cards/{}", board_id.0, card_id.0)));
        self.send(request, "delete card").await.map(drop)
    }

    async fn create_comment(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: CreateCommentRequest,
    ) -> Result<CommentDto> {
        let request = self
            .http
            .post(self.url(&format!(
                "/boards/{}/cards/{}/comments",
                board_id.0, card_id.0
            )))
            .json(&request);
        self.send_json(request, "create comment").await
    }

    async fn update_comment(
        &self,
        board_id: BoardId,
        card_id: CardId,
        comment_id: CommentId,
        request: UpdateCommentRequest,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!(
                "/boards/{}/cards/{}/comments/{}",
                board_id.0, card_id.0, comment_id.0
            )))
            .json(&request);
        self.send(request, "update comment").await.map(drop)
    }

    async fn delete_comment(
        &self,
        board_id: BoardId,
        card_id: CardId,
        comment_id: CommentId,
    ) -> Result<()> {
        let request = self.http.delete(self.url(&format!(
            "/boards/{}/cards/{}/comments/{}",
            board_id.0, card_id.0, comment_id.0
        )));
        self.send(request, "delete comment").await.map(drop)
    }

    async fn create_checklist_item(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: CreateChecklistItemRequest,
    ) -> Result<ChecklistItemDto> {
        let request = self
            .http
            .post(self.url(&format!(
                "/boards/{}/cards/{}/checklist",
                board_id.0, card_id.0
            )))
            .json(&request);
        self.send_json(request, "create checklist item").await
    }

    async fn update_checklist_item(
        &self,
        board_id: BoardId,
        card_id: CardId,
        item_id: ChecklistItemId,
        patch: ChecklistItemPatch,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!(
                "/boards/{}/cards/{}/checklist/{}",
                board_id.0, card_id.0, item_id.0
            )))
            .json(&patch);
        self.send(request, "update checklist item").await.map(drop)
    }

    async fn delete_checklist_item(
        &self,
        board_id: BoardId,
        card_id: CardId,
        item_id: ChecklistItemId,
    ) -> Result<()> {
        let request = self.http.delete(self.url(&format!(
            "/boards/{}/cards/{}/checklist/{}",
            board_id.0, card_id.0, item_id.0
        )));
        self.send(request, "delete checklist item").await.map(drop)
    }

    async fn attach_file(
        &self,
        board_id: BoardId,
        card_id: CardId,
        request: AttachFileRequest,
    ) -> Result<FileDto> {
        let request = self
            .http
            .post(self.url(&format!("/boards/{}/cards/{}/files", board_id.0, card_id.0)))
            .json(&request);
        self.send_json(request, "attach file").await
    }

    async fn detach_file(
        &self,
        board_id: BoardId,
        card_id: CardId,
        file_id: FileId,
    ) -> Result<()> {
        let request = self.http.delete(self.url(&format!(
            "/boards/{}/cards/{}/files/{}",
            board_id.0, card_id.0, file_id.0
        )));
        self.send(request, "detach file").await.map(drop)
    }
}
