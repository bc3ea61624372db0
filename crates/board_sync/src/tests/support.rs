//! In-memory collaborators for engine tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{
        BoardId, CardId, ChecklistItemId, CommentId, FileId, ListId, Member, PermissionSettings,
        Priority, Role, UserId, Visibility,
    },
    error::{ApiException, ErrorCode},
    protocol::{
        AttachFileRequest, BoardDto, CardDto, CardPatch, ChecklistItemDto, ChecklistItemPatch,
        CommentDto, CreateCardRequest, CreateChecklistItemRequest, CreateCommentRequest,
        CreateListRequest, FileDto, ListDto, MoveCardRequest, PushEnvelope, RenameListRequest,
        ReorderListsRequest, UpdateCommentRequest,
    },
};
use tokio::sync::{broadcast, Notify};

use crate::{
    cache::BoardCache,
    loader::BoardLoader,
    mutation::MutationEngine,
    transport::{BoardApi, PushChannel},
    SyncEvent,
};

pub(crate) const BOARD: BoardId = BoardId(1);
pub(crate) const OWNER: UserId = UserId(1);
pub(crate) const MEMBER: UserId = UserId(2);
pub(crate) const VIEWER: UserId = UserId(3);
pub(crate) const OUTSIDER: UserId = UserId(9);

pub(crate) const LIST_A: ListId = ListId(10);
pub(crate) const LIST_B: ListId = ListId(20);
pub(crate) const LIST_C: ListId = ListId(30);
pub(crate) const CARD_X: CardId = CardId(100);
pub(crate) const CARD_Y: CardId = CardId(101);
pub(crate) const CARD_Z: CardId = CardId(102);
pub(crate) const CARD_W: CardId = CardId(200);

pub(crate) fn card(card_id: CardId, list_id: ListId, order_index: i64, title: &str) -> CardDto {
    CardDto {
        card_id,
        list_id,
        title: title.to_string(),
        description: None,
        priority: Priority::Medium,
        label: None,
        label_color: None,
        start_date: None,
        due_date: None,
        is_complete: false,
        order_index,
        assignee_id: None,
        checklist: Vec::new(),
        comments: Vec::new(),
        files: Vec::new(),
    }
}

pub(crate) fn completed_card(
    card_id: CardId,
    list_id: ListId,
    order_index: i64,
    title: &str,
) -> CardDto {
    CardDto {
        is_complete: true,
        ..card(card_id, list_id, order_index, title)
    }
}

pub(crate) fn list(list_id: ListId, order_index: i64, title: &str, cards: Vec<CardDto>) -> ListDto {
    ListDto {
        list_id,
        title: title.to_string(),
        order_index,
        cards,
    }
}

pub(crate) fn comment(comment_id: i64, parent_id: Option<i64>, content: &str) -> CommentDto {
    CommentDto {
        comment_id: CommentId(comment_id),
        content: content.to_string(),
        writer_id: OWNER,
        parent_id: parent_id.map(CommentId),
        created_at: None,
    }
}

pub(crate) fn members() -> Vec<Member> {
    vec![
        Member {
            user_id: OWNER,
            role: Role::Owner,
            display_name: Some("owner".into()),
        },
        Member {
            user_id: MEMBER,
            role: Role::Member,
            display_name: Some("member".into()),
        },
        Member {
            user_id: VIEWER,
            role: Role::Viewer,
            display_name: None,
        },
    ]
}

pub(crate) fn board(lists: Vec<ListDto>) -> BoardDto {
    BoardDto {
        board_id: BOARD,
        title: "Roadmap".into(),
        description: None,
        visibility: Visibility::Team,
        permissions: PermissionSettings::default(),
        members: members(),
        lists,
    }
}

/// List A (order 0) holding card X; list B (order 1) empty.
pub(crate) fn scenario_board() -> BoardDto {
    board(vec![
        list(LIST_A, 0, "A", vec![card(CARD_X, LIST_A, 0, "X")]),
        list(LIST_B, 1, "B", Vec::new()),
    ])
}

/// Three lists; Z in A is already complete and X carries a comment thread.
pub(crate) fn sample_board() -> BoardDto {
    let mut x = card(CARD_X, LIST_A, 0, "X");
    x.comments = vec![
        comment(1, None, "root"),
        comment(2, Some(1), "reply"),
        comment(3, Some(2), "nested"),
    ];
    x.checklist = vec![ChecklistItemDto {
        item_id: ChecklistItemId(1),
        title: "write tests".into(),
        done: false,
    }];
    x.files = vec![FileDto {
        file_id: FileId(1),
        filename: "plan.pdf".into(),
        url: None,
        size_bytes: 2048,
        mime_type: Some("application/pdf".into()),
    }];
    board(vec![
        list(
            LIST_A,
            0,
            "A",
            vec![
                x,
                card(CARD_Y, LIST_A, 1, "Y"),
                completed_card(CARD_Z, LIST_A, 2, "Z"),
            ],
        ),
        list(LIST_B, 1, "B", vec![card(CARD_W, LIST_B, 0, "W")]),
        list(LIST_C, 2, "C", Vec::new()),
    ])
}

/// Stand-in Board API holding one board and applying writes to it the way
/// the server would.
pub(crate) struct FakeBoardApi {
    board: Mutex<BoardDto>,
    failure: Mutex<Option<(ErrorCode, String)>>,
    fail_fetch: AtomicBool,
    calls: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    next_id: AtomicI64,
    mutation_gate: Mutex<Option<Arc<Notify>>>,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBoardApi {
    pub(crate) fn new(board: BoardDto) -> Arc<Self> {
        Arc::new(Self {
            board: Mutex::new(board),
            failure: Mutex::new(None),
            fail_fetch: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            next_id: AtomicI64::new(1000),
            mutation_gate: Mutex::new(None),
            fetch_gate: Mutex::new(None),
        })
    }

    pub(crate) fn fail_writes(&self, code: ErrorCode, message: &str) {
        *self.failure.lock().unwrap() = Some((code, message.to_string()));
    }

    pub(crate) fn accept_writes(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub(crate) fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// The next write waits until the returned handle is notified.
    pub(crate) fn hold_next_write(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.mutation_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn hold_next_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn board(&self) -> BoardDto {
        self.board.lock().unwrap().clone()
    }

    /// Simulates a change made by another collaborator.
    pub(crate) fn edit_board(&self, edit: impl FnOnce(&mut BoardDto)) {
        edit(&mut self.board.lock().unwrap());
    }

    fn issue_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn begin(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        let gate = self.mutation_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some((code, message)) => Err(anyhow::Error::new(ApiException::new(code, message))),
            None => Ok(()),
        }
    }

    fn with_card<T>(&self, card_id: CardId, edit: impl FnOnce(&mut CardDto) -> T) -> Result<T> {
        let mut board = self.board.lock().unwrap();
        board
            .lists
            .iter_mut()
            .flat_map(|list| list.cards.iter_mut())
            .find(|card| card.card_id == card_id)
            .map(edit)
            .ok_or_else(|| anyhow!(ApiException::new(ErrorCode::NotFound, "card not found")))
    }
}

fn renumber(cards: &mut [CardDto]) {
    for (index, card) in cards.iter_mut().enumerate() {
        card.order_index = index as i64;
    }
}

#[async_trait]
impl BoardApi for FakeBoardApi {
    async fn fetch_full_board(&self, board_id: BoardId) -> Result<BoardDto> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.board();
        let gate = self.fetch_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        if snapshot.board_id != board_id {
            return Err(anyhow!(ApiException::new(ErrorCode::NotFound, "no such board")));
        }
        Ok(snapshot)
    }

    async fn create_list(&self, _board_id: BoardId, request: CreateListRequest) -> Result<ListDto> {
        self.begin(format!("create_list {}", request.title)).await?;
        let created = list(
            ListId(self.issue_id()),
            request.order_index,
            &request.title,
            Vec::new(),
        );
        self.board.lock().unwrap().lists.push(created.clone());
        Ok(created)
    }

    async fn rename_list(
        &self,
        _board_id: BoardId,
        list_id: ListId,
        request: RenameListRequest,
    ) -> Result<()> {
        self.begin(format!("rename_list {list_id}")).await?;
        let mut board = self.board.lock().unwrap();
        let list = board
            .lists
            .iter_mut()
            .find(|list| list.list_id == list_id)
            .ok_or_else(|| anyhow!(ApiException::new(ErrorCode::NotFound, "list not found")))?;
        list.title = request.title;
        Ok(())
    }

    async fn delete_list(&self, _board_id: BoardId, list_id: ListId) -> Result<()> {
        self.begin(format!("delete_list {list_id}")).await?;
        let mut board = self.board.lock().unwrap();
        board.lists.retain(|list| list.list_id != list_id);
        let mut lists: Vec<&mut ListDto> = board.lists.iter_mut().collect();
        lists.sort_by_key(|list| (list.order_index, list.list_id));
        for (index, list) in lists.into_iter().enumerate() {
            list.order_index = index as i64;
        }
        Ok(())
    }

    async fn reorder_lists(&self, _board_id: BoardId, request: ReorderListsRequest) -> Result<()> {
        let order: Vec<String> = request
            .lists
            .iter()
            .map(|entry| format!("{}:{}", entry.list_id, entry.order_index))
            .collect();
        self.begin(format!("reorder_lists {}", order.join(","))).await?;
        let mut board = self.board.lock().unwrap();
        for entry in request.lists {
            if let Some(list) = board.lists.iter_mut().find(|list| list.list_id == entry.list_id) {
                list.order_index = entry.order_index;
            }
        }
        Ok(())
    }

    async fn create_card(&self, _board_id: BoardId, request: CreateCardRequest) -> Result<CardDto> {
        self.begin(format!("create_card {}", request.title)).await?;
        let created = card(
            CardId(self.issue_id()),
            request.list_id,
            request.order_index,
            &request.title,
        );
        let mut board = self.board.lock().unwrap();
        let list = board
            .lists
            .iter_mut()
            .find(|list| list.list_id == request.list_id)
            .ok_or_else(|| anyhow!(ApiException::new(ErrorCode::NotFound, "list not found")))?;
        list.cards.push(created.clone());
        Ok(created)
    }

    async fn update_card(&self, _board_id: BoardId, card_id: CardId, patch: CardPatch) -> Result<()> {
        self.begin(format!("update_card {card_id}")).await?;
        self.with_card(card_id, |card| {
            if let Some(title) = patch.title {
                card.title = title;
            }
            if let Some(description) = patch.description {
                card.description = description;
            }
            if let Some(priority) = patch.priority {
                card.priority = priority;
            }
            if let Some(is_complete) = patch.is_complete {
                card.is_complete = is_complete;
            }
            if let Some(assignee_id) = patch.assignee_id {
                card.assignee_id = assignee_id;
            }
        })
    }

    async fn move_card(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        request: MoveCardRequest,
    ) -> Result<()> {
        self.begin(format!(
            "move_card {card_id} -> {}@{} complete={}",
            request.list_id, request.order_index, request.is_complete
        ))
        .await?;
        let mut board = self.board.lock().unwrap();
        let mut moved = None;
        for list in &mut board.lists {
            if let Some(index) = list.cards.iter().position(|card| card.card_id == card_id) {
                moved = Some(list.cards.remove(index));
                list.cards.sort_by_key(|card| (card.order_index, card.card_id));
                renumber(&mut list.cards);
            }
        }
        let mut moved = moved
            .ok_or_else(|| anyhow!(ApiException::new(ErrorCode::NotFound, "card not found")))?;
        let destination = board
            .lists
            .iter_mut()
            .find(|list| list.list_id == request.list_id)
            .ok_or_else(|| anyhow!(ApiException::new(ErrorCode::NotFound, "list not found")))?;
        moved.list_id = request.list_id;
        moved.is_complete = request.is_complete;
        let at = (request.order_index.max(0) as usize).min(destination.cards.len());
        destination.cards.insert(at, moved);
        renumber(&mut destination.cards);
        Ok(())
    }

    async fn delete_card(&self, _board_id: BoardId, card_id: CardId) -> Result<()> {
        self.begin(format!("delete_card {card_id}")).await?;
        let mut board = self.board.lock().unwrap();
        for list in &mut board.lists {
            list.cards.retain(|card| card.card_id != card_id);
        }
        Ok(())
    }

    async fn create_comment(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        request: CreateCommentRequest,
    ) -> Result<CommentDto> {
        self.begin(format!("create_comment {card_id}")).await?;
        let created = CommentDto {
            comment_id: CommentId(self.issue_id()),
            content: request.content,
            writer_id: OWNER,
            parent_id: request.parent_id,
            created_at: None,
        };
        let stored = created.clone();
        self.with_card(card_id, move |card| card.comments.push(stored))?;
        Ok(created)
    }

    async fn update_comment(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        comment_id: CommentId,
        request: UpdateCommentRequest,
    ) -> Result<()> {
        self.begin(format!("update_comment {comment_id}")).await?;
        self.with_card(card_id, |card| {
            for comment in &mut card.comments {
                if comment.comment_id == comment_id {
                    comment.content = request.content.clone();
                }
            }
        })
    }

    async fn delete_comment(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        comment_id: CommentId,
    ) -> Result<()> {
        self.begin(format!("delete_comment {comment_id}")).await?;
        self.with_card(card_id, |card| {
            let mut doomed = vec![comment_id];
            let mut cursor = 0;
            while cursor < doomed.len() {
                let parent = doomed[cursor];
                doomed.extend(
                    card.comments
                        .iter()
                        .filter(|comment| comment.parent_id == Some(parent))
                        .map(|comment| comment.comment_id),
                );
                cursor += 1;
            }
            card.comments
                .retain(|comment| !doomed.contains(&comment.comment_id));
        })
    }

    async fn create_checklist_item(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        request: CreateChecklistItemRequest,
    ) -> Result<ChecklistItemDto> {
        self.begin(format!("create_checklist_item {card_id}")).await?;
        let created = ChecklistItemDto {
            item_id: ChecklistItemId(self.issue_id()),
            title: request.title,
            done: false,
        };
        let stored = created.clone();
        self.with_card(card_id, move |card| card.checklist.push(stored))?;
        Ok(created)
    }

    async fn update_checklist_item(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        item_id: ChecklistItemId,
        patch: ChecklistItemPatch,
    ) -> Result<()> {
        self.begin(format!("update_checklist_item {item_id}")).await?;
        self.with_card(card_id, |card| {
            for item in &mut card.checklist {
                if item.item_id == item_id {
                    if let Some(title) = patch.title.clone() {
                        item.title = title;
                    }
                    if let Some(done) = patch.done {
                        item.done = done;
                    }
                }
            }
        })
    }

    async fn delete_checklist_item(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        item_id: ChecklistItemId,
    ) -> Result<()> {
        self.begin(format!("delete_checklist_item {item_id}")).await?;
        self.with_card(card_id, |card| {
            card.checklist.retain(|item| item.item_id != item_id)
        })
    }

    async fn attach_file(
        &self,
        _board_id: BoardId,
        card_id: CardId,
        request: AttachFileRequest,
    ) -> Result<FileDto> {
        self.begin(format!("attach_file {card_id}")).await?;
        let created = FileDto {
            file_id: FileId(self.issue_id()),
            filename: request.filename,
            url: Some("https://files.example.test/stored".into()),
            size_bytes: request.size_bytes,
            mime_type: request.mime_type,
        };
        let stored = created.clone();
        self.with_card(card_id, move |card| card.files.push(stored))?;
        Ok(created)
    }

    async fn detach_file(&self, _board_id: BoardId, card_id: CardId, file_id: FileId) -> Result<()> {
        self.begin(format!("detach_file {file_id}")).await?;
        self.with_card(card_id, |card| card.files.retain(|file| file.file_id != file_id))
    }
}

/// Push channel whose readiness and traffic the test drives directly.
pub(crate) struct LocalPushChannel {
    connected: AtomicBool,
    topics: Mutex<HashMap<String, broadcast::Sender<PushEnvelope>>>,
    subscribe_calls: AtomicUsize,
    unsubscribed: Mutex<Vec<String>>,
}

impl LocalPushChannel {
    pub(crate) fn new(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            topics: Mutex::new(HashMap::new()),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribed: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns how many receivers got the envelope.
    pub(crate) fn publish(&self, topic: &str, sender_id: UserId, kind: &str) -> usize {
        let topics = self.topics.lock().unwrap();
        topics
            .get(topic)
            .and_then(|sender| {
                sender
                    .send(PushEnvelope {
                        sender_id,
                        kind: kind.to_string(),
                        payload: json!({ "board_id": BOARD.0 }),
                    })
                    .ok()
            })
            .unwrap_or(0)
    }

    pub(crate) fn drop_topic(&self, topic: &str) {
        self.topics.lock().unwrap().remove(topic);
    }

    pub(crate) fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn receiver_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub(crate) fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushChannel for LocalPushChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<PushEnvelope>> {
        if !self.is_connected() {
            return Err(anyhow!("not connected"));
        }
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut topics = self.topics.lock().unwrap();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(16).0);
        Ok(sender.subscribe())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.unsubscribed.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}

/// Engine wired to a fake API with the board already loaded.
pub(crate) struct Harness {
    pub(crate) api: Arc<FakeBoardApi>,
    pub(crate) cache: Arc<BoardCache>,
    pub(crate) loader: Arc<BoardLoader>,
    pub(crate) engine: Arc<MutationEngine>,
    pub(crate) events: broadcast::Receiver<SyncEvent>,
}

impl Harness {
    pub(crate) async fn load(dto: BoardDto, actor: UserId) -> Self {
        let api = FakeBoardApi::new(dto);
        let cache = Arc::new(BoardCache::new(64));
        let loader = BoardLoader::new(api.clone(), Arc::clone(&cache));
        let (sender, events) = broadcast::channel(64);
        let engine = Arc::new(MutationEngine::new(
            api.clone(),
            Arc::clone(&cache),
            Arc::clone(&loader),
            sender,
            actor,
        ));
        loader.load(BOARD).await.expect("initial load");
        Self {
            api,
            cache,
            loader,
            engine,
            events,
        }
    }

    pub(crate) async fn view(&self) -> Arc<crate::model::BoardView> {
        self.cache.get(BOARD).await.expect("board loaded")
    }

    /// Lets every scheduled refetch finish.
    pub(crate) async fn settle(&self) {
        self.loader.wait_idle(BOARD).await;
    }
}

pub(crate) fn card_ids(view: &crate::model::BoardView, list_id: ListId) -> Vec<CardId> {
    view.list(list_id)
        .map(|list| list.cards.iter().map(|card| card.card_id).collect())
        .unwrap_or_default()
}
