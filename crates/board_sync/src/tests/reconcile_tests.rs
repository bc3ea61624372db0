use super::*;
use crate::test_support::*;

fn subscriber(
    h: &Harness,
    push: &Arc<LocalPushChannel>,
) -> (ReconciliationSubscriber, broadcast::Receiver<SyncEvent>) {
    let (sender, events) = broadcast::channel(16);
    let subscriber = ReconciliationSubscriber::new(
        push.clone(),
        Arc::clone(&h.loader),
        sender,
        OWNER,
        Duration::from_millis(5),
    );
    (subscriber, events)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn next_event(events: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event channel open")
}

#[tokio::test]
async fn waits_for_the_channel_then_subscribes_once() {
    let h = Harness::load(scenario_board(), OWNER).await;
    let push = LocalPushChannel::new(false);
    let (subscriber, _events) = subscriber(&h, &push);

    subscriber.mount(BOARD).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(push.subscribe_count(), 0);
    assert!(subscriber.is_mounted(BOARD).await);

    push.set_connected(true);
    eventually(|| push.subscribe_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(push.subscribe_count(), 1);
    assert_eq!(push.receiver_count(&BOARD.topic()), 1);
}

#[tokio::test]
async fn own_changes_do_not_trigger_refetch() {
    let h = Harness::load(scenario_board(), OWNER).await;
    let push = LocalPushChannel::new(true);
    let (subscriber, mut events) = subscriber(&h, &push);
    subscriber.mount(BOARD).await;
    eventually(|| push.receiver_count(&BOARD.topic()) == 1).await;

    assert_eq!(push.publish(&BOARD.topic(), OWNER, "card_moved"), 1);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(h.api.fetch_count(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn remote_change_refetches_server_truth() {
    let h = Harness::load(scenario_board(), OWNER).await;
    let push = LocalPushChannel::new(true);
    let (subscriber, mut events) = subscriber(&h, &push);
    subscriber.mount(BOARD).await;
    eventually(|| push.receiver_count(&BOARD.topic()) == 1).await;

    h.api.edit_board(|board| {
        let x = board.lists[0].cards.remove(0);
        board.lists[1].cards.push(x);
    });
    push.publish(&BOARD.topic(), MEMBER, "card_moved");

    assert_eq!(
        next_event(&mut events).await,
        SyncEvent::RemoteChange {
            board_id: BOARD,
            kind: "card_moved".into()
        }
    );
    eventually(|| h.api.fetch_count() >= 2).await;
    h.settle().await;
    assert_eq!(card_ids(&*h.view().await, LIST_B), vec![CARD_X]);
}

#[tokio::test]
async fn unmount_tears_down_only_that_board() {
    let h = Harness::load(scenario_board(), OWNER).await;
    let push = LocalPushChannel::new(true);
    let (subscriber, _events) = subscriber(&h, &push);
    let other = BoardId(2);

    subscriber.mount(BOARD).await;
    subscriber.mount(other).await;
    eventually(|| {
        push.receiver_count(&BOARD.topic()) == 1 && push.receiver_count(&other.topic()) == 1
    })
    .await;

    assert!(subscriber.unmount(other).await);
    assert!(!subscriber.unmount(other).await);
    assert!(subscriber.is_mounted(BOARD).await);
    assert!(!subscriber.is_mounted(other).await);
    assert_eq!(push.unsubscribed(), vec![other.topic()]);
    eventually(|| push.receiver_count(&other.topic()) == 0).await;

    push.publish(&BOARD.topic(), MEMBER, "list_renamed");
    eventually(|| h.api.fetch_count() >= 2).await;
}

#[tokio::test]
async fn remounting_replaces_the_subscription() {
    let h = Harness::load(scenario_board(), OWNER).await;
    let push = LocalPushChannel::new(true);
    let (subscriber, _events) = subscriber(&h, &push);

    subscriber.mount(BOARD).await;
    eventually(|| push.receiver_count(&BOARD.topic()) == 1).await;
    subscriber.mount(BOARD).await;
    eventually(|| push.subscribe_count() == 2).await;

    eventually(|| push.receiver_count(&BOARD.topic()) == 1).await;
}

#[tokio::test]
async fn closed_topic_reports_disconnect_and_keeps_the_model() {
    let h = Harness::load(scenario_board(), OWNER).await;
    let push = LocalPushChannel::new(true);
    let (subscriber, mut events) = subscriber(&h, &push);
    subscriber.mount(BOARD).await;
    eventually(|| push.receiver_count(&BOARD.topic()) == 1).await;
    let before = h.view().await;

    push.drop_topic(&BOARD.topic());

    assert_eq!(
        next_event(&mut events).await,
        SyncEvent::PushDisconnected { board_id: BOARD }
    );
    assert!(Arc::ptr_eq(&h.view().await, &before));
    assert_eq!(h.api.fetch_count(), 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while subscriber.is_mounted(BOARD).await {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("listener stops after its topic closed");
}
