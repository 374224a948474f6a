use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use chat_state_sdk::client::{ChatClient, ChatClientConfig};
use chat_state_sdk::state::diff::{DiffOptions, ListChange};
use chat_state_sdk::state::events::ChatEvent;
use chat_state_sdk::state::model::{
    ChannelId, ChannelListSortingKey, ChatChannel, ChatMessage, MessageId, UserId,
};
use chat_state_sdk::state::observer::{ConsumptionContext, DeliveryMode, ListObserver};
use chat_state_sdk::state::query::{ChannelListQuery, FetchSpecification, Filter, Sorting};
use chat_state_sdk::state::remote::InMemoryRemoteService;

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn channel(index: i64, team: &str) -> ChatChannel {
    let mut channel = ChatChannel::new(
        ChannelId::from_parts("messaging", &format!("c{index:02}")),
        at(index * 1000),
    );
    channel.team = Some(team.to_owned());
    channel
}

fn message(index: i64) -> ChatMessage {
    ChatMessage::new(
        MessageId::new(format!("m{index:03}")),
        ChannelId::from_parts("messaging", "general"),
        UserId::new("author"),
        format!("message {index}"),
        at(1_000 + index),
    )
}

fn setup() -> (ChatClient, Arc<InMemoryRemoteService>) {
    let remote = Arc::new(InMemoryRemoteService::new());
    let config = ChatClientConfig::default().with_delivery(DeliveryMode::Immediate);
    let client = ChatClient::new(config, remote.clone()).unwrap();
    (client, remote)
}

fn by_update_time(page_size: usize) -> ChannelListQuery {
    ChannelListQuery::new(Filter::All)
        .with_sort(vec![Sorting::descending(ChannelListSortingKey::UpdatedAt)])
        .with_page_size(page_size)
}

fn ids(channels: &[ChatChannel]) -> Vec<String> {
    channels.iter().map(|channel| channel.cid.to_string()).collect()
}

fn expected_ids(range: impl Iterator<Item = i64>) -> Vec<String> {
    range.map(|index| format!("messaging:c{index:02}")).collect()
}

#[tokio::test]
async fn paging_through_a_list_until_exhausted() {
    let (client, remote) = setup();
    remote.seed_channels((0..45).map(|index| channel(index, "red")));
    let list = client.make_channel_list(by_update_time(20));

    let first = list.get().await.unwrap();
    assert_eq!(ids(&first), expected_ids((25..45).rev()));
    let second = list.load_more(None).await.unwrap();
    assert_eq!(ids(&second), expected_ids((5..25).rev()));
    assert!(!list.state().get().has_loaded_all);

    let third = list.load_more(None).await.unwrap();
    assert_eq!(ids(&third), expected_ids((0..5).rev()));
    let state = list.state().get();
    assert!(state.has_loaded_all);
    assert_eq!(state.items.len(), 45);
    assert_eq!(ids(state.items.as_slice()), expected_ids((0..45).rev()));

    let requests = remote.request_count();
    let again = list.load_more(None).await.unwrap();
    assert_eq!(ids(&again), ids(&third));
    assert_eq!(remote.request_count(), requests);
}

#[tokio::test]
async fn newly_matching_entity_is_inserted_once_in_sort_position() {
    let (client, remote) = setup();
    remote.seed_channels([channel(1, "red"), channel(3, "red"), channel(2, "blue")]);
    let query = ChannelListQuery::new(Filter::equal("team", "red"))
        .with_sort(vec![Sorting::descending(ChannelListSortingKey::UpdatedAt)]);
    let list = client.make_channel_list(query.clone());
    list.get().await.unwrap();

    let observer = ListObserver::<ChatChannel>::new(
        client.store(),
        FetchSpecification::linked(query.list_key(), query.sort.clone()),
        ConsumptionContext::immediate(),
        DiffOptions::default(),
    );
    let (snapshot, updates) = observer.start_observing();
    assert_eq!(snapshot.len(), 2);

    let mut recruited = channel(2, "red");
    recruited.name = Some("recruited".to_owned());
    client
        .events()
        .publish(ChatEvent::ChannelUpdated { channel: recruited })
        .await
        .unwrap();

    let update = updates.try_next().unwrap();
    assert_eq!(update.changes.len(), 1);
    match &update.changes[0] {
        ListChange::Insert { item, index } => {
            assert_eq!(item.cid.to_string(), "messaging:c02");
            assert_eq!(*index, 1);
        }
        other => panic!("expected an insert, got {other:?}"),
    }
    assert_eq!(
        ids(list.state().get().items.as_slice()),
        expected_ids([3, 2, 1].into_iter())
    );
}

#[tokio::test]
async fn jumping_to_a_distant_message_replaces_the_window() {
    let (client, remote) = setup();
    let general = ChatChannel::new(ChannelId::from_parts("messaging", "general"), at(0));
    remote.seed_channels([general.clone()]);
    remote.seed_messages((0..100).map(message));
    let chat = client.make_chat(general.cid.clone());

    chat.load_first_page().await.unwrap();
    chat.load_previous(None, Some(25)).await.unwrap();
    assert_eq!(chat.messages().len(), 50);
    assert!(chat.pagination().has_loaded_all_newer);

    let around = chat
        .load_around(MessageId::new("m010"), Some(10))
        .await
        .unwrap();
    assert_eq!(around.len(), 10);

    let messages = chat.messages();
    let loaded: Vec<&str> = messages.iter().map(|message| message.id.as_str()).collect();
    let expected: Vec<String> = (5..15).map(|index| format!("m{index:03}")).collect();
    assert_eq!(loaded, expected);

    let pagination = chat.pagination();
    assert!(!pagination.has_loaded_all_older);
    assert!(!pagination.has_loaded_all_newer);
    assert!(chat.state().get().pagination.is_jumping_to_message);
}

#[tokio::test]
async fn overlapping_loads_in_one_direction_fetch_once() {
    let (client, remote) = setup();
    remote.seed_channels((0..45).map(|index| channel(index, "red")));
    let list = client.make_channel_list(by_update_time(20));
    list.get().await.unwrap();

    let pause = remote.pause().await;
    let release = async move {
        tokio::task::yield_now().await;
        drop(pause);
    };
    let (in_flight, rejected, ()) =
        tokio::join!(list.load_more(None), list.load_more(None), release);

    assert_eq!(ids(&in_flight.unwrap()), expected_ids((5..25).rev()));
    assert_eq!(ids(&rejected.unwrap()), expected_ids((25..45).rev()));
    assert_eq!(remote.request_count(), 2);
    assert_eq!(list.state().get().items.len(), 40);
}

#[tokio::test]
async fn dynamic_membership_follows_the_latest_event() {
    let (client, remote) = setup();
    remote.seed_channels([channel(1, "red"), channel(2, "blue")]);
    let list = client.make_channel_list(ChannelListQuery::new(Filter::equal("team", "red")));
    list.get().await.unwrap();
    assert_eq!(ids(list.state().get().items.as_slice()), expected_ids([1].into_iter()));

    client
        .events()
        .publish(ChatEvent::ChannelUpdated {
            channel: channel(2, "red"),
        })
        .await
        .unwrap();
    client
        .events()
        .publish(ChatEvent::ChannelUpdated {
            channel: channel(1, "blue"),
        })
        .await
        .unwrap();
    assert_eq!(ids(list.state().get().items.as_slice()), expected_ids([2].into_iter()));

    client
        .events()
        .publish(ChatEvent::ChannelUpdated {
            channel: channel(2, "green"),
        })
        .await
        .unwrap();
    assert!(list.state().get().items.is_empty());
}

fn red_team(page_size: usize) -> ChannelListQuery {
    ChannelListQuery::new(Filter::equal("team", "red"))
        .with_sort(vec![Sorting::descending(ChannelListSortingKey::UpdatedAt)])
        .with_page_size(page_size)
}

#[tokio::test]
async fn unlinked_entities_do_not_shift_later_pages() {
    let (client, remote) = setup();
    remote.seed_channels((0..5).map(|index| channel(index, "red")));
    let list = client.make_channel_list(red_team(2));
    let first = list.get().await.unwrap();
    assert_eq!(ids(&first), expected_ids([4, 3].into_iter()));

    remote.seed_channels([channel(4, "blue")]);
    client
        .events()
        .publish(ChatEvent::ChannelUpdated {
            channel: channel(4, "blue"),
        })
        .await
        .unwrap();
    assert_eq!(ids(list.state().get().items.as_slice()), expected_ids([3].into_iter()));

    let second = list.load_more(None).await.unwrap();
    assert_eq!(ids(&second), expected_ids([2, 1].into_iter()));
    assert!(!list.state().get().has_loaded_all);
    list.load_more(None).await.unwrap();

    let state = list.state().get();
    assert!(state.has_loaded_all);
    assert_eq!(ids(state.items.as_slice()), expected_ids((0..4).rev()));
}

#[tokio::test]
async fn event_linked_entity_from_a_later_page_is_neither_skipped_nor_duplicated() {
    let (client, remote) = setup();
    remote.seed_channels((0..5).map(|index| channel(index, "red")));
    let list = client.make_channel_list(red_team(2));
    list.get().await.unwrap();

    let mut renamed = channel(1, "red");
    renamed.name = Some("renamed".to_owned());
    client
        .events()
        .publish(ChatEvent::ChannelUpdated { channel: renamed })
        .await
        .unwrap();
    assert_eq!(
        ids(list.state().get().items.as_slice()),
        expected_ids([4, 3, 1].into_iter())
    );

    let second = list.load_more(None).await.unwrap();
    assert_eq!(ids(&second), expected_ids([2, 1].into_iter()));
    list.load_more(None).await.unwrap();

    let state = list.state().get();
    assert!(state.has_loaded_all);
    assert_eq!(ids(state.items.as_slice()), expected_ids((0..5).rev()));
}
