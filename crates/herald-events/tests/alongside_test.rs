//! Integration tests for raising several events as one merged queue.

use std::sync::{Arc, Mutex};

use herald_events::{
    ArgsStatus, DispatchError, Event, EventArgs, Lifetime, ListenerError, PriorityBand,
};

type Log = Arc<Mutex<Vec<String>>>;

struct Pair {
    blocks: Event<(), u32>,
    items: Event<(), String>,
    log: Log,
}

fn record<P: Send + Sync + 'static>(event: &Event<(), P>, log: &Log, label: &str, priority: i64) {
    let log = Arc::clone(log);
    let label = label.to_string();
    event
        .listen(priority, move |_: &(), _: &EventArgs<(), P>| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        })
        .unwrap();
}

fn pair() -> Pair {
    Pair {
        blocks: Event::new("block-break"),
        items: Event::new("item-drop"),
        log: Arc::new(Mutex::new(Vec::new())),
    }
}

fn cancel_at<P: Send + Sync + 'static>(event: &Event<(), P>, priority: i64, cancelled: bool) {
    event
        .listen(priority, move |_: &(), args: &EventArgs<(), P>| {
            args.set_cancelled(cancelled)?;
            Ok(())
        })
        .unwrap();
}

fn observe<P: Send + Sync + 'static>(event: &Event<(), P>, priority: i64) -> Arc<Mutex<Option<bool>>> {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    event
        .listen(priority, move |_: &(), args: &EventArgs<(), P>| {
            *sink.lock().unwrap() = Some(args.is_cancelled());
            Ok(())
        })
        .unwrap();
    seen
}

#[test]
fn test_queues_merge_by_priority() {
    let p = pair();
    record(&p.blocks, &p.log, "blocks-0", 0);
    record(&p.blocks, &p.log, "blocks-20", 20);
    record(&p.items, &p.log, "items-10", 10);
    record(&p.items, &p.log, "items-30", 30);
    record(&p.blocks, &p.log, "blocks-post", PriorityBand::Post.as_value() + 5);
    record(&p.items, &p.log, "items-post", PriorityBand::Post.as_value());

    let block_args = EventArgs::new(3);
    let item_args = EventArgs::new("cobblestone".to_string());
    let items = p.items.participant(&item_args);

    p.blocks
        .raise_alongside(&(), &block_args, &[items.clone()], false)
        .unwrap();
    assert_eq!(
        *p.log.lock().unwrap(),
        vec!["blocks-0", "items-10", "blocks-20", "items-30"]
    );
    assert_eq!(block_args.status(), ArgsStatus::UsedPreEvent);
    assert_eq!(item_args.status(), ArgsStatus::UsedPreEvent);

    p.blocks
        .raise_post_event_alongside(&(), &block_args, &[items], false)
        .unwrap();
    assert_eq!(
        p.log.lock().unwrap()[4..],
        ["items-post".to_string(), "blocks-post".to_string()]
    );
    assert_eq!(block_args.status(), ArgsStatus::UsedPostEvent);
    assert_eq!(item_args.status(), ArgsStatus::UsedPostEvent);
}

#[test]
fn test_shared_cancellation_flows_across_events() {
    let p = pair();
    cancel_at(&p.blocks, 0, true);
    let seen = observe(&p.items, 10);

    let block_args = EventArgs::new(1);
    let item_args = EventArgs::new("gravel".to_string());
    p.blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], true)
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(true));
    assert!(block_args.is_cancelled());
    assert!(item_args.is_cancelled());
}

#[test]
fn test_shared_cancellation_can_be_reverted() {
    let p = pair();
    cancel_at(&p.blocks, 0, true);
    cancel_at(&p.items, 10, false);
    let seen = observe(&p.blocks, 20);

    let block_args = EventArgs::new(1);
    let item_args = EventArgs::new("sand".to_string());
    p.blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], true)
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(false));
    assert!(!block_args.is_cancelled());
    assert!(!item_args.is_cancelled());
}

#[test]
fn test_independent_cancellation_stays_separate() {
    let p = pair();
    cancel_at(&p.blocks, 0, true);
    let seen = observe(&p.items, 10);

    let block_args = EventArgs::new(1);
    let item_args = EventArgs::new("dirt".to_string());
    p.blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], false)
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(false));
    assert!(block_args.is_cancelled());
    assert!(!item_args.is_cancelled());
}

#[test]
fn test_related_args_cover_the_group() {
    let p = pair();
    let drops: Event<(), u8> = Event::new("xp-drop");
    p.items
        .register_dependent(&drops, |_, _| EventArgs::new(2))
        .unwrap();

    let block_args = EventArgs::new(1);
    let item_args = EventArgs::new("ore".to_string());
    p.blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], false)
        .unwrap();

    let related = block_args.related_args();
    assert_eq!(related.len(), 3);
    assert!(related.iter().any(|r| r.id() == item_args.id()));
    assert!(related
        .iter()
        .any(|r| r.owning_event().as_ref() == Some(drops.id())));
}

#[test]
fn test_invalid_member_leaves_group_untouched() {
    let p = pair();
    let block_args = EventArgs::new(1);
    let item_args = EventArgs::new("log".to_string());
    p.items.raise(&(), &item_args).unwrap();

    let result = p
        .blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], true);

    assert!(matches!(result, Err(DispatchError::MultipleUse { .. })));
    assert_eq!(block_args.status(), ArgsStatus::Unused);
    assert_eq!(item_args.status(), ArgsStatus::UsedPreEvent);
}

#[test]
fn test_post_alongside_before_pre() {
    let p = pair();
    let block_args = EventArgs::new(1);
    let item_args = EventArgs::new("glass".to_string());

    let result = p.blocks.raise_post_event_alongside(
        &(),
        &block_args,
        &[p.items.participant(&item_args)],
        false,
    );

    assert!(matches!(result, Err(DispatchError::UsedPostBeforePre { .. })));
    assert_eq!(block_args.status(), ArgsStatus::Unused);
    assert_eq!(item_args.status(), ArgsStatus::Unused);
}

#[test]
fn test_same_args_twice_is_rejected() {
    let p = pair();
    let block_args = EventArgs::new(1);
    let again = p.blocks.participant(&block_args);

    let result = p.blocks.raise_alongside(&(), &block_args, &[again], false);
    assert!(matches!(result, Err(DispatchError::InvalidArgument(_))));
    assert_eq!(block_args.status(), ArgsStatus::Unused);
}

#[test]
fn test_failure_in_second_event_stops_the_merged_drain() {
    let p = pair();
    record(&p.blocks, &p.log, "blocks-0", 0);
    p.items
        .listen(10_i64, |_: &(), _: &EventArgs<(), String>| {
            Err(ListenerError::failed("inventory full"))
        })
        .unwrap();
    record(&p.blocks, &p.log, "blocks-20", 20);
    record(&p.items, &p.log, "items-30", 30);

    let block_args = EventArgs::new(7);
    let item_args = EventArgs::new("dirt".to_string());
    let result = p
        .blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], false);

    match result {
        Err(DispatchError::Listener { event, source }) => {
            assert_eq!(&event, p.items.id());
            assert_eq!(source.to_string(), "inventory full");
        }
        other => panic!("expected listener failure, got {:?}", other),
    }
    assert_eq!(*p.log.lock().unwrap(), vec!["blocks-0"]);
    assert_eq!(block_args.status(), ArgsStatus::UsedPreEvent);
    assert_eq!(item_args.status(), ArgsStatus::UsedPreEvent);
}

#[test]
fn test_failed_expansion_stores_no_post_queue() {
    let p = pair();
    record(&p.blocks, &p.log, "blocks-0", 0);
    record(&p.blocks, &p.log, "blocks-post", PriorityBand::Post.as_value());
    p.items
        .register_dependent_with(&p.items, |_, _| EventArgs::new(String::new()), Lifetime::Ephemeral)
        .unwrap();

    let block_args = EventArgs::new(2);
    let item_args = EventArgs::new("stone".to_string());
    let result = p
        .blocks
        .raise_alongside(&(), &block_args, &[p.items.participant(&item_args)], false);

    assert!(matches!(result, Err(DispatchError::DependencyCycle(_))));
    assert_eq!(block_args.status(), ArgsStatus::UsedPreEvent);
    assert_eq!(item_args.status(), ArgsStatus::UsedPreEvent);

    p.blocks.raise_post_event(&(), &block_args).unwrap();
    assert!(p.log.lock().unwrap().is_empty());
    assert_eq!(block_args.status(), ArgsStatus::UsedPostEvent);
}
