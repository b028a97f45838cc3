use std::sync::Arc;
use std::time::Duration;

use memfs_mamont::config::{Config, WatchConfig};
use memfs_mamont::fs::MemFileSystem;
use memfs_mamont::watch::{EventFilter, EventKind, WatchService, MAX_QUEUE_SIZE};

fn watched_fs() -> Arc<MemFileSystem> {
    MemFileSystem::new(
        Config::unix()
            .watch_service_configuration(WatchConfig { interval: Duration::from_millis(4) })
            .build()
            .unwrap(),
    )
    .unwrap()
}

/// Waits out at least one polling tick.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(40)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_then_delete_arrives_in_order() {
    let fs = watched_fs();
    let dir = fs.path("/d").unwrap();
    fs.create_directory(&dir).unwrap();

    let watch = fs.new_watch_service(tokio::runtime::Handle::current());
    let key = watch.register(&dir, EventFilter::CREATE | EventFilter::DELETE).unwrap();

    let child = fs.path("/d/a").unwrap();
    fs.create_file(&child).unwrap();
    settle().await;
    fs.delete(&child).unwrap();
    settle().await;

    let signalled = watch.poll().unwrap().expect("key should be signalled");
    assert!(Arc::ptr_eq(&signalled, &key));
    let events: Vec<(EventKind, String)> = signalled
        .poll_events()
        .into_iter()
        .map(|event| {
            (event.kind, event.context.map(|path| path.to_string()).unwrap_or_default())
        })
        .collect();
    assert_eq!(
        events,
        vec![(EventKind::Create, "a".to_string()), (EventKind::Delete, "a".to_string())]
    );

    assert!(signalled.reset());
    assert!(watch.poll().unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_to_children_surface_as_modify() {
    let fs = watched_fs();
    let dir = fs.path("/d").unwrap();
    let child = fs.path("/d/f").unwrap();
    fs.create_directory(&dir).unwrap();
    fs.create_file(&child).unwrap();

    let watch = fs.new_watch_service(tokio::runtime::Handle::current());
    watch.register(&dir, EventFilter::MODIFY).unwrap();

    use std::io::Write;
    let mut writer = fs.open_writer(&child, false).unwrap();
    writer.write_all(b"tick").unwrap();
    writer.close().unwrap();

    let key = watch
        .poll_timeout(Duration::from_millis(500))
        .await
        .unwrap()
        .expect("modification should signal the key");
    let events = key.poll_events();
    assert!(events.iter().all(|event| event.kind == EventKind::Modify));
    assert_eq!(events[0].context.as_ref().unwrap().to_string(), "f");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_past_the_queue_bound_overflows() {
    let fs = watched_fs();
    let dir = fs.path("/d").unwrap();
    fs.create_directory(&dir).unwrap();

    let watch = fs.new_watch_service(tokio::runtime::Handle::current());
    watch.register(&dir, EventFilter::CREATE).unwrap();

    let extra = 10;
    for i in 0..MAX_QUEUE_SIZE + extra {
        fs.create_file(&fs.path(&format!("/d/f{i:04}")).unwrap()).unwrap();
    }
    settle().await;

    let key = watch
        .poll_timeout(Duration::from_millis(500))
        .await
        .unwrap()
        .expect("burst should signal the key");
    let events = key.poll_events();
    assert_eq!(events.len(), MAX_QUEUE_SIZE + 1);
    assert!(events[..MAX_QUEUE_SIZE].iter().all(|event| event.kind == EventKind::Create));
    let overflow = events.last().unwrap();
    assert_eq!(overflow.kind, EventKind::Overflow);
    assert_eq!(overflow.count, extra);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn take_blocks_until_an_event_lands() {
    let fs = watched_fs();
    let dir = fs.path("/d").unwrap();
    fs.create_directory(&dir).unwrap();

    let watch = fs.new_watch_service(tokio::runtime::Handle::current());
    watch.register(&dir, EventFilter::CREATE).unwrap();

    let waiter = {
        let watch = watch.clone();
        tokio::spawn(async move { watch.take().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    fs.create_file(&fs.path("/d/late").unwrap()).unwrap();

    let key = waiter.await.unwrap().unwrap();
    assert_eq!(key.poll_events().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_timeout_expires_quietly() {
    let fs = watched_fs();
    let dir = fs.path("/d").unwrap();
    fs.create_directory(&dir).unwrap();

    let watch = fs.new_watch_service(tokio::runtime::Handle::current());
    watch.register(&dir, EventFilter::CREATE).unwrap();

    let outcome = watch.poll_timeout(Duration::from_millis(30)).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_filesystem_closes_the_watch_service() {
    let fs = watched_fs();
    let dir = fs.path("/d").unwrap();
    fs.create_directory(&dir).unwrap();

    let watch = fs.new_watch_service(tokio::runtime::Handle::current());
    let key = watch.register(&dir, EventFilter::CREATE).unwrap();

    fs.close().unwrap();
    assert!(!key.is_valid());
    assert!(watch.poll().is_err());
}
