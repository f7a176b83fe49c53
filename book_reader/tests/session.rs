mod common;

use std::fs::{self, File};
use std::time::Duration;

use book_archive::error::OpenError;
use book_reader::config::Config;
use book_reader::error::{NavigationError, PageError, ReaderError};
use book_reader::events::SessionEvent;
use book_reader::{BookSession, PageState};
use common::{MockAdapter, encode, write_zip};
use image::ImageFormat;
use rstest::rstest;
use tokio::sync::broadcast;

fn config(prefetch_radius: usize, workers: usize) -> Config {
    Config {
        prefetch_radius,
        workers,
        ..Default::default()
    }
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_images_are_pages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.cbz");
    write_zip(
        &path,
        &[
            ("a.png", encode(3, 2, ImageFormat::Png)),
            ("b.txt", b"notes".to_vec()),
            ("c.jpg", encode(5, 4, ImageFormat::Jpeg)),
        ],
    );

    let mut session = BookSession::new(config(1, 2));
    let mut rx = session.subscribe();
    assert_eq!(session.open(&path).await.unwrap(), 2);
    assert!(matches!(drain(&mut rx).as_slice(), [SessionEvent::BookOpened(2)]));

    session.goto(0).unwrap();
    let page = session.wait_current_page().await.unwrap();
    assert_eq!((page.index, page.width, page.height), (0, 3, 2));
    assert_eq!(
        session.book().unwrap().page_entry(0).unwrap().id.as_str(),
        "a.png"
    );

    assert_eq!(
        session.goto(2),
        Err(NavigationError::PageIndexOutOfRange {
            index: 2,
            page_count: 2
        })
    );
    // A rejected goto leaves the position alone.
    assert_eq!(session.current_index(), Some(0));

    session.goto(1).unwrap();
    let page = session.wait_current_page().await.unwrap();
    assert_eq!((page.width, page.height), (5, 4));
    assert_eq!(session.bookmark(), Some((path.clone(), 1)));
}

#[tokio::test]
async fn test_empty_book_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("readme.txt"), "no pictures here").unwrap();

    let mut session = BookSession::new(Config::default());
    let mut rx = session.subscribe();
    let err = session.open(dir.path()).await.unwrap_err();
    assert!(matches!(err, OpenError::EmptyBook(_)));
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [SessionEvent::BookFailed(OpenError::EmptyBook(_))]
    ));
    assert!(!session.is_open());
}

#[tokio::test]
async fn test_navigation_without_book() {
    let mut session = BookSession::new(Config::default());
    assert_eq!(session.goto(0), Err(NavigationError::NoBook));
    assert!(matches!(session.current_page(), Err(NavigationError::NoBook)));
    assert!(matches!(
        session.wait_current_page().await,
        Err(ReaderError::Navigation(NavigationError::NoBook))
    ));
    assert_eq!(session.bookmark(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_changed_file_closes_book() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.cbz");
    write_zip(&path, &[("a.png", encode(2, 2, ImageFormat::Png))]);

    let mut session = BookSession::new(Config::default());
    session.open(&path).await.unwrap();
    let mut rx = session.subscribe();

    let stamp = session.book().unwrap().modified().unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(stamp + Duration::from_secs(120))
        .unwrap();

    assert_eq!(session.goto(0), Err(NavigationError::BookChanged(path.clone())));
    assert!(!session.is_open());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [SessionEvent::BookFailed(OpenError::Changed(_))]
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jumping_away_suppresses_stale_pages() {
    let (book, recorder) = MockAdapter::builder(60).gated().build();
    let book = book_archive::Book::from_adapter("mock.cbz", Box::new(book))
        .await
        .unwrap();
    let mut session = BookSession::new(config(2, 2));
    session.attach(book);
    let mut rx = session.subscribe();

    session.goto(5).unwrap();
    // Both workers are now stuck extracting pages 5 and 6.
    recorder.wait_for_calls(2).await;
    session.goto(50).unwrap();
    recorder.open_gate();

    let page = session.wait_current_page().await.unwrap();
    assert_eq!(page.index, 50);

    // 5 and 6 are dropped after extraction, 7, 4 and 3 before it.
    for _ in 0..500 {
        if session.scheduler().stats().cancelled >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.scheduler().stats().cancelled, 5);
    session.pump();

    let events = drain(&mut rx);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SessionEvent::PageReady(5 | 6))),
        "{events:?}"
    );
    assert!(!session.is_cached(5));
    assert!(session.is_cached(50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_prefetch_fills_window() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..6 {
        fs::write(
            dir.path().join(format!("{:02}.png", i)),
            encode(4, 4, ImageFormat::Png),
        )
        .unwrap();
    }

    let mut session = BookSession::new(config(2, 2));
    session.open(dir.path()).await.unwrap();
    session.goto(0).unwrap();
    session.wait_current_page().await.unwrap();

    for _ in 0..500 {
        session.pump();
        if session.is_cached(1) && session.is_cached(2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(session.is_cached(1) && session.is_cached(2));
    assert!(!session.is_cached(3));

    let mut rx = session.subscribe();
    assert_eq!(session.next_page(), Ok(1));
    assert!(matches!(session.current_page(), Ok(PageState::Ready(_))));
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::PageReady(1)))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_page_is_retried_on_wait() {
    let (book, recorder) = MockAdapter::builder(3).broken(1).build();
    let book = book_archive::Book::from_adapter("mock.cbz", Box::new(book))
        .await
        .unwrap();
    let mut session = BookSession::new(config(0, 1));
    session.attach(book);

    session.goto(1).unwrap();
    let err = session.wait_current_page().await.unwrap_err();
    assert!(matches!(err, ReaderError::Page(PageError::Decode(_))));
    assert!(matches!(session.current_page(), Ok(PageState::Failed(_))));

    assert!(session.wait_current_page().await.is_err());
    assert_eq!(recorder.calls_for(&common::page_name(1)), 2);
}

#[rstest]
#[case::prev_at_start(0, false, 0)]
#[case::prev_in_middle(1, false, 0)]
#[case::next_in_middle(1, true, 2)]
#[case::next_at_end(2, true, 2)]
#[tokio::test]
async fn test_step_navigation_stays_in_bounds(
    #[case] start: usize,
    #[case] forward: bool,
    #[case] expected: usize,
) {
    let (book, _recorder) = MockAdapter::builder(3).build();
    let book = book_archive::Book::from_adapter("mock.cbz", Box::new(book))
        .await
        .unwrap();
    let mut session = BookSession::new(config(0, 1));
    session.attach(book);

    session.goto(start).unwrap();
    let moved = if forward {
        session.next_page()
    } else {
        session.prev_page()
    };
    assert_eq!(moved, Ok(expected));
    assert_eq!(session.current_index(), Some(expected));
}
