mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serial_test::serial;

use siplet_sip_core::{Method, Request, SipMessage, StatusCode};
use siplet_sip_transport::{event_channel, TransportEvent};
use siplet_transaction_core::session::SessionJob;
use siplet_transaction_core::{
    SessionContext, SipHandler, TimerHandle, TransactionConfig, TransactionKey, TransactionManager,
};

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_jobs_for_one_call_never_overlap() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    let sessions = manager.sessions().clone();
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    const JOBS: usize = 200;

    let mut tasks = Vec::new();
    for _ in 0..JOBS {
        let sessions = sessions.clone();
        let busy = busy.clone();
        let overlaps = overlaps.clone();
        let done = done.clone();
        tasks.push(tokio::spawn(async move {
            sessions.execute("shared-call", move |_| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_micros(50));
                busy.store(false, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(wait_for(Duration::from_secs(5), || done.load(Ordering::SeqCst) == JOBS).await);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(wait_for(Duration::from_secs(1), || !sessions.contains("shared-call")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_distinct_calls_run_independently() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    let sessions = manager.sessions().clone();

    let mut scope = sessions.open_scope("call-a");
    assert!(scope.is_acquired());

    // call-b is not blocked by the scope held on call-a
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    sessions.execute("call-b", move |_| flag.store(true, Ordering::SeqCst));
    assert!(ran.load(Ordering::SeqCst));

    assert_eq!(scope.run(|ctx| ctx.id().to_string()), Some("call-a".to_string()));
    scope.close();
    assert_eq!(sessions.session_count(), 0);
}

fn tick(counter: Arc<AtomicUsize>) -> SessionJob {
    Box::new(move |ctx: &mut SessionContext<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
        ctx.schedule(Duration::ZERO, tick(counter));
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_self_rescheduling_timer_does_not_starve_jobs() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    manager.start();
    let sessions = manager.sessions().clone();
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = ticks.clone();
    sessions.execute("busy-call", move |ctx| {
        ctx.schedule(Duration::ZERO, tick(counter));
    });

    let max_timers = manager.config().sessions.max_timers_per_release;
    let caught_up = || ticks.load(Ordering::SeqCst) > max_timers * 2;
    assert!(wait_for(Duration::from_secs(5), caught_up).await);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    sessions.execute("busy-call", move |_| flag.store(true, Ordering::SeqCst));
    assert!(wait_for(Duration::from_secs(5), || ran.load(Ordering::SeqCst)).await);

    manager.stop();
    assert!(!sessions.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_timer_is_isolated() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    manager.start();
    let sessions = manager.sessions().clone();
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    sessions.execute("call-p", move |ctx| {
        ctx.schedule(Duration::from_millis(10), |_| panic!("timer failure"));
        ctx.schedule(Duration::from_millis(20), move |_| flag.store(true, Ordering::SeqCst));
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fired.load(Ordering::SeqCst));
    assert!(!sessions.contains("call-p"));
    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_timer_does_not_fire() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    manager.start();
    let sessions = manager.sessions().clone();
    let fired = Arc::new(AtomicBool::new(false));
    let handle: Arc<parking_lot::Mutex<Option<TimerHandle>>> = Arc::default();

    let flag = fired.clone();
    let slot = handle.clone();
    sessions.execute("call-c", move |ctx| {
        let timer = ctx.schedule(Duration::from_millis(100), move |_| {
            flag.store(true, Ordering::SeqCst)
        });
        // keeps the session alive past the cancellation
        ctx.schedule(Duration::from_millis(200), |_| {});
        *slot.lock() = Some(timer);
    });

    let timer = handle.lock().take().unwrap();
    sessions.execute("call-c", move |ctx| ctx.cancel_timer(&timer));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!fired.load(Ordering::SeqCst));
    assert!(!sessions.contains("call-c"));
    manager.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_pending_timers() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    manager.start();
    let sessions = manager.sessions().clone();
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    sessions.execute("call-s", move |ctx| {
        ctx.schedule(Duration::from_secs(1), move |_| flag.store(true, Ordering::SeqCst));
    });
    assert_eq!(sessions.get("call-s").map(|s| s.timer_count()), Some(1));

    manager.stop();
    assert_eq!(sessions.get("call-s").map(|s| s.timer_count()), Some(0));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[test]
fn test_acquired_scope_is_always_in_the_table() {
    let manager = manager(TestHandler::new(StatusCode::OK));
    let sessions = manager.sessions().clone();
    let orphans = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for worker in 0..4 {
        let sessions = sessions.clone();
        let orphans = orphans.clone();
        threads.push(std::thread::spawn(move || {
            for _ in 0..20_000 {
                if worker % 2 == 0 {
                    sessions.execute("race", |_| {});
                    continue;
                }
                let scope = sessions.open_scope("race");
                if scope.is_acquired() {
                    let listed = sessions
                        .get("race")
                        .is_some_and(|session| Arc::ptr_eq(&session, scope.session()));
                    if !listed {
                        orphans.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(orphans.load(Ordering::SeqCst), 0);
    assert_eq!(sessions.session_count(), 0);
}

/// Answers 200, after a long pause for `slow-call`
#[derive(Default)]
struct SlowCallHandler {
    handled: Mutex<Vec<(String, Instant)>>,
}

impl SipHandler for SlowCallHandler {
    fn handle_request(&self, ctx: &mut SessionContext<'_>, key: &TransactionKey, request: Request) {
        if ctx.id() == "slow-call" {
            std::thread::sleep(Duration::from_millis(800));
        }
        self.handled.lock().push((ctx.id().to_string(), Instant::now()));
        let mut response = request.create_response(StatusCode::OK, None).unwrap();
        response.set_to_tag("b1").unwrap();
        ctx.send_response(key, response).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_slow_call_does_not_delay_other_calls() {
    init_tracing();
    let handler = Arc::new(SlowCallHandler::default());
    let manager = TransactionManager::new(TransactionConfig::default(), handler.clone());
    let (events_tx, events_rx) = event_channel();
    let listener = manager.spawn(events_rx);
    let conn = MockConnection::udp();

    let started = Instant::now();
    for (call_id, branch) in [("slow-call", "z9hG4bKslow"), ("fast-call", "z9hG4bKfast")] {
        events_tx
            .send(TransportEvent::MessageReceived {
                message: SipMessage::Request(request_in(call_id, Method::Options, 1, branch, None)),
                connection: conn.clone(),
            })
            .await
            .unwrap();
    }

    assert!(wait_for(Duration::from_secs(3), || handler.handled.lock().len() == 2).await);
    let handled = handler.handled.lock().clone();
    assert_eq!(handled[0].0, "fast-call");
    assert!(handled[0].1 - started < Duration::from_millis(400));
    assert_eq!(conn.statuses(), vec![200, 200]);

    drop(events_tx);
    listener.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_dispatched_messages_keep_call_order() {
    let handler = TestHandler::new(StatusCode::OK);
    let manager = manager(handler.clone());
    let conn = MockConnection::tcp();

    for (seq, branch) in [(1, "z9hG4bKord1"), (2, "z9hG4bKord2"), (3, "z9hG4bKord3")] {
        let method = if seq == 2 { Method::Info } else { Method::Options };
        manager.dispatch_message(
            SipMessage::Request(request(method, seq, branch, None)),
            conn.clone(),
        );
    }

    assert!(wait_for(Duration::from_secs(2), || handler.requests.lock().len() == 3).await);
    assert_eq!(
        *handler.requests.lock(),
        vec![Method::Options, Method::Info, Method::Options]
    );
    assert!(wait_for(Duration::from_secs(1), || manager.sessions().session_count() == 0).await);
}
