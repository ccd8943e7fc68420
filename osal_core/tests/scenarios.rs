//! End-to-end scenarios from the specification's "Testable properties /
//! End-to-end scenarios" section, exercised against the public
//! `Registry` surface the way a higher-layer scheduler loop would use it.

use std::{
    net::{SocketAddr, UdpSocket as StdUdpSocket},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use osal_core::{
    event::EventKind,
    handle::Registry,
    socket::{bind_connected_udp, PortableReady},
};

fn local_addr() -> SocketAddr {
    // Bind to an ephemeral port, then immediately drop the bound socket so
    // `bind_connected_udp` can rebind the same address; good enough for a
    // single-process test that doesn't race other listeners.
    let probe = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap()
}

// Scenario A: single event wake. T1 blocks in `waitset_wait`; T2 sets the
// manual event after 50ms. T1's wait returns the event within ~60ms, and
// the event is still observed signalled afterward (manual reset).
#[test]
fn scenario_a_single_event_wake() {
    let registry = Arc::new(Registry::new());
    let set = registry.waitset_create().unwrap();
    let event = registry.event_create(EventKind::Manual);
    registry.waitset_add(set, None, event).unwrap();

    let setter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            registry.event_set(event).unwrap();
        })
    };

    let start = Instant::now();
    let woken = registry.waitset_wait(set).unwrap();
    assert_eq!(woken, Some(event));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(registry.event_test(event).unwrap());

    setter.join().unwrap();
    registry.waitset_remove(set, event).unwrap();
    registry.event_destroy(event);
    registry.waitset_destroy(set).unwrap();
}

// Scenario B: auto event one-shot. After T1's wait returns the event, a
// subsequent test of the event is false (auto-reset on observation).
#[test]
fn scenario_b_auto_event_one_shot() {
    let registry = Arc::new(Registry::new());
    let set = registry.waitset_create().unwrap();
    let event = registry.event_create(EventKind::Auto);
    registry.waitset_add(set, None, event).unwrap();

    let setter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            registry.event_set(event).unwrap();
        })
    };

    let woken = registry.waitset_wait(set).unwrap();
    assert_eq!(woken, Some(event));
    assert!(!registry.event_test(event).unwrap());

    setter.join().unwrap();
    registry.waitset_remove(set, event).unwrap();
    registry.event_destroy(event);
    registry.waitset_destroy(set).unwrap();
}

// Scenario C: timer precedence. A 30ms timer and an unsignalled manual
// event are both registered; `wait` returns the timer, not the event.
#[test]
fn scenario_c_timer_precedence() {
    let registry = Arc::new(Registry::new());
    let set = registry.waitset_create().unwrap();
    let timer = registry.timer_create(Duration::from_millis(30));
    let event = registry.event_create(EventKind::Manual);
    registry.waitset_add(set, None, timer).unwrap();
    registry.waitset_add(set, None, event).unwrap();

    let start = Instant::now();
    let woken = registry.waitset_wait(set).unwrap();
    assert_eq!(woken, Some(timer));
    assert!(start.elapsed() >= Duration::from_millis(20));

    registry.waitset_remove(set, timer).unwrap();
    registry.waitset_remove(set, event).unwrap();
    registry.timer_destroy(timer);
    registry.event_destroy(event);
    registry.waitset_destroy(set).unwrap();
}

// Scenario D: pipe wake. Nothing is registered; T2 calls `waitset_wake`
// and T1's wait returns `None` promptly.
#[test]
fn scenario_d_pipe_wake() {
    let registry = Arc::new(Registry::new());
    let set = registry.waitset_create().unwrap();

    let waker = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            registry.waitset_wake(set).unwrap();
        })
    };

    let start = Instant::now();
    let woken = registry.waitset_wait(set).unwrap();
    assert_eq!(woken, None);
    assert!(start.elapsed() < Duration::from_millis(200));

    waker.join().unwrap();
    registry.waitset_destroy(set).unwrap();
}

// Scenario E: socket readable. Two connected UDP sockets A/B; A is
// registered for READ; T2 sends one datagram via B; T1's wait returns A
// and `socket_test` reports READ among the observed bits.
#[test]
fn scenario_e_socket_readable() {
    let registry = Arc::new(Registry::new());
    let set = registry.waitset_create().unwrap();

    let addr_a = local_addr();
    let addr_b = local_addr();
    let socket_a = bind_connected_udp(addr_a, addr_b).unwrap();
    let socket_b = bind_connected_udp(addr_b, addr_a).unwrap();

    let handle_a = registry.socket_create(socket_a, PortableReady::READ);
    registry.waitset_add(set, None, handle_a).unwrap();

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        socket_b.send(b"ping").unwrap();
    });

    let woken = registry.waitset_wait(set).unwrap();
    assert_eq!(woken, Some(handle_a));
    assert!(registry.socket_test(handle_a).unwrap().contains(PortableReady::READ));

    sender.join().unwrap();
    registry.waitset_remove(set, handle_a).unwrap();
    registry.socket_destroy(handle_a);
    registry.waitset_destroy(set).unwrap();
}

// Scenario F: FIFO ordering. E1, E2 both manual and both signalled before
// `wait`; E1 (registered first) wins. After resetting E1, the next wait
// returns E2.
#[test]
fn scenario_f_fifo_ordering() {
    let registry = Arc::new(Registry::new());
    let set = registry.waitset_create().unwrap();
    let e1 = registry.event_create(EventKind::Manual);
    let e2 = registry.event_create(EventKind::Manual);
    registry.waitset_add(set, None, e1).unwrap();
    registry.waitset_add(set, None, e2).unwrap();
    registry.event_set(e1).unwrap();
    registry.event_set(e2).unwrap();

    assert_eq!(registry.waitset_wait(set).unwrap(), Some(e1));

    registry.event_reset(e1).unwrap();
    assert_eq!(registry.waitset_wait(set).unwrap(), Some(e2));

    registry.waitset_remove(set, e1).unwrap();
    registry.waitset_remove(set, e2).unwrap();
    registry.event_destroy(e1);
    registry.event_destroy(e2);
    registry.waitset_destroy(set).unwrap();
}
