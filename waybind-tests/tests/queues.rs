mod helpers;

use std::time::Duration;

use helpers::{sync_registry, wait_for, wait_until, wayc, ways, TestClient, TestServer};

use wayc::{DispatchError, InterfaceKind};
use ways::protocol::WlOutput;

// reads the socket without dispatching anything until the queue holds `count` events
fn read_until_pending(server: &mut TestServer, client: &TestClient, count: usize) -> bool {
    wait_for(|| {
        let _ = client.conn.flush();
        server.answer();
        let _ = client.conn.read_events();
        client.queue.pending() >= count
    })
}

#[test]
fn events_wait_for_their_queue() {
    let mut server = TestServer::new();
    let _compositor = ways::CompositorInterface::new(&server.display);
    let (_, client) = server.add_client();

    // the global and the end of the initial sync
    assert!(read_until_pending(&mut server, &client, 2));
    assert!(client.registry.interfaces().is_empty());

    client.conn.default_queue().dispatch().unwrap();
    assert!(client.registry.interfaces().is_empty());

    let announced = client.registry.interfaces_announced().spy();
    assert_eq!(client.queue.dispatch().unwrap(), 2);
    assert_eq!(client.queue.pending(), 0);
    assert!(client.registry.has_interface(InterfaceKind::Compositor));
    assert_eq!(announced.count(), 1);
}

#[test]
fn released_queue_drops_events() {
    let mut server = TestServer::new();
    let _compositor = ways::CompositorInterface::new(&server.display);
    let (_, client) = server.add_client();
    assert!(read_until_pending(&mut server, &client, 2));

    client.queue.release();
    assert!(!client.queue.is_valid());
    assert_eq!(client.queue.pending(), 0);
    assert!(matches!(client.queue.dispatch(), Err(DispatchError::NotSetUp)));
    assert!(client.registry.interfaces().is_empty());

    // set up again, it only gets what arrives from now on
    client.queue.setup(&client.conn);
    assert!(client.queue.is_valid());
    let second = ways::Global::create::<WlOutput, _>(&server.display, 1, |_| None);
    assert!(wait_until(&mut server, &client, || client.registry.interfaces().len() == 1));
    assert_eq!(client.registry.interfaces()[0].interface, second.interface().name);
}

#[test]
fn dispatching_a_queue_never_set_up() {
    let queue = wayc::EventQueue::new();
    assert!(!queue.is_valid());
    assert!(queue.connection().is_none());
    assert!(matches!(queue.dispatch(), Err(DispatchError::NotSetUp)));
    assert!(matches!(queue.roundtrip(), Err(DispatchError::NotSetUp)));
}

#[test]
fn moving_an_object_between_queues() {
    let mut server = TestServer::new();
    let server_compositor = ways::CompositorInterface::new(&server.display);
    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);
    let entry = client.registry.interface(InterfaceKind::Compositor).unwrap();
    let compositor = client.registry.create_compositor(entry.name, entry.version).unwrap();

    let other = client.conn.new_event_queue();
    compositor.set_event_queue(&other);
    let surface = compositor.create_surface();

    let created = server_compositor.surface_created().spy();
    assert!(wait_until(&mut server, &client, || created.count() == 1));
    let server_surface = created.last().unwrap();

    // frame callbacks follow the queue of their surface
    let rendered = surface.frame_rendered().spy();
    surface.commit(wayc::CommitFlag::FrameCallback);
    let committed = server_surface.committed().spy();
    assert!(wait_until(&mut server, &client, || committed.count() == 1));
    server_surface.frame_rendered(1);
    let _ = client.conn.flush();
    server.display.flush().unwrap();

    assert!(wait_for(|| {
        let _ = client.conn.read_events();
        other.pending() == 1
    }));
    client.queue.dispatch().unwrap();
    assert!(rendered.is_empty());
    other.dispatch().unwrap();
    assert_eq!(rendered.count(), 1);
}

#[test]
fn blocking_dispatch_times_out() {
    let mut server = TestServer::new();
    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);

    let dispatched = client.queue.blocking_dispatch(Some(Duration::from_millis(20))).unwrap();
    assert_eq!(dispatched, 0);
}
