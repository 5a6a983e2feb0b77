mod helpers;

use helpers::{settle, sync_registry, wait_until, wayc, ways, TestClient, TestServer};

use wayc::{InterfaceKind, ProtocolObject};

fn setup() -> (TestServer, ways::CompositorInterface, TestClient, wayc::Compositor) {
    let mut server = TestServer::new();
    let compositor = ways::CompositorInterface::new(&server.display);
    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);
    let entry = client.registry.interface(InterfaceKind::Compositor).unwrap();
    let wrapped = client.registry.create_compositor(entry.name, entry.version).unwrap();
    (server, compositor, client, wrapped)
}

#[test]
fn release_sends_the_destructor_once() {
    let (mut server, compositor, client, wrapped) = setup();
    let surface = wrapped.create_surface();
    assert!(wait_until(&mut server, &client, || compositor.surfaces().len() == 1));
    let server_surface = compositor.surfaces().pop().unwrap();
    let unbound = server_surface.unbound().spy();

    surface.release();
    surface.release();
    assert!(!surface.is_valid());
    assert!(surface.id().is_none());
    assert!(wait_until(&mut server, &client, || unbound.count() == 1));
    settle(&mut server, &client);
    assert_eq!(unbound.count(), 1);
    assert!(client.conn.is_alive());
}

#[test]
fn dropping_the_last_clone_releases() {
    let (mut server, compositor, client, wrapped) = setup();
    let surface = wrapped.create_surface();
    let clone = surface.clone();
    assert!(wait_until(&mut server, &client, || compositor.surfaces().len() == 1));
    let unbound = compositor.surfaces()[0].unbound().spy();

    drop(surface);
    settle(&mut server, &client);
    assert!(unbound.is_empty());
    assert!(clone.is_valid());
    assert_eq!(wrapped.surfaces(), [clone.clone()]);

    drop(clone);
    assert!(wait_until(&mut server, &client, || unbound.count() == 1));
    assert!(compositor.surfaces().is_empty());
    assert!(wrapped.surfaces().is_empty());
}

#[test]
fn destroy_only_forgets_locally() {
    let (mut server, compositor, client, wrapped) = setup();
    let surface = wrapped.create_surface();
    assert!(wait_until(&mut server, &client, || compositor.surfaces().len() == 1));
    let unbound = compositor.surfaces()[0].unbound().spy();

    surface.destroy();
    surface.destroy();
    assert!(!surface.is_valid());
    assert!(wrapped.surface_for(&wayc::backend::ObjectId::null()).is_none());
    settle(&mut server, &client);
    assert!(unbound.is_empty());
    assert_eq!(compositor.surfaces().len(), 1);

    // releasing an emptied handle sends nothing either
    surface.release();
    settle(&mut server, &client);
    assert!(unbound.is_empty());
}

#[test]
fn requests_on_a_released_object_are_dropped() {
    let (mut server, compositor, client, wrapped) = setup();
    let surface = wrapped.create_surface();
    assert!(wait_until(&mut server, &client, || compositor.surfaces().len() == 1));
    let server_surface = compositor.surfaces().pop().unwrap();
    let committed = server_surface.committed().spy();

    surface.release();
    surface.commit(wayc::CommitFlag::FrameCallback);
    assert!(!surface.is_frame_pending());
    settle(&mut server, &client);
    assert!(committed.is_empty());
    // nothing reached the server that it could object to
    assert!(client.conn.is_alive());
    assert!(client.conn.protocol_error().is_none());
}

#[test]
fn compositor_release_cascades() {
    let (mut server, compositor, client, wrapped) = setup();
    let surface = wrapped.create_surface();
    let region = wrapped.create_region(None);
    assert!(wait_until(&mut server, &client, || {
        compositor.surfaces().len() == 1 && compositor.regions().len() == 1
    }));
    let surface_unbound = compositor.surfaces()[0].unbound().spy();
    let region_unbound = compositor.regions()[0].unbound().spy();

    wrapped.release();
    assert!(!wrapped.is_valid());
    assert!(!surface.is_valid());
    assert!(!region.is_valid());
    assert!(!wrapped.create_surface().is_valid());

    assert!(wait_until(&mut server, &client, || {
        surface_unbound.count() == 1 && region_unbound.count() == 1
    }));
    assert!(compositor.surfaces().is_empty());
    assert!(compositor.regions().is_empty());
    // the compositor itself has no destructor request, the server keeps it
    assert_eq!(compositor.global().resources().len(), 1);
}

#[test]
fn compositor_destroy_cascades_locally() {
    let (mut server, compositor, client, wrapped) = setup();
    let surface = wrapped.create_surface();
    assert!(wait_until(&mut server, &client, || compositor.surfaces().len() == 1));
    let unbound = compositor.surfaces()[0].unbound().spy();

    wrapped.destroy();
    assert!(!surface.is_valid());
    settle(&mut server, &client);
    assert!(unbound.is_empty());
    assert_eq!(compositor.surfaces().len(), 1);
}
