mod helpers;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use helpers::{serve_until, settle, sync_registry, wait_until, wayc, ways, TestClient, TestServer};

use wayc::{InterfaceKind, ProtocolObject};
use ways::{protocol::WlCompositor, Request, RequestHandler, Resource};

fn bind_compositor(server: &mut TestServer, client: &TestClient) -> wayc::Compositor {
    sync_registry(server, client);
    let entry = client.registry.interface(InterfaceKind::Compositor).unwrap();
    client.registry.create_compositor(entry.name, entry.version).unwrap()
}

#[test]
fn disconnect_only_cleans_up_that_client() {
    let mut server = TestServer::new();
    let compositor = ways::CompositorInterface::new(&server.display);
    let (leaving, leaving_client) = server.add_client();
    let (staying, staying_client) = server.add_client();
    let leaving_compositor = bind_compositor(&mut server, &leaving_client);
    let staying_compositor = bind_compositor(&mut server, &staying_client);

    let leaving_objects =
        [leaving_compositor.create_surface(), leaving_compositor.create_surface()];
    let _staying_surface = staying_compositor.create_surface();
    let _staying_region = staying_compositor.create_region(None);
    assert!(wait_until(&mut server, &leaving_client, || compositor.surfaces().len() >= 2));
    assert!(wait_until(&mut server, &staying_client, || compositor.surfaces().len() == 3));
    assert!(wait_until(&mut server, &staying_client, || compositor.regions().len() == 1));

    let leaving_id = leaving.id().unwrap();
    let staying_id = staying.id().unwrap();
    let leaving_surfaces: Vec<_> = compositor
        .surfaces()
        .into_iter()
        .filter(|surface| surface.resource().client_id() == leaving_id)
        .collect();
    assert_eq!(leaving_surfaces.len(), 2);
    let unbound: Vec<_> = leaving_surfaces.iter().map(|surface| surface.unbound().spy()).collect();
    let global_unbound = compositor.global().unbound().spy();
    assert_eq!(compositor.global().resources_for(&leaving_id).len(), 1);

    // the client objects keep the connection open
    drop(leaving_objects);
    drop(leaving_compositor);
    drop(leaving_client);
    let disconnected = leaving.disconnected().spy();
    assert!(serve_until(&mut server, || disconnected.count() == 1));

    assert!(unbound.iter().all(|spy| spy.count() == 1));
    assert_eq!(global_unbound.count(), 1);
    assert!(leaving_surfaces.iter().all(|surface| !surface.resource().is_alive()));
    assert!(compositor.global().resources_for(&leaving_id).is_empty());
    assert_eq!(compositor.global().resources_for(&staying_id).len(), 1);

    let surfaces = compositor.surfaces();
    assert_eq!(surfaces.len(), 1);
    assert_eq!(surfaces[0].resource().client_id(), staying_id);
    assert!(surfaces[0].resource().is_alive());
    assert_eq!(compositor.regions().len(), 1);
    assert!(staying.is_connected());

    settle(&mut server, &staying_client);
    assert!(staying_client.conn.is_alive());
    assert!(staying_compositor.is_valid());
}

#[test]
fn client_destroys_its_surface() {
    let mut server = TestServer::new();
    let compositor = ways::CompositorInterface::new(&server.display);
    let (_, client) = server.add_client();
    let wrapped = bind_compositor(&mut server, &client);

    let surface = wrapped.create_surface();
    let region = wrapped.create_region(None);
    assert!(wait_until(&mut server, &client, || {
        compositor.surfaces().len() == 1 && compositor.regions().len() == 1
    }));
    let server_surface = compositor.surfaces().pop().unwrap();
    let server_region = compositor.regions().pop().unwrap();
    let surface_unbound = server_surface.unbound().spy();
    let region_unbound = server_region.unbound().spy();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();
    server_surface.resource().on_destroy(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    surface.release();
    region.release();
    assert!(!surface.is_valid());
    assert!(wait_until(&mut server, &client, || surface_unbound.count() == 1));
    assert!(wait_until(&mut server, &client, || region_unbound.count() == 1));
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(compositor.surfaces().is_empty());
    assert!(compositor.regions().is_empty());

    // listeners added once the resource is gone run right away
    let late = Arc::new(AtomicUsize::new(0));
    let counter = late.clone();
    server_surface.resource().on_destroy(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(late.load(Ordering::SeqCst), 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

struct Recorder {
    requests: AtomicUsize,
    unbound: AtomicUsize,
}

impl RequestHandler for Recorder {
    fn request(&self, _: &Resource, _: Request) -> Option<Resource> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn unbound(&self, _: &Resource) {
        self.unbound.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn unbound_resource_ignores_requests() {
    let mut server = TestServer::new();
    let recorder =
        Arc::new(Recorder { requests: AtomicUsize::new(0), unbound: AtomicUsize::new(0) });
    let handler = recorder.clone();
    let global = ways::Global::create::<WlCompositor, _>(&server.display, 1, move |_| {
        Some(handler.clone() as Arc<dyn RequestHandler>)
    });

    let (_, client) = server.add_client();
    let wrapped = bind_compositor(&mut server, &client);
    let _first_region = wrapped.create_region(None);
    assert!(wait_until(&mut server, &client, || recorder.requests.load(Ordering::SeqCst) == 1));

    let resource = global.resources().pop().unwrap();
    assert_eq!(resource.version(), 1);
    assert!(resource.client().is_some());
    resource.destroy();
    assert!(!resource.is_alive());
    assert_eq!(recorder.unbound.load(Ordering::SeqCst), 1);
    assert!(global.resources().is_empty());

    // the client still believes in its compositor, the server no longer listens
    let _region = wrapped.create_region(None);
    settle(&mut server, &client);
    assert_eq!(recorder.requests.load(Ordering::SeqCst), 1);
    assert!(client.conn.is_alive());

    // unbinding happens once
    resource.destroy();
    assert_eq!(recorder.unbound.load(Ordering::SeqCst), 1);
}
