mod helpers;

use helpers::{settle, sync_registry, wait_until, wayc, ways, TestServer};

use wayc::InterfaceKind;
use ways::protocol::{WlCompositor, WlOutput};

#[test]
fn compositor_announced_once() {
    let mut server = TestServer::new();
    let _compositor = ways::CompositorInterface::new(&server.display);

    let (_, client) = server.add_client();
    let announced = client.registry.compositor_announced().spy();
    let any = client.registry.interface_announced().spy();
    sync_registry(&mut server, &client);
    settle(&mut server, &client);

    assert_eq!(announced.count(), 1);
    let (name, version) = announced.last().unwrap();
    assert_eq!(version, ways::CompositorInterface::VERSION);
    assert_eq!(any.count(), 1);

    let entry = client.registry.interface(InterfaceKind::Compositor).unwrap();
    assert_eq!(entry.name, name);
    assert_eq!(entry.interface, "wl_compositor");
    assert!(!client.registry.has_interface(InterfaceKind::Seat));
}

#[test]
fn globals_in_creation_order() {
    let mut server = TestServer::new();
    let _first = ways::Global::create::<WlCompositor, _>(&server.display, 1, |_| None);
    let _second = ways::Global::create::<WlOutput, _>(&server.display, 2, |_| None);
    let _third = ways::Global::create::<WlCompositor, _>(&server.display, 3, |_| None);

    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);

    let interfaces = client.registry.interfaces();
    let listed: Vec<(&str, u32)> =
        interfaces.iter().map(|entry| (entry.interface.as_str(), entry.version)).collect();
    assert_eq!(listed, [("wl_compositor", 1), ("wl_output", 2), ("wl_compositor", 3)]);
    assert_eq!(client.registry.interfaces_of(InterfaceKind::Compositor).len(), 2);
    // the most recent global of a kind wins
    assert_eq!(client.registry.interface(InterfaceKind::Compositor).unwrap().version, 3);
    assert_eq!(interfaces[1].kind, InterfaceKind::Output);
}

#[test]
fn bind_version_gate() {
    let mut server = TestServer::new();
    let global = ways::Global::create::<WlCompositor, _>(&server.display, 2, |_| None);

    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);
    let name = client.registry.interface(InterfaceKind::Compositor).unwrap().name;

    assert!(client.registry.bind_compositor(name, 0).is_none());
    assert!(client.registry.bind_compositor(name, 3).is_none());
    assert!(client.registry.bind_compositor(name + 1000, 1).is_none());

    let bound = global.bound().spy();
    let id = client.registry.bind_compositor(name, 2).unwrap();
    assert_eq!(client.conn.object_version(&id), Some(2));
    assert!(wait_until(&mut server, &client, || bound.count() == 1));
    assert_eq!(bound.last().unwrap().version(), 2);
    // the failed attempts never reached the server
    settle(&mut server, &client);
    assert_eq!(bound.count(), 1);
    assert!(client.conn.is_alive());
}

#[test]
fn global_removal() {
    let mut server = TestServer::new();
    let compositor = ways::CompositorInterface::new(&server.display);

    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);
    let entry = client.registry.interface(InterfaceKind::Compositor).unwrap();
    let wrapped = client.registry.create_compositor(entry.name, entry.version).unwrap();
    assert!(wait_until(&mut server, &client, || compositor.global().resources().len() == 1));

    let removed = client.registry.compositor_removed().spy();
    let wrapped_removed = wrapped.removed().spy();
    let about_to_destroy = compositor.global().about_to_destroy().spy();
    let unbound = compositor.global().unbound().spy();
    compositor.global().destroy();

    assert_eq!(about_to_destroy.count(), 1);
    assert_eq!(unbound.count(), 1);
    assert!(!compositor.global().is_valid());
    assert!(compositor.global().resources().is_empty());

    assert!(wait_until(&mut server, &client, || !removed.is_empty()));
    assert_eq!(removed.records(), [entry.name]);
    assert_eq!(wrapped_removed.count(), 1);
    assert!(!client.registry.has_interface(InterfaceKind::Compositor));

    // a second destroy has nothing left to do
    compositor.global().destroy();
    assert_eq!(about_to_destroy.count(), 1);
}

#[test]
fn late_client_misses_removed_globals() {
    let mut server = TestServer::new();
    let kept = ways::Global::create::<WlCompositor, _>(&server.display, 1, |_| None);
    let dropped = ways::Global::create::<WlOutput, _>(&server.display, 1, |_| None);
    drop(dropped);

    let (_, client) = server.add_client();
    sync_registry(&mut server, &client);
    let interfaces = client.registry.interfaces();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].interface, kept.interface().name);
}
