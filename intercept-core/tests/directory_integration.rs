//! Integration tests for the interception directory.
//!
//! Exercise the public API the way the overlay-session and network-stack
//! collaborators drive it, including concurrent attach/detach flows.
//!
//! ```bash
//! cargo test -p intercept-core --test directory_integration
//! ```

use intercept_core::network::InterceptionDirectory;
use intercept_core::{InterceptError, MappingConflict, SessionHandle, TunnelConfig};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Barrier};

fn directory() -> InterceptionDirectory {
    InterceptionDirectory::new(Ipv4Addr::new(100, 64, 0, 0), 24).unwrap()
}

/// Two identities attach overlapping services on one machine.
#[test]
fn test_end_to_end_attach_scenario() {
    let dir = directory();
    let n1 = SessionHandle::generate("N1");
    let n2 = SessionHandle::generate("N2");

    let api = dir.register_service("svc1", "api.internal", 443, &n1, "api").unwrap();
    assert_eq!(api, Ipv4Addr::new(100, 64, 0, 2));

    let admin = dir.register_service("svc1", "api.internal", 8443, &n1, "api-admin").unwrap();
    assert_eq!(admin, Ipv4Addr::new(100, 64, 0, 2));
    assert_eq!(dir.services().len(), 2);

    let err = dir.register_service("svc2", "api.internal", 443, &n2, "other").unwrap_err();
    assert!(matches!(err, InterceptError::MappingConflict(MappingConflict::Network { .. })));

    // The rejected registration left everything as it was.
    assert_eq!(dir.services().len(), 2);
    assert_eq!(dir.get_service(api, 443).unwrap().session, n1);
    assert_eq!(dir.get_service(api, 8443).unwrap().service_name, "api-admin");
}

#[test]
fn test_directory_from_config() {
    let config =
        TunnelConfig { ip: Ipv4Addr::new(10, 20, 30, 1), prefix_len: 16, ..Default::default() };
    let dir = InterceptionDirectory::from_config(&config).unwrap();
    let session = SessionHandle::generate("n1");

    let addr = dir.register_service("s", "db.internal", 5432, &session, "db").unwrap();
    assert_eq!(addr, Ipv4Addr::new(10, 20, 0, 2));
    assert_eq!(dir.pool().gateway(), Ipv4Addr::new(10, 20, 0, 1));
}

/// Teardown keeps the hostname resolvable with the same address.
#[test]
fn test_teardown_keeps_addresses_retired() {
    let dir = directory();
    let session = SessionHandle::generate("n1");

    let a = dir.register_service("a", "a.internal", 80, &session, "a").unwrap();
    assert!(dir.deregister_service(session.id, "a"));
    let b = dir.register_service("b", "b.internal", 80, &session, "b").unwrap();

    assert_ne!(a, b, "retired address must not be handed to another hostname");
    assert_eq!(dir.resolve("a.internal"), Some(a));
    assert!(dir.get_service(a, 80).is_err());
}

/// Many flows racing on the same hostname:port produce one entry.
#[test]
fn test_concurrent_same_key_registration() {
    let dir = Arc::new(directory());
    let session = SessionHandle::generate("n1");
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let dir = Arc::clone(&dir);
            let session = session.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                dir.register_service("svc1", "api.internal", 443, &session, "api").unwrap()
            })
        })
        .collect();

    let addrs: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(addrs.len(), 1);

    let services = dir.services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].ref_count, threads as u32);
    assert_eq!(dir.stats().pool_allocated, 1);
}

/// Racing identities: exactly one network wins each hostname.
#[test]
fn test_concurrent_cross_network_registration() {
    let dir = Arc::new(directory());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let dir = Arc::clone(&dir);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let session = SessionHandle::generate(format!("network-{}", i));
                barrier.wait();
                dir.register_service("svc", "shared.internal", 443, &session, "shared")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| {
            matches!(r, Err(InterceptError::MappingConflict(MappingConflict::Network { .. })))
        })
        .count();

    assert_eq!(winners, 1);
    assert_eq!(conflicts, threads - 1);
    assert_eq!(dir.services()[0].ref_count, 1);
}

/// Distinct hostnames registered concurrently never share an address.
#[test]
fn test_concurrent_distinct_hostnames_are_unique() {
    let dir = Arc::new(InterceptionDirectory::new(Ipv4Addr::new(10, 0, 0, 0), 16).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let dir = Arc::clone(&dir);
            std::thread::spawn(move || {
                let session = SessionHandle::generate("n1");
                (0..100)
                    .map(|i| {
                        let host = format!("host-{}-{}.internal", t, i);
                        dir.register_service("svc", &host, 443, &session, &host).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for addr in handle.join().unwrap() {
            assert!(seen.insert(addr), "address {} assigned twice", addr);
        }
    }
    assert_eq!(seen.len(), 800);
    assert_eq!(dir.stats().hostnames, 800);
}

/// Attach and detach interleaved across threads leave the registry empty.
#[test]
fn test_concurrent_attach_detach_balances() {
    let dir = Arc::new(directory());
    let session = SessionHandle::generate("n1");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dir = Arc::clone(&dir);
            let session = session.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    dir.register_service("svc1", "api.internal", 443, &session, "api").unwrap();
                    assert!(dir.deregister_service(session.id, "api"));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(dir.services().is_empty());
    assert_eq!(dir.resolve("api.internal"), Some(Ipv4Addr::new(100, 64, 0, 2)));
}
