mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use elembus::{BusError, ElementSpec, EventPayload, SubscriptionRequest};

use common::{table_bus, Provider};

#[test]
fn wildcard_subscription_binds_existing_row() {
    let (bus, _transport, _provider) = table_bus();
    assert_eq!(bus.add_row("Device.T.", None).unwrap(), 1);

    let sub = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.P")).unwrap();
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T.1.P"]);
}

#[test]
fn new_row_extends_wildcard_and_alias_selects_one() {
    let (bus, _transport, _provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();
    let wild = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.P")).unwrap();

    assert_eq!(bus.add_row("Device.T.", Some("x")).unwrap(), 2);
    assert_eq!(
        bus.subscription_instances(wild).unwrap(),
        vec!["Device.T.1.P", "Device.T.2.P"]
    );

    let alias = bus.subscribe(SubscriptionRequest::new("c2", "Device.T.[x].P")).unwrap();
    assert_eq!(bus.subscription_instances(alias).unwrap(), vec!["Device.T.2.P"]);
}

#[test]
fn removed_row_leaves_no_references() {
    let (bus, _transport, provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();
    bus.add_row("Device.T.", Some("x")).unwrap();
    let wild = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.P")).unwrap();
    let alias = bus.subscribe(SubscriptionRequest::new("c2", "Device.T.[x].P")).unwrap();
    let p1 = bus
        .inspect(|tree, _| tree.retrieve_instance("Device.T.1.P").unwrap())
        .unwrap();

    bus.remove_row("Device.T.1").unwrap();
    assert_eq!(provider.removed_rows.lock().unwrap().as_slice(), ["Device.T.1"]);

    assert_eq!(bus.subscription_instances(wild).unwrap(), vec!["Device.T.2.P"]);
    assert_eq!(bus.subscription_instances(alias).unwrap(), vec!["Device.T.2.P"]);
    bus.inspect(|tree, registry| {
        assert!(!tree.contains(p1));
        assert!(tree.retrieve_instance("Device.T.1").is_none());
        for sub in registry.iter() {
            assert!(!sub.instances().contains(&p1));
        }
    })
    .unwrap();
    assert!(bus.get("Device.T.[x].P").is_ok());
}

#[test]
fn late_registration_reaches_existing_rows() {
    let (bus, _transport, _provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();

    let (_q_provider, q_handler) = Provider::handler();
    bus.register_elements(&[ElementSpec::property("Device.T.{i}.Q", q_handler.clone())])
        .unwrap();

    bus.inspect(|tree, _| {
        let q1 = tree.retrieve_instance("Device.T.1.Q").expect("replicated into row 1");
        let template_q = tree.retrieve_schema("Device.T.{i}.Q").unwrap();
        let h1 = tree.get(q1).unwrap().handler().unwrap();
        assert!(Arc::ptr_eq(h1, &q_handler));
        assert!(Arc::ptr_eq(h1, tree.get(template_q).unwrap().handler().unwrap()));
    })
    .unwrap();
}

#[test]
fn partial_path_subscription_stays_on_table() {
    let (bus, transport, _provider) = table_bus();
    let events = transport.connect("c1").unwrap();
    let sub = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.")).unwrap();
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T"]);

    bus.add_row("Device.T.", Some("lan")).unwrap();
    bus.add_row("Device.T.", None).unwrap();
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T"]);

    let created = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(created.event_name, "Device.T.");
    assert_eq!(
        created.payload,
        EventPayload::RowCreated {
            row_name: "Device.T.1".to_string(),
            instance_number: 1,
            alias: Some("lan".to_string()),
        }
    );
    let second = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.payload.element(), "Device.T.2");

    bus.remove_row("Device.T.[lan]").unwrap();
    let deleted = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(
        deleted.payload,
        EventPayload::RowDeleted {
            row_name: "Device.T.1".to_string()
        }
    );
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T"]);
}

#[test]
fn provider_refusal_aborts_row_changes() {
    let (bus, _transport, provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();
    let before = bus.inspect(|tree, _| tree.len()).unwrap();

    provider.refuse_rows.store(true, Ordering::SeqCst);
    let err = bus.add_row("Device.T.", None).unwrap_err();
    assert!(matches!(err, BusError::ProviderRejected { ref reason, .. } if reason == "table full"));
    let err = bus.remove_row("Device.T.1").unwrap_err();
    assert!(err.is_provider_error());

    assert_eq!(bus.inspect(|tree, _| tree.len()).unwrap(), before);
    assert!(bus.get("Device.T.1.P").is_ok());
}

#[test]
fn duplicate_alias_is_rejected_before_provider() {
    let (bus, _transport, _provider) = table_bus();
    bus.add_row("Device.T.", Some("x")).unwrap();
    let err = bus.add_row("Device.T.", Some("x")).unwrap_err();
    assert_eq!(
        err,
        BusError::DuplicateName {
            name: "Device.T.[x]".to_string()
        }
    );
    // The provider was not asked, so the next number is still 2.
    assert_eq!(bus.add_row("Device.T.", Some("y")).unwrap(), 2);
}

#[test]
fn nested_table_rows_bind_deep_wildcards() {
    let (bus, _transport, _provider) = table_bus();
    let (_inner, handler) = Provider::handler();
    bus.register_elements(&[
        ElementSpec::table("Device.T.{i}.U.{i}.", handler.clone()),
        ElementSpec::property("Device.T.{i}.U.{i}.Q", handler),
    ])
    .unwrap();

    let deep = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.U.*.Q")).unwrap();
    bus.add_row("Device.T.", Some("x")).unwrap();
    assert!(bus.subscription_instances(deep).unwrap().is_empty());

    assert_eq!(bus.add_row("Device.T.[x].U.", None).unwrap(), 1);
    assert_eq!(bus.subscription_instances(deep).unwrap(), vec!["Device.T.1.U.1.Q"]);

    bus.remove_row("Device.T.1").unwrap();
    assert!(bus.subscription_instances(deep).unwrap().is_empty());
}

#[test]
fn row_operations_check_targets() {
    let (bus, _transport, _provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();
    assert!(matches!(
        bus.add_row("Device.T.1.P", None).unwrap_err(),
        BusError::WrongKind { .. }
    ));
    assert!(bus.add_row("Device.X.", None).unwrap_err().is_not_found());
    assert!(matches!(
        bus.remove_row("Device.T").unwrap_err(),
        BusError::WrongKind { .. }
    ));
    for alias in ["a]b", "a.b", ""] {
        assert!(matches!(
            bus.add_row("Device.T.", Some(alias)).unwrap_err(),
            BusError::InvalidName { .. }
        ));
    }
    assert_eq!(bus.add_row("Device.T.", None).unwrap(), 2);
    assert_eq!(bus.resolve_names("Device.T.*.").unwrap().len(), 2);
}

#[test]
fn row_subscriber_sees_creation_and_deletion() {
    let (bus, transport, _provider) = table_bus();
    let events = transport.connect("rows").unwrap();
    let sub = bus.subscribe(SubscriptionRequest::new("rows", "Device.T.*.")).unwrap();

    bus.add_row("Device.T.", Some("lan")).unwrap();
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T.1"]);
    let created = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(created.event_name, "Device.T.");
    assert!(matches!(created.payload, EventPayload::RowCreated { instance_number: 1, .. }));

    bus.remove_row("Device.T.[lan]").unwrap();
    let deleted = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(deleted.event_name, "Device.T.");
    assert_eq!(
        deleted.payload,
        EventPayload::RowDeleted {
            row_name: "Device.T.1".to_string()
        }
    );
    assert!(bus.subscription_instances(sub).unwrap().is_empty());
    assert!(events.try_recv().is_none());
}
