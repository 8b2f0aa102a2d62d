mod common;

use std::sync::Arc;
use std::time::Duration;

use elembus::{
    BusConfig, BusError, BusRegistry, ChannelTransport, ElementKind, ElementSpec, EventKind, EventPayload, Filter,
    SubscribeAction, SubscriptionRequest, Value,
};

use common::{fast_config, init_tracing, table_bus, Provider};

#[test]
fn failed_batch_leaves_no_partial_schema() {
    let (bus, _transport, _provider) = table_bus();
    let before = bus.inspect(|tree, _| tree.len()).unwrap();
    let (_p, h) = Provider::handler();

    let err = bus
        .register_elements(&[
            ElementSpec::table("Device.Radio.{i}.", h.clone()),
            ElementSpec::property("Device.Radio.{i}.Channel", h.clone()),
            ElementSpec::property("Device.Radio.{i}.Bad Name", h.clone()),
        ])
        .unwrap_err();
    assert!(matches!(err, BusError::InvalidName { .. }));
    assert_eq!(bus.inspect(|tree, _| tree.len()).unwrap(), before);
    assert!(bus.resolve_names("Device.Radio.").is_err());

    let err = bus
        .register_elements(&[
            ElementSpec::property("Device.Info.Model", h.clone()),
            ElementSpec::property("Device.Info.Model", h),
        ])
        .unwrap_err();
    assert_eq!(
        err,
        BusError::DuplicateName {
            name: "Device.Info.Model".to_string()
        }
    );
    assert_eq!(bus.inspect(|tree, _| tree.len()).unwrap(), before);
}

#[test]
fn rollback_removes_replicas_in_existing_rows() {
    let (bus, _transport, _provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();
    let (_p, h) = Provider::handler();

    let err = bus
        .register_elements(&[
            ElementSpec::property("Device.T.{i}.Q", h.clone()),
            ElementSpec::property("Device.T.{i}.P", h),
        ])
        .unwrap_err();
    assert!(matches!(err, BusError::DuplicateName { .. }));
    bus.inspect(|tree, _| {
        assert!(tree.retrieve_instance("Device.T.1.Q").is_none());
        assert!(tree.retrieve_schema("Device.T.{i}.Q").is_none());
        assert!(tree.retrieve_instance("Device.T.1.P").is_some());
    })
    .unwrap();
}

#[test]
fn rollback_undoes_table_made_from_fresh_template_branch() {
    let (bus, _transport, _provider) = table_bus();
    let before = bus.inspect(|tree, _| tree.len()).unwrap();
    let (_p, h) = Provider::handler();

    let err = bus
        .register_elements(&[
            ElementSpec::property("Device.S.{i}.P", h.clone()),
            ElementSpec::table("Device.S.{i}.", h.clone()),
            ElementSpec::property("Device.S.{i}.Bad Name", h),
        ])
        .unwrap_err();
    assert!(matches!(err, BusError::InvalidName { .. }));
    bus.inspect(|tree, _| {
        assert_eq!(tree.len(), before);
        assert!(tree.retrieve_schema("Device.S").is_none());
    })
    .unwrap();
}

#[test]
fn rollback_restores_converted_container() {
    let (bus, _transport, _provider) = table_bus();
    let (_p, h) = Provider::handler();
    bus.register_elements(&[ElementSpec::property("Device.S.{i}.P", h.clone())])
        .unwrap();
    let before = bus.inspect(|tree, _| tree.len()).unwrap();

    let err = bus
        .register_elements(&[
            ElementSpec::table("Device.S.{i}.", h.clone()),
            ElementSpec::property("Device.S.{i}.Bad Name", h.clone()),
        ])
        .unwrap_err();
    assert!(matches!(err, BusError::InvalidName { .. }));
    bus.inspect(|tree, _| {
        assert_eq!(tree.len(), before);
        let s = tree.get(tree.retrieve_schema("Device.S").unwrap()).unwrap();
        assert_eq!(s.kind(), ElementKind::Container);
        assert!(s.handler().is_none());
        assert_eq!(s.owner(), None);
    })
    .unwrap();
    assert!(bus.add_row("Device.S.", None).is_err());

    bus.register_elements(&[ElementSpec::table("Device.S.{i}.", h)]).unwrap();
    assert_eq!(bus.add_row("Device.S.", None).unwrap(), 1);
    assert!(bus.resolve_names("Device.S.1.P").is_ok());
}

#[test]
fn reregistration_rebinds_existing_subscriptions() {
    let (bus, _transport, _provider) = table_bus();
    let (_p, h) = Provider::handler();
    bus.register_elements(&[ElementSpec::property("Device.T.{i}.Q", h.clone())])
        .unwrap();
    bus.add_row("Device.T.", None).unwrap();
    let sub = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.Q")).unwrap();
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T.1.Q"]);

    bus.unregister_elements(&["Device.T.{i}.Q"]).unwrap();
    assert!(bus.subscription_instances(sub).unwrap().is_empty());

    bus.register_elements(&[ElementSpec::property("Device.T.{i}.Q", h)]).unwrap();
    assert_eq!(bus.subscription_instances(sub).unwrap(), vec!["Device.T.1.Q"]);
}

#[test]
fn unregister_checks_every_name_first() {
    let (bus, _transport, _provider) = table_bus();
    let (_p, h) = Provider::handler();
    bus.register_elements(&[ElementSpec::property("Device.A.B.C", h)]).unwrap();

    let err = bus.unregister_elements(&["Device.A.B.C", "Device.Nope"]).unwrap_err();
    assert!(err.is_not_found());
    assert!(bus.get("Device.A.B.C").is_ok());

    bus.unregister_elements(&["Device.A.B.C"]).unwrap();
    bus.inspect(|tree, _| {
        assert!(tree.retrieve_schema("Device.A").is_none());
        assert!(tree.retrieve_schema("Device.T").is_some());
    })
    .unwrap();
    assert!(bus.unregister_elements(&["Device.A"]).unwrap_err().is_not_found());
}

#[test]
fn get_set_and_methods_forward_to_provider() {
    let (bus, _transport, provider) = table_bus();
    let (_p, h) = Provider::handler();
    bus.register_elements(&[
        ElementSpec::method("Device.Reboot()", h.clone()),
        ElementSpec::property("Device.ReadOnly", h),
    ])
    .unwrap();
    bus.add_row("Device.T.", None).unwrap();
    bus.add_row("Device.T.", Some("x")).unwrap();

    bus.set("Device.T.[x].P", &Value::from("guest")).unwrap();
    assert_eq!(bus.get("Device.T.2.P").unwrap(), Value::from("guest"));
    assert_eq!(provider.get_value("Device.T.2.P"), Some(Value::from("guest")));

    let out = bus.invoke_method("Device.Reboot()", &Value::Int(3)).unwrap();
    assert_eq!(out.as_structured().unwrap()["method"], "Device.Reboot()");

    let err = bus.set("Device.ReadOnly", &Value::Bool(true)).unwrap_err();
    assert!(matches!(err, BusError::ProviderRejected { ref element, .. } if element == "Device.ReadOnly"));
    assert!(matches!(bus.get("Device.T").unwrap_err(), BusError::WrongKind { .. }));
    assert!(matches!(
        bus.invoke_method("Device.T.1.P", &Value::Null).unwrap_err(),
        BusError::WrongKind { .. }
    ));
    assert!(bus.get("Device.T.9.P").unwrap_err().is_not_found());
    assert!(bus.get("Device.T.{i}.P").unwrap_err().is_not_found());
}

#[test]
fn resolve_and_get_matching_follow_patterns() {
    let (bus, _transport, provider) = table_bus();
    bus.add_row("Device.T.", None).unwrap();
    bus.add_row("Device.T.", Some("x")).unwrap();
    provider.put("Device.T.1.P", Value::UInt(10));
    provider.put("Device.T.2.P", Value::UInt(20));

    assert_eq!(
        bus.resolve_names("Device.T.*.P").unwrap(),
        vec!["Device.T.1.P", "Device.T.2.P"]
    );
    assert_eq!(bus.resolve_names("Device.T.[x].").unwrap(), vec!["Device.T.2"]);
    assert_eq!(
        bus.get_matching("Device.T.*.P").unwrap(),
        vec![
            ("Device.T.1.P".to_string(), Value::UInt(10)),
            ("Device.T.2.P".to_string(), Value::UInt(20)),
        ]
    );
    assert!(matches!(
        bus.resolve_names("Device.T.x.P").unwrap_err(),
        BusError::InvalidPattern { .. }
    ));
}

#[test]
fn subscribe_validates_and_notifies_provider() {
    let (bus, _transport, provider) = table_bus();
    let (_p, h) = Provider::handler();
    bus.register_elements(&[ElementSpec::method("Device.Reboot()", h)]).unwrap();

    bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.P")).unwrap();
    let err = bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.P")).unwrap_err();
    assert!(matches!(err, BusError::AlreadySubscribed { .. }));

    // A separately created filter is a separate subscription.
    let f = Filter::new(|v: &Value| !v.is_null());
    bus.subscribe(SubscriptionRequest::new("c1", "Device.T.*.P").filter(f.clone()))
        .unwrap();

    assert!(matches!(
        bus.subscribe(SubscriptionRequest::new("c1", "Device.Reboot()")).unwrap_err(),
        BusError::WrongKind { .. }
    ));
    assert!(bus
        .subscribe(SubscriptionRequest::new("c1", "Device.Nope"))
        .unwrap_err()
        .is_not_found());
    assert!(matches!(
        bus.subscribe(SubscriptionRequest::new("c1", "Device.T.one.P")).unwrap_err(),
        BusError::InvalidPattern { .. }
    ));

    bus.unsubscribe("c1", "Device.T.*.P", Some(&f)).unwrap();
    bus.unsubscribe("c1", "Device.T.*.P", None).unwrap();
    let err = bus.unsubscribe("c1", "Device.T.*.P", None).unwrap_err();
    assert!(matches!(err, BusError::NotSubscribed { .. }));

    let log = provider.subscribe_log.lock().unwrap().clone();
    let actions: Vec<SubscribeAction> = log.iter().map(|(a, _)| *a).collect();
    assert_eq!(
        actions,
        vec![
            SubscribeAction::Subscribe,
            SubscribeAction::Subscribe,
            SubscribeAction::Unsubscribe,
            SubscribeAction::Unsubscribe,
        ]
    );
    assert!(log.iter().all(|(_, name)| name == "Device.T.*.P"));
}

#[test]
fn published_events_use_subscription_names() {
    let (bus, transport, _provider) = table_bus();
    let (_p, h) = Provider::handler();
    bus.register_elements(&[ElementSpec::event("Device.T.{i}.Fault", h)]).unwrap();
    bus.add_row("Device.T.", None).unwrap();
    bus.add_row("Device.T.", Some("x")).unwrap();

    let wild = transport.connect("wild").unwrap();
    let one = transport.connect("one").unwrap();
    bus.subscribe(SubscriptionRequest::new("wild", "Device.T.*.Fault")).unwrap();
    bus.subscribe(SubscriptionRequest::new("one", "Device.T.[x].Fault")).unwrap();

    assert_eq!(bus.publish_event("Device.T.1.Fault", Value::from("overheat")).unwrap(), 1);
    assert_eq!(bus.publish_event("Device.T.[x].Fault", Value::Null).unwrap(), 2);

    let first = wild.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first.event_name, "Device.T.*.Fault");
    assert_eq!(first.kind(), EventKind::General);
    assert_eq!(
        first.payload,
        EventPayload::General {
            element: "Device.T.1.Fault".to_string(),
            data: Value::from("overheat"),
        }
    );
    let second = wild.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.payload.element(), "Device.T.2.Fault");

    let only = one.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(only.event_name, "Device.T.[x].Fault");
    assert!(one.try_recv().is_none());

    assert!(matches!(
        bus.publish_event("Device.T.1.P", Value::Null).unwrap_err(),
        BusError::WrongKind { .. }
    ));
}

#[test]
fn registry_tracks_open_components() {
    init_tracing();
    let registry = BusRegistry::new();
    let transport = Arc::new(ChannelTransport::default());
    let wifi = registry.open("wifi", fast_config(), transport.clone()).unwrap();
    registry.open("lan", BusConfig::default(), transport).unwrap();
    assert_eq!(registry.components(), vec!["lan", "wifi"]);

    let (_p, h) = Provider::handler();
    wifi.register_elements(&[ElementSpec::property("Device.WiFi.SSID", h)]).unwrap();
    let again = registry.get("wifi").unwrap();
    let owner = again
        .inspect(|tree, _| {
            let id = tree.retrieve_schema("Device.WiFi.SSID").unwrap();
            let node = tree.get(id).unwrap();
            (node.kind(), node.owner().map(str::to_string))
        })
        .unwrap();
    assert_eq!(owner, (ElementKind::Property, Some("wifi".to_string())));

    registry.close("wifi").unwrap();
    assert_eq!(registry.components(), vec!["lan"]);
}

#[test]
fn invalid_config_is_rejected_on_open() {
    let transport = Arc::new(ChannelTransport::default());
    let cfg = BusConfig {
        poll_interval_ms: 0,
        ..BusConfig::default()
    };
    let err = elembus::Bus::open("bad", cfg, transport).unwrap_err();
    assert!(matches!(err, BusError::InvalidConfig { .. }));
}
