//! End-to-end synchronization against a simulated ONU.

use omci_codec::{AlarmBitmap, AttributeValue, ALARM_BITMAP_ATTRIBUTE};
use omci_core::class_ids::{CIRCUIT_PACK, IP_HOST_CONFIG_DATA, ONT2_G, ONT_G, PPTP_ETHERNET_UNI, SOFTWARE_IMAGE};
use omci_core::{TemplateKey, TemplateStore};
use omci_storage::{InMemoryKvStore, KvStore};
use omci_sync_engine::{
    topic, AlarmSyncState, MibSyncConfig, MibSyncState, Notification, NotificationKind, OmciEvent,
    OmciRequest,
};
use omci_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const ONU: &str = "onu-1";

#[tokio::test(start_paused = true)]
async fn empty_mib_reaches_in_sync_and_audits_clean() {
    init_test_logging();
    let t = TestAgent::new(quiet_config(), SimulatedOnu::new());
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    assert_eq!(t.onu.sent()[..2], [OmciRequest::MibReset, OmciRequest::MibUpload]);
    assert_eq!(t.agent.mib_database().get_mib_data_sync(ONU).unwrap(), Some(0));

    device.mib_sync().audit().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();
    assert!(t.events.events().contains(&OmciEvent::MibAudit {
        device_id: ONU.into(),
        local_mds: 0,
        device_mds: 0,
    }));
    assert!(!t
        .events
        .events()
        .iter()
        .any(|e| matches!(e, OmciEvent::MibStateChange { state: MibSyncState::Resynchronizing, .. })));
}

#[tokio::test(start_paused = true)]
async fn counter_mismatch_resyncs_from_device() {
    init_test_logging();
    let onu = SimulatedOnu::new().with_instance(ONT_G, 0, attrs(&[("administrative_state", 1)]));
    let t = TestAgent::new(quiet_config(), onu);
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    // The device changes behind our back and says nothing.
    let _ = t.onu.change_attributes(ONT_G, 0, attrs(&[("administrative_state", 0)]));
    t.onu.set_mib_data_sync(5);

    device.mib_sync().audit().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    let result = device.query(Some(u32::from(ONT_G)), Some(0), None).unwrap();
    assert_eq!(
        result.attributes().unwrap()["administrative_state"],
        AttributeValue::Unsigned(0)
    );
    assert_eq!(t.agent.mib_database().get_mib_data_sync(ONU).unwrap(), Some(5));

    let events = t.events.events();
    assert!(events.contains(&OmciEvent::MibAudit {
        device_id: ONU.into(),
        local_mds: 0,
        device_mds: 5,
    }));
    assert!(events.contains(&OmciEvent::MibStateChange {
        device_id: ONU.into(),
        state: MibSyncState::Resynchronizing,
    }));
}

#[tokio::test(start_paused = true)]
async fn notifications_keep_the_mirror_current() {
    let onu = SimulatedOnu::new().with_instance(PPTP_ETHERNET_UNI, 257, attrs(&[("operational_state", 1)]));
    let t = TestAgent::new(quiet_config(), onu);
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    let avc = t.onu.change_attributes(PPTP_ETHERNET_UNI, 257, attrs(&[("operational_state", 0)]));
    t.bus.publish_for(ONU, &avc);
    t.bus.publish_for(
        ONU,
        &Notification::Created {
            class_id: CIRCUIT_PACK,
            instance_id: 1,
            attributes: attrs(&[("type", 47)]),
            mib_data_sync: Some(1),
        },
    );
    settle(10).await;

    let db = t.agent.mib_database();
    assert_eq!(
        db.query_instance(ONU, u32::from(PPTP_ETHERNET_UNI), 257).unwrap().unwrap()["operational_state"],
        AttributeValue::Unsigned(0)
    );
    assert!(db.query_instance(ONU, u32::from(CIRCUIT_PACK), 1).unwrap().is_some());
    // Attribute value changes are not counted, the create is.
    assert_eq!(db.get_mib_data_sync(ONU).unwrap(), Some(1));
    assert_eq!(device.mib_sync().state(), MibSyncState::InSync);
}

#[tokio::test(start_paused = true)]
async fn alarm_raise_then_clear_emits_one_event_each() {
    init_test_logging();
    let t = TestAgent::new(quiet_config(), SimulatedOnu::new());
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.alarm_sync().wait_for_state(AlarmSyncState::InSync).await.unwrap();

    let raised = t.onu.raise_alarm(ONT_G, 0, 0);
    t.bus.publish_for(ONU, &raised);
    settle(10).await;

    let stored = device
        .query_alarms(Some(u32::from(ONT_G)), Some(0))
        .unwrap()
        .attributes()
        .and_then(|a| a.get(ALARM_BITMAP_ATTRIBUTE).and_then(AttributeValue::as_bitmap).copied());
    assert_eq!(stored, Some(AlarmBitmap::with_alarms(&[0]).unwrap()));

    let cleared = t.onu.clear_alarm(ONT_G, 0, 0);
    t.bus.publish_for(ONU, &cleared);
    settle(10).await;

    let events = t.events.alarm_events();
    assert_eq!(events.len(), 2);
    match (&events[0], &events[1]) {
        (OmciEvent::AlarmRaised(up), OmciEvent::AlarmCleared(down)) => {
            assert_eq!((up.class_id, up.entity_id, up.alarm_number), (ONT_G, 0, 0));
            assert_eq!((down.class_id, down.entity_id, down.alarm_number), (ONT_G, 0, 0));
            assert_eq!(up.description, "Equipment alarm");
        }
        other => panic!("unexpected alarm events {other:?}"),
    }
    assert_eq!(t.agent.alarm_database().get_alarm_last_sync(ONU).unwrap(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn stopped_device_ignores_notifications() {
    let t = TestAgent::new(quiet_config(), SimulatedOnu::new());
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    device.stop().await.unwrap();
    assert_eq!(device.mib_sync().state(), MibSyncState::Disabled);
    assert_eq!(device.alarm_sync().state(), AlarmSyncState::Disabled);
    for kind in [NotificationKind::Create, NotificationKind::Alarm] {
        assert_eq!(t.bus.subscriber_count(&topic(ONU, kind)), 0);
    }

    t.events.take();
    t.bus.publish_for(ONU, &t.onu.raise_alarm(ONT_G, 0, 0));
    t.bus.publish_for(
        ONU,
        &Notification::Created {
            class_id: CIRCUIT_PACK,
            instance_id: 1,
            attributes: attrs(&[("type", 47)]),
            mib_data_sync: Some(1),
        },
    );
    settle(100).await;

    assert!(t.events.events().is_empty());
    assert!(device.query_alarms(Some(u32::from(ONT_G)), None).unwrap().is_empty());
    assert!(device.query(Some(u32::from(CIRCUIT_PACK)), None, None).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn matching_template_skips_the_upload() {
    let onu = SimulatedOnu::new()
        .with_instance(ONT_G, 0, text_attrs(&[("vendor_id", "ABCD"), ("serial_number", "ABCD12345678")]))
        .with_instance(ONT2_G, 0, text_attrs(&[("equipment_id", "EQ-1")]))
        .with_instance(SOFTWARE_IMAGE, 0, attrs(&[("is_active", 1)]))
        .with_instance(IP_HOST_CONFIG_DATA, 1, text_attrs(&[("mac_address", "00:11:22:33:44:55")]));
    let _ = onu.change_attributes(SOFTWARE_IMAGE, 0, text_attrs(&[("version", "V1.0\0\0")]));

    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let config = quiet_config();
    TemplateStore::new(Arc::clone(&store), config.mib_database.key_root.clone())
        .save(
            &TemplateKey::new("ABCD", "EQ-1", "V1.0"),
            r#"{
                "256": { "0": { "attributes": { "vendor_id": "ABCD", "serial_number": "%SERIAL_NUMBER%" } } },
                "134": { "1": { "attributes": { "mac_address": "%MAC_ADDRESS%" } } },
                "11": { "257": { "attributes": { "max_frame_size": 1518 } } }
            }"#,
        )
        .unwrap();

    let config = config.with_mib_sync(
        MibSyncConfig::default()
            .with_audit_delay(Duration::ZERO)
            .with_templates(true),
    );
    let t = TestAgent::with_store(config, onu, store);
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    assert!(!t.onu.sent().contains(&OmciRequest::MibUpload));
    let db = t.agent.mib_database();
    let ont_g = db.query_instance(ONU, u32::from(ONT_G), 0).unwrap().unwrap();
    assert_eq!(ont_g["serial_number"], AttributeValue::Text("ABCD12345678".into()));
    let uni = db.query_instance(ONU, u32::from(PPTP_ETHERNET_UNI), 257).unwrap().unwrap();
    assert_eq!(uni["max_frame_size"], AttributeValue::Unsigned(1518));
    assert!(db.get_last_sync(ONU).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn reconcile_pushes_local_mib_to_device() {
    init_test_logging();
    let onu = SimulatedOnu::new()
        .with_instance(ONT_G, 0, attrs(&[("administrative_state", 0)]))
        .with_instance(CIRCUIT_PACK, 1, attrs(&[("type", 47)]));
    let config = quiet_config().with_mib_sync(
        MibSyncConfig::default()
            .with_audit_delay(Duration::ZERO)
            .with_templates(false)
            .with_max_audit_failures(0),
    );
    let t = TestAgent::new(config, onu);
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    // Operator intent diverges from the device.
    let db = t.agent.mib_database();
    db.set(ONU, u32::from(ONT_G), 0, &attrs(&[("administrative_state", 1)])).unwrap();
    db.set(ONU, u32::from(PPTP_ETHERNET_UNI), 257, &attrs(&[("max_frame_size", 1518)])).unwrap();
    db.delete(ONU, u32::from(CIRCUIT_PACK), 1).unwrap();

    t.onu.time_out_next(1);
    device.mib_sync().audit().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::OutOfSync).await.unwrap();

    device.mib_sync().reconcile().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();

    assert!(t.events.events().contains(&OmciEvent::MibReconciled {
        device_id: ONU.into(),
        created: 1,
        deleted: 1,
        updated: 1,
    }));
    assert_eq!(t.onu.config_requests(), 3);
    assert_eq!(
        t.onu.instance(ONT_G, 0).unwrap()["administrative_state"],
        AttributeValue::Unsigned(1)
    );
    assert!(t.onu.instance(PPTP_ETHERNET_UNI, 257).is_some());
    assert!(t.onu.instance(CIRCUIT_PACK, 1).is_none());
    assert_eq!(db.get_mib_data_sync(ONU).unwrap(), Some(t.onu.mib_data_sync()));
}

#[tokio::test(start_paused = true)]
async fn cleanup_forgets_the_device() {
    let onu = SimulatedOnu::new().with_instance(ONT_G, 0, attrs(&[("administrative_state", 0)]));
    let t = TestAgent::new(quiet_config(), onu);
    let device = t.agent.add_device(ONU).unwrap();
    device.start().await.unwrap();
    device.mib_sync().wait_for_state(MibSyncState::InSync).await.unwrap();
    drop(device);

    t.agent.remove_device(ONU, true).await.unwrap();
    assert!(t.agent.device_ids().is_empty());
    assert!(!t.agent.mib_database().contains(ONU).unwrap());
    assert!(!t.agent.alarm_database().contains(ONU).unwrap());
    t.agent.stop().await;
}
