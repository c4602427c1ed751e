use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use fleet_sync::model::AlarmSeverity;
use fleet_sync::{
    AlarmLogEntry, AlarmStatus, DevicePatch, DeviceRecord, FleetStore, LogIdentity,
    PresenceStatus, dedup_logs, merge_devices,
};

// --- Upsert ---

fn arb_status() -> impl Strategy<Value = PresenceStatus> {
    prop_oneof![Just(PresenceStatus::Online), Just(PresenceStatus::Offline)]
}

fn arb_patch() -> impl Strategy<Value = DevicePatch> {
    (
        proptest::option::of("[a-z]{1,6}"),
        proptest::option::of(arb_status()),
        proptest::option::of(0u8..=100),
        proptest::option::of(-120i32..-40),
        proptest::option::of("[a-z]{1,4}"),
    )
        .prop_map(|(name, status, battery_level, signal_dbm, site)| DevicePatch {
            name,
            status,
            battery_level,
            signal_dbm,
            site,
            ..Default::default()
        })
}

proptest! {
    #[test]
    fn upsert_changes_only_reported_fields(patches in proptest::collection::vec(arb_patch(), 1..20)) {
        let mut store = FleetStore::new();
        let mut expected = DeviceRecord::new("A1");

        for patch in &patches {
            store.upsert("A1", patch);

            if let Some(name) = &patch.name { expected.name = Some(name.clone()); }
            if let Some(status) = patch.status { expected.status = status; }
            if let Some(level) = patch.battery_level { expected.battery_level = Some(level); }
            if let Some(dbm) = patch.signal_dbm { expected.signal_dbm = Some(dbm); }
            if let Some(site) = &patch.site { expected.site = Some(site.clone()); }

            prop_assert_eq!(store.device("A1"), Some(&expected));
        }
        prop_assert_eq!(store.device_count(), 1);
    }
}

// --- Device merge ---

fn arb_device(ids: &'static [&'static str]) -> impl Strategy<Value = DeviceRecord> {
    (proptest::sample::select(ids), arb_patch()).prop_map(|(id, patch)| {
        let mut record = DeviceRecord::new(id);
        record.apply(&patch);
        record
    })
}

const IDS: &[&str] = &["D1", "D2", "D3", "D4", "D5"];
const ONE_ID: &[&str] = &["D1"];

proptest! {
    #[test]
    fn merge_yields_one_entry_per_id(
        snapshot in proptest::collection::vec(arb_device(IDS), 0..8),
        live in proptest::collection::vec(arb_device(IDS), 0..8),
    ) {
        let live: HashMap<String, DeviceRecord> =
            live.into_iter().map(|d| (d.id.clone(), d)).collect();
        let merged = merge_devices(snapshot.clone(), &live);

        let mut expected_ids: HashSet<&str> = snapshot.iter().map(|d| d.id.as_str()).collect();
        expected_ids.extend(live.keys().map(String::as_str));
        let merged_ids: Vec<&str> = merged.iter().map(|d| d.id.as_str()).collect();
        let unique: HashSet<&str> = merged_ids.iter().copied().collect();

        prop_assert_eq!(merged_ids.len(), unique.len());
        prop_assert_eq!(unique, expected_ids);
    }

    #[test]
    fn merge_prefers_present_live_fields(
        snapshot in arb_device(ONE_ID),
        live in arb_device(ONE_ID),
    ) {
        let mut map = HashMap::new();
        map.insert("D1".to_string(), live.clone());
        let merged = merge_devices(vec![snapshot.clone()], &map);
        prop_assert_eq!(merged.len(), 1);
        let merged = &merged[0];

        prop_assert_eq!(&merged.name, &live.name.clone().or(snapshot.name.clone()));
        prop_assert_eq!(merged.battery_level, live.battery_level.or(snapshot.battery_level));
        prop_assert_eq!(merged.signal_dbm, live.signal_dbm.or(snapshot.signal_dbm));
        prop_assert_eq!(merged.status, live.status);
    }
}

// --- Log dedup ---

const ALARM_IDS: &[&str] = &["1", "2", "3"];
const ALARM_DEVICES: &[&str] = &["D1", "D2"];

fn arb_alarm() -> impl Strategy<Value = AlarmLogEntry> {
    (
        proptest::option::of(proptest::sample::select(ALARM_IDS)),
        proptest::sample::select(ALARM_DEVICES),
        0i64..3,
    )
        .prop_map(|(id, device, second)| AlarmLogEntry {
            id: id.map(str::to_string),
            device_id: device.to_string(),
            alarm_type: "offline".to_string(),
            severity: AlarmSeverity::Warning,
            message: String::new(),
            status: AlarmStatus::Started,
            group: None,
            site: None,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + second, 0)
                .expect("valid timestamp"),
            resolved_at: None,
        })
}

proptest! {
    #[test]
    fn dedup_leaves_no_duplicates_and_keeps_first(
        first in proptest::collection::vec(arb_alarm(), 0..10),
        second in proptest::collection::vec(arb_alarm(), 0..10),
    ) {
        let all: Vec<AlarmLogEntry> = first.iter().chain(second.iter()).cloned().collect();
        let kept = dedup_logs(first, second);

        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                prop_assert!(!a.same_entry(b));
            }
        }
        // Every dropped entry duplicates something that was kept earlier.
        for entry in &all {
            prop_assert!(kept.iter().any(|k| k.same_entry(entry)));
        }
        if let Some(head) = all.first() {
            prop_assert_eq!(&kept[0], head);
        }
    }

    #[test]
    fn dedup_is_idempotent(entries in proptest::collection::vec(arb_alarm(), 0..12)) {
        let once = dedup_logs(entries, Vec::new());
        let twice = dedup_logs(once.clone(), once.clone());
        prop_assert_eq!(once, twice);
    }
}
