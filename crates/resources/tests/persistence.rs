//! Persistence round-trips: explicit save, auto-save collections,
//! changed-signal flushes, and destroy semantics.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use fabrik_model::ResourceStore;
use fabrik_resources::testing::{
    CallLog, DriverResource, StationResource, TestRig, DRIVER_REF, MODULES_REF, PEERS_REF,
};
use fabrik_resources::{
    Error, ReferenceDescriptor, RelationKind, ResourceEvent, ResourceId, ResourceManager,
    ResourceState, Result, TypeDescriptor, TypeRegistryBuilder,
};

fn named(name: &'static str) -> impl FnOnce(&mut ResourceState) -> Result<()> {
    move |state| {
        state.core.name = name.to_string();
        Ok(())
    }
}

#[test]
fn scalars_and_extension_data_survive_a_reboot() {
    let rig = TestRig::new();
    let id = rig
        .manager
        .create("station", |state| {
            state.core.name = "Press 1".to_string();
            state.core.description = "hydraulic press".to_string();
            state.core.local_identifier = Some("bus:7".to_string());
            Ok(())
        })
        .unwrap();

    // two completed cycles, flushed through the changed-signal
    rig.manager
        .mutate(id, |state| {
            let station = state.body.downcast_mut::<StationResource>().unwrap();
            station.complete_cycle();
            station.complete_cycle();
        })
        .unwrap();

    let rebooted = rig.reboot();
    rebooted.manager.load().unwrap();

    let handle = rebooted.manager.graph().get(id).unwrap();
    handle.with(|state| {
        assert_eq!(state.core.name, "Press 1");
        assert_eq!(state.core.description, "hydraulic press");
        assert_eq!(state.core.local_identifier.as_deref(), Some("bus:7"));
        let station = state.body.downcast_ref::<StationResource>().unwrap();
        assert_eq!(station.cycles(), 2);
    });
}

#[test]
fn auto_save_collection_is_persisted_by_mutate() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let module = rig.manager.create("station", named("Module")).unwrap();

    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .collection_mut(MODULES_REF)
                .unwrap()
                .insert(module);
        })
        .unwrap();

    let mut uow = rig.store.begin();
    let rows = uow.links().by_source(station).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, MODULES_REF);
    assert_eq!(rows[0].target, module);
}

#[test]
fn plain_collection_waits_for_an_explicit_save() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let peer = rig.manager.create("station", named("Peer")).unwrap();

    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .collection_mut(PEERS_REF)
                .unwrap()
                .insert(peer);
        })
        .unwrap();

    {
        let mut uow = rig.store.begin();
        assert!(uow.links().by_source(station).unwrap().is_empty());
    }

    rig.manager.save(station).unwrap();

    let mut uow = rig.store.begin();
    let rows = uow.links().by_source(station).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, PEERS_REF);
}

#[test]
fn references_and_hierarchy_survive_a_reboot() {
    let rig = TestRig::new();
    let cell = rig.manager.create("station", named("Cell")).unwrap();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let driver = rig.manager.create("driver", |_| Ok(())).unwrap();
    rig.manager.attach(station, Some(cell)).unwrap();
    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .set_single(DRIVER_REF, Some(driver))
                .unwrap();
        })
        .unwrap();
    rig.manager.save(station).unwrap();

    let rebooted = rig.reboot();
    rebooted.manager.load().unwrap();

    let graph = rebooted.manager.graph();
    let station_handle = graph.get(station).unwrap();
    station_handle.with(|state| {
        assert_eq!(state.core.parent(), Some(cell));
        assert_eq!(
            state.core.references().single(DRIVER_REF).unwrap(),
            Some(driver)
        );
    });
    let cell_handle = graph.get(cell).unwrap();
    assert!(cell_handle.with(|state| state.core.children().contains(station)));
}

#[test]
fn saved_event_reports_membership_changes_once() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let module = rig.manager.create("station", named("Module")).unwrap();
    let events = rig.manager.subscribe();

    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .collection_mut(MODULES_REF)
                .unwrap()
                .insert(module);
        })
        .unwrap();

    let saved = events
        .try_iter()
        .find_map(|event| match event {
            ResourceEvent::Saved { id, affected } if id == station => Some(affected),
            _ => None,
        })
        .expect("a Saved event for the station");
    assert_eq!(saved, vec![module]);

    // saving again without changes affects nobody
    rig.manager.save(station).unwrap();
    let saved = events
        .try_iter()
        .find_map(|event| match event {
            ResourceEvent::Saved { id, affected } if id == station => Some(affected),
            _ => None,
        })
        .expect("a Saved event for the explicit save");
    assert!(saved.is_empty());
}

#[test]
fn soft_destroy_keeps_the_row_but_hides_the_resource() {
    let rig = TestRig::new();
    let id = rig.manager.create("station", named("Press")).unwrap();
    rig.manager.destroy(id, false).unwrap();

    assert!(rig.manager.graph().get(id).is_none());
    assert!(matches!(
        rig.manager.save(id),
        Err(Error::NotFound { .. })
    ));
    // the row is retained for audit, but no longer loads
    assert_eq!(rig.store.resource_count(), 1);
    let rebooted = rig.reboot();
    assert_eq!(rebooted.manager.load().unwrap(), 0);
}

#[test]
fn permanent_destroy_removes_rows_and_links() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let module = rig.manager.create("station", named("Module")).unwrap();
    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .collection_mut(MODULES_REF)
                .unwrap()
                .insert(module);
        })
        .unwrap();
    assert_eq!(rig.store.link_count(), 1);

    rig.manager.destroy(station, true).unwrap();

    assert_eq!(rig.store.resource_count(), 1);
    assert_eq!(rig.store.link_count(), 0);
}

#[test]
fn destroying_a_child_updates_the_parent_children_collection() {
    let rig = TestRig::new();
    let cell = rig.manager.create("station", named("Cell")).unwrap();
    let station = rig.manager.create("station", named("Station")).unwrap();
    rig.manager.attach(station, Some(cell)).unwrap();

    rig.manager.destroy(station, true).unwrap();

    let cell_handle = rig.manager.graph().get(cell).unwrap();
    assert!(cell_handle.with(|state| state.core.children().is_empty()));
    let mut uow = rig.store.begin();
    assert!(uow.links().by_source(cell).unwrap().is_empty());
}

#[test]
fn destroying_a_resource_clears_partner_references() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let driver = rig.manager.create("driver", |_| Ok(())).unwrap();
    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .set_single(DRIVER_REF, Some(driver))
                .unwrap();
        })
        .unwrap();
    rig.manager.save(station).unwrap();

    rig.manager.destroy(driver, true).unwrap();

    let handle = rig.manager.graph().get(station).unwrap();
    assert_eq!(
        handle.with(|state| state.core.references().single(DRIVER_REF).unwrap()),
        None
    );

    // a later save must not resurrect an edge to the removed row
    rig.manager.save(station).unwrap();
    let mut uow = rig.store.begin();
    assert!(uow.links().by_source(station).unwrap().is_empty());
    assert!(uow.resources().get(driver).unwrap().is_none());
}

#[test]
fn soft_destroy_scrubs_collection_memberships() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let module = rig.manager.create("station", named("Module")).unwrap();
    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .collection_mut(MODULES_REF)
                .unwrap()
                .insert(module);
        })
        .unwrap();
    assert_eq!(rig.store.link_count(), 1);

    rig.manager.destroy(module, false).unwrap();

    let handle = rig.manager.graph().get(station).unwrap();
    assert!(handle.with(|state| {
        state
            .core
            .references()
            .collection(MODULES_REF)
            .unwrap()
            .is_empty()
    }));
    let mut uow = rig.store.begin();
    assert!(uow.links().by_source(station).unwrap().is_empty());
    // the module row itself is retained for audit
    assert!(uow.resources().get(module).unwrap().is_some());
}

#[test]
fn soft_destroying_a_parent_orphans_children_across_reboots() {
    let rig = TestRig::new();
    let cell = rig.manager.create("station", named("Cell")).unwrap();
    let station = rig.manager.create("station", named("Station")).unwrap();
    rig.manager.attach(station, Some(cell)).unwrap();

    rig.manager.destroy(cell, false).unwrap();

    let handle = rig.manager.graph().get(station).unwrap();
    assert_eq!(handle.with(|state| state.core.parent()), None);

    let rebooted = rig.reboot();
    assert_eq!(rebooted.manager.load().unwrap(), 1);
    assert!(rebooted.manager.graph().get(cell).is_none());
    let handle = rebooted.manager.graph().get(station).unwrap();
    assert_eq!(handle.with(|state| state.core.parent()), None);
}

#[test]
fn rows_under_undeclared_reference_names_survive_a_save() {
    let rig = TestRig::new();
    let station = rig.manager.create("station", named("Station")).unwrap();
    let peer = rig.manager.create("station", named("Peer")).unwrap();
    rig.manager
        .mutate(station, |state| {
            state
                .core
                .references_mut()
                .collection_mut(PEERS_REF)
                .unwrap()
                .insert(peer);
        })
        .unwrap();
    rig.manager.save(station).unwrap();

    // a later registry revision that dropped the peers reference
    let log = CallLog::new();
    let reduced = Arc::new(
        TypeRegistryBuilder::new()
            .register(TypeDescriptor::new("group"))
            .register(
                TypeDescriptor::new("station")
                    .base("group")
                    .constructor(move || Box::new(StationResource::new(log.clone())))
                    .reference(ReferenceDescriptor::single(DRIVER_REF, RelationKind::Usage)),
            )
            .register(TypeDescriptor::new("driver").creates::<DriverResource>())
            .build()
            .unwrap(),
    );
    let manager = ResourceManager::new(
        reduced,
        Arc::clone(&rig.store) as Arc<dyn fabrik_model::ResourceStore>,
    );
    assert_eq!(manager.load().unwrap(), 2);

    // the resource still loads and saves; the orphaned rows stay put
    manager.save(station).unwrap();
    let mut uow = rig.store.begin();
    let rows = uow.links().by_source(station).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, PEERS_REF);
}

#[test]
fn changed_signal_from_a_running_resource_is_flushed() {
    let rig = TestRig::new();
    let id = rig.manager.create("station", named("Press")).unwrap();
    rig.manager.start().unwrap();

    rig.manager
        .mutate(id, |state| {
            state
                .body
                .downcast_mut::<StationResource>()
                .unwrap()
                .complete_cycle();
        })
        .unwrap();

    let mut uow = rig.store.begin();
    let row = uow.resources().get(id).unwrap().unwrap();
    let cycles = row.extension.get("cycles").and_then(serde_json::Value::as_u64);
    assert_eq!(cycles, Some(1));
}

#[test]
fn resource_ids_are_assigned_on_first_save() {
    let rig = TestRig::new();
    let first = rig.manager.create("station", named("A")).unwrap();
    let second = rig.manager.create("station", named("B")).unwrap();

    assert_ne!(first, ResourceId::UNSET);
    assert!(second.raw() > first.raw());
}
