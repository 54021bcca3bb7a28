//! The facade boundary: proxy lifecycle, typed lookups, and bootstrap
//! initializers.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use fabrik_resources::testing::{TestRig, DRIVING, WELDING};
use fabrik_resources::{
    CapabilitySet, Error, ResourceAccess, ResourceControl, ResourceFacade, ResourceInitializer,
    ResourceState, Result, SeedResource, TypeConstraint, TypeRegistry,
};

fn named(name: &'static str) -> Box<dyn FnOnce(&mut ResourceState) -> Result<()> + Send> {
    Box::new(move |state| {
        state.core.name = name.to_string();
        Ok(())
    })
}

fn facade(rig: &TestRig) -> ResourceFacade {
    ResourceFacade::new(Arc::clone(&rig.manager))
}

#[test]
fn lookups_return_working_proxies() {
    let rig = TestRig::new();
    let facade = facade(&rig);

    let created = facade.create("station", named("Press 1")).unwrap();
    assert_eq!(created.name().unwrap(), "Press 1");

    let by_id = facade.get(created.id()).unwrap();
    assert_eq!(by_id.name().unwrap(), "Press 1");
    let by_name = facade.by_name("Press 1").unwrap();
    assert_eq!(by_name.id(), created.id());
    assert!(matches!(
        facade.by_name("absent"),
        Err(Error::NoMatch { .. })
    ));
}

#[test]
fn tag_lookup_includes_derived_types() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    facade.create("station", named("Plain")).unwrap();
    facade.create("welding_station", named("Welder")).unwrap();

    assert_eq!(facade.with_tag("station").len(), 2);
    assert_eq!(facade.with_tag("welding_station").len(), 1);
    // group is the abstract root of the station subtree
    assert_eq!(facade.with_tag("group").len(), 2);
}

#[test]
fn capability_lookup_is_exact_about_multiplicity() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let required: CapabilitySet = [WELDING].into_iter().collect();

    assert!(matches!(
        facade.single_by_capability(&required),
        Err(Error::NoMatch { .. })
    ));

    facade.create("welding_station", named("Welder 1")).unwrap();
    let found = facade.single_by_capability(&required).unwrap();
    assert_eq!(found.name().unwrap(), "Welder 1");

    facade.create("welding_station", named("Welder 2")).unwrap();
    assert!(matches!(
        facade.single_by_capability(&required),
        Err(Error::Ambiguous { count: 2, .. })
    ));
}

#[test]
fn supported_types_respects_constraints() {
    let rig = TestRig::new();
    let facade = facade(&rig);

    let mut all = facade.supported_types(&TypeConstraint::any());
    all.sort();
    // the abstract group type is not creatable
    assert_eq!(all, vec!["driver", "station", "welding_station"]);

    let welding: CapabilitySet = [WELDING].into_iter().collect();
    assert_eq!(
        facade.supported_types(&TypeConstraint::providing(welding)),
        vec!["welding_station"]
    );

    let mut stations = facade.supported_types(&TypeConstraint::of_tag("station"));
    stations.sort();
    assert_eq!(stations, vec!["station", "welding_station"]);
}

#[test]
fn destroy_detaches_outstanding_proxies() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let proxy = facade.create("station", named("Press")).unwrap();
    let clone = proxy.clone();

    facade.destroy(proxy.id(), true).unwrap();

    assert!(!clone.is_attached());
    assert!(matches!(clone.name(), Err(Error::ProxyDetached { .. })));
    assert!(matches!(
        facade.get(proxy.id()),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn modify_flushes_through_the_manager() {
    let rig = TestRig::new();
    let facade = facade(&rig);
    let proxy = facade.create("station", named("Press")).unwrap();

    facade
        .modify(
            proxy.id(),
            Box::new(|state| {
                state.core.description = "refitted".to_string();
                Ok(())
            }),
        )
        .unwrap();
    facade.save(proxy.id()).unwrap();

    let rebooted = rig.reboot();
    rebooted.manager.load().unwrap();
    let handle = rebooted.manager.graph().get(proxy.id()).unwrap();
    assert_eq!(handle.with(|state| state.core.description.clone()), "refitted");
}

struct PlantBootstrap;

impl ResourceInitializer for PlantBootstrap {
    fn name(&self) -> &str {
        "plant-bootstrap"
    }

    fn description(&self) -> &str {
        "seeds one cell with two stations and a shared driver"
    }

    fn execute(&self, _registry: &TypeRegistry) -> Result<Vec<SeedResource>> {
        Ok(vec![
            SeedResource::new("station", "Cell 1")
                .child(SeedResource::new("station", "Station 1.1"))
                .child(SeedResource::new("welding_station", "Station 1.2")),
            SeedResource::new("driver", "Bus Driver"),
        ])
    }
}

#[test]
fn initializer_seeds_a_persistent_hierarchy() {
    let rig = TestRig::new();
    let facade = facade(&rig);

    let roots = facade.execute_initializer(&PlantBootstrap).unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0].name().unwrap(), "Cell 1");
    assert_eq!(roots[0].children().unwrap().len(), 2);

    let rebooted = rig.reboot();
    rebooted.manager.load().unwrap();
    let graph = rebooted.manager.graph();
    assert_eq!(graph.len(), 4);

    let cell = graph.by_name("Cell 1").unwrap();
    assert_eq!(cell.with(|state| state.core.children().len()), 2);
    let welder = graph.by_name("Station 1.2").unwrap();
    assert_eq!(welder.with(|state| state.core.parent()), Some(cell.id()));
    assert!(welder.with(|state| {
        state
            .core
            .capabilities()
            .provides(&[WELDING].into_iter().collect())
    }));

    // the driver is a root of its own
    let driving: CapabilitySet = [DRIVING].into_iter().collect();
    assert!(rebooted.manager.graph().single_by_capability(&driving).is_ok());
}
