use approx::assert_relative_eq;
use arbor_converters::ThirdCoreToFullCore;
use arbor_core::{
    FlagRegistry, FlagSerializer, Layout, Level, ModelError, Resources, SchemaBuilder, Symmetry,
    TypeSpec, units::MOLES_PER_CC_TO_ATOMS_PER_BARN_CM,
};
use integration_tests::{hex_core, init_logging, leaf, model};

#[test]
fn volume_fractions_of_two_leaves() {
    let mut model = model();
    let block = model.create_composite("B1", Level::Block, "fuel").unwrap();
    let first = leaf(&mut model, "fuel", "fuel", 3.0, &[("U235", 0.001)]);
    let second = leaf(&mut model, "coolant", "coolant", 7.0, &[("NA23", 0.02)]);
    model.add(block, first).unwrap();
    model.add(block, second).unwrap();

    let fractions = model.volume_fractions(block).unwrap();
    assert_eq!(fractions.len(), 2);
    assert_eq!(fractions[0].0, first);
    assert_eq!(fractions[1].0, second);
    assert_relative_eq!(fractions[0].1, 0.3);
    assert_relative_eq!(fractions[1].1, 0.7);
}

#[test]
fn density_from_number_density_and_weight() {
    let mut model = model();
    model.resources_mut().nuclides.define("U235", 235.04);
    let pin = leaf(&mut model, "pin", "fuel", 1.0, &[("U235", 0.002)]);

    assert_relative_eq!(
        model.density(pin).unwrap(),
        0.002 * 235.04 / MOLES_PER_CC_TO_ATOMS_PER_BARN_CM
    );
}

#[test]
fn setting_an_absent_nuclide_on_a_composite() {
    let mut model = model();
    let block = model.create_composite("B1", Level::Block, "fuel").unwrap();
    let pin = leaf(&mut model, "pin", "fuel", 2.0, &[("U235", 0.002)]);
    model.add(block, pin).unwrap();

    model.set_number_density(block, "XE135", 0.0).unwrap();
    assert_relative_eq!(model.number_density(block, "XE135").unwrap(), 0.0);
    assert_relative_eq!(model.number_density(pin, "U235").unwrap(), 0.002);

    let err = model.set_number_density(block, "XE135", 1.0e-8).unwrap_err();
    assert!(matches!(err, ModelError::InvalidOperation { .. }));
    assert!(!model.number_densities(pin).unwrap().contains_key("XE135"));
}

#[test]
fn third_core_expansion_triples_power_and_reverts() {
    init_logging();
    let mut model = model();
    let core = hex_core(&mut model, Symmetry::Third { periodic: true }, &[(0, 0), (1, 0)]);
    let total = |model: &arbor_core::Model| -> f64 {
        model
            .children(core)
            .unwrap()
            .into_iter()
            .map(|assembly| model.param_f64(assembly, "power").unwrap())
            .sum()
    };
    let before = total(&model);
    assert_relative_eq!(before, 40.0);

    let mut converter = ThirdCoreToFullCore::new();
    assert!(converter.convert(&mut model, core, None).unwrap());
    assert_eq!(model.children(core).unwrap().len(), 4);
    assert_eq!(converter.added().len(), 2);
    assert_relative_eq!(total(&model), 3.0 * before);
    assert_eq!(model.node(core).unwrap().grid().unwrap().symmetry(), Symmetry::Full);

    let added = converter.added().to_vec();
    converter.restore_previous_geometry(&mut model, None).unwrap();
    assert!(added.iter().all(|&id| !model.contains(id)));
    assert_eq!(model.children(core).unwrap().len(), 2);
    for assembly in model.children(core).unwrap() {
        assert_eq!(model.param_f64(assembly, "power").unwrap(), 20.0);
    }
    assert_eq!(
        model.node(core).unwrap().grid().unwrap().symmetry(),
        Symmetry::Third { periodic: true }
    );
}

#[test]
fn flags_survive_a_reordered_registry() {
    let old = FlagRegistry::with_names(["A", "B", "C"]).unwrap();
    let stored = old.flag("A").unwrap() | old.flag("B").unwrap();
    let column = serde_json::to_string(&FlagSerializer::pack(&old, &[stored])).unwrap();

    let new = FlagRegistry::with_names(["C", "B", "A", "D"]).unwrap();
    let decoded = FlagSerializer::unpack(&new, &serde_json::from_str(&column).unwrap()).unwrap();
    let expected = new.flag("A").unwrap() | new.flag("B").unwrap();
    assert_eq!(decoded, vec![expected]);
    assert!(TypeSpec::One(expected).matches(decoded[0], true));
    assert!(!TypeSpec::One(new.flag("C").unwrap()).matches(decoded[0], false));
}

#[test]
fn stored_node_keeps_its_flags_under_a_new_registry() {
    let old = SchemaBuilder::with_flags(FlagRegistry::with_names(["A", "B", "C"]).unwrap())
        .build()
        .unwrap();
    let mut model = arbor_core::Model::new(old, Resources::default());
    let block = model.create_composite("B1", Level::Block, "a b").unwrap();
    let text = Layout::capture(&model, block).unwrap().to_json().unwrap();

    let new = SchemaBuilder::with_flags(FlagRegistry::with_names(["C", "B", "A", "D"]).unwrap())
        .build()
        .unwrap();
    let registry = new.flags().clone();
    let (restored, root) = Layout::from_json(&text)
        .unwrap()
        .restore(new, Resources::default())
        .unwrap();

    let a_and_b = registry.flag("A").unwrap() | registry.flag("B").unwrap();
    assert!(restored.has_flags(root, &TypeSpec::One(a_and_b), true).unwrap());
    assert!(
        !restored
            .has_flags(root, &TypeSpec::One(registry.flag("D").unwrap()), false)
            .unwrap()
    );
}
