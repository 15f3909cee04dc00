//! Shared fixtures for the cross-crate tests.

use std::collections::BTreeMap;

use arbor_core::{Grid, Level, Locator, Model, NodeId, Resources, Schema, Symmetry, hex};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An empty model on the base schema.
#[must_use]
pub fn model() -> Model {
    Model::new(Schema::base(), Resources::default())
}

/// Creates an unattached leaf with a volume and a composition.
///
/// # Panics
///
/// Panics if the base schema rejects the fields.
pub fn leaf(
    model: &mut Model,
    name: &str,
    type_name: &str,
    volume: f64,
    densities: &[(&str, f64)],
) -> NodeId {
    let id = model.create_leaf(name, type_name, None).unwrap();
    model.set_param(id, "volume", volume).unwrap();
    let densities: BTreeMap<String, f64> = densities
        .iter()
        .map(|&(nuclide, n)| (nuclide.to_owned(), n))
        .collect();
    model.set_param(id, "numberDensities", densities).unwrap();
    id
}

/// Builds a hex core with one assembly per `(i, j)` position.
///
/// Every assembly spans 0-50-100 cm: a fuel block (power 10, one 100 cm^3
/// leaf of U235 at 0.01) under a plenum block (one 100 cm^3 leaf of FE56 at
/// 0.01). Assembly power is 20.
///
/// # Panics
///
/// Panics if a position is repeated.
pub fn hex_core(model: &mut Model, symmetry: Symmetry, positions: &[(i32, i32)]) -> NodeId {
    let core = model.create_composite("core", Level::Core, "core").unwrap();
    model.set_grid(core, Some(Grid::hex(16.0, symmetry))).unwrap();
    for &(i, j) in positions {
        let (ring, position) = hex::ring_position(i, j);
        let label = hex::label(ring, position);
        let assembly = model.create_composite(label.clone(), Level::Assembly, "fuel").unwrap();
        model.set_grid(assembly, Some(Grid::axial(vec![0.0, 50.0, 100.0]))).unwrap();
        model.set_locator(assembly, Locator::index(i, j, 0)).unwrap();
        model.set_param(assembly, "power", 20.0).unwrap();
        model.add(core, assembly).unwrap();

        for (k, (block_type, nuclide, power)) in [("fuel", "U235", 10.0), ("plenum", "FE56", 0.0)]
            .into_iter()
            .enumerate()
        {
            let name = format!("{label}-{k}");
            let block = model.create_composite(name.clone(), Level::Block, block_type).unwrap();
            model.set_locator(block, Locator::index(0, 0, i32::try_from(k).unwrap())).unwrap();
            model.set_param(block, "height", 50.0).unwrap();
            model.set_param(block, "power", power).unwrap();
            model.add(assembly, block).unwrap();

            let component =
                leaf(model, &format!("{name}-c"), block_type, 100.0, &[(nuclide, 0.01)]);
            model.add(block, component).unwrap();
        }
    }
    core
}

/// Every position in rings `1..=rings`, in ring order.
#[must_use]
pub fn rings(rings: u32) -> Vec<(i32, i32)> {
    (1..=rings)
        .flat_map(|ring| {
            (1..=hex::positions_in_ring(ring))
                .filter_map(move |position| hex::indices(ring, position))
        })
        .collect()
}
