use std::collections::BTreeMap;

use super::Level;
use crate::params::{ParamDef, ParamLocation, SerializerKind, Value, ValueKind};

/// Parameters every level defines.
fn common() -> Vec<ParamDef> {
    vec![
        ParamDef::new("flags", ValueKind::Flags)
            .description("Classification flags, derived from the type name")
            .location(ParamLocation::NotApplicable)
            .serializer(SerializerKind::Flags)
            .not_persisted(),
        ParamDef::new("type", ValueKind::Str)
            .description("Free-form object type")
            .location(ParamLocation::NotApplicable)
            .default_value(""),
        ParamDef::new("serialNum", ValueKind::Int)
            .description("Serial number, unique per process")
            .location(ParamLocation::NotApplicable)
            .default_value(-1_i64),
    ]
}

fn component() -> Vec<ParamDef> {
    vec![
        ParamDef::new("numberDensities", ValueKind::Densities)
            .units("atoms/bn-cm")
            .description("Number density of each nuclide")
            .category("composition")
            .default_value(Value::Densities(BTreeMap::new())),
        ParamDef::new("volume", ValueKind::Float)
            .units("cm^3")
            .location(ParamLocation::VolumeIntegrated)
            .category("geometry")
            .default_value(0.0),
        ParamDef::new("area", ValueKind::Float)
            .units("cm^2")
            .location(ParamLocation::NotApplicable)
            .category("geometry")
            .default_value(0.0),
        ParamDef::new("temperature", ValueKind::Float)
            .units("C")
            .description("Average temperature")
            .category("thermal")
            .default_value(20.0),
        ParamDef::new("mgFlux", ValueKind::Floats)
            .units("n*cm/s")
            .description("Volume-integrated multigroup flux")
            .location(ParamLocation::VolumeIntegrated)
            .category("flux")
            .category("multigroup"),
    ]
}

fn block() -> Vec<ParamDef> {
    vec![
        ParamDef::new("height", ValueKind::Float)
            .units("cm")
            .location(ParamLocation::NotApplicable)
            .category("geometry")
            .default_value(0.0),
        ParamDef::new("power", ValueKind::Float)
            .units("W")
            .location(ParamLocation::VolumeIntegrated)
            .category("neutronics")
            .default_value(0.0),
        ParamDef::new("flux", ValueKind::Float)
            .units("n/cm^2/s")
            .category("neutronics")
            .category("flux")
            .default_value(0.0),
        ParamDef::new("xsType", ValueKind::Str)
            .description("Cross section group label")
            .location(ParamLocation::NotApplicable)
            .default_value("A"),
    ]
}

fn assembly() -> Vec<ParamDef> {
    vec![
        ParamDef::new("power", ValueKind::Float)
            .units("W")
            .location(ParamLocation::VolumeIntegrated)
            .category("neutronics")
            .default_value(0.0),
        ParamDef::new("assemNum", ValueKind::Int)
            .location(ParamLocation::NotApplicable)
            .default_value(-1_i64),
    ]
}

fn core() -> Vec<ParamDef> {
    vec![
        ParamDef::new("power", ValueKind::Float)
            .units("W")
            .location(ParamLocation::VolumeIntegrated)
            .category("neutronics")
            .default_value(0.0),
        ParamDef::new("keff", ValueKind::Float)
            .description("Multiplication factor")
            .category("neutronics")
            .default_value(1.0),
    ]
}

fn reactor() -> Vec<ParamDef> {
    vec![
        ParamDef::new("cycle", ValueKind::Int)
            .location(ParamLocation::NotApplicable)
            .default_value(0_i64),
        ParamDef::new("time", ValueKind::Float)
            .units("years")
            .location(ParamLocation::NotApplicable)
            .default_value(0.0),
    ]
}

pub(super) fn definitions(level: Level) -> Vec<ParamDef> {
    let mut defs = common();
    defs.extend(match level {
        Level::Reactor => reactor(),
        Level::Core => core(),
        Level::Assembly => assembly(),
        Level::Block => block(),
        Level::Component => component(),
    });
    defs
}
