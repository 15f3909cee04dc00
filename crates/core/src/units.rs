//! Physical constants shared by composition calculations.

/// Atoms per mole.
pub const AVOGADROS_NUMBER: f64 = 6.022_140_76e23;

/// Square centimeters per barn.
pub const CM2_PER_BARN: f64 = 1.0e-24;

/// Converts a molar concentration in mol/cm³ to a number density in atoms/barn-cm.
pub const MOLES_PER_CC_TO_ATOMS_PER_BARN_CM: f64 = AVOGADROS_NUMBER * CM2_PER_BARN;

/// Number density used to keep a nuclide "present" while effectively removing it.
pub const TRACE_NUMBER_DENSITY: f64 = 1.0e-50;
