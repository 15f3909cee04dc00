use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{FlagError, FlagRegistry, Flags};

/// Version tag written into every [`FlagColumn`].
pub const FLAG_SERIALIZER_VERSION: &str = "1";

/// A column of flag sets packed as little-endian bit rows.
///
/// `flag_order` records the name of every bit position at packing time so the
/// rows can be decoded against a registry whose order has since changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagColumn {
    pub version: String,
    pub flag_order: Vec<String>,
    pub width: usize,
    pub rows: Vec<Vec<u8>>,
}

/// Packs and unpacks [`Flags`] against a [`FlagRegistry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagSerializer;

impl FlagSerializer {
    /// Packs `values` using the registry's current bit order.
    #[must_use]
    pub fn pack(registry: &FlagRegistry, values: &[Flags]) -> FlagColumn {
        let flag_order = registry.names();
        let width = flag_order.len().div_ceil(8).max(1);
        let rows = values
            .iter()
            .map(|flags| (0..width).map(|index| flags.byte(index)).collect())
            .collect();
        FlagColumn {
            version: FLAG_SERIALIZER_VERSION.to_owned(),
            flag_order,
            width,
            rows,
        }
    }

    /// Decodes a column into flags meaningful under `registry`.
    ///
    /// Names in the column's `flag_order` that the registry lacks are
    /// registered (with a warning) before decoding. When the stored order is
    /// a prefix of the registry's order the rows are read directly; otherwise
    /// every set bit is moved to the position its name now occupies.
    ///
    /// # Errors
    ///
    /// Fails on an unknown version, a malformed row, or if registering the
    /// missing names would overflow the registry.
    pub fn unpack(registry: &FlagRegistry, column: &FlagColumn) -> Result<Vec<Flags>, FlagError> {
        if column.version != FLAG_SERIALIZER_VERSION {
            return Err(FlagError::UnsupportedVersion(column.version.clone()));
        }

        let missing: Vec<&String> = column
            .flag_order
            .iter()
            .filter(|name| registry.bit(name).is_none())
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "registering flags found in stored data but not defined");
            registry.extend(missing)?;
        }

        let stored: Vec<Flags> = column
            .rows
            .iter()
            .enumerate()
            .map(|(row, bytes)| {
                if bytes.len() == column.width {
                    Ok(Flags::from_le_bytes(bytes))
                } else {
                    Err(FlagError::RowWidth {
                        row,
                        expected: column.width,
                        found: bytes.len(),
                    })
                }
            })
            .collect::<Result<_, _>>()?;

        let current = registry.names();
        if current.starts_with(&column.flag_order) {
            return Ok(stored);
        }

        debug!(
            stored = column.flag_order.len(),
            current = current.len(),
            "remapping packed flags to the current bit order"
        );
        let crosswalk: Vec<usize> = column
            .flag_order
            .iter()
            .map(|name| {
                registry
                    .bit(name)
                    .ok_or_else(|| FlagError::Unknown(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        Ok(stored
            .into_iter()
            .map(|flags| {
                let mut remapped = Flags::empty();
                for old_bit in flags.bits() {
                    if let Some(&new_bit) = crosswalk.get(old_bit) {
                        remapped.insert_bit(new_bit);
                    }
                }
                remapped
            })
            .collect())
    }
}
