use std::collections::HashMap;

use parking_lot::RwLock;

use super::{FlagError, Flags, MAX_FLAGS};

/// Flag names every registry starts with.
const BASE_FLAGS: &[&str] = &[
    "PRIMARY",
    "SECONDARY",
    "TERTIARY",
    "ANNULAR",
    "HIGH",
    "MEDIUM",
    "LOW",
    "REACTOR",
    "CORE",
    "ASSEMBLY",
    "BLOCK",
    "FUEL",
    "TEST",
    "CONTROL",
    "ULTIMATE_SHUTDOWN",
    "SHIELD",
    "SHIELD_BLOCK",
    "SLUG",
    "REFLECTOR",
    "DRIVER",
    "IGNITER",
    "FEED",
    "STARTER",
    "BLANKET",
    "BOOSTER",
    "TARGET",
    "MODERATOR",
    "DUCT",
    "GRID_PLATE",
    "HANDLING_SOCKET",
    "INLET_NOZZLE",
    "PLENUM",
    "BOND",
    "LINER",
    "CLAD",
    "PIN",
    "GAP",
    "WIRE",
    "COOLANT",
    "INTERCOOLANT",
    "INTERDUCTCOOLANT",
    "ACLP",
    "SKID",
    "VOID",
    "GUIDE_TUBE",
    "FISSION_CHAMBER",
    "INSTRUMENT",
    "MATERIAL",
    "LOAD_PAD",
    "ADJUSTABLE",
    "ABSORBER",
    "POISON",
    "STRUCTURE",
    "LOWER",
    "UPPER",
    "INNER",
    "OUTER",
    "MIDDLE",
    "GAS",
    "DEPLETABLE",
    "STATIONARY",
    "MOVEABLE",
    "LEAD",
    "SPACER",
    "BATCH",
    "CORE_BARREL",
    "RADIAL_SHIELD",
    "SODIUM",
    "MIXTURE",
];

/// Append-only mapping between flag names and bit positions.
///
/// Bit positions are never reassigned: new names always take the next free
/// bit, so [`Flags`] values created earlier stay valid. The registry uses
/// interior locking so it can be extended through a shared reference, which
/// is what happens when unpacking data that names flags not yet known.
#[derive(Debug)]
pub struct FlagRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    names: Vec<String>,
    bits: HashMap<String, usize>,
}

impl Default for FlagRegistry {
    fn default() -> Self {
        let mut inner = Inner::default();
        for name in BASE_FLAGS {
            inner.bits.insert((*name).to_owned(), inner.names.len());
            inner.names.push((*name).to_owned());
        }
        Self {
            inner: RwLock::new(inner),
        }
    }
}

impl Clone for FlagRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
        }
    }
}

impl FlagRegistry {
    /// Creates a registry holding exactly `names`, in order.
    ///
    /// # Errors
    ///
    /// Fails if a name is invalid or there are more than [`MAX_FLAGS`] names.
    pub fn with_names<I, S>(names: I) -> Result<Self, FlagError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self {
            inner: RwLock::new(Inner::default()),
        };
        registry.extend(names)?;
        Ok(registry)
    }

    /// Registers any of `names` not already present, in order.
    ///
    /// Names are normalized to upper case. Either all new names are added or,
    /// on error, none are.
    ///
    /// # Errors
    ///
    /// Fails if a name is not a valid flag identifier or if the registry
    /// would exceed [`MAX_FLAGS`] names.
    pub fn extend<I, S>(&self, names: I) -> Result<(), FlagError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fresh: Vec<String> = Vec::new();
        let mut inner = self.inner.write();
        for name in names {
            let name = normalize(name.as_ref())?;
            if !inner.bits.contains_key(&name) && !fresh.contains(&name) {
                fresh.push(name);
            }
        }
        if let Some(overflow) = fresh.get(MAX_FLAGS.saturating_sub(inner.names.len())) {
            return Err(FlagError::CapacityExceeded(overflow.clone()));
        }
        for name in fresh {
            let bit = inner.names.len();
            inner.bits.insert(name.clone(), bit);
            inner.names.push(name);
        }
        Ok(())
    }

    /// Returns the bit position of `name`, if registered.
    #[must_use]
    pub fn bit(&self, name: &str) -> Option<usize> {
        self.inner.read().bits.get(&name.to_ascii_uppercase()).copied()
    }

    /// Returns the single-bit set for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Unknown`] if `name` is not registered.
    pub fn flag(&self, name: &str) -> Result<Flags, FlagError> {
        self.bit(name)
            .and_then(Flags::from_bit)
            .ok_or_else(|| FlagError::Unknown(name.to_owned()))
    }

    /// Parses whitespace or `|` separated flag names, all of which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Unknown`] for the first unrecognized word.
    pub fn parse(&self, text: &str) -> Result<Flags, FlagError> {
        text.split(|c: char| c.is_whitespace() || c == '|')
            .filter(|word| !word.is_empty())
            .try_fold(Flags::empty(), |acc, word| Ok(acc | self.flag(word)?))
    }

    /// Derives flags from a free-form type name such as `"inner fuel 2"`.
    ///
    /// Words are upper-cased and stripped of trailing digits. Runs of up to
    /// three adjacent words are tried joined with underscores first, so
    /// `"grid plate"` yields `GRID_PLATE`. Unrecognized words are ignored.
    #[must_use]
    pub fn from_type_name(&self, type_name: &str) -> Flags {
        let words: Vec<String> = type_name
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .map(|word| {
                word.trim_end_matches(|c: char| c.is_ascii_digit())
                    .to_ascii_uppercase()
            })
            .filter(|word| !word.is_empty())
            .collect();

        let inner = self.inner.read();
        let mut flags = Flags::empty();
        let mut start = 0;
        while start < words.len() {
            let longest = (1..=3_usize.min(words.len() - start)).rev().find_map(|span| {
                let joined = words[start..start + span].join("_");
                inner.bits.get(&joined).map(|&bit| (span, bit))
            });
            match longest {
                Some((span, bit)) => {
                    flags.insert_bit(bit);
                    start += span;
                }
                None => start += 1,
            }
        }
        flags
    }

    /// Returns the names of the bits set in `flags`, in bit order.
    #[must_use]
    pub fn to_names(&self, flags: Flags) -> Vec<String> {
        let inner = self.inner.read();
        flags
            .bits()
            .filter_map(|bit| inner.names.get(bit).cloned())
            .collect()
    }

    /// Formats `flags` as space-separated names.
    #[must_use]
    pub fn describe(&self, flags: Flags) -> String {
        self.to_names(flags).join(" ")
    }

    /// Returns every registered name in bit order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.read().names.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(name: &str) -> Result<String, FlagError> {
    let upper = name.trim().to_ascii_uppercase();
    let valid = upper.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && upper.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(upper)
    } else {
        Err(FlagError::InvalidName(name.to_owned()))
    }
}
