use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::decoder::Decoder;
use crate::error::{MarshalError, Result};

/// Message-type keyed registry of decoders.
///
/// Keys are unique and the last registration for a key wins. The generic
/// fallback decoder is not an entry here; it is used only for types with no
/// entry.
#[derive(Clone, Default)]
pub struct PolicyMap {
    decoders: BTreeMap<u16, Arc<dyn Decoder>>,
}

impl PolicyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one decoder, returning the one it replaced.
    pub fn insert(&mut self, msg_type: u16, decoder: Arc<dyn Decoder>) -> Option<Arc<dyn Decoder>> {
        self.decoders.insert(msg_type, decoder)
    }

    /// Merge entries into the map; existing keys are overwritten.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = (u16, Arc<dyn Decoder>)>) {
        self.decoders.extend(entries);
    }

    /// Remove every listed type.
    ///
    /// Fails with [`MarshalError::UnknownPolicy`] before touching the map if
    /// any listed type is absent.
    pub fn remove_all(&mut self, types: &[u16]) -> Result<()> {
        if let Some(missing) = types.iter().find(|t| !self.decoders.contains_key(*t)) {
            return Err(MarshalError::UnknownPolicy(*missing));
        }
        for msg_type in types {
            self.decoders.remove(msg_type);
        }
        Ok(())
    }

    /// Copy of the entries for the listed types.
    pub fn subset(&self, types: &[u16]) -> Result<PolicyMap> {
        let mut out = PolicyMap::new();
        for &msg_type in types {
            let decoder = self
                .decoders
                .get(&msg_type)
                .ok_or(MarshalError::UnknownPolicy(msg_type))?;
            out.insert(msg_type, Arc::clone(decoder));
        }
        Ok(out)
    }

    pub fn get(&self, msg_type: u16) -> Option<&Arc<dyn Decoder>> {
        self.decoders.get(&msg_type)
    }

    pub fn contains(&self, msg_type: u16) -> bool {
        self.decoders.contains_key(&msg_type)
    }

    /// Registered types in ascending order.
    pub fn types(&self) -> Vec<u16> {
        self.decoders.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Arc<dyn Decoder>)> {
        self.decoders.iter().map(|(t, d)| (*t, d))
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl FromIterator<(u16, Arc<dyn Decoder>)> for PolicyMap {
    fn from_iter<I: IntoIterator<Item = (u16, Arc<dyn Decoder>)>>(iter: I) -> Self {
        Self {
            decoders: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for PolicyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.decoders.iter().map(|(t, d)| (t, d.name())))
            .finish()
    }
}
