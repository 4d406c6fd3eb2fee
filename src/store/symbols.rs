//! Interned reference names, built once per run.
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
}

/// Where a symbol's array comes from during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOrigin {
    Reference,
    Calculation,
    ModuleOutput,
}

impl fmt::Display for SymbolOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolOrigin::Reference => "input reference",
            SymbolOrigin::Calculation => "calculation",
            SymbolOrigin::ModuleOutput => "module output",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    origins: Vec<SymbolOrigin>,
    lookup: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.names.len() }

    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    /// Interns `name`. Returns `Err(existing_origin)` if the name is already taken.
    pub fn intern(&mut self, name: &str, origin: SymbolOrigin) -> Result<SymbolId, SymbolOrigin> {
        if let Some(&id) = self.lookup.get(name) {
            return Err(self.origins[id.index()]);
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.origins.push(origin);
        self.lookup.insert(name.to_string(), id);
        Ok(id)
    }

    /// Makes `alias` resolve to the same symbol as `target`. Fails like [`Self::intern`] when taken.
    pub fn alias(&mut self, alias: &str, target: SymbolId) -> Result<(), SymbolOrigin> {
        if let Some(&id) = self.lookup.get(alias) {
            return Err(self.origins[id.index()]);
        }
        self.lookup.insert(alias.to_string(), target);
        Ok(())
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<SymbolId> { self.lookup.get(name).copied() }

    pub fn name(&self, id: SymbolId) -> &str { &self.names[id.index()] }
}
