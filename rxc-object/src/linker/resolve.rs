//! Symbol resolution
//!
//! Plain objects are always loaded. Archive members are loaded only when
//! they define a symbol that is still strongly undefined; archives are
//! scanned in declaration order, repeatedly, until a full scan pulls nothing.

use super::{LinkInput, LoadedObject};
use crate::archive::Archive;
use crate::error::LinkError;
use crate::object::SymbolBinding;
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// Where a global symbol is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub object: usize,
    pub symbol: u32,
    pub weak: bool,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub defined: BTreeMap<String, Definition>,
    /// Referenced but not (yet) defined; value: some reference is strong,
    /// and the first object referencing it
    pub undefined: BTreeMap<String, (bool, usize)>,
}

impl SymbolTable {
    fn is_strongly_undefined(&self, name: &str) -> bool {
        matches!(self.undefined.get(name), Some((true, _)))
    }

    /// Merge the symbols of a newly loaded object
    fn add(&mut self, objects: &[LoadedObject], index: usize) -> Result<(), LinkError> {
        let obj = &objects[index].object;
        for (i, sym) in obj.symbols.iter().enumerate() {
            if !sym.is_external() {
                continue;
            }
            if sym.is_defined() {
                let new = Definition {
                    object: index,
                    symbol: i as u32,
                    weak: sym.binding == SymbolBinding::Weak,
                };
                match self.defined.get(&sym.name).copied() {
                    None => {
                        self.defined.insert(sym.name.clone(), new);
                    }
                    Some(old) if !old.weak && !new.weak => {
                        return Err(LinkError::DuplicateSymbol {
                            name: sym.name.clone(),
                            first: objects[old.object].name.clone(),
                            second: objects[index].name.clone(),
                        });
                    }
                    Some(old) if old.weak && !new.weak => {
                        self.defined.insert(sym.name.clone(), new);
                    }
                    Some(_) => {}
                }
                self.undefined.remove(&sym.name);
            } else if !self.defined.contains_key(&sym.name) {
                let strong = sym.binding != SymbolBinding::Weak;
                let entry = self.undefined.entry(sym.name.clone()).or_insert((strong, index));
                entry.0 |= strong;
            }
        }
        Ok(())
    }
}

/// Load every object input, then pull archive members to a fixed point.
/// Returns the loaded objects in load order and the global symbol table.
pub fn resolve(inputs: Vec<LinkInput>) -> Result<(Vec<LoadedObject>, SymbolTable), LinkError> {
    let mut objects = Vec::new();
    let mut archives: Vec<(String, Archive)> = Vec::new();
    for input in inputs {
        match input {
            LinkInput::Object { name, object } => objects.push(LoadedObject { name, object }),
            LinkInput::Archive { name, archive } => archives.push((name, archive)),
        }
    }

    let mut table = SymbolTable::default();
    for i in 0..objects.len() {
        table.add(&objects, i)?;
    }

    let mut pulled: Vec<HashSet<usize>> = vec![HashSet::new(); archives.len()];
    loop {
        let mut progress = false;
        for (a, (archive_name, archive)) in archives.iter().enumerate() {
            for (m, member) in archive.members.iter().enumerate() {
                if pulled[a].contains(&m) {
                    continue;
                }
                let wanted = member.object.exported().find(|s| table.is_strongly_undefined(&s.name));
                let Some(sym) = wanted else { continue };
                debug!("link: pulling {}({}) for '{}'", archive_name, member.name, sym.name);
                pulled[a].insert(m);
                objects.push(LoadedObject {
                    name: format!("{}({})", archive_name, member.name),
                    object: member.object.clone(),
                });
                table.add(&objects, objects.len() - 1)?;
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }

    if let Some((name, &(_, first))) = table.undefined.iter().find(|(_, (strong, _))| *strong) {
        return Err(LinkError::UndefinedSymbol {
            name: name.clone(),
            referenced_by: objects[first].name.clone(),
        });
    }
    Ok((objects, table))
}
