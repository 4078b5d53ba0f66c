use crate::Symbol;
use crate::classfile;
use crate::error::PlanError;
use crate::keys::{ClassId, LoaderId};
use crate::names::KnownNames;
use crate::record::ClassRecord;
use crate::source::ClassBytesSource;
use lasso::ThreadedRodeo;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_log::log::debug;

/// Identity map `(internal_name, loader) → ClassRecord`. Records live in an
/// arena and are addressed by `ClassId`; names are interned so the planner
/// compares symbols, never strings.
pub struct ClassRepository {
    classes: Vec<ClassRecord>,
    name_to_index: HashMap<(Symbol, LoaderId), ClassId>,
    interner: Arc<ThreadedRodeo>,
    names: KnownNames,
    source: Box<dyn ClassBytesSource>,
}

impl ClassRepository {
    pub fn new(source: Box<dyn ClassBytesSource>) -> Self {
        let interner = Arc::new(ThreadedRodeo::new());
        let names = KnownNames::new(&interner);
        Self {
            classes: Vec::with_capacity(1024),
            name_to_index: HashMap::new(),
            interner,
            names,
            source,
        }
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    pub fn names(&self) -> &KnownNames {
        &self.names
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Canonicalises a dotted or slashed class name to slash-form and interns
    /// it. All planner entry points funnel names through here.
    pub fn intern_internal_name(&self, name: &str) -> Symbol {
        if name.contains('.') {
            self.interner.get_or_intern(name.replace('.', "/"))
        } else {
            self.interner.get_or_intern(name)
        }
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.interner.resolve(&sym)
    }

    pub fn get(&self, id: ClassId) -> &ClassRecord {
        &self.classes[id.to_index()]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassRecord {
        &mut self.classes[id.to_index()]
    }

    /// Exact `(name, loader)` identity; the same name under two loaders is
    /// two unrelated records.
    pub fn lookup(&self, name: Symbol, loader: LoaderId) -> Option<ClassId> {
        self.name_to_index.get(&(name, loader)).copied()
    }

    pub fn seed_class_bytes(&self, name: &str, loader: LoaderId, bytes: Vec<u8>) {
        self.source.seed(name, loader, bytes);
    }

    fn push(&mut self, record: ClassRecord) -> ClassId {
        let key = (record.name(), record.loader());
        self.classes.push(record);
        let id = ClassId::from_usize(self.classes.len());
        self.name_to_index.insert(key, id);
        id
    }

    /// Returns the record for `(name, loader)`, decoding it from the byte
    /// source on first reference. `Ok(None)` is a lookup miss, which callers
    /// tolerate silently; malformed class files surface as errors.
    #[hotpath::measure]
    pub fn lookup_or_create(
        &mut self,
        name: Symbol,
        loader: LoaderId,
    ) -> Result<Option<ClassId>, PlanError> {
        if let Some(id) = self.lookup(name, loader) {
            return Ok(Some(id));
        }
        let name_str = self.interner.resolve(&name).to_string();
        let bytes = match self.source.fetch(&name_str, loader) {
            Ok(bytes) => bytes,
            Err(e) if e.is_lookup_miss() => {
                debug!("no class bytes for {}: {}", name_str, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let parsed = classfile::parse_class(bytes, &name_str, &self.interner)?;
        let record = ClassRecord::from_class_file(parsed, loader);
        Ok(Some(self.push(record)))
    }

    /// Fills unresolved super/interface references of `id` from the
    /// repository, pulling parents in on first reference. Failures leave the
    /// slot unresolved.
    fn resolve_refs(&mut self, id: ClassId) {
        let loader = self.get(id).loader();
        if self.get(id).super_ref().is_none() {
            if let Some(super_sym) = self.get(id).super_name() {
                if let Ok(Some(sid)) = self.lookup_or_create(super_sym, loader) {
                    self.get_mut(id).set_super_ref(sid);
                }
            }
        }
        for slot in 0..self.get(id).interface_names().len() {
            if self.get(id).interface_refs()[slot].is_none() {
                let iface_sym = self.get(id).interface_names()[slot];
                if let Ok(Some(iid)) = self.lookup_or_create(iface_sym, loader) {
                    self.get_mut(id).set_interface_ref(slot, iid);
                }
            }
        }
    }

    /// Inserts `id` into the subclass list of every resolved ancestor: each
    /// class on the super chain and each interface reachable along it. Runs
    /// before root matching so interface queries see the new class.
    pub fn link_loaded_class(&mut self, id: ClassId) {
        let mut cur = id;
        loop {
            self.resolve_refs(cur);
            self.add_to_interface_subclasses(cur, id);
            let Some(sup) = self.get(cur).super_ref() else {
                break;
            };
            if sup == cur {
                break;
            }
            self.get_mut(sup).add_subclass(id);
            cur = sup;
        }
    }

    fn add_to_interface_subclasses(&mut self, of: ClassId, sub: ClassId) {
        for slot in 0..self.get(of).interface_refs().len() {
            if let Some(iid) = self.get(of).interface_refs()[slot] {
                self.get_mut(iid).add_subclass(sub);
                self.resolve_refs(iid);
                self.add_to_interface_subclasses(iid, sub);
            }
        }
    }

    /// True iff `ancestor` names this class or appears on its super chain.
    /// `ancestor` must come from this repository's interner; the walk
    /// compares symbols, never strings. A self-referential super terminates
    /// with false.
    pub fn is_subclass_of(&self, id: ClassId, ancestor: Symbol) -> bool {
        let mut cur = id;
        loop {
            let rec = self.get(cur);
            if rec.name() == ancestor {
                return true;
            }
            match rec.super_ref() {
                Some(sup) if sup != cur => cur = sup,
                _ => return false,
            }
        }
    }

    /// Transitive closure over resolved interfaces and the super chain,
    /// stopping at `java/lang/Object`. Unresolved interface slots still match
    /// by name one level deep.
    pub fn implements_interface(&self, id: ClassId, iface: Symbol) -> bool {
        let rec = self.get(id);
        if rec.name() == self.names.java_lang_object {
            return false;
        }
        for (slot, name) in rec.interface_names().iter().enumerate() {
            if *name == iface {
                return true;
            }
            if let Some(iid) = rec.interface_refs()[slot] {
                if self.implements_interface(iid, iface) {
                    return true;
                }
            }
        }
        match rec.super_ref() {
            Some(sup) if sup != id => self.implements_interface(sup, iface),
            _ => false,
        }
    }
}
