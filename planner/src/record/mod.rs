use crate::Symbol;
use crate::classfile::cursor::{put_u16_at, put_u32_at, u16_at, u32_at};
use crate::classfile::{MethodTable, ParsedClass};
use crate::error::PlanError;
use crate::keys::{ClassId, LoaderId};
use crate::record::flags::{
    ACC_ABSTRACT, ACC_INTERFACE, ACC_NATIVE, ACC_STATIC, INJ_MAXNUMBER, InjKind, ScanState,
};
use smallvec::SmallVec;

pub mod flags;

// Verification-type tags used in appended full frames.
const VT_UNINITIALIZED_THIS: u8 = 6;
const VT_OBJECT: u8 = 7;
const VT_UNINITIALIZED: u8 = 8;

// Subclass lists start big for java/lang/Object, which collects every class.
const OBJECT_SUBCLASS_CAPACITY: usize = 500;

#[derive(Clone, Copy)]
enum SubAttr {
    Lvt,
    Lvtt,
    Smt,
}

/// All mutable per-class state for one `(internal_name, loader)` pair.
///
/// The structural half (constant pool, method table, supers) is immutable
/// after parse; everything else is owned by the planner and mutated throughout
/// the session. Offset accessors route to the saved modified `method_info`
/// when one exists, otherwise to the original file bytes.
pub struct ClassRecord {
    name: Symbol,
    loader: LoaderId,
    minor_version: u16,
    major_version: u16,
    access_flags: u16,
    this_class_idx: u16,
    super_name: Option<Symbol>,
    interface_names: SmallVec<[Symbol; 4]>,
    cp: crate::classfile::constant_pool::ConstantPool,
    file: Vec<u8>,
    methods: MethodTable,
    is_object: bool,
    init_name: Symbol,

    super_ref: Option<ClassId>,
    interface_refs: SmallVec<[Option<ClassId>; 4]>,
    subclasses: Option<Vec<ClassId>>,

    scan_bits: Vec<ScanState>,
    instr_ids: Vec<u16>,
    modified_infos: Vec<Option<Vec<u8>>>,
    mod_bc_lens: Vec<u32>,
    mod_lvt_offs: Vec<u32>,
    mod_lvtt_offs: Vec<u32>,
    mod_smt_offs: Vec<u32>,
    orig_lvt_offs: Option<Vec<u32>>,
    orig_lvtt_offs: Option<Vec<u32>>,
    orig_smt_offs: Option<Vec<u32>>,

    current_cp_count: u16,
    base_cp_counts: [i32; INJ_MAXNUMBER],
    smt_name_cp_index: u16,
    throwable_cp_index: u16,

    loaded: bool,
    all_methods_markers: bool,
    all_methods_roots: bool,
    has_uninstrumented_marker_methods: bool,
    has_uninstrumented_root_methods: bool,
    has_method_reachable: bool,
    servlet_do_scanned: bool,

    n_instrumented_methods: u16,
}

impl ClassRecord {
    pub fn from_class_file(parsed: ParsedClass, loader: LoaderId) -> Self {
        let m = parsed.methods.len();
        let smt_name_cp_index = parsed.cp.smt_name_idx();
        let throwable_cp_index = parsed.cp.throwable_class_idx();
        let current_cp_count = parsed.cp.count();
        let n_interfaces = parsed.interfaces.len();
        Self {
            name: parsed.name,
            loader,
            minor_version: parsed.minor_version,
            major_version: parsed.major_version,
            access_flags: parsed.access_flags,
            this_class_idx: parsed.this_class_idx,
            super_name: parsed.super_name,
            interface_names: parsed.interfaces,
            cp: parsed.cp,
            file: parsed.file,
            methods: parsed.methods,
            is_object: parsed.is_object,
            init_name: parsed.init_name,
            super_ref: None,
            interface_refs: SmallVec::from_elem(None, n_interfaces),
            subclasses: None,
            scan_bits: vec![ScanState::default(); m],
            instr_ids: vec![0; m],
            modified_infos: vec![None; m],
            mod_bc_lens: vec![0; m],
            mod_lvt_offs: vec![0; m],
            mod_lvtt_offs: vec![0; m],
            mod_smt_offs: vec![0; m],
            orig_lvt_offs: None,
            orig_lvtt_offs: None,
            orig_smt_offs: None,
            current_cp_count,
            base_cp_counts: [-1; INJ_MAXNUMBER],
            smt_name_cp_index,
            throwable_cp_index,
            loaded: false,
            all_methods_markers: false,
            all_methods_roots: false,
            has_uninstrumented_marker_methods: false,
            has_uninstrumented_root_methods: false,
            has_method_reachable: false,
            servlet_do_scanned: false,
            n_instrumented_methods: 0,
        }
    }

    // ----- identity and structure -----

    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub fn is_object_class(&self) -> bool {
        self.is_object
    }

    pub fn super_name(&self) -> Option<Symbol> {
        self.super_name
    }

    pub fn interface_names(&self) -> &[Symbol] {
        &self.interface_names
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn method_name(&self, i: usize) -> Symbol {
        self.methods.names[i]
    }

    pub fn method_descriptor(&self, i: usize) -> Symbol {
        self.methods.descriptors[i]
    }

    pub fn method_access_flags(&self, i: usize) -> u16 {
        self.methods.access_flags[i]
    }

    pub fn is_method_native(&self, i: usize) -> bool {
        self.methods.access_flags[i] & ACC_NATIVE != 0
    }

    pub fn is_method_abstract(&self, i: usize) -> bool {
        self.methods.access_flags[i] & ACC_ABSTRACT != 0
    }

    pub fn is_method_static(&self, i: usize) -> bool {
        self.methods.access_flags[i] & ACC_STATIC != 0
    }

    pub fn is_method_constructor(&self, i: usize) -> bool {
        self.methods.names[i] == self.init_name
    }

    pub fn find_method(&self, name: Symbol, desc: Symbol) -> Option<usize> {
        (0..self.methods.len())
            .find(|&i| self.methods.names[i] == name && self.methods.descriptors[i] == desc)
    }

    // ----- method_info routing -----

    pub fn has_saved_method_info(&self, i: usize) -> bool {
        self.modified_infos[i].is_some()
    }

    pub fn method_info(&self, i: usize) -> &[u8] {
        match &self.modified_infos[i] {
            Some(buf) => buf,
            None => {
                let off = self.methods.info_offsets[i] as usize;
                let len = self.methods.info_lens[i] as usize;
                &self.file[off..off + len]
            }
        }
    }

    pub fn method_info_len(&self, i: usize) -> usize {
        match &self.modified_infos[i] {
            Some(buf) => buf.len(),
            None => self.methods.info_lens[i] as usize,
        }
    }

    /// Offset of the `Code` attribute header inside the saved `method_info`.
    fn modified_code_attr_offset(&self, i: usize) -> Option<usize> {
        let buf = self.modified_infos[i].as_ref()?;
        let code_name_idx = self.cp.code_name_idx();
        let attr_count = u16_at(buf, 6);
        let mut pos = 8;
        for _ in 0..attr_count {
            if u16_at(buf, pos) == code_name_idx {
                return Some(pos);
            }
            pos += 6 + u32_at(buf, pos + 2) as usize;
        }
        None
    }

    pub fn method_bytecode_len(&mut self, i: usize) -> u32 {
        if self.modified_infos[i].is_none() {
            return self.methods.code_lens[i];
        }
        if self.mod_bc_lens[i] == 0 {
            if let Some(code_attr_off) = self.modified_code_attr_offset(i) {
                // code_length is the u4 just before the bytecode
                let buf = self.modified_infos[i].as_ref().unwrap();
                self.mod_bc_lens[i] = u32_at(buf, code_attr_off + 10);
            }
        }
        self.mod_bc_lens[i]
    }

    pub fn method_bytecode(&mut self, i: usize) -> &[u8] {
        if self.modified_infos[i].is_some() {
            let len = self.method_bytecode_len(i) as usize;
            let Some(code_attr_off) = self.modified_code_attr_offset(i) else {
                return &[];
            };
            let buf = self.modified_infos[i].as_ref().unwrap();
            let off = code_attr_off + 14;
            &buf[off..off + len]
        } else {
            let off = self.methods.code_offsets[i] as usize;
            let len = self.methods.code_lens[i] as usize;
            if off == 0 {
                return &[];
            }
            &self.file[off..off + len]
        }
    }

    /// Offset of the exception table within the backing buffer for method `i`
    /// (the saved `method_info` when present, the original file otherwise).
    pub fn exception_table_start(&mut self, i: usize) -> usize {
        if self.modified_infos[i].is_some() {
            let len = self.method_bytecode_len(i) as usize;
            match self.modified_code_attr_offset(i) {
                Some(code_attr_off) => code_attr_off + 14 + len,
                None => 0,
            }
        } else {
            self.methods.exc_table_offsets[i] as usize
        }
    }

    pub fn local_variable_table_start(&mut self, i: usize) -> usize {
        self.sub_attr_start(i, SubAttr::Lvt)
    }

    pub fn local_variable_type_table_start(&mut self, i: usize) -> usize {
        self.sub_attr_start(i, SubAttr::Lvtt)
    }

    pub fn stack_map_table_start(&mut self, i: usize) -> usize {
        self.sub_attr_start(i, SubAttr::Smt)
    }

    fn sub_attr_name_idx(&self, which: SubAttr) -> u16 {
        match which {
            SubAttr::Lvt => self.cp.lvt_name_idx(),
            SubAttr::Lvtt => self.cp.lvtt_name_idx(),
            SubAttr::Smt => self.smt_name_cp_index,
        }
    }

    fn sub_attr_start(&mut self, i: usize, which: SubAttr) -> usize {
        let name_idx = self.sub_attr_name_idx(which);
        if self.modified_infos[i].is_some() {
            let cached = match which {
                SubAttr::Lvt => self.mod_lvt_offs[i],
                SubAttr::Lvtt => self.mod_lvtt_offs[i],
                SubAttr::Smt => self.mod_smt_offs[i],
            };
            if cached != 0 {
                return cached as usize;
            }
            let found = match self.modified_code_attr_offset(i) {
                Some(code_attr_off) => {
                    let buf = self.modified_infos[i].as_ref().unwrap();
                    locate_sub_attr(buf, code_attr_off, name_idx)
                }
                None => 0,
            };
            match which {
                SubAttr::Lvt => self.mod_lvt_offs[i] = found as u32,
                SubAttr::Lvtt => self.mod_lvtt_offs[i] = found as u32,
                SubAttr::Smt => self.mod_smt_offs[i] = found as u32,
            }
            found
        } else {
            let m = self.methods.len();
            let table = match which {
                SubAttr::Lvt => self.orig_lvt_offs.get_or_insert_with(|| vec![0; m]),
                SubAttr::Lvtt => self.orig_lvtt_offs.get_or_insert_with(|| vec![0; m]),
                SubAttr::Smt => self.orig_smt_offs.get_or_insert_with(|| vec![0; m]),
            };
            if table[i] != 0 {
                return table[i] as usize;
            }
            let code_off = self.methods.code_offsets[i] as usize;
            if code_off == 0 {
                return 0;
            }
            let found = locate_sub_attr(&self.file, code_off - 14, name_idx);
            let table = match which {
                SubAttr::Lvt => self.orig_lvt_offs.as_mut().unwrap(),
                SubAttr::Lvtt => self.orig_lvtt_offs.as_mut().unwrap(),
                SubAttr::Smt => self.orig_smt_offs.as_mut().unwrap(),
            };
            table[i] = found as u32;
            found
        }
    }

    /// Replaces the instrumented `method_info` for method `i`. Reallocating
    /// the offset caches drops cached values for every method, so all offsets
    /// are recomputed against the latest editor output.
    pub fn save_method_info(&mut self, i: usize, buf: Vec<u8>) {
        self.modified_infos[i] = Some(buf);
        let m = self.methods.len();
        self.mod_bc_lens = vec![0; m];
        self.mod_lvt_offs = vec![0; m];
        self.mod_lvtt_offs = vec![0; m];
        self.mod_smt_offs = vec![0; m];
    }

    /// Drops the lazily built original-file offset tables. No-op once any
    /// method carries a saved `method_info`: the modified path keeps its own
    /// caches.
    pub fn reset_tables(&mut self) {
        if self.modified_infos.iter().any(|m| m.is_some()) {
            return;
        }
        self.orig_lvt_offs = None;
        self.orig_lvtt_offs = None;
        self.orig_smt_offs = None;
    }

    // ----- scan-state bits -----

    pub fn method_scan_bits(&self, i: usize) -> u16 {
        self.scan_bits[i].raw()
    }

    pub fn set_method_reachable(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::REACHABLE);
        self.has_method_reachable = true;
    }

    pub fn is_method_reachable(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::REACHABLE)
    }

    pub fn set_method_unscannable(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::UNSCANNABLE);
    }

    pub fn is_method_unscannable(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::UNSCANNABLE)
    }

    pub fn set_method_scanned(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::SCANNED);
    }

    pub fn is_method_scanned(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::SCANNED)
    }

    pub fn set_method_leaf(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::LEAF);
    }

    pub fn unset_method_leaf(&mut self, i: usize) {
        self.scan_bits[i].clear(ScanState::LEAF);
    }

    pub fn is_method_leaf(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::LEAF)
    }

    pub fn set_method_virtual(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::VIRTUAL);
    }

    pub fn is_method_virtual(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::VIRTUAL)
    }

    pub fn set_method_special(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::SPECIAL);
    }

    pub fn is_method_special(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::SPECIAL)
    }

    pub fn set_method_root(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::ROOT);
        self.has_uninstrumented_root_methods = true;
    }

    pub fn is_method_root(&self, i: usize) -> bool {
        self.all_methods_roots || self.scan_bits[i].has(ScanState::ROOT)
    }

    pub fn set_method_marker(&mut self, i: usize) {
        self.scan_bits[i].set(ScanState::MARKER);
        self.has_uninstrumented_marker_methods = true;
    }

    pub fn is_method_marker(&self, i: usize) -> bool {
        self.all_methods_markers || self.scan_bits[i].has(ScanState::MARKER)
    }

    pub fn set_method_instrumented(&mut self, i: usize) {
        if !self.scan_bits[i].has(ScanState::INSTRUMENTED) {
            self.scan_bits[i].set(ScanState::INSTRUMENTED);
            self.n_instrumented_methods += 1;
        }
    }

    pub fn unset_method_instrumented(&mut self, i: usize) {
        if self.scan_bits[i].has(ScanState::INSTRUMENTED) {
            self.scan_bits[i].clear(ScanState::INSTRUMENTED);
            self.instr_ids[i] = 0;
            self.n_instrumented_methods -= 1;
        }
    }

    pub fn is_method_instrumented(&self, i: usize) -> bool {
        self.scan_bits[i].has(ScanState::INSTRUMENTED)
    }

    pub fn set_method_instr_id(&mut self, i: usize, id: u16) {
        self.instr_ids[i] = id;
    }

    pub fn method_instr_id(&self, i: usize) -> u16 {
        self.instr_ids[i]
    }

    pub fn n_instrumented_methods(&self) -> u16 {
        self.n_instrumented_methods
    }

    // ----- class-level flags -----

    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_all_methods_markers(&mut self) {
        self.all_methods_markers = true;
        self.has_uninstrumented_marker_methods = true;
    }

    pub fn all_methods_markers(&self) -> bool {
        self.all_methods_markers
    }

    pub fn set_all_methods_roots(&mut self) {
        self.all_methods_roots = true;
        self.has_uninstrumented_root_methods = true;
    }

    pub fn all_methods_roots(&self) -> bool {
        self.all_methods_roots
    }

    pub fn has_uninstrumented_marker_methods(&self) -> bool {
        self.has_uninstrumented_marker_methods
    }

    pub fn has_uninstrumented_root_methods(&self) -> bool {
        self.has_uninstrumented_root_methods
    }

    pub fn has_method_reachable(&self) -> bool {
        self.has_method_reachable
    }

    pub fn set_servlet_do_scanned(&mut self) {
        self.servlet_do_scanned = true;
    }

    pub fn servlet_do_scanned(&self) -> bool {
        self.servlet_do_scanned
    }

    // ----- supertype graph -----

    pub fn set_super_ref(&mut self, id: ClassId) {
        self.super_ref = Some(id);
    }

    pub fn super_ref(&self) -> Option<ClassId> {
        self.super_ref
    }

    pub fn set_interface_ref(&mut self, slot: usize, id: ClassId) {
        self.interface_refs[slot] = Some(id);
    }

    pub fn interface_refs(&self) -> &[Option<ClassId>] {
        &self.interface_refs
    }

    /// Interfaces dedupe their implementors; plain classes append (a class
    /// loads once per loader, so duplicates cannot arise there).
    pub fn add_subclass(&mut self, sub: ClassId) {
        let dedupe = self.is_interface();
        let capacity = if self.is_object {
            OBJECT_SUBCLASS_CAPACITY
        } else {
            8
        };
        let list = self
            .subclasses
            .get_or_insert_with(|| Vec::with_capacity(capacity));
        if dedupe && list.contains(&sub) {
            return;
        }
        list.push(sub);
    }

    pub fn subclasses(&self) -> &[ClassId] {
        self.subclasses.as_deref().unwrap_or(&[])
    }

    // ----- constant-pool growth -----

    pub fn set_base_cp_count(&mut self, kind: InjKind, value: u16) {
        self.base_cp_counts[u8::from(kind) as usize] = value as i32;
    }

    /// −1 means "not yet sized".
    pub fn base_cp_count(&self, kind: InjKind) -> i32 {
        self.base_cp_counts[u8::from(kind) as usize]
    }

    pub fn set_current_cp_count(&mut self, count: u16) {
        debug_assert!(count >= self.cp.count());
        self.current_cp_count = self.current_cp_count.max(count);
    }

    pub fn current_cp_count(&self) -> u16 {
        self.current_cp_count
    }

    fn smt_name_idx_or_alloc(&mut self) -> Result<u16, PlanError> {
        if self.smt_name_cp_index != 0 {
            return Ok(self.smt_name_cp_index);
        }
        let base = self.base_cp_counts[u8::from(InjKind::StackMap) as usize];
        if base < 0 {
            return Err(PlanError::Internal(
                "stack-map base constant-pool count unset".to_string(),
            ));
        }
        self.smt_name_cp_index = base as u16;
        Ok(self.smt_name_cp_index)
    }

    fn throwable_idx_or_alloc(&mut self) -> Result<u16, PlanError> {
        if self.throwable_cp_index != 0 {
            return Ok(self.throwable_cp_index);
        }
        let base = self.base_cp_counts[u8::from(InjKind::Throwable) as usize];
        if base < 0 {
            return Err(PlanError::Internal(
                "throwable base constant-pool count unset".to_string(),
            ));
        }
        self.throwable_cp_index = base as u16;
        Ok(self.throwable_cp_index)
    }

    pub fn throwable_cp_index(&self) -> u16 {
        self.throwable_cp_index
    }

    // ----- global-catch stack map entry -----

    /// Appends a full frame for the global catch handler at `end_pc` to the
    /// stack-map table of method `i`'s saved `method_info`, creating the
    /// attribute when the method has none. No-op below class-file major 50
    /// (pre-split-verifier classes carry no stack maps).
    pub fn add_global_catch_stack_map_entry(
        &mut self,
        i: usize,
        end_pc: u16,
    ) -> Result<(), PlanError> {
        if self.major_version < 50 {
            return Ok(());
        }
        if self.modified_infos[i].is_none() {
            return Err(PlanError::Internal(format!(
                "method {} has no saved method_info to patch",
                i
            )));
        }
        let smt_name_idx = self.smt_name_idx_or_alloc()?;
        let throwable_idx = self.throwable_idx_or_alloc()?;
        let is_static = self.is_method_static(i);
        let is_ctor = self.is_method_constructor(i);
        let this_class_idx = self.this_class_idx;

        let code_attr_off = self.modified_code_attr_offset(i).ok_or_else(|| {
            PlanError::Internal("saved method_info has no Code attribute".to_string())
        })?;

        let buf = self.modified_infos[i].as_ref().unwrap();
        let entries_off = locate_sub_attr(buf, code_attr_off, smt_name_idx);

        let delta = if entries_off != 0 {
            let count = u16_at(buf, entries_off - 2);
            let attr_len = u32_at(buf, entries_off - 6) as usize;
            let entries = &buf[entries_off..entries_off + attr_len - 2];
            let last_bci = last_frame_bci(entries, count)?;
            let delta = end_pc as i32 - last_bci - 1;
            if delta < 0 {
                return Err(PlanError::Internal(format!(
                    "global catch at {} precedes the last stack map frame",
                    end_pc
                )));
            }
            delta as u16
        } else {
            end_pc
        };

        let mut frame: SmallVec<[u8; 16]> = SmallVec::new();
        frame.push(255);
        frame.extend_from_slice(&delta.to_be_bytes());
        if is_static {
            frame.extend_from_slice(&0u16.to_be_bytes());
        } else if is_ctor {
            frame.extend_from_slice(&1u16.to_be_bytes());
            frame.push(VT_UNINITIALIZED_THIS);
        } else {
            frame.extend_from_slice(&1u16.to_be_bytes());
            frame.push(VT_OBJECT);
            frame.extend_from_slice(&this_class_idx.to_be_bytes());
        }
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.push(VT_OBJECT);
        frame.extend_from_slice(&throwable_idx.to_be_bytes());

        let inserted;
        let buf = self.modified_infos[i].as_mut().unwrap();
        if entries_off != 0 {
            let attr_len = u32_at(buf, entries_off - 6) as usize;
            let insert_at = entries_off - 2 + attr_len;
            buf.splice(insert_at..insert_at, frame.iter().copied());
            inserted = frame.len();
            put_u32_at(buf, entries_off - 6, (attr_len + inserted) as u32);
            let count = u16_at(buf, entries_off - 2);
            put_u16_at(buf, entries_off - 2, count + 1);
            self.mod_smt_offs[i] = entries_off as u32;
        } else {
            let mut attr: Vec<u8> = Vec::with_capacity(8 + frame.len());
            attr.extend_from_slice(&smt_name_idx.to_be_bytes());
            attr.extend_from_slice(&((frame.len() + 2) as u32).to_be_bytes());
            attr.extend_from_slice(&1u16.to_be_bytes());
            attr.extend_from_slice(&frame);
            let insert_at = code_attr_off + 6 + u32_at(buf, code_attr_off + 2) as usize;
            buf.splice(insert_at..insert_at, attr.iter().copied());
            inserted = attr.len();
            // bump the Code attribute's sub-attribute count
            let code_len = u32_at(buf, code_attr_off + 10) as usize;
            let mut pos = code_attr_off + 14 + code_len;
            let exc_count = u16_at(buf, pos) as usize;
            pos += 2 + exc_count * 8;
            let sub_count = u16_at(buf, pos);
            put_u16_at(buf, pos, sub_count + 1);
            self.mod_smt_offs[i] = (insert_at + 8) as u32;
        }
        let code_attr_len = u32_at(buf, code_attr_off + 2);
        put_u32_at(buf, code_attr_off + 2, code_attr_len + inserted as u32);
        // anything cached past the splice point has moved
        self.mod_lvt_offs[i] = 0;
        self.mod_lvtt_offs[i] = 0;
        Ok(())
    }
}

/// Walks a `Code` attribute's sub-attribute table inside `buf` and returns
/// the offset of the wanted attribute's entry list (payload + 2, past the u2
/// count prefix), or 0 when absent.
fn locate_sub_attr(buf: &[u8], code_attr_off: usize, wanted_name_idx: u16) -> usize {
    if wanted_name_idx == 0 {
        return 0;
    }
    let code_len = u32_at(buf, code_attr_off + 10) as usize;
    let mut pos = code_attr_off + 14 + code_len;
    let exc_count = u16_at(buf, pos) as usize;
    pos += 2 + exc_count * 8;
    let sub_count = u16_at(buf, pos);
    pos += 2;
    for _ in 0..sub_count {
        if u16_at(buf, pos) == wanted_name_idx {
            return pos + 6 + 2;
        }
        pos += 6 + u32_at(buf, pos + 2) as usize;
    }
    0
}

/// Bytecode offset of the last frame in a stack-map entry list, -1 when the
/// list is empty.
fn last_frame_bci(entries: &[u8], count: u16) -> Result<i32, PlanError> {
    let mut pos = 0usize;
    let mut bci: i32 = -1;
    for _ in 0..count {
        let tag = *entries
            .get(pos)
            .ok_or_else(|| PlanError::format_at(pos, "truncated stack map frame"))?;
        pos += 1;
        let delta = match tag {
            0..=63 => tag as u16,
            64..=127 => {
                pos += vti_size(entries, pos)?;
                (tag - 64) as u16
            }
            247 => {
                let d = frame_u16(entries, pos)?;
                pos += 2;
                pos += vti_size(entries, pos)?;
                d
            }
            248..=251 => {
                let d = frame_u16(entries, pos)?;
                pos += 2;
                d
            }
            252..=254 => {
                let d = frame_u16(entries, pos)?;
                pos += 2;
                for _ in 0..tag - 251 {
                    pos += vti_size(entries, pos)?;
                }
                d
            }
            255 => {
                let d = frame_u16(entries, pos)?;
                pos += 2;
                let n_locals = frame_u16(entries, pos)?;
                pos += 2;
                for _ in 0..n_locals {
                    pos += vti_size(entries, pos)?;
                }
                let n_stack = frame_u16(entries, pos)?;
                pos += 2;
                for _ in 0..n_stack {
                    pos += vti_size(entries, pos)?;
                }
                d
            }
            other => {
                return Err(PlanError::format_at(
                    pos - 1,
                    format!("reserved stack map frame type {}", other),
                ));
            }
        };
        bci += delta as i32 + 1;
    }
    Ok(bci)
}

fn frame_u16(entries: &[u8], pos: usize) -> Result<u16, PlanError> {
    if entries.len() < pos + 2 {
        return Err(PlanError::format_at(pos, "truncated stack map frame"));
    }
    Ok(u16_at(entries, pos))
}

fn vti_size(entries: &[u8], pos: usize) -> Result<usize, PlanError> {
    let tag = *entries
        .get(pos)
        .ok_or_else(|| PlanError::format_at(pos, "truncated verification type"))?;
    Ok(match tag {
        VT_OBJECT | VT_UNINITIALIZED => 3,
        _ => 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_frame_bci_walks_all_frame_kinds() {
        // same(5), append one int at delta 3, full frame at delta 10
        let entries: Vec<u8> = vec![
            5, // same, bci 5
            252, 0, 3, 1, // append with one Integer local, bci 9
            255, 0, 10, 0, 1, 7, 0, 2, 0, 0, // full frame, bci 20
        ];
        assert_eq!(last_frame_bci(&entries, 3).unwrap(), 20);
    }

    #[test]
    fn last_frame_bci_empty_list() {
        assert_eq!(last_frame_bci(&[], 0).unwrap(), -1);
    }

    #[test]
    fn truncated_frames_report_offsets() {
        let err = last_frame_bci(&[255, 0], 1).unwrap_err();
        assert!(matches!(err, PlanError::ClassFormat { .. }));
    }
}
