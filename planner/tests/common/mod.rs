#![allow(dead_code)]

use jprobe_planner::editor::{BytecodeEditor, EditedMethod, PassthroughEditor};
use jprobe_planner::error::PlanError;
use jprobe_planner::planner::InstrPlanner;
use jprobe_planner::record::ClassRecord;
use jprobe_planner::record::flags::{ACC_ABSTRACT, ACC_INTERFACE, ACC_NATIVE, ACC_PUBLIC, ACC_STATIC, InjKind};
use jprobe_planner::repository::ClassRepository;
use jprobe_planner::roots::InstrFilter;
use jprobe_planner::source::ClassBytesSource;
use jprobe_planner::{LoaderId, PlannerConfig};
use std::collections::HashMap;

pub const ACC_SUPER: u16 = 0x0020;

/// `nop; return` — the smallest body the planner still instruments.
pub const NOP_RETURN: [u8; 2] = [0x00, 0xb1];
/// `return` — rejected when empty bodies are skipped.
pub const BARE_RETURN: [u8; 1] = [0xb1];

const TAG_UTF8: u8 = 1;
const TAG_CLASS: u8 = 7;

struct CpBuilder {
    entries: Vec<Vec<u8>>,
    utf8_index: HashMap<String, u16>,
    class_index: HashMap<String, u16>,
}

impl CpBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            utf8_index: HashMap::new(),
            class_index: HashMap::new(),
        }
    }

    fn utf8(&mut self, s: &str) -> u16 {
        if let Some(&idx) = self.utf8_index.get(s) {
            return idx;
        }
        let mut entry = vec![TAG_UTF8];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        self.entries.push(entry);
        let idx = self.entries.len() as u16;
        self.utf8_index.insert(s.to_string(), idx);
        idx
    }

    fn class(&mut self, name: &str) -> u16 {
        if let Some(&idx) = self.class_index.get(name) {
            return idx;
        }
        let name_idx = self.utf8(name);
        let mut entry = vec![TAG_CLASS];
        entry.extend_from_slice(&name_idx.to_be_bytes());
        self.entries.push(entry);
        let idx = self.entries.len() as u16;
        self.class_index.insert(name.to_string(), idx);
        idx
    }

    fn count(&self) -> u16 {
        self.entries.len() as u16 + 1
    }
}

pub struct MethodSpec {
    name: String,
    desc: String,
    access: u16,
    code: Option<Vec<u8>>,
    max_stack: u16,
    max_locals: u16,
    with_lvt: bool,
    smt_frames: Option<(u16, Vec<u8>)>,
}

impl MethodSpec {
    pub fn new(name: &str, desc: &str, code: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
            access: ACC_PUBLIC,
            code: Some(code.to_vec()),
            max_stack: 2,
            max_locals: 2,
            with_lvt: false,
            smt_frames: None,
        }
    }

    pub fn public_static(name: &str, desc: &str, code: &[u8]) -> Self {
        Self::new(name, desc, code).access(ACC_PUBLIC | ACC_STATIC)
    }

    pub fn abstract_method(name: &str, desc: &str) -> Self {
        let mut m = Self::new(name, desc, &[]);
        m.access = ACC_PUBLIC | ACC_ABSTRACT;
        m.code = None;
        m
    }

    pub fn native_method(name: &str, desc: &str) -> Self {
        let mut m = Self::new(name, desc, &[]);
        m.access = ACC_PUBLIC | ACC_NATIVE;
        m.code = None;
        m
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn with_lvt(mut self) -> Self {
        self.with_lvt = true;
        self
    }

    pub fn with_frames(mut self, count: u16, frames: &[u8]) -> Self {
        self.smt_frames = Some((count, frames.to_vec()));
        self
    }
}

pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    access: u16,
    major: u16,
    methods: Vec<MethodSpec>,
    reference_throwable: bool,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let super_name = if name == "java/lang/Object" {
            None
        } else {
            Some("java/lang/Object".to_string())
        };
        Self {
            name: name.to_string(),
            super_name,
            interfaces: Vec::new(),
            access: ACC_PUBLIC | ACC_SUPER,
            major: 52,
            methods: Vec::new(),
            reference_throwable: false,
        }
    }

    pub fn major(mut self, major: u16) -> Self {
        self.major = major;
        self
    }

    pub fn interface(mut self) -> Self {
        self.access = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        self
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_string());
        self
    }

    pub fn implements(mut self, iface: &str) -> Self {
        self.interfaces.push(iface.to_string());
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn reference_throwable(mut self) -> Self {
        self.reference_throwable = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut cp = CpBuilder::new();
        let this_idx = cp.class(&self.name);
        let super_idx = self.super_name.as_deref().map(|s| cp.class(s)).unwrap_or(0);
        let iface_idxs: Vec<u16> = self.interfaces.iter().map(|i| cp.class(i)).collect();
        if self.reference_throwable {
            cp.class("java/lang/Throwable");
        }

        // serialise methods first so every name lands in the pool
        let mut method_blobs = Vec::new();
        for m in &self.methods {
            let name_idx = cp.utf8(&m.name);
            let desc_idx = cp.utf8(&m.desc);
            let mut blob = Vec::new();
            blob.extend_from_slice(&m.access.to_be_bytes());
            blob.extend_from_slice(&name_idx.to_be_bytes());
            blob.extend_from_slice(&desc_idx.to_be_bytes());
            match &m.code {
                None => blob.extend_from_slice(&0u16.to_be_bytes()),
                Some(code) => {
                    let code_idx = cp.utf8("Code");
                    let mut subs: Vec<(u16, Vec<u8>)> = Vec::new();
                    if m.with_lvt {
                        let lvt_idx = cp.utf8("LocalVariableTable");
                        subs.push((lvt_idx, 0u16.to_be_bytes().to_vec()));
                    }
                    if let Some((count, frames)) = &m.smt_frames {
                        let smt_idx = cp.utf8("StackMapTable");
                        let mut payload = count.to_be_bytes().to_vec();
                        payload.extend_from_slice(frames);
                        subs.push((smt_idx, payload));
                    }
                    let subs_len: usize = subs.iter().map(|(_, p)| 6 + p.len()).sum();
                    let attr_len = 2 + 2 + 4 + code.len() + 2 + 2 + subs_len;
                    blob.extend_from_slice(&1u16.to_be_bytes());
                    blob.extend_from_slice(&code_idx.to_be_bytes());
                    blob.extend_from_slice(&(attr_len as u32).to_be_bytes());
                    blob.extend_from_slice(&m.max_stack.to_be_bytes());
                    blob.extend_from_slice(&m.max_locals.to_be_bytes());
                    blob.extend_from_slice(&(code.len() as u32).to_be_bytes());
                    blob.extend_from_slice(code);
                    blob.extend_from_slice(&0u16.to_be_bytes()); // exception table
                    blob.extend_from_slice(&(subs.len() as u16).to_be_bytes());
                    for (name_idx, payload) in subs {
                        blob.extend_from_slice(&name_idx.to_be_bytes());
                        blob.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                        blob.extend_from_slice(&payload);
                    }
                }
            }
            method_blobs.push(blob);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&cp.count().to_be_bytes());
        for entry in &cp.entries {
            out.extend_from_slice(entry);
        }
        out.extend_from_slice(&self.access.to_be_bytes());
        out.extend_from_slice(&this_idx.to_be_bytes());
        out.extend_from_slice(&super_idx.to_be_bytes());
        out.extend_from_slice(&(iface_idxs.len() as u16).to_be_bytes());
        for idx in iface_idxs {
            out.extend_from_slice(&idx.to_be_bytes());
        }
        out.extend_from_slice(&0u16.to_be_bytes()); // fields
        out.extend_from_slice(&(method_blobs.len() as u16).to_be_bytes());
        for blob in method_blobs {
            out.extend_from_slice(&blob);
        }
        out.extend_from_slice(&0u16.to_be_bytes()); // class attributes
        out
    }
}

/// `aload_0; getfield #idx; areturn` — idx is arbitrary, the shape check
/// never dereferences it.
pub fn getter_code() -> Vec<u8> {
    vec![0x2a, 0xb4, 0x00, 0x02, 0xb0]
}

pub fn object_class_bytes() -> Vec<u8> {
    ClassBuilder::new("java/lang/Object")
        .method(MethodSpec::new("<init>", "()V", &NOP_RETURN))
        .method(MethodSpec::new("toString", "()Ljava/lang/String;", &NOP_RETURN))
        .build()
}

pub fn class_loader_bytes() -> Vec<u8> {
    ClassBuilder::new("java/lang/ClassLoader")
        .method(MethodSpec::new(
            "loadClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            &NOP_RETURN,
        ))
        .build()
}

pub fn runnable_bytes() -> Vec<u8> {
    ClassBuilder::new("java/lang/Runnable")
        .interface()
        .method(MethodSpec::abstract_method("run", "()V"))
        .build()
}

pub fn thread_bytes() -> Vec<u8> {
    ClassBuilder::new("java/lang/Thread")
        .implements("java/lang/Runnable")
        .method(MethodSpec::new("run", "()V", &NOP_RETURN))
        .method(MethodSpec::new("start", "()V", &NOP_RETURN))
        .build()
}

pub fn main_class_bytes(name: &str) -> Vec<u8> {
    ClassBuilder::new(name)
        .method(MethodSpec::public_static(
            "main",
            "([Ljava/lang/String;)V",
            &NOP_RETURN,
        ))
        .method(MethodSpec::new("work", "()V", &NOP_RETURN))
        .build()
}

/// In-memory byte source for tests.
pub struct MapSource {
    classes: HashMap<String, Vec<u8>>,
    injected: std::sync::Mutex<HashMap<(String, i32), Vec<u8>>>,
}

impl MapSource {
    pub fn new(classes: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            classes: classes
                .into_iter()
                .map(|(name, bytes)| (name.to_string(), bytes))
                .collect(),
            injected: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl ClassBytesSource for MapSource {
    fn fetch(&self, name: &str, loader: LoaderId) -> Result<Vec<u8>, PlanError> {
        if let Some(bytes) = self
            .injected
            .lock()
            .unwrap()
            .get(&(name.to_string(), loader.raw()))
        {
            return Ok(bytes.clone());
        }
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| PlanError::ClassNotFound(name.to_string()))
    }

    fn seed(&self, name: &str, loader: LoaderId, bytes: Vec<u8>) {
        self.injected
            .lock()
            .unwrap()
            .insert((name.to_string(), loader.raw()), bytes);
    }
}

/// Passthrough editor that also logs every injection it performs, so tests
/// can assert which methods were handed over and under which kind.
pub struct RecordingEditor {
    pub log: std::sync::Arc<std::sync::Mutex<Vec<(jprobe_planner::Symbol, usize, InjKind)>>>,
}

impl RecordingEditor {
    pub fn new() -> (Self, std::sync::Arc<std::sync::Mutex<Vec<(jprobe_planner::Symbol, usize, InjKind)>>>) {
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (Self { log: log.clone() }, log)
    }
}

impl BytecodeEditor for RecordingEditor {
    fn inject_probes(
        &mut self,
        record: &ClassRecord,
        method_idx: usize,
        _instr_id: u16,
        kind: InjKind,
    ) -> Result<EditedMethod, PlanError> {
        self.log
            .lock()
            .unwrap()
            .push((record.name(), method_idx, kind));
        Ok(EditedMethod {
            method_info: record.method_info(method_idx).to_vec(),
            added_cp_entries: 0,
        })
    }
}

/// Editor that refuses every method, for the demotion path.
pub struct FailingEditor;

impl BytecodeEditor for FailingEditor {
    fn inject_probes(
        &mut self,
        _record: &ClassRecord,
        _method_idx: usize,
        _instr_id: u16,
        _kind: InjKind,
    ) -> Result<EditedMethod, PlanError> {
        Err(PlanError::Editor("synthetic refusal".to_string()))
    }
}

pub fn planner_with(
    classes: Vec<(&str, Vec<u8>)>,
    config: PlannerConfig,
    filter: InstrFilter,
) -> InstrPlanner {
    let repo = ClassRepository::new(Box::new(MapSource::new(classes)));
    InstrPlanner::new(repo, config, filter, Box::new(PassthroughEditor))
}

pub fn record<'a>(planner: &'a InstrPlanner, name: &str) -> &'a ClassRecord {
    let repo = planner.repository();
    let sym = repo.intern_internal_name(name);
    let id = repo
        .lookup(sym, LoaderId::BOOTSTRAP)
        .unwrap_or_else(|| panic!("{} not in repository", name));
    repo.get(id)
}

pub fn method_idx(planner: &InstrPlanner, class: &str, method: &str, desc: &str) -> usize {
    let repo = planner.repository();
    let rec = record(planner, class);
    let mname = repo.interner().get_or_intern(method);
    let mdesc = repo.interner().get_or_intern(desc);
    rec.find_method(mname, mdesc)
        .unwrap_or_else(|| panic!("{}.{}{} not found", class, method, desc))
}

pub fn scan_bits(planner: &InstrPlanner, class: &str, method: &str, desc: &str) -> u16 {
    let idx = method_idx(planner, class, method, desc);
    record(planner, class).method_scan_bits(idx)
}
