use crate::editor::BytecodeEditor;
use crate::error::PlanError;
use crate::keys::{ClassId, LoaderId};
use crate::pack::InstrumentedMethods;
use crate::record::flags::{ACC_PUBLIC, ACC_STATIC, InjKind};
use crate::repository::ClassRepository;
use crate::roots::{InstrFilter, RootSet, RootSpec};
use crate::PlannerConfig;
use tracing_log::log::{debug, warn};

// Launcher shims also carry a conforming main; they must not use up the
// one-shot main capture, or the real main class would be missed.
const SUN_LAUNCHER_PREFIX: &str = "sun/launcher/Launcher";

// Constructors only skip instrumentation on split-verifier class files.
const SPLIT_VERIFIER_MAJOR: u16 = 50;

/// One class that was already loaded in the target when the profiler
/// attached.
#[derive(Debug, Clone)]
pub struct ClassLoadEvent {
    pub class_name: String,
    pub loader_id: LoaderId,
}

/// Attach-time snapshot replayed by `initial`, including class bytes for
/// custom loaders the byte source cannot reach on its own.
#[derive(Default)]
pub struct LoadedClassesSnapshot {
    pub classes: Vec<ClassLoadEvent>,
    pub custom_loader_bytes: Vec<(String, LoaderId, Vec<u8>)>,
}

/// Decides, per class-load event, which methods get probes: walks roots,
/// wildcards, filters and the implicit-root heuristics, marks per-method
/// scan state on the records, and queues instrumented methods for packing.
///
/// Every entry point must run under the session's single planner lock; the
/// planner itself never synchronises.
pub struct InstrPlanner {
    repo: ClassRepository,
    config: PlannerConfig,
    roots: RootSet,
    filter: InstrFilter,
    editor: Box<dyn BytecodeEditor>,
    pending: Vec<(ClassId, u16)>,
    no_explicit_roots: bool,
    main_instrumented: bool,
    next_instr_id: u16,
}

impl InstrPlanner {
    pub fn new(
        repo: ClassRepository,
        config: PlannerConfig,
        filter: InstrFilter,
        editor: Box<dyn BytecodeEditor>,
    ) -> Self {
        Self {
            repo,
            config,
            roots: RootSet::empty(),
            filter,
            editor,
            pending: Vec::new(),
            no_explicit_roots: true,
            main_instrumented: false,
            next_instr_id: 1,
        }
    }

    pub fn repository(&self) -> &ClassRepository {
        &self.repo
    }

    pub fn no_explicit_roots(&self) -> bool {
        self.no_explicit_roots
    }

    pub fn main_instrumented(&self) -> bool {
        self.main_instrumented
    }

    /// Session start: compiles the root patterns, seeds custom-loader bytes,
    /// replays every already-loaded class, and marks
    /// `java.lang.ClassLoader.loadClass(String)` so class loading is timed
    /// from the first event on. Malformed classes in the snapshot are logged
    /// and skipped; one bad class must not abort the replay.
    pub fn initial(
        &mut self,
        snapshot: LoadedClassesSnapshot,
        roots: &[RootSpec],
    ) -> Result<InstrumentedMethods, PlanError> {
        self.roots = RootSet::compile(roots, self.repo.interner());
        self.no_explicit_roots = self.roots.no_explicit_roots();
        for (name, loader, bytes) in snapshot.custom_loader_bytes {
            self.repo
                .seed_class_bytes(&name.replace('.', "/"), loader, bytes);
        }
        for event in &snapshot.classes {
            let sym = self.repo.intern_internal_name(&event.class_name);
            let id = match self.repo.lookup_or_create(sym, event.loader_id) {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(e) => {
                    warn!("skipping {} from snapshot: {}", event.class_name, e);
                    continue;
                }
            };
            self.repo.get_mut(id).set_loaded(true);
            self.repo.link_loaded_class(id);
            if self.repo.get(id).is_interface() {
                continue;
            }
            self.check_runnable_root(id);
            if self.class_matches_any_root(id) {
                self.mark_matched_roots(id);
            }
            self.mark_all_methods_instrumentable(id);
        }
        self.mark_class_loader_load_class();
        Ok(self.drain_pending())
    }

    /// Per class-load event. Subclass-graph updates run before root matching
    /// so interface queries already see the new class. Interfaces contribute
    /// no methods beyond what is already pending.
    pub fn on_class_load(
        &mut self,
        class_name: &str,
        loader_id: LoaderId,
    ) -> Result<InstrumentedMethods, PlanError> {
        let sym = self.repo.intern_internal_name(class_name);
        let Some(id) = self.repo.lookup_or_create(sym, loader_id)? else {
            return Ok(self.drain_pending());
        };
        self.repo.get_mut(id).set_loaded(true);
        self.repo.link_loaded_class(id);
        if self.repo.get(id).is_interface() {
            return Ok(self.drain_pending());
        }

        self.inject_profile_points(id);
        self.check_runnable_root(id);
        self.check_implicit_main(id);

        let is_root_class = self.class_matches_any_root(id);
        let class_name = self.repo.resolve(sym).to_string();
        if !is_root_class && !self.filter.passes(&class_name) {
            return Ok(self.drain_pending());
        }
        if is_root_class {
            self.mark_matched_roots(id);
        }
        let rec = self.repo.get(id);
        if self.filter.passes(&class_name) || rec.all_methods_markers() || rec.all_methods_roots() {
            self.mark_all_methods_instrumentable(id);
        }
        Ok(self.drain_pending())
    }

    /// Present for planner-API completeness; this total-instrumentation
    /// variant decides everything at class load.
    pub fn on_method_invoke(
        &mut self,
        _class_name: &str,
        _loader_id: LoaderId,
        _method_name: &str,
        _method_signature: &str,
    ) -> InstrumentedMethods {
        InstrumentedMethods::default()
    }

    pub fn on_reflect_invoke(
        &mut self,
        _class_name: &str,
        _loader_id: LoaderId,
        _method_name: &str,
        _method_signature: &str,
    ) -> InstrumentedMethods {
        InstrumentedMethods::default()
    }

    fn mark_class_loader_load_class(&mut self) {
        let names = self.repo.names();
        let class_loader = names.java_lang_class_loader;
        let load_class = names.load_class_name;
        let load_class_desc = names.load_class_desc;
        match self.repo.lookup_or_create(class_loader, LoaderId::BOOTSTRAP) {
            Ok(Some(id)) => {
                if let Some(idx) = self.repo.get(id).find_method(load_class, load_class_desc) {
                    self.check_and_mark_method(id, idx, None);
                }
            }
            Ok(None) => debug!("java/lang/ClassLoader not resolvable, load timing unavailable"),
            Err(e) => warn!("failed to decode java/lang/ClassLoader: {}", e),
        }
    }

    /// Profile-point injection: user-configured points first, then the
    /// servlet hot methods the first time an HttpServlet subclass loads.
    fn inject_profile_points(&mut self, id: ClassId) {
        let sym = self.repo.get(id).name();
        let class_name = self.repo.resolve(sym).to_string();
        let points: Vec<(String, String)> = self
            .config
            .profile_points
            .iter()
            .filter(|p| p.class_name.replace('.', "/") == class_name)
            .map(|p| (p.method_name.clone(), p.method_signature.clone()))
            .collect();
        for (method, signature) in points {
            let mname = self.repo.interner().get_or_intern(&method);
            let msig = self.repo.interner().get_or_intern(&signature);
            if let Some(idx) = self.repo.get(id).find_method(mname, msig) {
                self.check_and_mark_method(id, idx, Some(InjKind::CodeRegion));
            }
        }

        if self.repo.get(id).servlet_do_scanned() {
            return;
        }
        let servlet = self.repo.names().http_servlet;
        if sym != servlet && self.repo.is_subclass_of(id, servlet) {
            let do_methods = self.repo.names().servlet_do_methods;
            for m in do_methods {
                let indices: Vec<usize> = (0..self.repo.get(id).method_count())
                    .filter(|&i| self.repo.get(id).method_name(i) == m)
                    .collect();
                for idx in indices {
                    self.check_and_mark_method(id, idx, Some(InjKind::CodeRegion));
                }
            }
            self.repo.get_mut(id).set_servlet_do_scanned();
        }
    }

    /// Auto-roots `run()V` on `java/lang/Runnable` implementors when thread
    /// instrumentation is on or no explicit roots were given. `Thread` itself
    /// stays out: its `run` fires for every thread and would drown the graph.
    fn check_runnable_root(&mut self, id: ClassId) {
        if !self.config.instrument_spawned_threads && !self.no_explicit_roots {
            return;
        }
        let names = self.repo.names();
        let runnable = names.java_lang_runnable;
        let thread = names.java_lang_thread;
        let run = names.run_name;
        let void_desc = names.no_arg_void_desc;
        if self.repo.get(id).name() == thread {
            return;
        }
        if !self.repo.implements_interface(id, runnable) {
            return;
        }
        if let Some(idx) = self.repo.get(id).find_method(run, void_desc) {
            self.repo.get_mut(id).set_method_root(idx);
            self.check_and_mark_method(id, idx, None);
        }
    }

    /// One-shot capture of `public static void main(String[])` when no
    /// explicit roots exist. `sun/launcher/Launcher*` classes are
    /// instrumented but do not consume the capture, so the real main class
    /// still roots when it loads later.
    fn check_implicit_main(&mut self, id: ClassId) {
        if !self.no_explicit_roots || self.main_instrumented {
            return;
        }
        let names = self.repo.names();
        let main = names.main_name;
        let main_desc = names.main_desc;
        let Some(idx) = self.repo.get(id).find_method(main, main_desc) else {
            return;
        };
        const PUBLIC_STATIC: u16 = ACC_PUBLIC | ACC_STATIC;
        if self.repo.get(id).method_access_flags(idx) & PUBLIC_STATIC != PUBLIC_STATIC {
            return;
        }
        self.repo.get_mut(id).set_method_root(idx);
        self.check_and_mark_method(id, idx, None);
        let is_launcher = self
            .repo
            .resolve(self.repo.get(id).name())
            .starts_with(SUN_LAUNCHER_PREFIX);
        if !is_launcher {
            self.main_instrumented = true;
        }
    }

    /// Root-match pass 1: does any entry make this a root class?
    fn class_matches_any_root(&mut self, id: ClassId) -> bool {
        let sym = self.repo.get(id).name();
        let name = self.repo.resolve(sym).to_string();
        (0..self.roots.len()).any(|i| self.roots.matches_class(i, sym, &name))
    }

    /// Root-match pass 2: wildcard entries flip the whole class to
    /// markers/roots; exact entries mark (and immediately check) the named
    /// method. Patterns naming a method the class lacks are ignored.
    fn mark_matched_roots(&mut self, id: ClassId) {
        let sym = self.repo.get(id).name();
        let name = self.repo.resolve(sym).to_string();
        for i in 0..self.roots.len() {
            if !self.roots.matches_class(i, sym, &name) {
                continue;
            }
            if self.roots.is_class_wildcard(i) || self.roots.is_method_wildcard(i) {
                let rec = self.repo.get_mut(id);
                if self.roots.is_marker(i) {
                    rec.set_all_methods_markers();
                } else {
                    rec.set_all_methods_roots();
                }
            } else {
                let mname = self.repo.interner().get_or_intern(self.roots.method_name(i));
                // an empty signature matches the name under any descriptor
                let indices: Vec<usize> = if self.roots.method_signature(i).is_empty() {
                    let rec = self.repo.get(id);
                    (0..rec.method_count())
                        .filter(|&idx| rec.method_name(idx) == mname)
                        .collect()
                } else {
                    let msig = self
                        .repo
                        .interner()
                        .get_or_intern(self.roots.method_signature(i));
                    self.repo.get(id).find_method(mname, msig).into_iter().collect()
                };
                for idx in indices {
                    let rec = self.repo.get_mut(id);
                    if self.roots.is_marker(i) {
                        rec.set_method_marker(idx);
                    } else {
                        rec.set_method_root(idx);
                    }
                    self.check_and_mark_method(id, idx, None);
                }
            }
        }
    }

    fn mark_all_methods_instrumentable(&mut self, id: ClassId) {
        for idx in 0..self.repo.get(id).method_count() {
            self.check_and_mark_method(id, idx, None);
        }
    }

    /// The per-method reachability check. Idempotent: a method that is
    /// already REACHABLE is left untouched, so repeated sweeps cannot
    /// double-instrument or double-count.
    fn check_and_mark_method(&mut self, id: ClassId, idx: usize, kind: Option<InjKind>) {
        if self.repo.get(id).is_method_reachable(idx) {
            return;
        }
        let object_sym = self.repo.names().java_lang_object;
        let class_sym = self.repo.get(id).name();
        let class_name = self.repo.resolve(class_sym).to_string();
        let filter_passes = self.filter.passes(&class_name);

        let rec = self.repo.get_mut(id);
        rec.set_method_reachable(idx);
        let is_root = rec.is_method_root(idx);
        let is_marker = rec.is_method_marker(idx);

        let mut unscannable = rec.is_method_native(idx)
            || rec.is_method_abstract(idx)
            || (!is_root && !is_marker && !filter_passes)
            || class_sym == object_sym
            || (rec.is_method_constructor(idx)
                && rec.major_version() > SPLIT_VERIFIER_MAJOR
                && self.config.skip_constructors);
        if !unscannable {
            let code = rec.method_bytecode(idx);
            if (self.config.dont_instrument_empty && is_trivial_return(code))
                || (self.config.dont_scan_getter_setter && is_getter_setter(code))
            {
                unscannable = true;
            }
        }
        if unscannable {
            rec.set_method_unscannable(idx);
            return;
        }
        rec.set_method_leaf(idx);

        let kind = kind.unwrap_or(if is_root {
            InjKind::RecursiveRootMethod
        } else if is_marker {
            InjKind::RecursiveMarkerMethod
        } else {
            InjKind::RecursiveNormalMethod
        });
        let instr_id = self.next_instr_id;
        let edited = self
            .editor
            .inject_probes(self.repo.get(id), idx, instr_id, kind);
        match edited {
            Ok(edited) => {
                let rec = self.repo.get_mut(id);
                rec.save_method_info(idx, edited.method_info);
                rec.set_method_instr_id(idx, instr_id);
                rec.set_method_instrumented(idx);
                let grown = rec.current_cp_count() + edited.added_cp_entries;
                rec.set_current_cp_count(grown);
                self.next_instr_id = self.next_instr_id.checked_add(1).unwrap_or(1);
                self.pending.push((id, idx as u16));
            }
            Err(e) => {
                // demoted, nothing already marked is reversed
                warn!(
                    "editor refused {}.{}: {}",
                    class_name,
                    self.repo.resolve(self.repo.get(id).method_name(idx)),
                    e
                );
                self.repo.get_mut(id).set_method_unscannable(idx);
            }
        }
    }

    /// Destructive drain: packs everything instrumented since the last call.
    fn drain_pending(&mut self) -> InstrumentedMethods {
        let mut out = InstrumentedMethods::default();
        for (id, idx) in std::mem::take(&mut self.pending) {
            let rec = self.repo.get(id);
            let name = self.repo.resolve(rec.name()).to_string();
            out.push(
                name,
                rec.loader(),
                idx,
                rec.method_info(idx as usize).to_vec(),
            );
        }
        out
    }
}

// Opcodes recognised by the trivial-body checks.
const OP_ALOAD_0: u8 = 0x2a;
const OP_GETFIELD: u8 = 0xb4;
const OP_PUTFIELD: u8 = 0xb5;
const OP_IRETURN: u8 = 0xac;
const OP_ARETURN: u8 = 0xb0;
const OP_RETURN: u8 = 0xb1;
// *load_1 forms, one per operand type
const LOAD_1_OPCODES: [u8; 5] = [0x1b, 0x1f, 0x23, 0x27, 0x2b];

fn is_trivial_return(code: &[u8]) -> bool {
    code.len() == 1 && code[0] == OP_RETURN
}

/// `aload_0; getfield #x; xreturn`
fn is_getter(code: &[u8]) -> bool {
    code.len() == 5
        && code[0] == OP_ALOAD_0
        && code[1] == OP_GETFIELD
        && (OP_IRETURN..=OP_ARETURN).contains(&code[4])
}

/// `aload_0; xload_1; putfield #x; return`
fn is_setter(code: &[u8]) -> bool {
    code.len() == 6
        && code[0] == OP_ALOAD_0
        && LOAD_1_OPCODES.contains(&code[1])
        && code[2] == OP_PUTFIELD
        && code[5] == OP_RETURN
}

fn is_getter_setter(code: &[u8]) -> bool {
    is_getter(code) || is_setter(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0xb1], true)]
    #[case(&[0xac], false)]
    #[case(&[0x00, 0xb1], false)]
    fn trivial_return_shapes(#[case] code: &[u8], #[case] expected: bool) {
        assert_eq!(is_trivial_return(code), expected);
    }

    #[rstest]
    // aload_0; getfield #2; areturn
    #[case(&[0x2a, 0xb4, 0x00, 0x02, 0xb0], true)]
    // aload_0; getfield #2; ireturn
    #[case(&[0x2a, 0xb4, 0x00, 0x02, 0xac], true)]
    // aload_0; iload_1; putfield #2; return
    #[case(&[0x2a, 0x1b, 0xb5, 0x00, 0x02, 0xb1], true)]
    // aload_0; aload_1; putfield #2; return
    #[case(&[0x2a, 0x2b, 0xb5, 0x00, 0x02, 0xb1], true)]
    // static getter shape does not load this
    #[case(&[0xb2, 0x00, 0x02, 0xb0], false)]
    // getter with extra work
    #[case(&[0x2a, 0xb4, 0x00, 0x02, 0x04, 0x60, 0xac], false)]
    fn getter_setter_shapes(#[case] code: &[u8], #[case] expected: bool) {
        assert_eq!(is_getter_setter(code), expected);
    }
}
