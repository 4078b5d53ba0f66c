use crate::Symbol;
use itertools::Itertools;
use lasso::ThreadedRodeo;

/// One user-supplied root pattern, as collected by the agent shell. `class`
/// may be dotted or slashed and may end in `*` for a package/subtree match;
/// an empty or `*` method name covers every method of the matched class.
#[derive(Debug, Clone)]
pub struct RootSpec {
    pub class: String,
    pub method: String,
    pub signature: String,
    pub marker: bool,
}

/// Compiled root patterns, one entry per pattern, held as parallel arrays.
/// Exact class entries are interned so the planner's match pass compares
/// symbols; wildcard entries keep their prefix string.
pub struct RootSet {
    class_names: Vec<String>,
    class_syms: Vec<Option<Symbol>>,
    class_wildcards: Vec<bool>,
    method_names: Vec<String>,
    method_signatures: Vec<String>,
    marker_methods: Vec<bool>,
}

impl RootSet {
    pub fn empty() -> Self {
        Self::compile(&[], &ThreadedRodeo::new())
    }

    pub fn compile(specs: &[RootSpec], interner: &ThreadedRodeo) -> Self {
        let (class_names, class_syms, class_wildcards, method_names, method_signatures, marker_methods) =
            specs
                .iter()
                .map(|spec| {
                    let slashed = spec.class.replace('.', "/");
                    let (name, wildcard) = match slashed.strip_suffix('*') {
                        Some(prefix) => (prefix.to_string(), true),
                        None => (slashed, false),
                    };
                    let sym = (!wildcard).then(|| interner.get_or_intern(&name));
                    (
                        name,
                        sym,
                        wildcard,
                        spec.method.clone(),
                        spec.signature.clone(),
                        spec.marker,
                    )
                })
                .multiunzip();
        Self {
            class_names,
            class_syms,
            class_wildcards,
            method_names,
            method_signatures,
            marker_methods,
        }
    }

    pub fn len(&self) -> usize {
        self.class_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_names.is_empty()
    }

    /// True when implicit-root heuristics (`main`, `Runnable.run`) apply:
    /// no entries at all, or nothing but markers.
    pub fn no_explicit_roots(&self) -> bool {
        self.is_empty() || self.marker_methods.iter().all(|&m| m)
    }

    pub fn matches_class(&self, i: usize, sym: Symbol, name: &str) -> bool {
        if self.class_wildcards[i] {
            name.starts_with(&self.class_names[i])
        } else {
            self.class_syms[i] == Some(sym)
        }
    }

    pub fn is_class_wildcard(&self, i: usize) -> bool {
        self.class_wildcards[i]
    }

    pub fn is_method_wildcard(&self, i: usize) -> bool {
        self.method_names[i].is_empty() || self.method_names[i] == "*"
    }

    pub fn method_name(&self, i: usize) -> &str {
        &self.method_names[i]
    }

    pub fn method_signature(&self, i: usize) -> &str {
        &self.method_signatures[i]
    }

    pub fn is_marker(&self, i: usize) -> bool {
        self.marker_methods[i]
    }
}

/// Include/exclude gate on internal class names. Empty include list means
/// "everything not excluded"; excludes always win.
pub struct InstrFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl InstrFilter {
    pub fn allow_all() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        let canon = |patterns: Vec<String>| {
            patterns
                .into_iter()
                .map(|p| p.replace('.', "/"))
                .collect::<Vec<_>>()
        };
        Self {
            include: canon(include),
            exclude: canon(exclude),
        }
    }

    pub fn passes(&self, name: &str) -> bool {
        if self.exclude.iter().any(|p| glob_match(p, name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| glob_match(p, name))
    }
}

fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}
