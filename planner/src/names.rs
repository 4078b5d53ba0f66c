use crate::Symbol;
use lasso::ThreadedRodeo;

/// Names compared on the planner's hot paths, interned once up front.
pub struct KnownNames {
    pub java_lang_object: Symbol,
    pub java_lang_thread: Symbol,
    pub java_lang_runnable: Symbol,
    pub java_lang_class_loader: Symbol,
    pub http_servlet: Symbol,
    pub run_name: Symbol,
    pub no_arg_void_desc: Symbol,
    pub main_name: Symbol,
    pub main_desc: Symbol,
    pub load_class_name: Symbol,
    pub load_class_desc: Symbol,
    pub servlet_do_methods: [Symbol; 5],
}

impl KnownNames {
    pub fn new(interner: &ThreadedRodeo) -> Self {
        Self {
            java_lang_object: interner.get_or_intern("java/lang/Object"),
            java_lang_thread: interner.get_or_intern("java/lang/Thread"),
            java_lang_runnable: interner.get_or_intern("java/lang/Runnable"),
            java_lang_class_loader: interner.get_or_intern("java/lang/ClassLoader"),
            http_servlet: interner.get_or_intern("javax/servlet/http/HttpServlet"),
            run_name: interner.get_or_intern("run"),
            no_arg_void_desc: interner.get_or_intern("()V"),
            main_name: interner.get_or_intern("main"),
            main_desc: interner.get_or_intern("([Ljava/lang/String;)V"),
            load_class_name: interner.get_or_intern("loadClass"),
            load_class_desc: interner.get_or_intern("(Ljava/lang/String;)Ljava/lang/Class;"),
            servlet_do_methods: [
                interner.get_or_intern("doGet"),
                interner.get_or_intern("doPost"),
                interner.get_or_intern("doPut"),
                interner.get_or_intern("doDelete"),
                interner.get_or_intern("service"),
            ],
        }
    }
}
