//! Top-level entry point: wires the root scope, the installed builtins,
//! and the native bridge together and drives one program to completion.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};
use yks_core::Result;

use crate::bridge::Bridge;
use crate::import;
use crate::scope::Scope;
use crate::{builtins, statements};

pub struct Interpreter {
    root: Rc<Scope>,
    #[allow(dead_code)]
    bridge: Rc<Bridge>,
}

impl Interpreter {
    pub fn new() -> Self {
        let root = Scope::root();
        let bridge = Rc::new(Bridge::new());
        builtins::install(&root, bridge.clone());
        Self { root, bridge }
    }

    pub fn root_scope(&self) -> &Rc<Scope> {
        &self.root
    }

    /// Parse and run `path` to completion. `<lib-root>` defaults to a
    /// `lib` directory alongside the program unless `YKS_LIB_ROOT` is set.
    pub fn run_file(&self, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            yks_core::Error::import_not_found(format!("cannot read '{}': {e}", path.display()), yks_syntax::Position::new(0, 0))
        })?;
        info!(file = %path.display(), "running program");
        self.run_source(path, &source)
    }

    fn run_source(&self, path: &Path, source: &str) -> Result<()> {
        let program = yks_syntax::parse_source(source).map_err(|e| {
            yks_core::Error::new(
                yks_core::ErrorKind::TypeMismatch,
                format!("parse error: {e}"),
                yks_syntax::Position::new(1, 1),
            )
        })?;

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let lib_root = std::env::var("YKS_LIB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("lib"));
        import::set_lib_root(lib_root);
        import::push_base(base_dir);

        debug!(statements = program.statements.len(), "parsed program");
        let result = statements::run_main_block(&self.root, &program.statements);
        import::pop_base();
        result.map(|_| ())
    }

    /// Render the root scope's bindings, one `name: value` per line, for
    /// the `runinfo` CLI command.
    pub fn describe_root(&self) -> String {
        self.root.describe()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".yks").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn runs_a_minimal_program_and_binds_root_scope() {
        let interp = Interpreter::new();
        let file = write_temp("yar a = 1, b = 2.5; yar c = a + b;");
        interp.run_file(file.path()).unwrap();
        assert!(matches!(interp.root_scope().lookup("c").unwrap().get(), yks_core::Value::Float(f) if f == 3.5));
    }

    #[test]
    fn struct_and_pointer_scenarios_run_end_to_end() {
        let interp = Interpreter::new();
        let file = write_temp(
            "struct P { x, y } yar p = new P { x: 10, y: 20 }; yar sum = p->x + p->y;",
        );
        interp.run_file(file.path()).unwrap();
        assert!(matches!(interp.root_scope().lookup("sum").unwrap().get(), yks_core::Value::Int(30)));
    }

    #[test]
    fn multi_value_declaration_binds_a_single_calls_returns() {
        let interp = Interpreter::new();
        let file = write_temp("func f(a, b) { return b, a } yar x, y = f(1, 2);");
        interp.run_file(file.path()).unwrap();
        assert!(matches!(interp.root_scope().lookup("x").unwrap().get(), yks_core::Value::Int(2)));
        assert!(matches!(interp.root_scope().lookup("y").unwrap().get(), yks_core::Value::Int(1)));
    }

    #[test]
    fn importing_two_modules_each_declaring_something_does_not_close_early() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yks"), "func fa() { return 1 }").unwrap();
        std::fs::write(dir.path().join("b.yks"), "func fb() { return 2 }").unwrap();
        let main_path = dir.path().join("main.yks");
        std::fs::write(&main_path, "import \"a\"; import \"b\"; yar r = fa() + fb();").unwrap();

        let interp = Interpreter::new();
        interp.run_file(&main_path).unwrap();
        assert!(matches!(interp.root_scope().lookup("r").unwrap().get(), yks_core::Value::Int(3)));
    }
}
