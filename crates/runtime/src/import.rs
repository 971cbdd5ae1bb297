//! Module resolution: `import "path"` candidate search, cyclic-import
//! detection, and splicing an imported file's top-level declarations into
//! the main scope.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use yks_core::{Error, Result};
use yks_syntax::Position;

use crate::scope::Scope;

const EXT: &str = "yks";

thread_local! {
    static LIB_ROOT: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
    static BASE_STACK: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());
    static RESOLVING: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());
}

/// Set once by the interpreter before running the main program; `<lib-root>`
/// candidates resolve relative to this directory.
pub fn set_lib_root(root: PathBuf) {
    LIB_ROOT.with(|r| *r.borrow_mut() = Some(root));
}

/// Push the directory a just-opened source file lives in, so nested
/// `import`s inside it resolve relative to their own file, not the
/// top-level program's.
pub fn push_base(dir: PathBuf) {
    BASE_STACK.with(|s| s.borrow_mut().push(dir));
}

pub fn pop_base() {
    BASE_STACK.with(|s| {
        s.borrow_mut().pop();
    });
}

fn current_base() -> PathBuf {
    BASE_STACK.with(|s| s.borrow().last().cloned()).unwrap_or_else(|| PathBuf::from("."))
}

fn os_tag() -> &'static str {
    std::env::consts::OS
}

fn candidates(base: &Path, p: &str) -> Vec<PathBuf> {
    vec![
        base.join(format!("{p}.{EXT}")),
        base.join(format!("{p}_{}.{EXT}", os_tag())),
    ]
}

fn resolve(p: &str, position: Position) -> Result<PathBuf> {
    let base = current_base();
    let mut tried = candidates(&base, p);
    if let Some(root) = LIB_ROOT.with(|r| r.borrow().clone()) {
        tried.extend(candidates(&root, p));
    }
    tried
        .into_iter()
        .find(|c| c.is_file())
        .ok_or_else(|| Error::import_not_found(format!("no module found for import path '{p}'"), position))
}

pub fn run_import(scope: &Rc<Scope>, path: &str, position: Position) -> Result<()> {
    if !scope.is_main {
        return Err(Error::import_not_found(
            "import is only valid at the top of the main scope",
            position,
        ));
    }
    if *scope.imports_closed.borrow() {
        return Err(Error::import_not_found(
            "import must appear before any other statement in the main scope",
            position,
        ));
    }

    let resolved = resolve(path, position)?;
    let canonical = resolved
        .canonicalize()
        .map_err(|e| Error::import_not_found(format!("cannot resolve '{path}': {e}"), position))?;
    let key = canonical.to_string_lossy().into_owned();

    if scope.imported_libs.borrow().contains(&key) {
        return Ok(());
    }

    let already_resolving = RESOLVING.with(|r| r.borrow().contains(&canonical));
    if already_resolving {
        return Err(Error::cyclic_import(format!("'{path}' is already being imported"), position));
    }

    let source = std::fs::read_to_string(&canonical)
        .map_err(|e| Error::import_not_found(format!("cannot read '{path}': {e}"), position))?;
    let program = yks_syntax::parse_source(&source)
        .map_err(|e| Error::import_not_found(format!("'{path}' failed to parse: {e}"), position))?;

    RESOLVING.with(|r| r.borrow_mut().push(canonical.clone()));
    push_base(canonical.parent().map(Path::to_path_buf).unwrap_or_default());

    let result = crate::statements::run_block(scope, &program.statements);

    pop_base();
    RESOLVING.with(|r| {
        r.borrow_mut().pop();
    });

    result?;
    scope.imported_libs.borrow_mut().insert(key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_reports_import_not_found() {
        set_lib_root(std::env::temp_dir());
        push_base(std::env::temp_dir());
        let scope = Scope::root();
        let err = run_import(&scope, "definitely_not_a_real_module_xyz", Position::new(1, 1)).unwrap_err();
        assert_eq!(err.kind, yks_core::ErrorKind::ImportNotFound);
        pop_base();
    }

    #[test]
    fn non_main_scope_rejects_import() {
        let root = Scope::root();
        let child = Scope::child(&root, false, false);
        let err = run_import(&child, "anything", Position::new(1, 1)).unwrap_err();
        assert_eq!(err.kind, yks_core::ErrorKind::ImportNotFound);
    }
}
