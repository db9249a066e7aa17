//! Pipeline orchestration: parse, resolve, infer, lower, emit, and the
//! external C compiler invocation.
//!
//! The driver is also where user-module imports are discovered: each
//! `import name` that is not a built-in module loads `name.py` next to
//! the importing file, and modules initialize in dependency order.
//! Import cycles are compile-time errors.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use ahash::AHashSet;

use crate::{
    ast::{CodeRange, Module, StmtKind},
    errors::{CompileError, ErrorKind},
    infer,
    intern::Interner,
    ir::{IRModule, check_balance},
    lower,
    parse::parse_source,
    resolve::resolve,
};

/// Modules handled by the runtime rather than compiled from source.
const BUILTIN_MODULES: &[&str] = &["asyncio", "json", "math", "hashlib", "re", "os", "zlib"];

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// C compiler binary; falls back to `$PYRITE_CC`, then `cc`.
    pub cc: Option<String>,
    /// Path to `libpyrite_runtime.a`; falls back to `$PYRITE_RUNTIME_LIB`.
    pub runtime_lib: Option<PathBuf>,
    /// Also write the generated C files to this directory.
    pub emit_c: Option<PathBuf>,
    /// Dump the typed IR as JSON to this path.
    pub emit_ir: Option<PathBuf>,
}

/// Driver failure, mapped to the CLI's exit codes.
#[derive(Debug)]
pub enum DriverError {
    /// Parse/resolve/type errors, already rendered with spans.
    Compile(Vec<String>),
    Io(String),
    /// The external compiler failed; stderr passes through.
    ExternalCompiler { status: Option<i32>, stderr: String },
}

struct LoadedModule {
    name: String,
    source: String,
    module: Module,
}

/// Compiles `source_path` into the native executable at `output_path`.
pub fn compile(source_path: &Path, output_path: &Path, options: &CompileOptions) -> Result<(), DriverError> {
    let mut interner = Interner::new();
    let loaded = load_modules(source_path, &mut interner)?;
    let (ir_modules, info) = front_end(&loaded, &mut interner)?;

    if let Some(ir_path) = &options.emit_ir {
        let json = serde_json::to_string_pretty(&ir_modules)
            .map_err(|e| DriverError::Io(format!("failed to serialize IR: {e}")))?;
        std::fs::write(ir_path, json).map_err(|e| DriverError::Io(format!("failed to write IR dump: {e}")))?;
    }

    let files = crate::emit::emit_program(&ir_modules, &info, &interner);
    let temp_dir = std::env::temp_dir().join(format!("pyrite-{}", std::process::id()));
    std::fs::create_dir_all(&temp_dir).map_err(|e| DriverError::Io(format!("failed to create temp dir: {e}")))?;
    let mut c_paths = Vec::with_capacity(files.len());
    for (name, source) in &files {
        let path = temp_dir.join(name);
        std::fs::write(&path, source).map_err(|e| DriverError::Io(format!("failed to write {name}: {e}")))?;
        if let Some(dir) = &options.emit_c {
            std::fs::create_dir_all(dir).map_err(|e| DriverError::Io(format!("failed to create {}: {e}", dir.display())))?;
            std::fs::write(dir.join(name), source)
                .map_err(|e| DriverError::Io(format!("failed to write C copy: {e}")))?;
        }
        c_paths.push(path);
    }

    invoke_cc(&c_paths, output_path, options)
}

/// Runs the front end only, returning the generated C files. Used by
/// tests and `--emit-c`-style tooling.
pub fn compile_to_c(source: &str, module_name: &str) -> Result<Vec<(String, String)>, Vec<String>> {
    let mut interner = Interner::new();
    let mut module =
        parse_source(source, module_name, 0, &mut interner).map_err(|e| vec![e.render(module_name, source)])?;
    resolve(&mut module, &interner).map_err(|errors| render_all(&errors, &[(module_name.to_owned(), source.to_owned())]))?;
    let modules = vec![module];
    let info = infer::collect(&modules, &interner)
        .map_err(|errors| render_all(&errors, &[(module_name.to_owned(), source.to_owned())]))?;
    let (info, ir_modules) = lower::lower_program(&modules, &mut interner, info)
        .map_err(|errors| render_all(&errors, &[(module_name.to_owned(), source.to_owned())]))?;
    for module in &ir_modules {
        for function in &module.functions {
            if let Err(message) = check_balance(function) {
                return Err(vec![format!("internal error: {message}")]);
            }
        }
    }
    Ok(crate::emit::emit_program(&ir_modules, &info, &interner))
}

fn render_all(errors: &[CompileError], sources: &[(String, String)]) -> Vec<String> {
    errors
        .iter()
        .map(|error| {
            let (name, text) = sources
                .get(error.range.file as usize)
                .map_or(("<unknown>", ""), |(n, t)| (n.as_str(), t.as_str()));
            error.render(name, text)
        })
        .collect()
}

/// Loads the entry module and, transitively, every imported user
/// module. The returned list starts with the entry module; dependencies
/// follow, so initializing in reverse order runs dependencies first.
fn load_modules(entry: &Path, interner: &mut Interner) -> Result<Vec<LoadedModule>, DriverError> {
    let mut loaded: Vec<LoadedModule> = Vec::new();
    let mut visiting: AHashSet<String> = AHashSet::new();
    let mut done: AHashSet<String> = AHashSet::new();
    load_one(entry, interner, &mut loaded, &mut visiting, &mut done)?;
    Ok(loaded)
}

fn load_one(
    path: &Path,
    interner: &mut Interner,
    loaded: &mut Vec<LoadedModule>,
    visiting: &mut AHashSet<String>,
    done: &mut AHashSet<String>,
) -> Result<(), DriverError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DriverError::Io(format!("invalid source path: {}", path.display())))?
        .to_owned();
    if done.contains(&name) {
        return Ok(());
    }
    if !visiting.insert(name.clone()) {
        return Err(DriverError::Compile(vec![format!(
            "ImportError: import cycle through module '{name}'"
        )]));
    }
    let source = std::fs::read_to_string(path)
        .map_err(|e| DriverError::Io(format!("failed to read {}: {e}", path.display())))?;
    let file_index = loaded.len() as u32;
    let module = parse_source(&source, &name, file_index, interner)
        .map_err(|e| DriverError::Compile(vec![e.render(&name, &source)]))?;

    // Collect user imports before descending.
    let mut imports = Vec::new();
    for stmt in &module.body {
        if let StmtKind::Import { module: imported } = &stmt.kind {
            let imported = interner.get(*imported).to_owned();
            if !BUILTIN_MODULES.contains(&imported.as_str()) {
                imports.push(imported);
            }
        }
    }
    loaded.push(LoadedModule {
        name: name.clone(),
        source,
        module,
    });
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for imported in imports {
        let dep_path = base.join(format!("{imported}.py"));
        if !dep_path.exists() {
            let range = CodeRange::new(file_index, 0, 0);
            let error = CompileError::new(
                ErrorKind::ImportError,
                format!("no module named '{imported}' (looked for {})", dep_path.display()),
                range,
            );
            let loaded_mod = loaded.iter().find(|m| m.name == name).expect("just pushed");
            return Err(DriverError::Compile(vec![error.render(&name, &loaded_mod.source)]));
        }
        load_one(&dep_path, interner, loaded, visiting, done)?;
    }
    visiting.remove(&name);
    done.insert(name);
    Ok(())
}

fn front_end(
    loaded: &[LoadedModule],
    interner: &mut Interner,
) -> Result<(Vec<IRModule>, infer::ProgramInfo), DriverError> {
    let sources: Vec<(String, String)> = loaded.iter().map(|m| (m.name.clone(), m.source.clone())).collect();
    let mut modules: Vec<Module> = Vec::with_capacity(loaded.len());
    let mut errors: Vec<CompileError> = Vec::new();
    for loaded_module in loaded {
        let mut module = clone_module(&loaded_module.module);
        if let Err(mut module_errors) = resolve(&mut module, interner) {
            errors.append(&mut module_errors);
        }
        modules.push(module);
    }
    if !errors.is_empty() {
        return Err(DriverError::Compile(render_all(&errors, &sources)));
    }
    let info = infer::collect(&modules, interner).map_err(|e| DriverError::Compile(render_all(&e, &sources)))?;
    let (info, ir_modules) =
        lower::lower_program(&modules, interner, info).map_err(|e| DriverError::Compile(render_all(&e, &sources)))?;
    for module in &ir_modules {
        for function in &module.functions {
            if let Err(message) = check_balance(function) {
                return Err(DriverError::Compile(vec![format!("internal error: {message}")]));
            }
        }
    }
    Ok((ir_modules, info))
}

/// The parsed AST is immutable in `LoadedModule`; resolution works on a
/// clone so diagnostics can re-read pristine sources.
fn clone_module(module: &Module) -> Module {
    Module {
        name: module.name,
        file: module.file,
        body: module.body.clone(),
        nglobals: module.nglobals,
        module_locals: module.module_locals,
    }
}

fn invoke_cc(c_paths: &[PathBuf], output: &Path, options: &CompileOptions) -> Result<(), DriverError> {
    let cc = options
        .cc
        .clone()
        .or_else(|| std::env::var("PYRITE_CC").ok())
        .unwrap_or_else(|| "cc".to_owned());
    let runtime_lib = options
        .runtime_lib
        .clone()
        .or_else(|| std::env::var("PYRITE_RUNTIME_LIB").ok().map(PathBuf::from))
        .ok_or_else(|| {
            DriverError::Io("runtime library not found; set PYRITE_RUNTIME_LIB to libpyrite_runtime.a".to_owned())
        })?;

    let mut command = Command::new(&cc);
    command.arg("-O2").arg("-o").arg(output);
    for path in c_paths {
        command.arg(path);
    }
    command.arg(&runtime_lib);
    // The runtime's platform dependencies.
    command.arg("-lpthread").arg("-lm");
    if cfg!(target_os = "linux") {
        command.arg("-ldl");
    }
    let output = command
        .output()
        .map_err(|e| DriverError::Io(format!("failed to run {cc}: {e}")))?;
    if !output.status.success() {
        return Err(DriverError::ExternalCompiler {
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
