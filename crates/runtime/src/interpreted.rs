//! Python and Node runtimes.
//!
//! Both write a shim next to the task that imports the entrypoint, calls the
//! task function with the JSON-decoded parameters and prints the return
//! value as an `airplane_output_set` line.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use studio_types::{StudioError, StudioResult, TaskKind};
use studio_util::find_ancestor_with;
use tokio::process::Command;
use tracing::debug;

use crate::{Cleanup, PrepareRunOptions, PreparedRun, Runtime, create_scratch_dir};

const PYTHON_SHIM: &str = r#"import importlib.util
import json
import sys

TASK_ROOT = {{task_root}}
ENTRYPOINT = {{entrypoint}}
ENTRYPOINT_FUNC = {{entrypoint_func}}


def run():
    sys.path.insert(0, TASK_ROOT)
    spec = importlib.util.spec_from_file_location("studio_task", ENTRYPOINT)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)

    params = json.loads(sys.argv[1]) if len(sys.argv) > 1 else {}
    if ENTRYPOINT_FUNC:
        result = getattr(module, ENTRYPOINT_FUNC)(**params)
    else:
        result = module.main(params)
    if result is not None:
        print("airplane_output_set " + json.dumps(result, default=str), flush=True)


run()
"#;

const NODE_SHIM: &str = r#"import { pathToFileURL } from "node:url";

const ENTRYPOINT = {{entrypoint}};
const ENTRYPOINT_FUNC = {{entrypoint_func}};

async function run() {
  const mod = await import(pathToFileURL(ENTRYPOINT).href);
  const params = process.argv.length > 2 ? JSON.parse(process.argv[2]) : {};
  const fn = ENTRYPOINT_FUNC ? mod[ENTRYPOINT_FUNC] : mod.default ?? mod.main;
  if (typeof fn !== "function") {
    throw new Error(`${ENTRYPOINT} does not export a task function`);
  }
  const result = await fn(params);
  if (result !== undefined) {
    console.log("airplane_output_set " + JSON.stringify(result));
  }
}

run().catch((err) => {
  console.error(err);
  process.exit(1);
});
"#;

/// First of `names` found as a file on `PATH`.
pub fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    find_in_search_path(env::var_os("PATH").as_deref(), names)
}

fn find_in_search_path(search_path: Option<&OsStr>, names: &[&str]) -> Option<PathBuf> {
    let directories: Vec<PathBuf> = env::split_paths(search_path?).collect();
    names.iter().find_map(|name| {
        directories.iter().find_map(|directory| {
            let candidate = directory.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
            let exe = directory.join(format!("{name}.exe"));
            (cfg!(windows) && exe.is_file()).then_some(exe)
        })
    })
}

/// Error for an interpreter that is not installed on this machine.
fn missing_interpreter(interpreter: &str, kind: &str) -> StudioError {
    StudioError::unsupported(format!(
        "{kind} tasks are not supported locally: could not find {interpreter} on PATH. \
         Install it, reach out to support for assistance, or run the task remotely."
    ))
}

/// Fill `{{key}}` placeholders with JSON string literals, which both Python
/// and JavaScript accept.
fn render_shim(template: &str, values: &[(&str, &str)]) -> StudioResult<String> {
    let mut rendered = template.to_string();
    for (key, value) in values {
        let literal = serde_json::to_string(value)?;
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), &literal);
    }
    Ok(rendered)
}

/// Directory holding the task's dependency manifest, or the entrypoint's own
/// directory.
fn task_root(opts: &PrepareRunOptions, marker: &str) -> PathBuf {
    find_ancestor_with(&opts.path, marker)
        .or_else(|| opts.path.parent().map(Path::to_path_buf))
        .filter(|root| !root.as_os_str().is_empty())
        .unwrap_or_else(|| opts.working_dir.clone())
}

/// Write `contents` as `file_name` in a fresh scratch directory, removing the
/// directory again if the write fails.
async fn write_shim(root: &Path, opts: &PrepareRunOptions, file_name: &str, contents: &str) -> StudioResult<(Cleanup, PathBuf)> {
    let dir = create_scratch_dir(root, opts).await?;
    let cleanup = Cleanup::new(&dir);
    let shim_path = dir.join(file_name);
    if let Err(error) = tokio::fs::write(&shim_path, contents).await {
        let _ = cleanup.run().await;
        return Err(StudioError::internal("writing shim file", error));
    }
    debug!(path = %shim_path.display(), "wrote task shim");
    Ok((cleanup, shim_path))
}

fn require_entrypoint(opts: &PrepareRunOptions, kind: TaskKind) -> StudioResult<()> {
    if opts.path.as_os_str().is_empty() {
        return Err(StudioError::bad_request(format!("{kind} tasks need an entrypoint file")));
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PythonRuntime;

impl PythonRuntime {
    /// First of `python3`/`python` on the search path that reports Python 3.
    async fn interpreter(search_path: Option<&OsStr>) -> StudioResult<PathBuf> {
        for name in ["python3", "python"] {
            let Some(bin) = find_in_search_path(search_path, &[name]) else {
                continue;
            };
            let output = match Command::new(&bin).arg("--version").output().await {
                Ok(output) => output,
                Err(error) => {
                    debug!(bin = %bin.display(), error = %error, "python version check failed");
                    continue;
                }
            };
            // Python 2 printed its version on stderr.
            let version = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            if version.trim_start().starts_with("Python 3") {
                debug!(bin = %bin.display(), version = %version.trim(), "found python");
                return Ok(bin);
            }
            debug!(bin = %bin.display(), version = %version.trim(), "skipping non-python-3 interpreter");
        }
        Err(missing_interpreter("Python 3", "Python"))
    }
}

#[async_trait]
impl Runtime for PythonRuntime {
    fn kind(&self) -> TaskKind {
        TaskKind::Python
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".py"]
    }

    async fn prepare_run(&self, opts: &PrepareRunOptions) -> StudioResult<PreparedRun> {
        require_entrypoint(opts, self.kind())?;
        let search_path = env::var_os("PATH");
        let bin = Self::interpreter(search_path.as_deref()).await?;
        let root = task_root(opts, "requirements.txt");
        let (root_literal, entrypoint) = (display(&root), display(&opts.path));
        let shim = render_shim(
            PYTHON_SHIM,
            &[
                ("task_root", root_literal.as_str()),
                ("entrypoint", entrypoint.as_str()),
                ("entrypoint_func", opts.kind_option_str("entrypointFunc").unwrap_or_default()),
            ],
        )?;
        let params = serde_json::to_string(&opts.param_values)?;
        let (cleanup, shim_path) = write_shim(&root, opts, "shim.py", &shim).await?;
        Ok(PreparedRun {
            // -u keeps stdout unbuffered so output lines arrive as they are printed.
            argv: vec![display(&bin), "-u".to_string(), display(&shim_path), params],
            cleanup: Some(cleanup),
            std_api_request: None,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NodeRuntime;

impl NodeRuntime {
    /// `node` for plain JavaScript; `tsx` for files that need transpiling.
    fn interpreter(entrypoint: &Path, search_path: Option<&OsStr>) -> StudioResult<PathBuf> {
        let needs_transpile = matches!(
            entrypoint.extension().and_then(|ext| ext.to_str()),
            Some("ts" | "tsx" | "jsx")
        );
        if needs_transpile {
            return find_in_search_path(search_path, &["tsx"]).ok_or_else(|| missing_interpreter("tsx", "TypeScript"));
        }
        find_in_search_path(search_path, &["node"]).ok_or_else(|| missing_interpreter("node", "Node"))
    }
}

#[async_trait]
impl Runtime for NodeRuntime {
    fn kind(&self) -> TaskKind {
        TaskKind::Node
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".js", ".jsx", ".ts", ".tsx"]
    }

    async fn prepare_run(&self, opts: &PrepareRunOptions) -> StudioResult<PreparedRun> {
        require_entrypoint(opts, self.kind())?;
        let bin = Self::interpreter(&opts.path, env::var_os("PATH").as_deref())?;
        let root = task_root(opts, "package.json");
        let entrypoint = display(&opts.path);
        let shim = render_shim(
            NODE_SHIM,
            &[
                ("entrypoint", entrypoint.as_str()),
                ("entrypoint_func", opts.kind_option_str("entrypointFunc").unwrap_or_default()),
            ],
        )?;
        let params = serde_json::to_string(&opts.param_values)?;
        let (cleanup, shim_path) = write_shim(&root, opts, "shim.mjs", &shim).await?;
        Ok(PreparedRun {
            argv: vec![display(&bin), display(&shim_path), params],
            cleanup: Some(cleanup),
            std_api_request: None,
        })
    }
}
