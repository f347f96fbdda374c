//! The default, filesystem-backed `#include` resolver. `sdlsl_pp` itself
//! only asks "open this path" through the [`sdlsl_pp::IncludeOpen`]
//! closure — it already rejects `..` and absolute paths per
//! [`sdlsl_pp::PpOptions`] before ever calling the closure, and it caps
//! nesting depth on its own. What is left for a real resolver to do is
//! the actual search: a local include (`"foo.h"`) checks the including
//! file's own directory first, then each `-I` path in order; a system
//! include (`<foo.h>`) only checks the search paths, never the
//! including file's directory.

use sdlsl_errors::Session;
use sdlsl_span::Symbol;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("path `{0}` contains a backslash, which is never a valid path separator here")]
    BackslashInPath(String),
    #[error("`{0}` was not found in the including file's directory or any search path")]
    NotFound(String),
    #[error("error reading `{path}`: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

/// Builds an [`sdlsl_pp::IncludeOpen`] closure that resolves includes
/// against real files. `including_file_dir` is the directory a local
/// include is tried against first; pass `None` when the entry source has
/// no filesystem home (e.g. it was supplied as an in-memory string).
pub fn default_include_open<'a>(
    including_file_dir: Option<PathBuf>,
    local_include_paths: Vec<PathBuf>,
    system_include_paths: Vec<PathBuf>,
) -> Box<sdlsl_pp::IncludeOpen<'a>> {
    Box::new(move |name: &str, is_system: bool, sess: &Session| {
        resolve(name, is_system, &including_file_dir, &local_include_paths, &system_include_paths)
            .map(|(path, text)| {
                let sym = sess.intern(&path.to_string_lossy());
                (sym, text)
            })
            .map_err(|e| e.to_string())
    })
}

fn resolve(
    name: &str,
    is_system: bool,
    including_file_dir: &Option<PathBuf>,
    local_include_paths: &[PathBuf],
    system_include_paths: &[PathBuf],
) -> Result<(PathBuf, Rc<str>), IncludeError> {
    if name.contains('\\') {
        return Err(IncludeError::BackslashInPath(name.to_string()));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if !is_system {
        if let Some(dir) = including_file_dir {
            candidates.push(dir.join(name));
        }
        candidates.extend(local_include_paths.iter().map(|p| p.join(name)));
    } else {
        candidates.extend(system_include_paths.iter().map(|p| p.join(name)));
    }

    for candidate in &candidates {
        match std::fs::read_to_string(candidate) {
            Ok(text) => return Ok((candidate.clone(), Rc::from(text.as_str()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(IncludeError::Io { path: candidate.clone(), source }),
        }
    }
    Err(IncludeError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlsl_errors::Session;
    use std::io::Write;

    #[test]
    fn local_include_prefers_including_files_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(dir.path().join("util.sdlsl"), "// top-level\n").unwrap();
        std::fs::write(sub.join("util.sdlsl"), "// nested\n").unwrap();

        let mut open = default_include_open(Some(sub.clone()), vec![dir.path().to_path_buf()], vec![]);
        let sess = Session::new();
        let (_, text) = open("util.sdlsl", false, &sess).unwrap();
        assert!(text.contains("nested"));
    }

    #[test]
    fn falls_back_to_search_path_when_not_next_to_including_file() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let mut f = std::fs::File::create(dir.path().join("shared.sdlsl")).unwrap();
        writeln!(f, "// shared").unwrap();

        let mut open = default_include_open(Some(sub), vec![dir.path().to_path_buf()], vec![]);
        let sess = Session::new();
        let (_, text) = open("shared.sdlsl", false, &sess).unwrap();
        assert!(text.contains("shared"));
    }

    #[test]
    fn system_include_never_checks_including_files_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("only_local.sdlsl"), "// local\n").unwrap();

        let mut open = default_include_open(Some(dir.path().to_path_buf()), vec![], vec![]);
        let sess = Session::new();
        assert!(open("only_local.sdlsl", true, &sess).is_err());
    }

    #[test]
    fn backslash_is_always_rejected() {
        let mut open = default_include_open(None, vec![], vec![]);
        let sess = Session::new();
        let err = open("dir\\file.sdlsl", false, &sess).unwrap_err();
        assert!(err.contains("backslash"));
    }

    #[test]
    fn missing_file_is_a_clean_error() {
        let mut open = default_include_open(None, vec![], vec![]);
        let sess = Session::new();
        assert!(open("nope.sdlsl", false, &sess).is_err());
    }
}
