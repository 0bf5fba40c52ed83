//! Inlining of `#include "..."` directives into a single header.
//!
//! Quoted includes are resolved against the directory of the file that
//! contains them and replaced by the included file's lines. Each path is
//! emitted at most once per [`HeaderInliner`], so a header reached along
//! several include chains appears only where it is first reached. Every
//! other line, system includes among them, is copied through unchanged.

use log::{debug, trace};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const INCLUDE_PREFIX: &str = "#include \"";

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Could not open header {}.", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed writing output: {0}")]
    Write(#[from] io::Error),
}

/// Writes headers with their quoted includes expanded in place.
pub struct HeaderInliner<W: Write> {
    done: HashSet<PathBuf>,
    out: W,
}

impl<W: Write> HeaderInliner<W> {
    pub fn new(out: W) -> Self {
        Self { done: HashSet::new(), out }
    }

    /// Emit `header`, unless this inliner has emitted it already.
    pub fn inline(&mut self, header: impl AsRef<Path>) -> Result<(), HeaderError> {
        let header = header.as_ref();
        if !self.done.insert(header.to_path_buf()) {
            trace!("{} already inlined", header.display());
            return Ok(());
        }
        debug!("inlining {}", header.display());

        let file = File::open(header).map_err(|source| HeaderError::Open { path: header.to_path_buf(), source })?;
        let dir = header.parent().unwrap_or_else(|| Path::new(""));
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|source| HeaderError::Read { path: header.to_path_buf(), source })?;
            if n == 0 {
                break;
            }
            match line.strip_prefix(INCLUDE_PREFIX.as_bytes()) {
                Some(rest) => {
                    let end = rest.iter().position(|&b| matches!(b, b'"' | b'\r' | b'\n')).unwrap_or(rest.len());
                    let name = String::from_utf8_lossy(&rest[..end]).into_owned();
                    self.inline(dir.join(name))?;
                }
                None => self.out.write_all(&line)?,
            }
        }
        Ok(())
    }

    /// Whether `header` has been emitted.
    pub fn is_done(&self, header: impl AsRef<Path>) -> bool {
        self.done.contains(header.as_ref())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Inline every header in `headers`, in order, into `out`.
pub fn inline_headers<W, P>(headers: &[P], out: W) -> Result<W, HeaderError>
where
    W: Write,
    P: AsRef<Path>,
{
    let mut inliner = HeaderInliner::new(out);
    for header in headers {
        inliner.inline(header)?;
    }
    let mut out = inliner.into_inner();
    out.flush()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_system_includes_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.h");
        fs::write(&a, "#include <stdio.h>\nint a;\n").unwrap();
        let out = inline_headers(&[&a], Vec::new()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "#include <stdio.h>\nint a;\n");
    }

    #[test]
    fn test_includes_resolve_against_includer() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.h"), "int inner;\n").unwrap();
        fs::write(dir.path().join("sub/mid.h"), "#include \"inner.h\"\nint mid;\n").unwrap();
        let top = dir.path().join("top.h");
        fs::write(&top, "#include \"sub/mid.h\"\nint top;\n").unwrap();

        let mut inliner = HeaderInliner::new(Vec::new());
        inliner.inline(&top).unwrap();
        assert!(inliner.is_done(dir.path().join("sub").join("inner.h")));
        let text = String::from_utf8(inliner.into_inner()).unwrap();
        assert_eq!(text, "int inner;\nint mid;\nint top;\n");
    }

    #[test]
    fn test_non_utf8_lines_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.h"), b"int b; /* \xa9 */\n").unwrap();
        let a = dir.path().join("a.h");
        fs::write(&a, b"// caf\xe9\n#include \"b.h\"\r\nint a;\n").unwrap();
        let out = inline_headers(&[&a], Vec::new()).unwrap();
        assert_eq!(out, b"// caf\xe9\nint b; /* \xa9 */\nint a;\n".to_vec());
    }

    #[test]
    fn test_missing_header_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.h");
        fs::write(&a, "#include \"gone.h\"\n").unwrap();
        let err = inline_headers(&[&a], Vec::new()).unwrap_err();
        let expected = format!("Could not open header {}.", dir.path().join("gone.h").display());
        assert_eq!(err.to_string(), expected);
    }
}
