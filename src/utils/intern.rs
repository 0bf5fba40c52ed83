//! Name interning for Vars and generated identifiers.

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use string_interner::{backend::StringBackend, DefaultSymbol, StringInterner, Symbol as _};

type Names = StringInterner<StringBackend<DefaultSymbol>>;

/// An interned name. Equal names intern to equal symbols.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// The interned text.
    pub fn as_string(&self) -> String {
        resolve(*self).unwrap_or_else(|| format!("sym{}", self.0))
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

static NAMES: Lazy<RwLock<Names>> = Lazy::new(|| RwLock::new(Names::new()));

/// Counter behind `unique_name`.
static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Intern `name`, shared by every thread in the process.
pub fn intern(name: &str) -> Symbol {
    let mut names = NAMES.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    Symbol(names.get_or_intern(name).to_usize() as u32)
}

/// The name behind `sym`, if it was interned in this process.
pub fn resolve(sym: Symbol) -> Option<String> {
    let names = NAMES.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    names.resolve(DefaultSymbol::try_from_usize(sym.0 as usize)?).map(str::to_string)
}

/// Generate a process-unique name with the given prefix, e.g. `v12`.
///
/// Names made here contain a `$` so they never collide with user names
/// that happen to share the prefix.
pub fn unique_name(prefix: &str) -> String {
    let n = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}${}", prefix, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning() {
        let a = intern("blur_x");
        assert_eq!(a, intern("blur_x"));
        assert_ne!(a, intern("blur_y"));
        assert_eq!(resolve(a).as_deref(), Some("blur_x"));
        assert_eq!(a.to_string(), "blur_x");
    }

    #[test]
    fn test_unique_names() {
        let a = unique_name("v");
        let b = unique_name("v");
        assert_ne!(a, b);
        assert!(a.starts_with("v$"));
    }
}
