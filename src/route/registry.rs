//! Route table
//!
//! Entries are ordered by pattern length, longest first, so the most
//! specific literal pattern wins among several that match. Ties keep
//! insertion order.
//!
//! Readers load the current snapshot and scan it lock-free. Writers
//! serialize on a mutex, build the next table from a copy and publish it
//! with a single store, so a traversal only ever sees a complete table.

use super::{Error, Invoke, Result, RouteKind, ServiceLibraries};
use crate::config::RouteConfig;
use crate::http::HttpContext;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use regex::bytes::Regex;
use std::fmt;
use std::sync::Arc;

/// A compiled pattern bound to a service library
#[derive(Clone)]
pub struct RouteEntry {
    pattern: Regex,
    name: String,
    kind: RouteKind,
    library: String,
}

impl RouteEntry {
    pub fn new(pattern: &str, name: &str, kind: RouteKind, library: &str) -> Result<Self> {
        Ok(RouteEntry {
            pattern: Regex::new(pattern)?,
            name: name.to_string(),
            kind,
            library: library.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    /// True when the pattern is found anywhere in `path`
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path.as_bytes())
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern())
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("library", &self.library)
            .finish()
    }
}

type Table = Vec<Arc<RouteEntry>>;

/// Pattern to handler bindings shared by every worker thread of a process
pub struct RouteRegistry {
    table: ArcSwap<Table>,
    writer: Mutex<()>,
    services: ServiceLibraries,
}

impl RouteRegistry {
    pub fn new(services: ServiceLibraries) -> Self {
        RouteRegistry {
            table: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            services,
        }
    }

    /// Build a registry from configured routes
    pub fn from_config(routes: &[RouteConfig], services: ServiceLibraries) -> Result<Self> {
        let registry = RouteRegistry::new(services);
        for route in routes {
            registry.add(&route.pattern, &route.name, route.kind, &route.library)?;
        }
        Ok(registry)
    }

    pub fn services(&self) -> &ServiceLibraries {
        &self.services
    }

    /// Compile `pattern` and insert the entry by specificity
    ///
    /// A failed compile leaves the table unchanged.
    pub fn add(&self, pattern: &str, name: &str, kind: RouteKind, library: &str) -> Result<()> {
        let entry = RouteEntry::new(pattern, name, kind, library)?;
        self.add_entry(entry)
    }

    pub fn add_entry(&self, entry: RouteEntry) -> Result<()> {
        self.mutate(|table| insert(table, entry))
    }

    /// Replace every entry named `name` with `entry` in one step
    ///
    /// Readers see either the old entries or the new one, never neither.
    pub fn update(&self, name: &str, entry: RouteEntry) -> Result<()> {
        self.mutate(|table| {
            table.retain(|e| e.name != name);
            insert(table, entry)
        })
    }

    /// Remove every entry named `name`; returns how many were removed
    pub fn erase(&self, name: &str) -> usize {
        let mut removed = 0;
        // the closure never fails
        let _ = self.mutate(|table| {
            let before = table.len();
            table.retain(|e| e.name != name);
            removed = before - table.len();
            Ok(())
        });
        removed
    }

    /// First entry, in stored order, whose pattern matches `path`
    pub fn dispatch(&self, path: &str) -> Option<Arc<RouteEntry>> {
        self.table.load().iter().find(|e| e.matches(path)).cloned()
    }

    /// Dispatch `path` and run the matching native handler
    ///
    /// The symbol is the final segment of `path`.
    pub fn invoke(&self, path: &str, ctx: &mut HttpContext) -> Invoke {
        let entry = match self.dispatch(path) {
            Some(entry) => entry,
            None => return Invoke::NotFound,
        };
        if entry.kind != RouteKind::Native {
            return Invoke::Unsupported;
        }

        let symbol = symbol_name(path);
        if symbol.is_empty() {
            return Invoke::NotFound;
        }
        self.services.call(self, &entry.library, symbol, ctx)
    }

    /// Snapshot of the current table
    pub fn routes(&self) -> Arc<Table> {
        self.table.load_full()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Table) -> Result<()>,
    {
        let _guard = self.writer.lock();
        let mut next: Table = self.table.load().as_ref().clone();
        f(&mut next)?;
        self.table.store(Arc::new(next));
        Ok(())
    }
}

impl fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRegistry")
            .field("routes", &self.routes())
            .field("services", &self.services)
            .finish()
    }
}

fn insert(table: &mut Table, entry: RouteEntry) -> Result<()> {
    if table
        .iter()
        .any(|e| e.name == entry.name && e.pattern() == entry.pattern())
    {
        let pattern = entry.pattern().to_string();
        return Err(Error::Existed {
            name: entry.name,
            pattern,
        });
    }

    let len = entry.pattern().len();
    let pos = table
        .iter()
        .position(|e| e.pattern().len() < len)
        .unwrap_or(table.len());
    table.insert(pos, Arc::new(entry));
    Ok(())
}

/// Final path segment after the last `/`
fn symbol_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}
