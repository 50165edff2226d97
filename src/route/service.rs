//! Service handlers
//!
//! A route names a library path; the final request path segment names the
//! symbol inside it. Libraries are looked up in an in-process table first.
//! When plugins are enabled, an unknown library path is opened as a shared
//! object for the duration of a single call.

use super::{Invoke, RouteRegistry};
use crate::http::HttpContext;
use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_int;
use std::sync::Arc;

/// A callable service
///
/// Returns 0 on success; any other value is reported as a service error.
pub trait ServiceHandler: Send + Sync {
    fn call(&self, registry: &RouteRegistry, ctx: &mut HttpContext) -> i32;
}

impl<F> ServiceHandler for F
where
    F: Fn(&RouteRegistry, &mut HttpContext) -> i32 + Send + Sync,
{
    fn call(&self, registry: &RouteRegistry, ctx: &mut HttpContext) -> i32 {
        self(registry, ctx)
    }
}

/// Symbol shape exported by a plugin library
pub type ServiceFn = unsafe extern "C" fn(*const RouteRegistry, *mut HttpContext) -> c_int;

/// Library path -> symbol -> handler
#[derive(Default, Clone)]
pub struct ServiceLibraries {
    libraries: HashMap<String, HashMap<String, Arc<dyn ServiceHandler>>>,
    plugins: bool,
}

impl ServiceLibraries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as `symbol` of `library`
    pub fn register<F>(&mut self, library: &str, symbol: &str, handler: F)
    where
        F: Fn(&RouteRegistry, &mut HttpContext) -> i32 + Send + Sync + 'static,
    {
        self.register_handler(library, symbol, Arc::new(handler));
    }

    pub fn register_handler(
        &mut self,
        library: &str,
        symbol: &str,
        handler: Arc<dyn ServiceHandler>,
    ) {
        self.libraries
            .entry(library.to_string())
            .or_default()
            .insert(symbol.to_string(), handler);
    }

    /// Allow unknown library paths to be loaded from disk
    pub fn enable_plugins(&mut self, enabled: bool) {
        self.plugins = enabled;
    }

    pub fn plugins_enabled(&self) -> bool {
        self.plugins
    }

    pub fn contains_library(&self, library: &str) -> bool {
        self.libraries.contains_key(library)
    }

    /// Resolve and run `symbol` from `library`
    pub fn call(
        &self,
        registry: &RouteRegistry,
        library: &str,
        symbol: &str,
        ctx: &mut HttpContext,
    ) -> Invoke {
        if let Some(symbols) = self.libraries.get(library) {
            return match symbols.get(symbol) {
                Some(handler) => outcome(handler.call(registry, ctx)),
                None => Invoke::NotFound,
            };
        }

        if !self.plugins {
            return Invoke::NoSuchLibrary;
        }

        let plugin = match Plugin::open(library) {
            Some(plugin) => plugin,
            None => return Invoke::NoSuchLibrary,
        };
        match plugin.symbol(symbol) {
            // SAFETY: plugins export `ServiceFn`; both pointers outlive the call
            // and the library stays mapped until `plugin` is dropped below.
            Some(func) => outcome(unsafe { func(registry, ctx) }),
            None => Invoke::NotFound,
        }
    }
}

impl std::fmt::Debug for ServiceLibraries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut libraries: Vec<_> = self.libraries.keys().collect();
        libraries.sort();
        f.debug_struct("ServiceLibraries")
            .field("libraries", &libraries)
            .field("plugins", &self.plugins)
            .finish()
    }
}

fn outcome(code: i32) -> Invoke {
    if code == 0 {
        Invoke::Ok
    } else {
        Invoke::ServiceError(code)
    }
}

/// A shared object opened for one call; closed on drop
struct Plugin {
    handle: *mut c_void,
}

impl Plugin {
    fn open(path: &str) -> Option<Plugin> {
        let path = CString::new(path).ok()?;
        // SAFETY: `path` is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return None;
        }
        Some(Plugin { handle })
    }

    fn symbol(&self, name: &str) -> Option<ServiceFn> {
        let name = CString::new(name).ok()?;
        // SAFETY: `handle` came from a successful dlopen and is still open.
        let sym = unsafe { libc::dlsym(self.handle, name.as_ptr()) };
        if sym.is_null() {
            return None;
        }
        // SAFETY: non-null symbol; the plugin ABI requires `ServiceFn` shape.
        Some(unsafe { std::mem::transmute::<*mut c_void, ServiceFn>(sym) })
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        // SAFETY: `handle` is open and dropped exactly once.
        if unsafe { libc::dlclose(self.handle) } != 0 {
            // SAFETY: dlerror returns null or a valid C string.
            let err = unsafe { libc::dlerror() };
            if !err.is_null() {
                let msg = unsafe { CStr::from_ptr(err) };
                tracing::warn!("dlclose failed: {}", msg.to_string_lossy());
            }
        }
    }
}
