use super::error::RenderError;

use libc::{RTLD_NOW, c_void, dlclose, dlerror, dlopen, dlsym};
use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr::NonNull;

use tracing::debug;

#[cfg(target_vendor = "apple")]
const EXTENSION: &str = "dylib";

#[cfg(not(target_vendor = "apple"))]
const EXTENSION: &str = "so";

/// A shared library loaded with `dlopen(3)`.
///
/// The library stays mapped until the value is dropped, so symbols
/// returned by [`symbol`](Self::symbol) must not outlive it.
#[derive(Debug)]
pub struct DynamicLibrary {
    handle: NonNull<c_void>,
    name: String,
}

// dlopen handles may be used from any thread; dlsym is thread-safe.
unsafe impl Send for DynamicLibrary {}
unsafe impl Sync for DynamicLibrary {}

impl DynamicLibrary {
    /// Loads `name`, resolving every symbol immediately.
    ///
    /// The platform extension is appended when the file name has none,
    /// so `"libfoo"` loads `libfoo.so` on Linux and `libfoo.dylib` on
    /// macOS.
    pub fn open(name: &str) -> Result<Self, RenderError> {
        let name = with_extension(name);

        let path = CString::new(name.as_str()).map_err(|_| RenderError::Load {
            name: name.clone(),
            reason: "library name contains a NUL byte".to_owned(),
        })?;

        let handle = unsafe { dlopen(path.as_ptr(), RTLD_NOW) };

        match NonNull::new(handle) {
            Some(handle) => {
                debug!(library = %name, "loaded shared library");
                Ok(Self { handle, name })
            }
            None => Err(RenderError::Load {
                name,
                reason: last_error(),
            }),
        }
    }

    /// Looks up `symbol`, returning `None` when it is not exported.
    pub fn symbol(&self, symbol: &str) -> Option<NonNull<c_void>> {
        let symbol = CString::new(symbol).ok()?;

        NonNull::new(unsafe { dlsym(self.handle.as_ptr(), symbol.as_ptr()) })
    }

    /// File name the library was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DynamicLibrary {
    fn drop(&mut self) {
        unsafe { dlclose(self.handle.as_ptr()) };
    }
}

fn with_extension(name: &str) -> String {
    let has_dot = Path::new(name)
        .file_name()
        .is_some_and(|file| file.to_string_lossy().contains('.'));

    if has_dot {
        name.to_owned()
    } else {
        format!("{name}.{EXTENSION}")
    }
}

fn last_error() -> String {
    let message = unsafe { dlerror() };
    if message.is_null() {
        return "unknown dynamic loader error".to_owned();
    }

    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}
