use super::error::RenderError;
use super::library::DynamicLibrary;

use libc::{c_char, c_float, c_int, c_uchar, c_void};
use std::ffi::CStr;
use std::{mem, ptr};

/// Native window handle accepted by the renderer.
///
/// An X11 `Window` (always 32 bits on the wire) on Linux and the BSDs,
/// an `NSView*` on macOS.
#[cfg(target_vendor = "apple")]
pub type FbWindow = *mut c_void;

#[cfg(not(target_vendor = "apple"))]
pub type FbWindow = u32;

/// Framebuffer post callback:
/// `(context, width, height, ydir, format, type, pixels)`.
pub type PostCallback = unsafe extern "C" fn(
    context: *mut c_void,
    width: c_int,
    height: c_int,
    ydir: c_int,
    format: c_int,
    kind: c_int,
    pixels: *mut c_uchar,
);

/// Transport the renderer uses for its wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// Let the library pick.
    Default,
    Tcp,
    Unix,
    /// Never selected; the library has no support for it.
    Win32Pipe,
}

impl StreamMode {
    /// Value passed to `setStreamMode`.
    pub fn code(self) -> i32 {
        match self {
            StreamMode::Default => 0,
            StreamMode::Tcp => 1,
            StreamMode::Unix => 2,
            StreamMode::Win32Pipe => 3,
        }
    }

    /// The fastest transport the host supports.
    pub fn platform() -> Self {
        if cfg!(unix) {
            StreamMode::Unix
        } else {
            StreamMode::Tcp
        }
    }
}

/// Vendor, renderer and version strings reported by the host GPU.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HardwareStrings {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
}

/// Entry points of a rendering library.
///
/// [`LibraryRenderer`] forwards to a loaded shared library. Tests and
/// embedders can provide any other implementation.
pub trait RendererApi: Send + Sync {
    /// Returns `false` when the library cannot run on this host.
    fn init_library(&self) -> bool;

    fn set_stream_mode(&self, mode: StreamMode);

    /// Starts the renderer and writes its NUL-terminated endpoint address
    /// into `address`.
    fn init_renderer(&self, width: i32, height: i32, address: &mut [u8]) -> bool;

    fn hardware_strings(&self) -> HardwareStrings;

    /// Installs or clears (`None`) the framebuffer post callback.
    ///
    /// # Safety
    ///
    /// `context` must stay valid for as long as `callback` is installed.
    unsafe fn set_post_callback(&self, callback: Option<PostCallback>, context: *mut c_void);

    fn create_subwindow(
        &self,
        window: FbWindow,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        rotation: f32,
    ) -> bool;

    fn destroy_subwindow(&self) -> bool;

    fn set_rotation(&self, rotation: f32);

    fn repaint(&self);

    fn stop(&self) -> bool;
}

/// Symbols a rendering library must export, in resolution order.
pub const REQUIRED_SYMBOLS: [&str; 10] = [
    "initLibrary",
    "setStreamMode",
    "initOpenGLRenderer",
    "getHardwareStrings",
    "setPostCallback",
    "createOpenGLSubwindow",
    "destroyOpenGLSubwindow",
    "setOpenGLDisplayRotation",
    "repaintOpenGLDisplay",
    "stopOpenGLRenderer",
];

type InitLibraryFn = unsafe extern "C" fn() -> c_int;
type SetStreamModeFn = unsafe extern "C" fn(mode: c_int) -> c_int;
type InitRendererFn =
    unsafe extern "C" fn(width: c_int, height: c_int, addr: *mut c_char, len: usize) -> c_int;
type HardwareStringsFn = unsafe extern "C" fn(
    vendor: *mut *const c_char,
    renderer: *mut *const c_char,
    version: *mut *const c_char,
);
type SetPostCallbackFn = unsafe extern "C" fn(callback: Option<PostCallback>, context: *mut c_void);
type CreateSubwindowFn = unsafe extern "C" fn(
    window: FbWindow,
    x: c_int,
    y: c_int,
    width: c_int,
    height: c_int,
    rotation: c_float,
) -> c_int;
type DestroySubwindowFn = unsafe extern "C" fn() -> c_int;
type SetRotationFn = unsafe extern "C" fn(rotation: c_float);
type RepaintFn = unsafe extern "C" fn();
type StopFn = unsafe extern "C" fn() -> c_int;

/// [`RendererApi`] backed by a dynamically loaded library.
///
/// Every entry point is resolved up front; a library missing any of
/// them is rejected as a whole.
pub struct LibraryRenderer {
    init_library: InitLibraryFn,
    set_stream_mode: SetStreamModeFn,
    init_renderer: InitRendererFn,
    hardware_strings: HardwareStringsFn,
    set_post_callback: SetPostCallbackFn,
    create_subwindow: CreateSubwindowFn,
    destroy_subwindow: DestroySubwindowFn,
    set_rotation: SetRotationFn,
    repaint: RepaintFn,
    stop: StopFn,

    // Keeps the function pointers above mapped.
    _library: DynamicLibrary,
}

impl LibraryRenderer {
    /// Resolves the entry-point table from `library`.
    pub fn load(library: DynamicLibrary) -> Result<Self, RenderError> {
        let [
            init_library,
            set_stream_mode,
            init_renderer,
            hardware_strings,
            set_post_callback,
            create_subwindow,
            destroy_subwindow,
            set_rotation,
            repaint,
            stop,
        ] = REQUIRED_SYMBOLS;

        // SAFETY: each type alias matches the C prototype of the symbol
        // it is resolved from.
        unsafe {
            Ok(Self {
                init_library: resolve(&library, init_library)?,
                set_stream_mode: resolve(&library, set_stream_mode)?,
                init_renderer: resolve(&library, init_renderer)?,
                hardware_strings: resolve(&library, hardware_strings)?,
                set_post_callback: resolve(&library, set_post_callback)?,
                create_subwindow: resolve(&library, create_subwindow)?,
                destroy_subwindow: resolve(&library, destroy_subwindow)?,
                set_rotation: resolve(&library, set_rotation)?,
                repaint: resolve(&library, repaint)?,
                stop: resolve(&library, stop)?,
                _library: library,
            })
        }
    }
}

/// Resolves `name` as a function pointer of type `F`.
///
/// # Safety
///
/// `F` must be an `extern "C"` function pointer type matching the
/// symbol's real signature.
unsafe fn resolve<F: Copy>(library: &DynamicLibrary, name: &'static str) -> Result<F, RenderError> {
    debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());

    let symbol = library
        .symbol(name)
        .ok_or(RenderError::MissingSymbol(name))?;

    Ok(unsafe { mem::transmute_copy::<*mut c_void, F>(&symbol.as_ptr()) })
}

fn owned_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }

    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

impl RendererApi for LibraryRenderer {
    fn init_library(&self) -> bool {
        unsafe { (self.init_library)() != 0 }
    }

    fn set_stream_mode(&self, mode: StreamMode) {
        unsafe { (self.set_stream_mode)(mode.code()) };
    }

    fn init_renderer(&self, width: i32, height: i32, address: &mut [u8]) -> bool {
        unsafe {
            (self.init_renderer)(
                width,
                height,
                address.as_mut_ptr() as *mut c_char,
                address.len(),
            ) != 0
        }
    }

    fn hardware_strings(&self) -> HardwareStrings {
        let mut vendor: *const c_char = ptr::null();
        let mut renderer: *const c_char = ptr::null();
        let mut version: *const c_char = ptr::null();

        unsafe { (self.hardware_strings)(&mut vendor, &mut renderer, &mut version) };

        HardwareStrings {
            vendor: owned_string(vendor),
            renderer: owned_string(renderer),
            version: owned_string(version),
        }
    }

    unsafe fn set_post_callback(&self, callback: Option<PostCallback>, context: *mut c_void) {
        unsafe { (self.set_post_callback)(callback, context) }
    }

    fn create_subwindow(
        &self,
        window: FbWindow,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        rotation: f32,
    ) -> bool {
        unsafe { (self.create_subwindow)(window, x, y, width, height, rotation) != 0 }
    }

    fn destroy_subwindow(&self) -> bool {
        unsafe { (self.destroy_subwindow)() != 0 }
    }

    fn set_rotation(&self, rotation: f32) {
        unsafe { (self.set_rotation)(rotation) }
    }

    fn repaint(&self) {
        unsafe { (self.repaint)() }
    }

    fn stop(&self) -> bool {
        unsafe { (self.stop)() != 0 }
    }
}
