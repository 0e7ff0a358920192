use super::api::{FbWindow, HardwareStrings, LibraryRenderer, PostCallback, RendererApi, StreamMode};
use super::error::RenderError;
use super::library::DynamicLibrary;

use libc::c_void;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, warn};

/// Size of the endpoint address buffer handed to the renderer.
const ADDRESS_CAPACITY: usize = 256;

const TRANSLATOR_VENDOR: &str = "Google";
const TRANSLATOR_RENDERER: &str = "Android Emulator OpenGL ES Translator";

#[cfg(target_pointer_width = "64")]
const DEFAULT_LIBRARY: &str = "lib64OpenglRender";

#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_LIBRARY: &str = "libOpenglRender";

static GLOBAL: OnceLock<Result<Arc<RenderBridge>, RenderError>> = OnceLock::new();

/// How the rendering library is located and talked to.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    library: String,
    stream_mode: StreamMode,
}

impl RenderConfig {
    pub fn new() -> Self {
        Self {
            library: DEFAULT_LIBRARY.to_owned(),
            stream_mode: StreamMode::platform(),
        }
    }

    /// Library name or path. The platform extension is optional.
    pub fn library(mut self, name: impl Into<String>) -> Self {
        self.library = name.into();
        self
    }

    pub fn stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = mode;
        self
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct RendererState {
    started: bool,
    address: String,
}

/// Host side of the GPU emulation library.
///
/// The bridge owns the library's entry-point table and the endpoint
/// address the renderer publishes when started. `opengles` pipes connect
/// to that address; see [`RenderService`](super::RenderService).
pub struct RenderBridge {
    api: Box<dyn RendererApi>,
    stream_mode: StreamMode,
    state: Mutex<RendererState>,
}

impl RenderBridge {
    /// Initializes the library behind `api` and selects its transport.
    pub fn new(api: Box<dyn RendererApi>, config: &RenderConfig) -> Result<Self, RenderError> {
        if !api.init_library() {
            return Err(RenderError::Init);
        }

        let stream_mode = match config.stream_mode {
            StreamMode::Win32Pipe => StreamMode::Tcp,
            mode => mode,
        };

        api.set_stream_mode(stream_mode);
        debug!(?stream_mode, "renderer library initialized");

        Ok(Self {
            api,
            stream_mode,
            state: Mutex::new(RendererState::default()),
        })
    }

    /// Loads the library named in `config` and initializes it.
    pub fn load(config: &RenderConfig) -> Result<Self, RenderError> {
        let library = DynamicLibrary::open(&config.library)?;
        let api = LibraryRenderer::load(library)?;

        Self::new(Box::new(api), config)
    }

    /// The process-wide bridge.
    ///
    /// The first call loads the library with `config`; its outcome,
    /// failure included, is returned by every later call and later
    /// configs are ignored.
    pub fn global(config: &RenderConfig) -> Result<Arc<RenderBridge>, RenderError> {
        GLOBAL
            .get_or_init(|| {
                let result = RenderBridge::load(config).map(Arc::new);
                if let Err(err) = &result {
                    warn!(library = %config.library, error = %err, "GPU emulation unavailable");
                }
                result
            })
            .clone()
    }

    fn state(&self) -> MutexGuard<'_, RendererState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.stream_mode
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Starts the renderer. Calling it again once started does nothing.
    pub fn start(&self, width: i32, height: i32) -> Result<(), RenderError> {
        let mut state = self.state();
        if state.started {
            return Ok(());
        }

        let mut address = [0u8; ADDRESS_CAPACITY];
        if !self.api.init_renderer(width, height, &mut address) {
            return Err(RenderError::Start);
        }

        let len = address.iter().position(|&b| b == 0).unwrap_or(address.len());
        state.address = String::from_utf8_lossy(&address[..len]).into_owned();
        state.started = true;

        debug!(width, height, address = %state.address, "renderer started");
        Ok(())
    }

    /// Stops a running renderer and forgets its address.
    pub fn stop(&self) {
        let mut state = self.state();
        if !state.started {
            return;
        }

        if !self.api.stop() {
            warn!("renderer reported a failure while stopping");
        }

        *state = RendererState::default();
        debug!("renderer stopped");
    }

    /// Strings describing the host GPU, empty until started.
    ///
    /// When the renderer is the stock GLES-to-GL translator, each string
    /// is reduced to the underlying driver's part in parentheses.
    pub fn hardware_strings(&self) -> HardwareStrings {
        if !self.is_started() {
            debug!("hardware strings requested before renderer start");
            return HardwareStrings::default();
        }

        let strings = self.api.hardware_strings();

        if strings.vendor.starts_with(TRANSLATOR_VENDOR)
            && strings.renderer.starts_with(TRANSLATOR_RENDERER)
        {
            HardwareStrings {
                vendor: extract_base_string(&strings.vendor),
                renderer: extract_base_string(&strings.renderer),
                version: extract_base_string(&strings.version),
            }
        } else {
            strings
        }
    }

    /// Installs or clears the framebuffer post callback.
    ///
    /// # Safety
    ///
    /// `context` must stay valid for as long as `callback` is installed.
    pub unsafe fn set_post_callback(&self, callback: Option<PostCallback>, context: *mut c_void) {
        unsafe { self.api.set_post_callback(callback, context) }
    }

    /// Attaches the renderer's output to a region of a host window.
    pub fn show_window(
        &self,
        window: FbWindow,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        rotation: f32,
    ) -> Result<(), RenderError> {
        if !self.is_started() {
            return Err(RenderError::NotStarted);
        }

        if self.api.create_subwindow(window, x, y, width, height, rotation) {
            Ok(())
        } else {
            Err(RenderError::Window)
        }
    }

    pub fn hide_window(&self) {
        if self.is_started() {
            self.api.destroy_subwindow();
        }
    }

    pub fn redraw_window(&self) {
        if self.is_started() {
            self.api.repaint();
        }
    }

    pub fn set_rotation(&self, rotation: f32) {
        if self.is_started() {
            self.api.set_rotation(rotation);
        }
    }

    /// Endpoint address published by the running renderer.
    pub fn server_path(&self) -> Option<String> {
        let state = self.state();
        (!state.address.is_empty()).then(|| state.address.clone())
    }

    /// Copies the endpoint address into `buffer` as a C string.
    ///
    /// The copy is truncated to fit and always NUL-terminated; an empty
    /// buffer is left untouched. Returns the number of bytes copied, not
    /// counting the terminator.
    pub fn copy_server_path(&self, buffer: &mut [u8]) -> usize {
        if buffer.is_empty() {
            return 0;
        }

        let state = self.state();
        let bytes = state.address.as_bytes();
        let len = bytes.len().min(buffer.len() - 1);

        buffer[..len].copy_from_slice(&bytes[..len]);
        buffer[len] = 0;
        len
    }
}

/// `"foo (bar)"` becomes `"bar"`: everything between the first `(` and
/// the last `)`. Strings without both are returned unchanged.
fn extract_base_string(s: &str) -> String {
    match (s.find('('), s.rfind(')')) {
        (Some(begin), Some(end)) if end > begin => s[begin + 1..end].to_owned(),
        (Some(_), Some(_)) => String::new(),
        _ => s.to_owned(),
    }
}
