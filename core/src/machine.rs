//! Machine abstraction for the emulated console.
//!
//! The `Machine` trait is the seam between the emulator core and the
//! shared runner infrastructure: the runner drives frames, copies pixels,
//! drains audio and forwards input without knowing how the machine works.

/// Video output configuration for a machine.
#[derive(Debug, Clone, Copy)]
pub struct VideoConfig {
    /// Native display width in pixels.
    pub width: u32,
    /// Native display height in pixels.
    pub height: u32,
    /// Frame rate in frames per second.
    pub fps: f32,
}

/// Audio output configuration for a machine.
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Number of sample frames generated per video frame.
    pub samples_per_frame: usize,
}

/// Key codes supported by the emulator.
///
/// A subset of winit's KeyCode so the core crate stays frontend-free.
/// Machines map these to their native input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF,
    KeyG,
    KeyH,
    KeyI,
    KeyJ,
    KeyK,
    KeyL,
    KeyM,
    KeyN,
    KeyO,
    KeyP,
    KeyQ,
    KeyR,
    KeyS,
    KeyT,
    KeyU,
    KeyV,
    KeyW,
    KeyX,
    KeyY,
    KeyZ,

    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,

    ShiftLeft,
    ShiftRight,
    Enter,
    Space,
    Tab,
    Escape,

    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

/// Trait for emulated machines.
pub trait Machine {
    /// Get the video output configuration.
    fn video_config(&self) -> VideoConfig;

    /// Get the audio output configuration.
    fn audio_config(&self) -> AudioConfig;

    /// Execute one frame of emulation.
    fn run_frame(&mut self) -> Result<(), String>;

    /// Render the current display to an RGBA pixel buffer.
    ///
    /// The buffer size should be `width * height * 4` bytes.
    fn render(&mut self, buffer: &mut [u8]);

    /// Drain audio generated since the last call, as interleaved
    /// stereo `f32` samples in [-1, 1).
    fn drain_audio(&mut self, out: &mut Vec<f32>);

    /// Handle a key press event.
    fn key_down(&mut self, key: KeyCode);

    /// Handle a key release event.
    fn key_up(&mut self, key: KeyCode);

    /// Report pointer position in native display coordinates.
    fn pointer_move(&mut self, x: u32, y: u32);

    /// Report pointer button state (light-gun trigger).
    fn pointer_button(&mut self, pressed: bool);

    /// Reset the machine to its initial state.
    fn reset(&mut self);

    /// Load a file into the machine.
    ///
    /// The machine determines the file type from the extension.
    fn load_file(&mut self, path: &str, data: &[u8]) -> Result<(), String>;
}
