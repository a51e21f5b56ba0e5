//! Generic runner for emulated machines.
//!
//! Provides the main window, input handling, and run loop for any
//! Machine. Pointer position and button state are forwarded in native
//! display coordinates for light-gun support.

use crate::audio::AudioOutput;
use emu_core::{KeyCode, Machine};
use pixels::{Pixels, SurfaceTexture};
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::KeyCode as WinitKeyCode;
use winit::keyboard::PhysicalKey;
use winit::window::{Window, WindowId};

/// Configuration for the runner.
pub struct RunnerConfig {
    /// Window title.
    pub title: String,
    /// Integer scale factor for sharp pixels.
    pub scale: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            title: "Emulator".to_string(),
            scale: 3,
        }
    }
}

/// Run an emulated machine with the given configuration.
pub fn run<M: Machine + 'static>(machine: M, config: RunnerConfig) {
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = Runner::new(machine, config);
    event_loop.run_app(&mut runner).expect("Event loop error");
}

/// Generic runner that handles the window and main loop for a Machine.
pub struct Runner<M: Machine> {
    machine: M,
    config: RunnerConfig,
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    audio_output: Option<AudioOutput>,
    audio_samples: Vec<f32>,
    frame_count: u32,
    start_time: Instant,
    /// Machine errors are reported once, not every frame.
    reported_error: Option<String>,
}

impl<M: Machine> Runner<M> {
    /// Create a new runner for the given machine.
    pub fn new(machine: M, config: RunnerConfig) -> Self {
        Self {
            machine,
            config,
            window: None,
            pixels: None,
            audio_output: None,
            audio_samples: Vec::new(),
            frame_count: 0,
            start_time: Instant::now(),
            reported_error: None,
        }
    }

    /// Translate a window-space pointer position to native display
    /// coordinates.
    fn pointer_to_native(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let window = self.window.as_ref()?;
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return None;
        }
        let video = self.machine.video_config();
        let nx = (x / f64::from(size.width) * f64::from(video.width)) as u32;
        let ny = (y / f64::from(size.height) * f64::from(video.height)) as u32;
        Some((nx.min(video.width - 1), ny.min(video.height - 1)))
    }
}

impl<M: Machine> ApplicationHandler for Runner<M> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Create window on first resume
        if self.window.is_some() {
            return;
        }

        let video_config = self.machine.video_config();
        let scaled_width = video_config.width * self.config.scale;
        let scaled_height = video_config.height * self.config.scale;

        let window = Arc::new(
            event_loop
                .create_window(
                    Window::default_attributes()
                        .with_title(self.config.title.clone())
                        .with_inner_size(LogicalSize::new(scaled_width, scaled_height)),
                )
                .expect("Failed to create window"),
        );

        let size = window.inner_size();
        let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
        let pixels = Pixels::new(video_config.width, video_config.height, surface)
            .expect("Failed to create pixels");

        let audio_config = self.machine.audio_config();
        let audio_output =
            AudioOutput::new(audio_config.sample_rate, audio_config.samples_per_frame);
        if audio_output.is_none() {
            log::warn!("no audio device available, sound disabled");
        }

        self.window = Some(window);
        // SAFETY: pixels' surface borrows the window, which lives for
        // the program duration behind the Arc
        self.pixels = Some(unsafe {
            std::mem::transmute::<Pixels<'_>, Pixels<'static>>(pixels)
        });
        self.audio_output = audio_output;
        self.start_time = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Some(pixels) = &mut self.pixels {
                        pixels.resize_surface(size.width, size.height).ok();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => {
                            if keycode == WinitKeyCode::Escape {
                                event_loop.exit();
                                return;
                            }
                            if keycode == WinitKeyCode::F5 && !event.repeat {
                                self.machine.reset();
                                return;
                            }
                            if !event.repeat {
                                if let Some(key) = convert_keycode(keycode) {
                                    self.machine.key_down(key);
                                }
                            }
                        }
                        ElementState::Released => {
                            if let Some(key) = convert_keycode(keycode) {
                                self.machine.key_up(key);
                            }
                        }
                    }
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                if let Some((x, y)) = self.pointer_to_native(position.x, position.y) {
                    self.machine.pointer_move(x, y);
                }
            }

            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.machine.pointer_button(state == ElementState::Pressed);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Some(pixels) = &mut self.pixels {
                    if pixels.render().is_err() {
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Skip if window not yet created
        if self.window.is_none() {
            return;
        }

        // Run one frame
        if let Err(e) = self.machine.run_frame() {
            if self.reported_error.as_deref() != Some(&e) {
                log::error!("machine stopped: {e}");
                self.reported_error = Some(e);
            }
        }

        // Output audio (this blocks for pacing against the device)
        self.audio_samples.clear();
        self.machine.drain_audio(&mut self.audio_samples);
        if let Some(audio) = &mut self.audio_output {
            audio.push_samples(&self.audio_samples);
        }

        // Render to pixels buffer
        if let Some(pixels) = &mut self.pixels {
            self.machine.render(pixels.frame_mut());
        }
        self.frame_count = self.frame_count.wrapping_add(1);

        // Request redraw
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Convert winit KeyCode to our internal KeyCode.
fn convert_keycode(keycode: WinitKeyCode) -> Option<KeyCode> {
    match keycode {
        // Letters
        WinitKeyCode::KeyA => Some(KeyCode::KeyA),
        WinitKeyCode::KeyB => Some(KeyCode::KeyB),
        WinitKeyCode::KeyC => Some(KeyCode::KeyC),
        WinitKeyCode::KeyD => Some(KeyCode::KeyD),
        WinitKeyCode::KeyE => Some(KeyCode::KeyE),
        WinitKeyCode::KeyF => Some(KeyCode::KeyF),
        WinitKeyCode::KeyG => Some(KeyCode::KeyG),
        WinitKeyCode::KeyH => Some(KeyCode::KeyH),
        WinitKeyCode::KeyI => Some(KeyCode::KeyI),
        WinitKeyCode::KeyJ => Some(KeyCode::KeyJ),
        WinitKeyCode::KeyK => Some(KeyCode::KeyK),
        WinitKeyCode::KeyL => Some(KeyCode::KeyL),
        WinitKeyCode::KeyM => Some(KeyCode::KeyM),
        WinitKeyCode::KeyN => Some(KeyCode::KeyN),
        WinitKeyCode::KeyO => Some(KeyCode::KeyO),
        WinitKeyCode::KeyP => Some(KeyCode::KeyP),
        WinitKeyCode::KeyQ => Some(KeyCode::KeyQ),
        WinitKeyCode::KeyR => Some(KeyCode::KeyR),
        WinitKeyCode::KeyS => Some(KeyCode::KeyS),
        WinitKeyCode::KeyT => Some(KeyCode::KeyT),
        WinitKeyCode::KeyU => Some(KeyCode::KeyU),
        WinitKeyCode::KeyV => Some(KeyCode::KeyV),
        WinitKeyCode::KeyW => Some(KeyCode::KeyW),
        WinitKeyCode::KeyX => Some(KeyCode::KeyX),
        WinitKeyCode::KeyY => Some(KeyCode::KeyY),
        WinitKeyCode::KeyZ => Some(KeyCode::KeyZ),

        // Numbers
        WinitKeyCode::Digit0 => Some(KeyCode::Digit0),
        WinitKeyCode::Digit1 => Some(KeyCode::Digit1),
        WinitKeyCode::Digit2 => Some(KeyCode::Digit2),
        WinitKeyCode::Digit3 => Some(KeyCode::Digit3),
        WinitKeyCode::Digit4 => Some(KeyCode::Digit4),
        WinitKeyCode::Digit5 => Some(KeyCode::Digit5),
        WinitKeyCode::Digit6 => Some(KeyCode::Digit6),
        WinitKeyCode::Digit7 => Some(KeyCode::Digit7),
        WinitKeyCode::Digit8 => Some(KeyCode::Digit8),
        WinitKeyCode::Digit9 => Some(KeyCode::Digit9),

        // Modifiers and specials
        WinitKeyCode::ShiftLeft => Some(KeyCode::ShiftLeft),
        WinitKeyCode::ShiftRight => Some(KeyCode::ShiftRight),
        WinitKeyCode::Enter => Some(KeyCode::Enter),
        WinitKeyCode::Space => Some(KeyCode::Space),
        WinitKeyCode::Tab => Some(KeyCode::Tab),
        WinitKeyCode::Escape => Some(KeyCode::Escape),

        // Arrow keys
        WinitKeyCode::ArrowUp => Some(KeyCode::ArrowUp),
        WinitKeyCode::ArrowDown => Some(KeyCode::ArrowDown),
        WinitKeyCode::ArrowLeft => Some(KeyCode::ArrowLeft),
        WinitKeyCode::ArrowRight => Some(KeyCode::ArrowRight),

        _ => None,
    }
}
