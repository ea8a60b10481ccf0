//! SDL2 window surface.
//! Streams each decoded frame into a texture and lets SDL scale it to the
//! window. Only built with the `sdl2-display` feature.

use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

use super::surface::RenderSurface;
use crate::error::StreamError;
use crate::frame::{DecodedFrame, PixelFormat};

fn surface_err(e: impl std::fmt::Display) -> StreamError {
    StreamError::Surface(e.to_string())
}

pub struct Sdl2Surface {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
}

impl Sdl2Surface {
    pub fn new(sdl_context: &sdl2::Sdl, title: &str, width: u32, height: u32) -> Result<Self, StreamError> {
        let video_subsystem = sdl_context.video().map_err(surface_err)?;

        let window = video_subsystem
            .window(title, width, height)
            .position_centered()
            .resizable()
            .build()
            .map_err(surface_err)?;

        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(surface_err)?;
        let texture_creator = canvas.texture_creator();
        info!("SDL2 window {}x{} ready", width, height);

        Ok(Self {
            canvas,
            texture_creator,
        })
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), StreamError> {
        self.canvas.window_mut().set_title(title).map_err(surface_err)
    }
}

impl RenderSurface for Sdl2Surface {
    fn present(&mut self, frame: &DecodedFrame) -> Result<(), StreamError> {
        let pixels = &frame.pixels;
        let format = match pixels.format {
            PixelFormat::Rgb24 => PixelFormatEnum::RGB24,
            PixelFormat::Rgba32 => PixelFormatEnum::ABGR8888,
        };

        let mut texture = self
            .texture_creator
            .create_texture_streaming(format, pixels.width, pixels.height)
            .map_err(surface_err)?;
        texture
            .update(None, &pixels.data, pixels.stride())
            .map_err(surface_err)?;

        self.canvas.clear();
        self.canvas.copy(&texture, None, None).map_err(surface_err)?;
        self.canvas.present();
        Ok(())
    }
}
