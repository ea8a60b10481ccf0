pub mod surface;

#[cfg(feature = "sdl2-display")]
pub mod sdl;

pub use surface::{blit_rgba, MemorySurface, RenderSurface};

#[cfg(feature = "sdl2-display")]
pub use sdl::Sdl2Surface;
