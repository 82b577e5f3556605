//! # Fluid Reveal Entry Point
//!
//! Opens a window showing one image; dragging the mouse (or a finger) stirs a
//! fluid whose dye reveals a second image underneath. All setup and event
//! handling lives in the `app` module.

fn main() {
    fluid_reveal::app::run();
}
