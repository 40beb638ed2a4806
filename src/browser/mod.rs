/// Browser glue, compiled for wasm32 only

pub mod background;
pub mod bridge;
pub mod page;
