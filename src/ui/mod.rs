//! Terminal interface: probable-duplicate groups on the left, members of the
//! highlighted group on the right.

pub mod app;
mod draw;

pub use app::App;
