//! Concrete installation backends.

pub mod apt;
pub mod chroot;
pub mod dnf;
pub mod windows;

pub use apt::Apt;
pub use chroot::Chroot;
pub use dnf::{Dnf, ToolGeneration};
pub use windows::Windows;
