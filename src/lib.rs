//! mkinitfs library exports.
//!
//! The binary in `main.rs` is thin glue; everything it composes lives
//! here so integration tests can exercise the pieces directly.

pub mod archive;
pub mod bootdeploy;
pub mod deviceinfo;
pub mod elfdeps;
pub mod filelist;
pub mod osutil;
