//! HTTP request handlers.

pub mod files;
pub mod webdav;

pub use files::{
    copy_node, create_folder, delete_node, download, list_children, move_node, not_found,
    rename_node, upload,
};
pub use webdav::webdav_dispatch;
