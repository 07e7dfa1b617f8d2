pub mod engine;
pub mod local_index;
pub mod local_watcher;
pub mod locks;
pub mod paths;
pub mod remote;
