// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    ScanOverrides, build_scan_config, exit_code, load_urls_from_file, load_urls_from_source,
    parse_url_line, resolve_db_path,
};
