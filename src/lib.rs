pub mod db;
pub mod utils;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    crate::utils::logging::setup_console_log();
}
