//! Key/value configuration port.

/// Sectioned key/value lookup. Values that must be validated are read as
/// raw strings so the caller can report what was wrong with them.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Falls back to `default` when the key is missing or not a boolean.
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}
