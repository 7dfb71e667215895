use std::fmt::Write as _; // import without risk of name clashing

/// Combines the messages of an error and its sources into a [`String`] of the form `"error: source 1: source 2: root error"`
pub fn error_full_message(err: &dyn std::error::Error) -> String {
    let mut full_msg = err.to_string();
    let mut curr_err = err.source();
    while let Some(curr_source) = curr_err {
        let _ = write!(full_msg, ": {curr_source}");
        curr_err = curr_source.source();
    }
    full_msg
}
