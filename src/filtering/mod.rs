// Region filtering against redaction terms

mod redaction;

pub use redaction::RedactionFilter;
