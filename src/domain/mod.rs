// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe what the system works with:
// caption examples, model-level errors and the traits the
// data and application layers program against.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// An (image, prompt, target caption) training example
pub mod caption;

// Typed model errors that callers can match on
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
