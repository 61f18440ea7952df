//! Tests for the segment module.
//!
//! Each file targets one concern: basic round-trips, multi-chunk records,
//! corruption handling, and boundary/edge cases from the block-alignment
//! math. All tests use `tempfile::TempDir` so segment files are ephemeral.
