//! Rebuilds whenever a migration file changes, which `sqlx::migrate!()`
//! needs to notice schema changes without a `cargo clean`.

/// Main build script entry point.
///
/// Tells Cargo to rerun the build when files in the migrations directory change,
/// which is required for the `SQLx` migration system to work properly.
fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
